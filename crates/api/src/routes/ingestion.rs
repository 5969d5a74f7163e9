use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use pipeline::Job;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArxivRequest {
    arxiv_id: Option<String>,
    #[serde(default)]
    auto_process: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    #[serde(default)]
    arxiv_ids: Vec<String>,
    #[serde(default)]
    auto_process: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Queued {
    job_id: String,
    arxiv_id: Option<String>,
    status: &'static str,
}

#[derive(Serialize)]
pub struct BulkQueued {
    jobs: Vec<Queued>,
}

pub async fn ingest_arxiv(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ArxivRequest>,
) -> ApiResult<(StatusCode, Json<Queued>)> {
    let arxiv_id = request
        .arxiv_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("arxivId is required".to_string()))?;

    let job = state.ingestor.submit_arxiv(&arxiv_id, request.auto_process);
    Ok((
        StatusCode::ACCEPTED,
        Json(Queued {
            job_id: job.id().to_string(),
            arxiv_id: Some(arxiv_id.trim().to_string()),
            status: "queued",
        }),
    ))
}

pub async fn ingest_bulk(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BulkRequest>,
) -> ApiResult<(StatusCode, Json<BulkQueued>)> {
    if request.arxiv_ids.iter().all(|id| id.trim().is_empty()) {
        return Err(ApiError::BadRequest("arxivIds must not be empty".to_string()));
    }

    let jobs = state
        .ingestor
        .submit_bulk(&request.arxiv_ids, request.auto_process)
        .into_iter()
        .map(|job| Queued {
            arxiv_id: job.snapshot().and_then(|j| j.arxiv_id),
            job_id: job.id().to_string(),
            status: "queued",
        })
        .collect();
    Ok((StatusCode::ACCEPTED, Json(BulkQueued { jobs })))
}

pub async fn job_status(State(state): State<Arc<AppState>>, Path(job_id): Path<String>) -> ApiResult<Json<Job>> {
    state
        .ingestor
        .jobs()
        .get(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))
}
