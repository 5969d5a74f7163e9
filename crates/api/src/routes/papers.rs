use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use index::{NewPaper, Page, Paper, ProcessingStatus};
use pipeline::ProcessingStats;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::metrics::TimedOperation;
use crate::state::AppState;

const DEFAULT_PAPER_LIMIT: usize = 20;

#[derive(Deserialize)]
pub struct PageQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Serialize)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl From<Page> for Pagination {
    fn from(page: Page) -> Self {
        Self {
            limit: page.limit,
            offset: page.offset,
        }
    }
}

#[derive(Serialize)]
pub struct PaperList {
    papers: Vec<Paper>,
    pagination: Pagination,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperStatus {
    paper_id: String,
    status: ProcessingStatus,
    progress: u8,
    processed: bool,
    error: Option<String>,
}

pub async fn list_papers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<PaperList>> {
    let page = Page::new(query.limit.unwrap_or(DEFAULT_PAPER_LIMIT), query.offset.unwrap_or(0));
    let papers = state.store.list_papers(page).await?;
    Ok(Json(PaperList {
        papers,
        pagination: page.into(),
    }))
}

pub async fn create_paper(
    State(state): State<Arc<AppState>>,
    Json(paper): Json<NewPaper>,
) -> ApiResult<(StatusCode, Json<Paper>)> {
    if paper.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Title is required".to_string()));
    }
    let created = state.store.create_paper(paper).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_paper(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Paper>> {
    find_paper(&state, &id).await.map(Json)
}

pub async fn paper_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<PaperStatus>> {
    let paper = find_paper(&state, &id).await?;
    Ok(Json(PaperStatus {
        paper_id: paper.id,
        status: paper.status,
        progress: paper.progress,
        processed: paper.processed,
        error: paper.error,
    }))
}

pub async fn process_paper(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProcessingStats>> {
    let timer = TimedOperation::start();
    match state.processor.process_paper(&id).await {
        Ok(stats) => {
            state.metrics.record_processing(&stats, timer.elapsed());
            Ok(Json(stats))
        }
        Err(err) => {
            state.metrics.record_processing_failure();
            Err(err.into())
        }
    }
}

pub async fn reprocess_paper(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProcessingStats>> {
    let timer = TimedOperation::start();
    match state.processor.reprocess_paper(&id).await {
        Ok(stats) => {
            state.metrics.record_processing(&stats, timer.elapsed());
            Ok(Json(stats))
        }
        Err(err) => {
            state.metrics.record_processing_failure();
            Err(err.into())
        }
    }
}

async fn find_paper(state: &AppState, id: &str) -> ApiResult<Paper> {
    state
        .store
        .get_paper(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Paper not found".to_string()))
}
