mod graph;
mod ingestion;
mod papers;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use extract::OllamaHealth;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::metrics::MetricsSnapshot;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    store: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    llm: Option<OllamaHealth>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let papers = Router::new()
        .route("/", get(papers::list_papers).post(papers::create_paper))
        .route("/:id", get(papers::get_paper))
        .route("/:id/status", get(papers::paper_status))
        .route("/:id/process", post(papers::process_paper))
        .route("/:id/reprocess", post(papers::reprocess_paper));

    let graph = Router::new()
        .route("/nodes", get(graph::list_nodes))
        .route("/nodes/:id", get(graph::get_node))
        .route("/edges", get(graph::list_edges))
        .route("/subgraph", get(graph::subgraph))
        .route("/stats", get(graph::stats))
        .route("/queries/provenance/:edge_id", get(graph::provenance))
        .route("/queries/relationships", get(graph::relationships))
        .route("/queries/datasets", get(graph::datasets))
        .route("/queries/related", get(graph::related));

    let ingestion = Router::new()
        .route("/arxiv", post(ingestion::ingest_arxiv))
        .route("/bulk", post(ingestion::ingest_bulk))
        .route("/status/:job_id", get(ingestion::job_status));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .nest("/api/papers", papers)
        .nest("/api/graph", graph)
        .nest("/api/ingest", ingestion)
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn track_requests(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    state.metrics.record_request(!response.status().is_server_error());
    response
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = match state.store.count_papers().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    };
    let llm = match &state.ollama {
        Some(client) => Some(client.health().await),
        None => None,
    };

    let healthy = store == "ok" && llm.as_ref().is_none_or(|h| h.connected);
    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        store,
        llm,
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, StatusCode, header};
    use extract::ScriptedCompletion;
    use index::InMemoryGraphStore;
    use ingest::{ExtractedText, TextFetcher};
    use pipeline::PipelineConfig;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    struct StaticFetcher(Option<&'static str>);

    #[async_trait]
    impl TextFetcher for StaticFetcher {
        async fn fetch_and_extract(&self, url: &str) -> Result<ExtractedText> {
            match self.0 {
                Some(text) => Ok(ExtractedText {
                    text: text.to_string(),
                    page_count: 3,
                }),
                None => bail!("HTTP 404 from {url}"),
            }
        }
    }

    fn app_with(fetcher: StaticFetcher) -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::new(
            Arc::new(InMemoryGraphStore::new()),
            Arc::new(ScriptedCompletion::new()),
            Arc::new(fetcher),
            PipelineConfig::default().unpaced(),
        ));
        (build_router(state.clone()), state)
    }

    fn app() -> Router {
        app_with(StaticFetcher(Some("Abstract\n\nWe present FastSplat."))).0
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_store() {
        let (status, body) = send(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"], "ok");
        assert!(body.get("llm").is_none());
    }

    #[tokio::test]
    async fn paper_lifecycle() {
        let app = app();

        let (status, _) = send(&app, Method::POST, "/api/papers", Some(json!({ "title": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, created) = send(
            &app,
            Method::POST,
            "/api/papers",
            Some(json!({ "title": "FastSplat", "rawText": "We present FastSplat, evaluated on NeRF-Synthetic." })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();
        assert!(created.get("rawText").is_none());

        let (status, list) = send(&app, Method::GET, "/api/papers", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["papers"].as_array().unwrap().len(), 1);
        assert_eq!(list["pagination"]["limit"], 20);

        let (status, processed) = send(&app, Method::POST, &format!("/api/papers/{id}/process"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(processed["chunksProcessed"], 1);

        let (status, paper_status) = send(&app, Method::GET, &format!("/api/papers/{id}/status"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(paper_status["status"], "completed");
        assert_eq!(paper_status["progress"], 100);
        assert_eq!(paper_status["processed"], true);
    }

    #[tokio::test]
    async fn processing_preconditions_map_to_status_codes() {
        let app = app();
        let (_, created) = send(&app, Method::POST, "/api/papers", Some(json!({ "title": "No text" }))).await;
        let id = created["id"].as_str().unwrap();

        let (status, body) = send(&app, Method::POST, &format!("/api/papers/{id}/process"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("raw text"));

        let (status, _) = send(&app, Method::POST, "/api/papers/missing/reprocess", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::GET, "/api/papers/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn graph_endpoints_validate_input() {
        let app = app();

        let (status, _) = send(&app, Method::GET, "/api/graph/nodes?type=gadget", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = send(&app, Method::GET, "/api/graph/nodes?type=method&limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["limit"], 5);

        let (status, _) = send(&app, Method::GET, "/api/graph/subgraph", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, Method::GET, "/api/graph/subgraph?nodeId=nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::GET, "/api/graph/nodes/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::GET, "/api/graph/queries/provenance/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::GET, "/api/graph/queries/relationships", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, stats) = send(&app, Method::GET, "/api/graph/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["nodes"]["total"], 0);
    }

    #[tokio::test]
    async fn arxiv_ingestion_runs_as_a_job() {
        let app = app();

        let (status, _) = send(&app, Method::POST, "/api/ingest/arxiv", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, queued) = send(
            &app,
            Method::POST,
            "/api/ingest/arxiv",
            Some(json!({ "arxivId": "2308.04079", "autoProcess": false })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(queued["status"], "queued");
        let job_id = queued["jobId"].as_str().unwrap().to_string();
        assert!(job_id.starts_with("job-"));

        let mut job = Value::Null;
        for _ in 0..50 {
            let (_, body) = send(&app, Method::GET, &format!("/api/ingest/status/{job_id}"), None).await;
            job = body;
            if job["status"] == "completed" || job["status"] == "failed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(job["status"], "completed");
        assert!(job["paperId"].is_string());

        let (status, _) = send(&app, Method::GET, "/api/ingest/status/job-missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bulk_ingestion_skips_blank_ids() {
        let (app, state) = app_with(StaticFetcher(None));

        let (status, _) = send(&app, Method::POST, "/api/ingest/bulk", Some(json!({ "arxivIds": [" "] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/ingest/bulk",
            Some(json!({ "arxivIds": ["2308.04079", "", "2106.09685"] })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["jobs"].as_array().unwrap().len(), 2);
        assert_eq!(state.ingestor.jobs().len(), 2);
    }

    #[tokio::test]
    async fn metrics_count_requests() {
        let app = app();
        send(&app, Method::GET, "/health", None).await;
        send(&app, Method::GET, "/api/papers/missing", None).await;

        let (status, body) = send(&app, Method::GET, "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalRequests"], 2);
        assert_eq!(body["failedRequests"], 0);
    }
}
