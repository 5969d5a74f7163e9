use anyhow::{Context, Result};
use extract::{CompletionCapability, OllamaClient};
use index::{GraphStore, InMemoryGraphStore, Neo4jGraphStore};
use ingest::{PdfFetcher, RetryPolicy, TextFetcher};
use pipeline::{Ingestor, JobTracker, PaperProcessor, PipelineConfig};
use query::{GraphQueries, SubgraphEngine};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{AppConfig, StoreBackend};
use crate::metrics::Metrics;

pub struct AppState {
    pub store: Arc<dyn GraphStore>,
    pub processor: Arc<PaperProcessor>,
    pub ingestor: Ingestor,
    pub subgraph: SubgraphEngine,
    pub queries: GraphQueries,
    /// Checked by `/health` when the backend is Ollama.
    pub ollama: Option<OllamaClient>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn GraphStore>,
        llm: Arc<dyn CompletionCapability>,
        fetcher: Arc<dyn TextFetcher>,
        pipeline: PipelineConfig,
    ) -> Self {
        let processor = Arc::new(PaperProcessor::new(store.clone(), llm, pipeline));
        Self {
            ingestor: Ingestor::new(store.clone(), fetcher, processor.clone(), JobTracker::new()),
            subgraph: SubgraphEngine::new(store.clone()),
            queries: GraphQueries::new(store.clone()),
            processor,
            store,
            ollama: None,
            metrics: Metrics::new(),
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let store: Arc<dyn GraphStore> = match config.store.backend {
            StoreBackend::Memory => {
                info!("Using in-memory graph store");
                Arc::new(InMemoryGraphStore::new())
            }
            StoreBackend::Neo4j => {
                let store = Neo4jGraphStore::connect(
                    &config.store.neo4j_uri,
                    &config.store.neo4j_user,
                    &config.store.neo4j_password,
                )
                .await?;
                store.ping().await?;
                store.init_schema().await?;
                info!(uri = %config.store.neo4j_uri, "Connected to Neo4j");
                Arc::new(store)
            }
        };

        let ollama = OllamaClient::new(
            config.llm.base_url.as_str(),
            config.llm.model.as_str(),
            Duration::from_secs(config.llm.timeout_secs),
        )?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.llm.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        let pdf_retry = RetryPolicy::new(
            config.retry.pdf_max_attempts,
            config.retry.base_delay(),
            config.retry.multiplier,
            config.retry.max_delay(),
        );
        let fetcher = Arc::new(PdfFetcher::new(http, pdf_retry));

        let mut state = Self::new(store, Arc::new(ollama.clone()), fetcher, config.pipeline.clone());
        state.ollama = Some(ollama);
        Ok(state)
    }
}
