mod config;
mod error;
mod metrics;
mod routes;
mod state;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, LogFormat};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(config.log_format);

    let state = AppState::from_config(&config).await?;
    if let Some(ollama) = &state.ollama {
        let health = ollama.health().await;
        if !health.connected {
            warn!(base_url = %config.llm.base_url, "Ollama is not reachable; extraction will fail until it is");
        } else if !health.model_available {
            warn!(model = %health.model, available = ?health.available_models, "Configured model is not pulled");
        } else {
            info!(model = %health.model, "Ollama ready");
        }
    }

    let app = routes::build_router(Arc::new(state));

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Server listening on http://{address}");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
