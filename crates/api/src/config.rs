use anyhow::{Context, Result};
use pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub pdf_max_attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Neo4j,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            timeout_secs: 120,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 10000,
            pdf_max_attempts: 3,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: "password".to_string(),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            "neo4j" => Ok(StoreBackend::Neo4j),
            other => anyhow::bail!("unknown store backend: {other}"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" | "" => Ok(LogFormat::Pretty),
            other => anyhow::bail!("unknown log format: {other}"),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl AppConfig {
    /// Read the process environment, honouring a `.env` file if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from defaults overridden by whatever `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        override_string(&lookup, "HOST", &mut config.server.host);
        override_parsed(&lookup, "PORT", &mut config.server.port)?;

        override_string(&lookup, "OLLAMA_BASE_URL", &mut config.llm.base_url);
        override_string(&lookup, "OLLAMA_MODEL", &mut config.llm.model);
        override_parsed(&lookup, "LLM_TIMEOUT_SECS", &mut config.llm.timeout_secs)?;
        override_parsed(&lookup, "LLM_TEMPERATURE", &mut config.pipeline.temperature)?;
        override_parsed(&lookup, "LLM_RETRIES", &mut config.pipeline.completion_retries)?;

        override_parsed(&lookup, "RETRY_BASE_DELAY_MS", &mut config.retry.base_delay_ms)?;
        override_parsed(&lookup, "RETRY_MULTIPLIER", &mut config.retry.multiplier)?;
        override_parsed(&lookup, "RETRY_MAX_DELAY_MS", &mut config.retry.max_delay_ms)?;
        override_parsed(&lookup, "PDF_MAX_ATTEMPTS", &mut config.retry.pdf_max_attempts)?;

        override_parsed(&lookup, "STORE_BACKEND", &mut config.store.backend)?;
        override_string(&lookup, "NEO4J_URI", &mut config.store.neo4j_uri);
        override_string(&lookup, "NEO4J_USER", &mut config.store.neo4j_user);
        override_string(&lookup, "NEO4J_PASSWORD", &mut config.store.neo4j_password);

        override_parsed(&lookup, "CHUNK_SIZE", &mut config.pipeline.chunk_size)?;
        override_parsed(&lookup, "CHUNK_OVERLAP", &mut config.pipeline.chunk_overlap)?;
        override_parsed(&lookup, "CHUNK_DELAY_MS", &mut config.pipeline.chunk_delay_ms)?;
        override_parsed(&lookup, "CONFIDENCE_FLOOR", &mut config.pipeline.confidence_floor)?;

        override_parsed(&lookup, "LOG_FORMAT", &mut config.log_format)?;

        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn override_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut String) {
    if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
        *target = value.trim().to_string();
    }
}

fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
        *target = value
            .trim()
            .parse()
            .map_err(|e: T::Err| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Invalid value for {key}: {value:?}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
        assert_eq!(config.llm.model, "llama3.1:8b");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.pipeline.chunk_size, 2000);
        assert_eq!(config.pipeline.confidence_floor, 0.4);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("OLLAMA_MODEL", "qwen2.5:7b"),
            ("STORE_BACKEND", "neo4j"),
            ("CHUNK_SIZE", "1500"),
            ("CHUNK_DELAY_MS", "0"),
            ("CONFIDENCE_FLOOR", "0.6"),
            ("LLM_RETRIES", "4"),
            ("LOG_FORMAT", "json"),
            ("NEO4J_PASSWORD", "  "),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.llm.model, "qwen2.5:7b");
        assert_eq!(config.store.backend, StoreBackend::Neo4j);
        assert_eq!(config.store.neo4j_password, "password");
        assert_eq!(config.pipeline.chunk_size, 1500);
        assert_eq!(config.pipeline.chunk_delay_ms, 0);
        assert_eq!(config.pipeline.confidence_floor, 0.6);
        assert_eq!(config.pipeline.completion_retries, 4);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = AppConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(format!("{err:#}").contains("PORT"));

        let err = AppConfig::from_lookup(lookup(&[("STORE_BACKEND", "sqlite")])).unwrap_err();
        assert!(format!("{err:#}").contains("sqlite"));
    }
}
