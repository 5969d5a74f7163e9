use extract::StageOptions;
use ingest::ChunkerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Pause between consecutive chunks of one paper.
    pub chunk_delay_ms: u64,
    /// Existing nodes handed to the resolver.
    pub resolution_sample: usize,
    /// Existing nodes handed to the validator.
    pub validation_sample: usize,
    pub confidence_floor: f64,
    pub max_evidence_chars: usize,
    pub temperature: f32,
    pub completion_retries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            chunk_overlap: 200,
            chunk_delay_ms: 1000,
            resolution_sample: 1000,
            validation_sample: 50,
            confidence_floor: 0.4,
            max_evidence_chars: 1000,
            temperature: 0.3,
            completion_retries: 2,
        }
    }
}

impl PipelineConfig {
    pub fn chunker(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: self.chunk_size,
            overlap: self.chunk_overlap,
        }
    }

    pub fn stage_options(&self) -> StageOptions {
        StageOptions {
            temperature: self.temperature,
            retries: self.completion_retries,
        }
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    /// No pacing, for tests and offline runs.
    pub fn unpaced(mut self) -> Self {
        self.chunk_delay_ms = 0;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"chunk_size": 500}"#).unwrap();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.validation_sample, 50);
        assert_eq!(config.chunk_delay(), Duration::from_secs(1));
        assert_eq!(config.unpaced().chunk_delay(), Duration::ZERO);
    }
}
