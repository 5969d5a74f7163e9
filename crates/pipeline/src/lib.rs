pub mod config;
pub mod error;
pub mod ingestion;
pub mod jobs;
pub mod processor;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use ingestion::{IngestOutcome, Ingestor};
pub use jobs::{Job, JobHandle, JobTracker};
pub use processor::{ClearedGraph, PaperProcessor, ProcessingStats};
