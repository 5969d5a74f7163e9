use thiserror::Error;

/// Paper-level failures; everything below a paper is absorbed into stats.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("paper not found: {0}")]
    PaperNotFound(String),

    #[error("paper has no raw text: {0}")]
    MissingText(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl PipelineError {
    /// True for failures caused by the caller's request rather than the system.
    pub fn is_precondition(&self) -> bool {
        matches!(self, PipelineError::PaperNotFound(_) | PipelineError::MissingText(_))
    }
}
