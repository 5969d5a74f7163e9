use thiserror::Error;

/// Why a completion call produced nothing usable.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Network or availability failure talking to the backend.
    #[error("completion backend unavailable: {0}")]
    Unavailable(String),

    #[error("completion request failed with status {status}")]
    Http { status: u16 },

    /// The backend answered, but the text could not be coerced into JSON.
    #[error("malformed completion output: {0}")]
    Malformed(String),
}

/// A completion parsed as JSON but did not have the stage's shape.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{stage} output did not match the expected shape: {message}")]
    Decode {
        stage: &'static str,
        message: String,
    },
}

impl StageError {
    pub fn decode(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            stage,
            message: message.into(),
        }
    }
}
