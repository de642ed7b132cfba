use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Model config error: {field}: {reason}")]
    Config { field: String, reason: String },

    #[error("Invalid generation parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Resources exhausted: {0}")]
    ResourceExhausted(String),

    /// The consumer went away. Not an error from the client's point of view.
    #[error("Generation cancelled")]
    Cancelled,

    #[error("Generation worker panicked: {0}")]
    WorkerPanicked(String),
}

impl CoreError {
    /// Errors caused by the request rather than by the model or the host.
    pub fn is_client_error(&self) -> bool {
        matches!(self, CoreError::InvalidParameter { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
