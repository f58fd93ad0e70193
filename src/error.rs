use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("no handler registered for job type: {0}")]
    NoHandler(String),

    #[error("job timed out after {0}ms")]
    Timeout(u64),

    #[error("circuit breaker is open for job type: {0}")]
    CircuitOpen(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl JobError {
    /// Stable kind string, matched against the circuit breaker allow-list.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Serialization(_) => "serialization",
            JobError::Store(_) => "store",
            JobError::NoHandler(_) => "no_handler",
            JobError::Timeout(_) => "timeout",
            JobError::CircuitOpen(_) => "circuit_open",
            JobError::Validation(_) => "validation",
            JobError::Handler(_) => "handler",
            JobError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
