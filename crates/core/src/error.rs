/// Errors surfaced to callers of the job gateway and retrieval surface.
///
/// Backend failures never reach this type: they are absorbed by the
/// orchestrator and recorded as a failed job.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Another job is currently running; the caller may retry later.
    #[error("A job is already running. Please wait until it finishes.")]
    Busy,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Internal(err.to_string())
    }
}
