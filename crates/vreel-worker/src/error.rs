//! Worker error taxonomy.
//!
//! Every stage failure lands in one of these variants, and the variant
//! alone determines the retry treatment (see [`crate::retry`]).

use thiserror::Error;

use vreel_clients::ClientError;
use vreel_media::MediaError;
use vreel_models::SceneValidationError;
use vreel_queue::QueueError;
use vreel_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Caller input or external output that can never become valid by
    /// retrying (wrong scene count, rejected request, malformed body).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient failure talking to an external service.
    #[error("External service error: {0}")]
    ExternalService(String),

    /// An external operation did not reach a terminal status within the
    /// polling budget.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Object storage or local artifact IO failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Media compilation failure.
    #[error("Compile error: {0}")]
    Compile(String),

    /// The job observed its cancellation flag and stopped.
    #[error("Job cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<SceneValidationError> for WorkerError {
    fn from(e: SceneValidationError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<ClientError> for WorkerError {
    fn from(e: ClientError) -> Self {
        // Transport and server-side errors are transient; a rejected
        // request or malformed body will not improve on retry.
        if e.is_retryable() {
            Self::ExternalService(e.to_string())
        } else {
            Self::Validation(e.to_string())
        }
    }
}

impl From<MediaError> for WorkerError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::FfmpegNotFound => Self::Config(e.to_string()),
            MediaError::CompileFailed(msg) => Self::Compile(msg),
            MediaError::DownloadFailed(msg) => Self::ExternalService(msg),
            MediaError::Io(io) => Self::Storage(io.to_string()),
        }
    }
}

impl From<StorageError> for WorkerError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<std::io::Error> for WorkerError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
