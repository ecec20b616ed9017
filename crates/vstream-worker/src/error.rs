//! Worker error types.
//!
//! Every variant's message is what clients read from the status record when a
//! job ends in `error`.

use thiserror::Error;
use vstream_media::{LadderError, MediaError};
use vstream_queue::QueueError;
use vstream_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("{0}")]
    AspectRatio(String),

    #[error("{0}")]
    ResolutionTooLow(String),

    #[error("Transcode failed: {0}")]
    Transcode(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Status update failed: {0}")]
    Status(String),

    #[error("Superseded: {0}")]
    Superseded(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn probe(err: &MediaError) -> Self {
        Self::Probe(err.detail())
    }

    pub fn transcode(err: &MediaError) -> Self {
        Self::Transcode(err.detail())
    }

    pub fn upload(msg: impl Into<String>) -> Self {
        Self::Upload(msg.into())
    }

    pub fn directory(msg: impl Into<String>) -> Self {
        Self::Directory(msg.into())
    }

    /// A write the record refused means another run owns the job.
    pub fn status(err: QueueError) -> Self {
        if err.is_rejected_transition() {
            Self::Superseded(err.to_string())
        } else {
            Self::Status(err.to_string())
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Short stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::Probe(_) => "probe",
            WorkerError::AspectRatio(_) => "aspect_ratio",
            WorkerError::ResolutionTooLow(_) => "resolution_too_low",
            WorkerError::Transcode(_) => "transcode",
            WorkerError::Upload(_) => "upload",
            WorkerError::Directory(_) => "directory",
            WorkerError::Status(_) => "status",
            WorkerError::Superseded(_) => "superseded",
            WorkerError::Queue(_) => "queue",
            WorkerError::Config(_) => "config",
            WorkerError::Io(_) => "io",
        }
    }
}

impl From<LadderError> for WorkerError {
    fn from(err: LadderError) -> Self {
        match err {
            LadderError::AspectRatio { .. } => Self::AspectRatio(err.to_string()),
            LadderError::ResolutionTooLow { .. } => Self::ResolutionTooLow(err.to_string()),
        }
    }
}

impl From<StorageError> for WorkerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConfigError(msg) => Self::Config(msg),
            other => Self::Upload(other.to_string()),
        }
    }
}
