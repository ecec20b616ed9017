//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Duplicate job: {0}")]
    Duplicate(String),

    #[error("Invalid status record: {0}")]
    InvalidRecord(String),

    #[error("Status transition rejected: {from} -> {to}")]
    RejectedTransition { from: String, to: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// `from` is `None` when there is no record to move.
    pub fn rejected_transition(from: Option<&str>, to: impl Into<String>) -> Self {
        Self::RejectedTransition {
            from: from.unwrap_or("none").to_string(),
            to: to.into(),
        }
    }

    pub fn is_rejected_transition(&self) -> bool {
        matches!(self, Self::RejectedTransition { .. })
    }
}
