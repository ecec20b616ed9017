//! Redis Streams job queue and status store.
//!
//! This crate provides:
//! - Job enqueueing via Redis Streams with idempotency keys
//! - Consumer-group consumption with lease reclamation and DLQ
//! - Per-job status records stored as Redis hashes

pub mod error;
pub mod job;
pub mod queue;
pub mod status;

pub use error::{QueueError, QueueResult};
pub use job::QueueJob;
pub use queue::{JobQueue, QueueConfig};
pub use status::{RedisStatusStore, StatusStore, STATUS_KEY_PREFIX};
