//! HLS transcoding worker.
//!
//! This crate provides:
//! - The per-job pipeline: probe, ladder, encode, upload, master playlist
//! - Status tracking and unconditional working-directory cleanup
//! - A bounded job executor over the Redis Streams queue
//! - Graceful shutdown

pub mod cleanup;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod observer;
pub mod pipeline;
pub mod submission;
pub mod transcode;
pub mod upload;

pub use config::WorkerConfig;
pub use context::PipelineContext;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use observer::QueueObserver;
pub use pipeline::{run_job, JobOutcome};
pub use submission::submit_job;
