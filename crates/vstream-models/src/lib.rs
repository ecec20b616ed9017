//! Shared data models for the vstream backend.
//!
//! This crate provides Serde-serializable types for:
//! - Transcode jobs handed over by the upload layer
//! - Resolution rungs of the streaming ladder
//! - The per-job status record polled by clients

pub mod job;
pub mod job_status;
pub mod rung;

// Re-export common types
pub use job::{JobId, TranscodeJob};
pub use job_status::{JobStatus, RungUrl, StatusRecord};
pub use rung::Rung;
