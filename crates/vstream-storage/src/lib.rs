//! Cloudflare R2 storage client.
//!
//! This crate provides:
//! - File upload to R2 (any S3-compatible endpoint)
//! - Public URL resolution for uploaded objects
//! - Bounded concurrent upload of whole file sets
//! - The [`ObjectStore`] seam used by the worker pipeline

pub mod client;
pub mod error;
pub mod operations;

pub use client::{ObjectStore, R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use operations::{content_type_for, list_files, upload_files, UploadItem};
