//! Job definitions for queue processing.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request to turn one staged upload into an HLS ladder.
///
/// Built by the upload layer once the raw bytes are on local disk. The worker
/// owns the descriptor for the lifetime of the job and removes both working
/// directories when it is done, whatever the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscodeJob {
    /// Unique job ID (also the object storage namespace)
    pub job_id: JobId,
    /// Locally staged input file
    pub input_path: PathBuf,
    /// Working directory holding the staged input
    pub input_dir: PathBuf,
    /// Working directory receiving the encoded ladder
    pub output_dir: PathBuf,
    /// Filename as uploaded by the client
    pub original_filename: String,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl TranscodeJob {
    /// Create a job for an input staged under `input_dir`, writing into `output_dir`.
    pub fn new(
        input_path: impl Into<PathBuf>,
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        original_filename: impl Into<String>,
    ) -> Self {
        Self {
            job_id: JobId::new(),
            input_path: input_path.into(),
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            original_filename: original_filename.into(),
            created_at: Utc::now(),
        }
    }

    /// Use a caller-provided job ID.
    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = job_id;
        self
    }

    /// Path of the master playlist inside the output directory.
    pub fn master_playlist_path(&self) -> PathBuf {
        self.output_dir.join(crate::rung::PLAYLIST_FILENAME)
    }

    /// Input file path.
    pub fn input(&self) -> &Path {
        &self.input_path
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("transcode:{}", self.job_id)
    }
}
