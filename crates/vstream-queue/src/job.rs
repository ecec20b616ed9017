//! Queue envelope.

use serde::{Deserialize, Serialize};
use vstream_models::{JobId, TranscodeJob};

/// Payload stored in the `job` field of a stream entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    /// Encode one uploaded source into an HLS ladder
    Transcode(TranscodeJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::Transcode(j) => &j.job_id,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::Transcode(j) => j.idempotency_key(),
        }
    }
}

impl From<TranscodeJob> for QueueJob {
    fn from(job: TranscodeJob) -> Self {
        QueueJob::Transcode(job)
    }
}
