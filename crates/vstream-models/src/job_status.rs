//! Job status record for progress tracking and polling.
//!
//! The record is the only channel through which clients observe a job. It is
//! written field by field, so every type here has a stable string form.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pipeline milestone of a job.
///
/// Variants are declared in pipeline order; `Error` is terminal and may be
/// entered from any non-terminal state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is queued waiting for a worker
    #[default]
    Queued,
    /// Input is being probed and the ladder built
    CheckingResolution,
    /// Rungs are being encoded and uploaded
    ProcessingAndUploading,
    /// Master playlist is being written
    GeneratingMaster,
    /// Master playlist is being uploaded
    UploadingMaster,
    /// Every rung and the master are online
    Completed,
    /// Job failed with an error
    Error,
}

impl JobStatus {
    /// Every state in pipeline order.
    pub const PIPELINE: [JobStatus; 6] = [
        JobStatus::Queued,
        JobStatus::CheckingResolution,
        JobStatus::ProcessingAndUploading,
        JobStatus::GeneratingMaster,
        JobStatus::UploadingMaster,
        JobStatus::Completed,
    ];

    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::CheckingResolution => "checking_resolution",
            JobStatus::ProcessingAndUploading => "processing_and_uploading",
            JobStatus::GeneratingMaster => "generating_master",
            JobStatus::UploadingMaster => "uploading_master",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// Parse the string form written to the status store.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "checking_resolution" => Some(JobStatus::CheckingResolution),
            "processing_and_uploading" => Some(JobStatus::ProcessingAndUploading),
            "generating_master" => Some(JobStatus::GeneratingMaster),
            "uploading_master" => Some(JobStatus::UploadingMaster),
            "completed" => Some(JobStatus::Completed),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    /// Coarse progress milestone for this state.
    ///
    /// Returns `None` for `Error`: a failed job keeps the last milestone it reached.
    pub fn progress(&self) -> Option<u8> {
        match self {
            JobStatus::Queued => Some(0),
            JobStatus::CheckingResolution => Some(5),
            JobStatus::ProcessingAndUploading
            | JobStatus::GeneratingMaster
            | JobStatus::UploadingMaster => Some(20),
            JobStatus::Completed => Some(100),
            JobStatus::Error => None,
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    fn rank(&self) -> Option<usize> {
        Self::PIPELINE.iter().position(|s| s == self)
    }

    /// Whether moving from `self` to `next` respects the state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to > from,
            (None, Some(_)) => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Public playlist URL of one rung.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RungUrl {
    /// Rung label, e.g. `1080p`
    pub rung: String,
    /// Externally resolvable URL of the rung's `index.m3u8`
    pub url: String,
}

/// Externally readable per-job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    /// Current pipeline milestone
    pub status: JobStatus,
    /// Progress milestone (0-100)
    pub progress: u8,
    /// Error message, empty unless the job failed
    #[serde(default)]
    pub error: String,
    /// Master playlist URL, set only once completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_url: Option<String>,
    /// Per-rung playlist URLs in ascending order, set only once completed
    #[serde(default)]
    pub urls: Vec<RungUrl>,
    /// When the job was submitted
    pub created_at: DateTime<Utc>,
}

impl StatusRecord {
    /// Record written at submission time.
    pub fn queued(created_at: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Queued,
            progress: 0,
            error: String::new(),
            master_url: None,
            urls: Vec::new(),
            created_at,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to a non-terminal milestone.
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        if let Some(progress) = status.progress() {
            self.progress = progress;
        }
    }

    /// Mark job as completed.
    pub fn complete(&mut self, master_url: impl Into<String>, urls: Vec<RungUrl>) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.error.clear();
        self.master_url = Some(master_url.into());
        self.urls = urls;
    }

    /// Mark job as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Error;
        self.error = error.into();
        self.master_url = None;
        self.urls.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_record_creation() {
        let record = StatusRecord::queued(Utc::now());
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.progress, 0);
        assert!(record.error.is_empty());
        assert!(!record.is_terminal());
    }

    #[test]
    fn test_progress_milestones() {
        let progress: Vec<_> = JobStatus::PIPELINE
            .iter()
            .map(|s| s.progress().unwrap())
            .collect();
        assert_eq!(progress, vec![0, 5, 20, 20, 20, 100]);
        assert_eq!(JobStatus::Error.progress(), None);
    }

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::CheckingResolution));
        assert!(JobStatus::GeneratingMaster.can_transition_to(JobStatus::UploadingMaster));
        assert!(JobStatus::UploadingMaster.can_transition_to(JobStatus::Error));
        assert!(!JobStatus::ProcessingAndUploading.can_transition_to(JobStatus::CheckingResolution));
        assert!(!JobStatus::Error.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Error));
    }

    #[test]
    fn test_fail_keeps_last_milestone() {
        let mut record = StatusRecord::queued(Utc::now());
        record.set_status(JobStatus::ProcessingAndUploading);
        record.fail("boom");

        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.progress, 20);
        assert_eq!(record.error, "boom");
        assert!(record.master_url.is_none());
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in JobStatus::PIPELINE.iter().chain([JobStatus::Error].iter()) {
            assert_eq!(JobStatus::parse(status.as_str()), Some(*status));
        }
        assert_eq!(JobStatus::parse("processing"), None);
    }

    #[test]
    fn test_record_json_uses_camel_case() {
        let mut record = StatusRecord::queued(Utc::now());
        record.complete(
            "https://cdn.example.com/j/index.m3u8",
            vec![RungUrl {
                rung: "360p".into(),
                url: "https://cdn.example.com/j/360p/index.m3u8".into(),
            }],
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["masterUrl"], "https://cdn.example.com/j/index.m3u8");
        assert_eq!(json["urls"][0]["rung"], "360p");
        assert!(json.get("createdAt").is_some());
    }
}
