//! Queue-level terminal status writer.

use std::sync::Arc;

use tracing::{debug, warn};
use vstream_models::{JobId, RungUrl};
use vstream_queue::StatusStore;

use crate::pipeline::JobOutcome;

/// Writes terminal statuses when the queue learns how a job ended.
///
/// A record that is already terminal is left alone, so a late event can never
/// regress a completed job or move a job out of `error`.
#[derive(Clone)]
pub struct QueueObserver {
    status: Arc<dyn StatusStore>,
}

impl QueueObserver {
    pub fn new(status: Arc<dyn StatusStore>) -> Self {
        Self { status }
    }

    pub async fn on_outcome(&self, job_id: &JobId, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Completed { master_url, urls } => {
                self.on_completed(job_id, master_url, urls).await
            }
            JobOutcome::Failed { message } => self.on_failed(job_id, message).await,
            JobOutcome::Skipped { reason } => {
                debug!(job_id = %job_id, reason = %reason, "Skipped run, record left alone")
            }
        }
    }

    pub async fn on_completed(&self, job_id: &JobId, master_url: &str, urls: &[RungUrl]) {
        if !self.writable(job_id).await {
            return;
        }
        if let Err(e) = self.status.complete(job_id, master_url, urls).await {
            warn!(job_id = %job_id, error = %e, "Observer failed to record completion");
        }
    }

    pub async fn on_failed(&self, job_id: &JobId, message: &str) {
        if !self.writable(job_id).await {
            return;
        }
        if let Err(e) = self.status.fail(job_id, message).await {
            warn!(job_id = %job_id, error = %e, "Observer failed to record failure");
        }
    }

    /// Only existing, non-terminal records are written.
    async fn writable(&self, job_id: &JobId) -> bool {
        match self.status.get(job_id).await {
            Ok(Some(record)) if record.is_terminal() => {
                debug!(job_id = %job_id, status = %record.status, "Record already terminal");
                false
            }
            Ok(Some(_)) => true,
            Ok(None) => {
                warn!(job_id = %job_id, "No status record to update");
                false
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Observer could not read status record");
                false
            }
        }
    }
}
