//! Job submission.

use tracing::warn;
use vstream_models::{StatusRecord, TranscodeJob};
use vstream_queue::{JobQueue, QueueError, QueueJob, StatusStore};

use crate::error::{WorkerError, WorkerResult};

/// Create the queued status record for `job`, then enqueue it.
///
/// Returns the stream message id. A job id that already has a record is
/// rejected without touching that record.
pub async fn submit_job(
    queue: &JobQueue,
    status: &dyn StatusStore,
    job: TranscodeJob,
) -> WorkerResult<String> {
    if status
        .get(&job.job_id)
        .await
        .map_err(WorkerError::status)?
        .is_some()
    {
        return Err(QueueError::Duplicate(job.idempotency_key()).into());
    }

    status
        .create(&job.job_id, &StatusRecord::queued(job.created_at))
        .await
        .map_err(WorkerError::status)?;

    let job_id = job.job_id.clone();
    match queue.enqueue(&QueueJob::Transcode(job)).await {
        Ok(message_id) => Ok(message_id),
        Err(e) => {
            if let Err(status_err) = status.fail(&job_id, &format!("Enqueue failed: {}", e)).await {
                warn!(
                    job_id = %job_id,
                    error = %status_err,
                    "Could not mark unqueued job as failed"
                );
            }
            Err(e.into())
        }
    }
}
