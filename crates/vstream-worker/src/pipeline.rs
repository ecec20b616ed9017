//! Per-job state machine.
//!
//! `queued -> checking_resolution -> processing_and_uploading -> generating_master
//! -> uploading_master -> completed`, with `error` reachable from any non-terminal
//! state. Every write goes through the status store's transition check; a
//! refused write means another run owns the job and this one stops. Otherwise
//! working directories are removed whatever the outcome.

use std::path::Path;

use tracing::Instrument;
use vstream_media::{build_ladder, master_playlist};
use vstream_models::{JobStatus, Rung, RungUrl, TranscodeJob};

use crate::cleanup::cleanup_job;
use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::transcode::run_transcode_unit;
use crate::upload::{run_upload_unit, upload_master};

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        master_url: String,
        urls: Vec<RungUrl>,
    },
    Failed {
        message: String,
    },
    /// The record was already terminal or refused a write, so another run owns
    /// the job. Nothing was written and nothing was cleaned up.
    Skipped {
        reason: String,
    },
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, JobOutcome::Skipped { .. })
    }
}

/// Run one job to completion.
///
/// Never returns an error: every failure is recorded on the status record and
/// reported as [`JobOutcome::Failed`]. A redelivered job whose record already
/// finished returns [`JobOutcome::Skipped`] without doing any work.
pub async fn run_job(ctx: &PipelineContext, job: &TranscodeJob) -> JobOutcome {
    let logger = JobLogger::new(&job.job_id, "transcode");
    let span = logger.create_span();

    async {
        if let Some(status) = finished_status(ctx, job, &logger).await {
            let reason = format!("record already {}", status);
            logger.log_warning(&format!("skipping redelivered job: {}", reason));
            return JobOutcome::Skipped { reason };
        }

        logger.log_start(&job.original_filename);

        let outcome = match execute(ctx, job, &logger).await {
            Ok((master_url, urls)) => finish(ctx, job, &logger, master_url, urls).await,
            Err(WorkerError::Superseded(reason)) => JobOutcome::Skipped { reason },
            Err(e) => record_failure(ctx, job, &logger, e).await,
        };

        if let JobOutcome::Skipped { reason } = &outcome {
            logger.log_warning(&format!("stopped, record owned elsewhere: {}", reason));
        } else {
            let scratch = ctx.config.job_scratch_dir(job.job_id.as_str());
            cleanup_job(job, &scratch).await;
        }

        outcome
    }
    .instrument(span)
    .await
}

/// Status of a record that already reached a terminal state.
async fn finished_status(
    ctx: &PipelineContext,
    job: &TranscodeJob,
    logger: &JobLogger,
) -> Option<JobStatus> {
    match ctx.status.get(&job.job_id).await {
        Ok(Some(record)) if record.is_terminal() => Some(record.status),
        Ok(_) => None,
        Err(e) => {
            // Guarded writes still keep a finished record intact
            logger.log_warning(&format!("could not read status record: {}", e));
            None
        }
    }
}

async fn finish(
    ctx: &PipelineContext,
    job: &TranscodeJob,
    logger: &JobLogger,
    master_url: String,
    urls: Vec<RungUrl>,
) -> JobOutcome {
    match ctx.status.complete(&job.job_id, &master_url, &urls).await {
        Ok(()) => {
            metrics::record_job_completed(urls.len());
            logger.log_completion(&master_url);
            JobOutcome::Completed { master_url, urls }
        }
        Err(e) => match WorkerError::status(e) {
            WorkerError::Superseded(reason) => JobOutcome::Skipped { reason },
            other => record_failure(ctx, job, logger, other).await,
        },
    }
}

async fn record_failure(
    ctx: &PipelineContext,
    job: &TranscodeJob,
    logger: &JobLogger,
    err: WorkerError,
) -> JobOutcome {
    let message = err.to_string();
    logger.log_error(&message);
    metrics::record_job_failed(err.kind());

    if let Err(e) = ctx.status.fail(&job.job_id, &message).await {
        logger.log_warning(&format!("could not record failure: {}", e));
    }

    JobOutcome::Failed { message }
}

async fn advance(ctx: &PipelineContext, job: &TranscodeJob, status: JobStatus) -> WorkerResult<()> {
    ctx.status
        .set_status(&job.job_id, status)
        .await
        .map_err(WorkerError::status)
}

async fn execute(
    ctx: &PipelineContext,
    job: &TranscodeJob,
    logger: &JobLogger,
) -> WorkerResult<(String, Vec<RungUrl>)> {
    advance(ctx, job, JobStatus::CheckingResolution).await?;

    let info = ctx
        .engine
        .probe(&job.input_path)
        .await
        .map_err(|e| WorkerError::probe(&e))?;
    let rungs = build_ladder(info.width, info.height)?;

    logger.log_progress(&format!(
        "{}x{} source, {} rungs",
        info.width,
        info.height,
        rungs.len()
    ));

    create_rung_dirs(&job.output_dir, &rungs).await?;

    advance(ctx, job, JobStatus::ProcessingAndUploading).await?;
    run_transcode_unit(ctx, job, &rungs, info.duration).await?;
    let urls = run_upload_unit(ctx, job, &rungs).await?;

    advance(ctx, job, JobStatus::GeneratingMaster).await?;
    tokio::fs::write(job.master_playlist_path(), master_playlist(&rungs)).await?;

    advance(ctx, job, JobStatus::UploadingMaster).await?;
    let master_url = upload_master(ctx, job).await?;

    Ok((master_url, urls))
}

async fn create_rung_dirs(output_dir: &Path, rungs: &[Rung]) -> WorkerResult<()> {
    for rung in rungs {
        let dir = rung.output_dir(output_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| WorkerError::directory(format!("{}: {}", dir.display(), e)))?;
    }
    Ok(())
}
