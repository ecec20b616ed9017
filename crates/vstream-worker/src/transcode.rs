//! Transcode unit.

use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;
use vstream_models::{Rung, TranscodeJob};

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Encode the whole ladder in an isolated task and wait for it.
///
/// The task's single result is the completion signal. Panics and FFmpeg
/// failures both surface as [`WorkerError::Transcode`].
pub async fn run_transcode_unit(
    ctx: &PipelineContext,
    job: &TranscodeJob,
    rungs: &[Rung],
    duration_secs: f64,
) -> WorkerResult<()> {
    let engine = Arc::clone(&ctx.engine);
    let input = job.input_path.clone();
    let output_dir = job.output_dir.clone();
    let unit_rungs = rungs.to_vec();
    let started = Instant::now();

    let handle = tokio::spawn(
        async move {
            engine
                .transcode(&input, &output_dir, &unit_rungs, duration_secs)
                .await
        }
        .in_current_span(),
    );

    match handle.await {
        Ok(Ok(())) => {
            metrics::record_transcode_duration(rungs.len(), started.elapsed().as_secs_f64());
            Ok(())
        }
        Ok(Err(e)) => Err(WorkerError::transcode(&e)),
        Err(join_err) => Err(WorkerError::Transcode(format!(
            "transcode task aborted: {}",
            join_err
        ))),
    }
}
