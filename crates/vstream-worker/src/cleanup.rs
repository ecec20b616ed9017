//! Working directory removal.

use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, warn};
use vstream_models::TranscodeJob;

/// Remove the job's input, output and scratch directories.
///
/// Missing directories are fine; any other failure is logged and swallowed.
pub async fn cleanup_job(job: &TranscodeJob, scratch_dir: &Path) {
    for dir in [job.input_dir.as_path(), job.output_dir.as_path(), scratch_dir] {
        remove_dir(dir).await;
    }
}

async fn remove_dir(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed working directory"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "Failed to remove working directory"
        ),
    }
}
