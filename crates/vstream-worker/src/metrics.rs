//! Prometheus metrics for the worker.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "vstream_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vstream_jobs_failed_total";
    pub const TRANSCODE_DURATION_SECONDS: &str = "vstream_transcode_duration_seconds";
    pub const UPLOAD_DURATION_SECONDS: &str = "vstream_upload_duration_seconds";
    pub const FILES_UPLOADED_TOTAL: &str = "vstream_files_uploaded_total";
}

/// Install the Prometheus recorder and serve `/metrics` on `port`.
///
/// Must be called from within the tokio runtime.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Record job completed.
pub fn record_job_completed(rungs: usize) {
    let labels = [("rungs", rungs.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
}

/// Record job failed, labelled by the stage that failed.
pub fn record_job_failed(reason: &'static str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Record the wall time of one ladder encode.
pub fn record_transcode_duration(rungs: usize, duration_secs: f64) {
    let labels = [("rungs", rungs.to_string())];
    histogram!(names::TRANSCODE_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record upload duration.
pub fn record_upload_duration(duration_secs: f64) {
    histogram!(names::UPLOAD_DURATION_SECONDS).record(duration_secs);
}

pub fn record_files_uploaded(count: usize) {
    counter!(names::FILES_UPLOADED_TOTAL).increment(count as u64);
}
