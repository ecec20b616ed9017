//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use vstream_media::HlsSettings;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Maximum concurrent object uploads per job
    pub max_upload_parallel: usize,
    /// Root of job-scoped scratch directories
    pub work_dir: PathBuf,
    /// How often the worker scans for jobs whose lease expired
    pub claim_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Port of the Prometheus scrape endpoint, disabled when unset
    pub metrics_port: Option<u16>,
    /// Encoder settings shared by every rung
    pub hls: HlsSettings,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            max_upload_parallel: 8,
            work_dir: PathBuf::from("/tmp/vstream"),
            claim_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(60),
            metrics_port: None,
            hls: HlsSettings::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut hls = defaults.hls;
        if let Some(seconds) = env_parse::<u32>("HLS_SEGMENT_SECONDS").filter(|s| *s > 0) {
            hls.segment_seconds = seconds;
        }

        Self {
            max_concurrent_jobs: env_parse::<usize>("WORKER_MAX_JOBS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            max_upload_parallel: env_parse::<usize>("WORKER_MAX_UPLOAD_PARALLEL")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_upload_parallel),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            metrics_port: env_parse("METRICS_PORT"),
            hls,
        }
    }

    /// Scratch directory owned by one job.
    pub fn job_scratch_dir(&self, job_id: &str) -> PathBuf {
        self.work_dir.join(job_id)
    }
}
