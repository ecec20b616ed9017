//! Shared collaborators of every job.

use std::sync::Arc;

use tracing::info;
use vstream_media::{check_ffmpeg, check_ffprobe, FfmpegEngine, MediaEngine};
use vstream_queue::{RedisStatusStore, StatusStore};
use vstream_storage::{ObjectStore, R2Client};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Everything a job needs besides its descriptor.
///
/// Built once at startup and shared by reference-counted handle; tests swap in
/// in-memory implementations of the three seams.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: WorkerConfig,
    pub engine: Arc<dyn MediaEngine>,
    pub storage: Arc<dyn ObjectStore>,
    pub status: Arc<dyn StatusStore>,
}

impl PipelineContext {
    pub fn new(
        config: WorkerConfig,
        engine: Arc<dyn MediaEngine>,
        storage: Arc<dyn ObjectStore>,
        status: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            config,
            engine,
            storage,
            status,
        }
    }

    /// Wire up FFmpeg, R2 and the Redis status store.
    ///
    /// Fails fast when the FFmpeg tools are missing or the bucket cannot be
    /// reached.
    pub async fn from_env(config: WorkerConfig, redis_url: &str) -> WorkerResult<Self> {
        check_ffmpeg().map_err(|e| WorkerError::config_error(e.to_string()))?;
        check_ffprobe().map_err(|e| WorkerError::config_error(e.to_string()))?;

        let storage = R2Client::from_env().await?;
        storage
            .check_connectivity()
            .await
            .map_err(|e| WorkerError::config_error(e.to_string()))?;
        info!("Object storage reachable");
        let status = RedisStatusStore::new(redis_url)?;
        let engine = FfmpegEngine::new(config.hls.clone());

        Ok(Self::new(
            config,
            Arc::new(engine),
            Arc::new(storage),
            Arc::new(status),
        ))
    }
}
