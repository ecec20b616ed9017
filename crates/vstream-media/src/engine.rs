//! Media engine abstraction used by the worker pipeline.

use std::path::Path;

use async_trait::async_trait;
use vstream_models::Rung;

use crate::error::MediaResult;
use crate::probe::{probe_video, VideoInfo};
use crate::transcode::{transcode_ladder, HlsSettings};

/// Probing and ladder encoding, as seen by the pipeline.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Inspect `input` without modifying it.
    async fn probe(&self, input: &Path) -> MediaResult<VideoInfo>;

    /// Write `<output_dir>/<h>p/index.m3u8` and its segments for every rung.
    async fn transcode(
        &self,
        input: &Path,
        output_dir: &Path,
        rungs: &[Rung],
        duration_secs: f64,
    ) -> MediaResult<()>;
}

/// [`MediaEngine`] backed by the FFmpeg and FFprobe binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEngine {
    settings: HlsSettings,
}

impl FfmpegEngine {
    pub fn new(settings: HlsSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &HlsSettings {
        &self.settings
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn probe(&self, input: &Path) -> MediaResult<VideoInfo> {
        probe_video(input).await
    }

    async fn transcode(
        &self,
        input: &Path,
        output_dir: &Path,
        rungs: &[Rung],
        duration_secs: f64,
    ) -> MediaResult<()> {
        transcode_ladder(input, output_dir, rungs, &self.settings, duration_secs).await
    }
}
