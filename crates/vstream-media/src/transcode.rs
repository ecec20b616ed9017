//! Single-pass HLS ladder encoding.
//!
//! One FFmpeg process decodes the input once, splits the video into one branch
//! per rung and writes every rung as an independent HLS VOD output.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};
use vstream_models::rung::PLAYLIST_FILENAME;
use vstream_models::Rung;

use crate::command::{FfmpegCommand, FfmpegOutput, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Segment file pattern inside each rung directory.
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

/// Encoder settings shared by every rung.
#[derive(Debug, Clone)]
pub struct HlsSettings {
    /// Target segment duration in seconds
    pub segment_seconds: u32,
    /// Video codec
    pub video_codec: String,
    /// Encoder preset
    pub preset: String,
    /// Constant rate factor
    pub crf: u8,
    /// Audio codec
    pub audio_codec: String,
    /// Audio bitrate
    pub audio_bitrate: String,
}

impl Default for HlsSettings {
    fn default() -> Self {
        Self {
            segment_seconds: 6,
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}

/// Filter graph splitting the first video stream into one scaled branch per rung.
fn split_filter(rungs: &[Rung]) -> String {
    let branches: String = (0..rungs.len()).map(|i| format!("[v{}]", i)).collect();
    let mut filter = format!("[0:v]split={}{}", rungs.len(), branches);

    for (i, rung) in rungs.iter().enumerate() {
        filter.push_str(&format!(
            ";[v{i}]scale={}:{},setsar=1[out{i}]",
            rung.width, rung.height
        ));
    }

    filter
}

/// Build the FFmpeg command writing every rung under `output_dir`.
pub fn build_ladder_command(
    input: &Path,
    output_dir: &Path,
    rungs: &[Rung],
    settings: &HlsSettings,
) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(input).filter_complex(split_filter(rungs));

    for (i, rung) in rungs.iter().enumerate() {
        let rung_dir = rung.output_dir(output_dir);
        let segments = rung_dir.join(SEGMENT_PATTERN);

        let output = FfmpegOutput::new(rung_dir.join(PLAYLIST_FILENAME))
            .map(format!("[out{}]", i))
            .map("0:a?")
            .video_codec(settings.video_codec.as_str())
            .preset(settings.preset.as_str())
            .crf(settings.crf)
            .audio_codec(settings.audio_codec.as_str())
            .audio_bitrate(settings.audio_bitrate.as_str())
            .format("hls")
            .args([
                "-hls_time".to_string(),
                settings.segment_seconds.to_string(),
                "-hls_playlist_type".to_string(),
                "vod".to_string(),
                "-hls_segment_filename".to_string(),
                segments.to_string_lossy().to_string(),
            ]);

        cmd = cmd.output(output);
    }

    cmd
}

/// Encode `input` into every rung. Rung directories must already exist.
///
/// `duration_secs` is only used to report progress percentages.
pub async fn transcode_ladder(
    input: &Path,
    output_dir: &Path,
    rungs: &[Rung],
    settings: &HlsSettings,
    duration_secs: f64,
) -> MediaResult<()> {
    if rungs.is_empty() {
        return Err(MediaError::internal("No rungs to encode"));
    }

    let cmd = build_ladder_command(input, output_dir, rungs, settings);
    let total_ms = (duration_secs * 1000.0) as i64;
    let started = Instant::now();

    info!(
        input = %input.display(),
        rungs = rungs.len(),
        "Encoding HLS ladder"
    );

    FfmpegRunner::new()
        .run_with_progress(&cmd, move |progress| {
            debug!(
                percent = %format!("{:.1}", progress.percentage(total_ms)),
                speed = progress.speed,
                "Encode progress"
            );
        })
        .await?;

    info!(
        rungs = rungs.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "HLS ladder encoded"
    );
    Ok(())
}
