#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper for HLS ladder encoding.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple outputs
//! - Progress parsing from `-progress pipe:2`
//! - Resolution probing via FFprobe
//! - Ladder building and master playlist generation
//! - The [`MediaEngine`] seam used by the worker pipeline

pub mod command;
pub mod engine;
pub mod error;
pub mod ladder;
pub mod playlist;
pub mod probe;
pub mod progress;
pub mod transcode;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegOutput, FfmpegRunner};
pub use engine::{FfmpegEngine, MediaEngine};
pub use error::{MediaError, MediaResult};
pub use ladder::{build_ladder, LadderError, LADDER, MIN_DIMENSION};
pub use playlist::{master_playlist, BANDWIDTH_STEP};
pub use probe::{probe_video, VideoInfo};
pub use progress::FfmpegProgress;
pub use transcode::{transcode_ladder, HlsSettings};
