//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

/// Number of stderr lines kept for error reporting.
const STDERR_TAIL_LINES: usize = 20;

/// One output of an FFmpeg invocation: its arguments and its target path.
#[derive(Debug, Clone)]
pub struct FfmpegOutput {
    path: PathBuf,
    args: Vec<String>,
}

impl FfmpegOutput {
    /// Create an output writing to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    /// Add an output argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Map a stream or filter label into this output.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.arg("-map").arg(spec)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.arg("-crf").arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.arg("-preset").arg(preset)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.arg("-b:a").arg(bitrate)
    }

    /// Set the container format.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.arg("-f").arg(format)
    }

    /// Output path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Filter graph shared by all outputs
    filter_complex: Option<String>,
    /// Outputs, in order
    outputs: Vec<FfmpegOutput>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command reading `input`.
    pub fn new(input: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            input_args: Vec::new(),
            filter_complex: None,
            outputs: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Set filter complex.
    pub fn filter_complex(mut self, filter: impl Into<String>) -> Self {
        self.filter_complex = Some(filter.into());
        self
    }

    /// Append an output.
    pub fn output(mut self, output: FfmpegOutput) -> Self {
        self.outputs.push(output);
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Outputs, in order.
    pub fn outputs(&self) -> &[FfmpegOutput] {
        &self.outputs
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.input_args.iter().cloned());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        if let Some(ref filter) = self.filter_complex {
            args.push("-filter_complex".to_string());
            args.push(filter.clone());
        }

        for output in &self.outputs {
            args.extend(output.args.iter().cloned());
            args.push(output.path.to_string_lossy().to_string());
        }

        args
    }
}

/// Runner for FFmpeg commands with progress tracking.
#[derive(Debug, Default)]
pub struct FfmpegRunner;

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    ///
    /// On a non-zero exit the error carries the last lines FFmpeg wrote to stderr.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        progress_callback: F,
    ) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;

        // Progress lines and diagnostics share stderr
        let stderr_handle = tokio::spawn(drain_stderr(stderr, progress_callback));

        let status = child.wait().await?;
        let stderr_tail = stderr_handle.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(stderr_tail),
                status.code(),
            ))
        }
    }
}

/// Read FFmpeg's stderr to the end, feeding progress lines to `on_progress`.
///
/// Returns the last diagnostic lines. Bytes that are not UTF-8 are replaced
/// rather than ending the read, so the pipe is always drained.
async fn drain_stderr<R, F>(stderr: R, on_progress: F) -> String
where
    R: AsyncRead + Unpin,
    F: Fn(FfmpegProgress),
{
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut current_progress = FfmpegProgress::default();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Stopped reading FFmpeg stderr: {}", e);
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\r', '\n']);
        if is_progress_line(line) {
            if let Some(progress) = parse_progress_line(line, &mut current_progress) {
                on_progress(progress);
            }
        } else if !line.trim().is_empty() {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        }
    }

    tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Whether a stderr line belongs to the `-progress` key=value stream.
fn is_progress_line(line: &str) -> bool {
    match line.trim().split_once('=') {
        Some((key, _)) => !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
        None => false,
    }
}

/// Parse a progress line from FFmpeg's -progress output.
fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            "out_time_ms" | "out_time_us" => {
                // Both keys are reported in microseconds by modern FFmpeg
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_ms = us / 1000;
                }
            }
            "out_time" => {
                current.out_time = value.to_string();
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "speed" => {
                // Format: "1.5x" or "N/A"
                if let Some(speed_str) = value.strip_suffix('x') {
                    if let Ok(speed) = speed_str.trim().parse() {
                        current.speed = speed;
                    }
                }
            }
            "progress" => {
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_drain_stderr_reads_past_invalid_utf8() {
        let mut stderr: Vec<u8> = Vec::new();
        stderr.extend_from_slice(b"title          : caf\xe9 \xff\xfe\n");
        stderr.extend_from_slice(b"out_time_ms=1500000\n");
        stderr.extend_from_slice(b"progress=continue\n");
        stderr.extend_from_slice(b"Conversion failed!\r\n");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tail = drain_stderr(stderr.as_slice(), move |p: FfmpegProgress| {
            sink.lock().unwrap().push(p.out_time_ms)
        })
        .await;

        assert!(tail.starts_with("title          : caf"));
        assert!(tail.ends_with("Conversion failed!"));
        assert_eq!(tail.lines().count(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![1500]);
    }

    #[test]
    fn test_command_builder_multiple_outputs() {
        let cmd = FfmpegCommand::new("input.mp4")
            .filter_complex("[0:v]split=2[a][b]")
            .output(FfmpegOutput::new("a.m3u8").map("[a]").video_codec("libx264").crf(23))
            .output(FfmpegOutput::new("b.m3u8").map("[b]").video_codec("libx264"));

        let args = cmd.build_args();
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        let filter_pos = args.iter().position(|a| a == "-filter_complex").unwrap();
        let a_pos = args.iter().position(|a| a == "a.m3u8").unwrap();
        let b_pos = args.iter().position(|a| a == "b.m3u8").unwrap();

        assert_eq!(args[0], "-y");
        assert_eq!(args[input_pos + 1], "input.mp4");
        assert!(input_pos < filter_pos && filter_pos < a_pos && a_pos < b_pos);
        assert_eq!(args.last().unwrap(), "b.m3u8");
        assert!(args.contains(&"-crf".to_string()));
    }

    #[test]
    fn test_progress_parsing() {
        let mut progress = FfmpegProgress::default();

        parse_progress_line("out_time_us=5000000", &mut progress);
        assert_eq!(progress.out_time_ms, 5000);

        parse_progress_line("speed=1.5x", &mut progress);
        assert!((progress.speed - 1.5).abs() < 0.01);

        parse_progress_line("speed=N/A", &mut progress);
        assert!((progress.speed - 1.5).abs() < 0.01);

        let result = parse_progress_line("progress=end", &mut progress);
        assert!(result.is_some());
        assert!(progress.is_complete);
    }

    #[test]
    fn test_progress_lines_are_told_apart_from_diagnostics() {
        assert!(is_progress_line("frame=120"));
        assert!(is_progress_line("out_time=00:00:04.000000"));
        assert!(!is_progress_line("[h264 @ 0x55] error while decoding MB 1 2, bytestream -5"));
        assert!(!is_progress_line("input.mp4: Invalid data found when processing input"));
    }
}
