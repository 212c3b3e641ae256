//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file paths, in `-i` order
    inputs: Vec<PathBuf>,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before the first -i)
    input_args: Vec<String>,
    /// Output arguments (after the last -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            inputs: vec![input.as_ref().to_path_buf()],
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add another input file.
    pub fn input(mut self, input: impl AsRef<Path>) -> Self {
        self.inputs.push(input.as_ref().to_path_buf());
        self
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Select a stream for the output (`-map`).
    pub fn map(self, stream: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(stream)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Stop at the end of the shortest input.
    pub fn shortest(self) -> Self {
        self.output_arg("-shortest")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.extend(self.input_args.iter().cloned());

        for input in &self.inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with cancellation.
///
/// There is no timeout: a hung process holds its job until it exits or the
/// cancellation token fires.
#[derive(Debug, Default, Clone)]
pub struct FfmpegRunner {
    cancel: Option<CancellationToken>,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Run an FFmpeg command. A non-zero exit carries the tail of stderr.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let ffmpeg = check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("ffmpeg stderr not captured"))?;
        let stderr_task = tokio::spawn(read_lines(stderr, STDERR_TAIL_LINES, |_| {}));

        let status = wait_with_cancel(&mut child, self.cancel.as_ref()).await;
        let tail = stderr_task.await.unwrap_or_default();
        let status = status?;

        if status.success() {
            Ok(())
        } else {
            let message = match status.code() {
                Some(code) if tail.is_empty() => format!("exit code {}", code),
                Some(code) => format!("exit code {}: {}", code, tail),
                None if tail.is_empty() => "terminated by signal".to_string(),
                None => format!("terminated by signal: {}", tail),
            };
            Err(MediaError::ffmpeg_failed(message, Some(tail), status.code()))
        }
    }
}

/// Wait for a child, killing it if `cancel` fires first.
pub(crate) async fn wait_with_cancel(
    child: &mut Child,
    cancel: Option<&CancellationToken>,
) -> MediaResult<ExitStatus> {
    let Some(cancel) = cancel else {
        return Ok(child.wait().await?);
    };

    tokio::select! {
        status = child.wait() => Ok(status?),
        _ = cancel.cancelled() => {
            info!("Cancellation requested, killing child process");
            let _ = child.kill().await;
            Err(MediaError::Cancelled)
        }
    }
}

/// Feed every line of `reader` to `on_line`, returning the last `keep` lines.
pub(crate) async fn read_lines<R, F>(reader: R, keep: usize, mut on_line: F) -> String
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(keep);

    while let Ok(Some(line)) = lines.next_line().await {
        on_line(&line);
        let line = line.trim();
        if line.is_empty() || keep == 0 {
            continue;
        }
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line.to_string());
    }

    Vec::from(tail).join("\n")
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
