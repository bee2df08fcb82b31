//! Audio transcoding through `ffmpeg`.
//!
//! Two delivery modes share one argument builder: file mode writes an MP3
//! to disk and reports progress from `-progress pipe:1`, sink mode pipes
//! the encoded stream from stdout into any async writer.

use std::fmt;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use audiodrop_core::config::conversion::ConversionConfig;

use crate::error::ConversionError;
use crate::models::TranscodeRequest;
use crate::process::{drain_tail, spawn_error};

/// Progress callback receiving 0..=100.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Produces MP3 audio from a playable source.
#[async_trait]
pub trait Transcoder: Send + Sync + fmt::Debug {
    /// Write the result to `output`. Returns the artifact size in bytes.
    async fn transcode_to_file(
        &self,
        request: &TranscodeRequest,
        output: &Path,
        progress: ProgressFn,
    ) -> Result<u64, ConversionError>;

    /// Write the result to `sink` as it is produced. Returns bytes written.
    ///
    /// Cancelling `cancel` stops the encoder and yields
    /// [`ConversionError::Cancelled`].
    async fn transcode_to_sink(
        &self,
        request: &TranscodeRequest,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: CancellationToken,
    ) -> Result<u64, ConversionError>;
}

/// Output target for [`FfmpegTranscoder::build_args`].
#[derive(Debug, Clone, Copy)]
pub enum Output<'a> {
    /// A file on disk, with progress on stdout.
    File(&'a Path),
    /// The encoded stream on stdout.
    Stdout,
}

/// Transcoder backed by the `ffmpeg` executable.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    /// Executable path or name
    binary: String,
    /// Deadline for one run
    timeout: Duration,
    /// Bytes of stderr kept for logs
    max_stderr_bytes: usize,
}

impl FfmpegTranscoder {
    /// Create a transcoder.
    pub fn new(binary: impl Into<String>, timeout: Duration, max_stderr_bytes: usize) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            max_stderr_bytes,
        }
    }

    /// Transcoder from the conversion settings.
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self::new(
            config.ffmpeg_binary.clone(),
            Duration::from_secs(config.transcode_timeout_seconds),
            config.max_stderr_bytes,
        )
    }

    /// Command-line arguments for one run.
    pub fn build_args(request: &TranscodeRequest, output: Output<'_>) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let input = &request.input;
        if input.url.starts_with("http://") || input.url.starts_with("https://") {
            args.extend(
                ["-reconnect", "1", "-reconnect_streamed", "1", "-reconnect_delay_max", "5"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
        if !input.headers.is_empty() {
            let headers: String = input
                .headers
                .iter()
                .map(|(k, v)| format!("{k}: {v}\r\n"))
                .collect();
            args.push("-headers".into());
            args.push(headers);
        }
        if let Some(trim) = request.trim.filter(|t| t.start_seconds > 0) {
            args.push("-ss".into());
            args.push(trim.start_seconds.to_string());
        }
        args.push("-i".into());
        args.push(input.url.clone());
        if let Some(length) = request.trim.and_then(|t| t.duration_seconds) {
            args.push("-t".into());
            args.push(length.to_string());
        }

        args.extend(
            ["-vn", "-acodec", "libmp3lame", "-b:a", request.quality.as_str(), "-f", "mp3"]
                .iter()
                .map(|s| s.to_string()),
        );
        match output {
            Output::File(path) => {
                args.extend(
                    ["-progress", "pipe:1", "-nostats", "-y"]
                        .iter()
                        .map(|s| s.to_string()),
                );
                args.push(path.to_string_lossy().into_owned());
            }
            Output::Stdout => args.push("pipe:1".into()),
        }
        args
    }

    fn spawn(&self, args: Vec<String>) -> Result<Child, ConversionError> {
        tracing::debug!("Spawning transcoder: binary='{}', args={:?}", self.binary, args);
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.binary, e))
    }

    fn timed_out(&self) -> ConversionError {
        ConversionError::Timeout {
            stage: "transcode",
            seconds: self.timeout.as_secs(),
        }
    }

    fn check_status(status: ExitStatus, stderr: String) -> Result<(), ConversionError> {
        if status.success() {
            return Ok(());
        }
        tracing::error!(
            "Transcoder failed: exit_code={:?}, stderr='{}'",
            status.code(),
            stderr
        );
        Err(ConversionError::TranscodeFailed {
            code: status.code(),
            stderr,
        })
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode_to_file(
        &self,
        request: &TranscodeRequest,
        output: &Path,
        progress: ProgressFn,
    ) -> Result<u64, ConversionError> {
        let mut child = self.spawn(Self::build_args(request, Output::File(output)))?;
        let stdout = child.stdout.take().ok_or_else(missing_pipe)?;
        let stderr = child.stderr.take().ok_or_else(missing_pipe)?;
        let stderr_task = tokio::spawn(drain_tail(stderr, self.max_stderr_bytes));
        let total_us = request.output_seconds.saturating_mul(1_000_000);

        let run = async {
            let mut lines = BufReader::new(stdout).lines();
            let mut reported = 0u8;
            while let Some(line) = lines.next_line().await? {
                if let Some(pct) = parse_progress_line(&line, total_us)
                    && pct > reported
                {
                    reported = pct;
                    progress(pct);
                }
            }
            let status = child.wait().await?;
            Ok::<_, io::Error>(status)
        };
        let outcome = tokio::time::timeout(self.timeout, run).await;

        let status = match outcome {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                tracing::warn!(
                    "Transcode timed out after {}s: output='{}'",
                    self.timeout.as_secs(),
                    output.display()
                );
                return Err(self.timed_out());
            }
        };
        let stderr = stderr_task.await.unwrap_or_default();
        Self::check_status(status, stderr)?;

        let size = tokio::fs::metadata(output).await?.len();
        if size == 0 {
            return Err(ConversionError::TranscodeFailed {
                code: status.code(),
                stderr: "transcoder produced an empty file".into(),
            });
        }
        Ok(size)
    }

    async fn transcode_to_sink(
        &self,
        request: &TranscodeRequest,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: CancellationToken,
    ) -> Result<u64, ConversionError> {
        let mut child = self.spawn(Self::build_args(request, Output::Stdout))?;
        let mut stdout = child.stdout.take().ok_or_else(missing_pipe)?;
        let stderr = child.stderr.take().ok_or_else(missing_pipe)?;
        let stderr_task = tokio::spawn(drain_tail(stderr, self.max_stderr_bytes));

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            copied = tokio::time::timeout(self.timeout, tokio::io::copy(&mut stdout, &mut *sink)) => Some(copied),
        };

        let bytes = match outcome {
            None => {
                let _ = child.kill().await;
                return Err(ConversionError::Cancelled);
            }
            Some(Err(_)) => {
                let _ = child.kill().await;
                return Err(self.timed_out());
            }
            Some(Ok(Err(e))) => {
                // Usually the client went away mid-stream.
                let _ = child.kill().await;
                return Err(ConversionError::Io(e));
            }
            Some(Ok(Ok(bytes))) => bytes,
        };

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        Self::check_status(status, stderr)?;
        sink.flush().await?;
        if bytes == 0 {
            return Err(ConversionError::TranscodeFailed {
                code: status.code(),
                stderr: "transcoder produced no audio".into(),
            });
        }
        Ok(bytes)
    }
}

fn missing_pipe() -> ConversionError {
    ConversionError::Io(io::Error::other("child pipe was not captured"))
}

/// Percent complete from one `-progress` line, if it carries a position.
pub fn parse_progress_line(line: &str, total_us: u64) -> Option<u8> {
    if total_us == 0 {
        return None;
    }
    let (key, value) = line.trim().split_once('=')?;
    // Despite the name, out_time_ms is also in microseconds.
    if key != "out_time_us" && key != "out_time_ms" {
        return None;
    }
    let position: u64 = value.trim().parse().ok()?;
    let pct = (position.saturating_mul(100) / total_us).min(100);
    Some(pct as u8)
}
