//! Source metadata resolution.
//!
//! Runs `yt-dlp --dump-json` against a source URL and extracts the title,
//! duration, and a directly playable audio URL. Failures are classified from
//! the tool's stderr so the orchestrator can decide whether to retry.

use std::collections::BTreeMap;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use audiodrop_core::config::conversion::ConversionConfig;

use crate::error::{ConversionError, Restriction};
use crate::models::{PlayableSource, SourceMetadata, format_duration};
use crate::process::spawn_error;

/// Resolves a source URL to metadata and a playable location.
#[async_trait]
pub trait SourceResolver: Send + Sync + fmt::Debug {
    /// Look up `url`.
    async fn resolve(&self, url: &str) -> Result<SourceMetadata, ConversionError>;
}

/// Resolver backed by the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    /// Executable path or name
    binary: String,
    /// Deadline for one lookup
    timeout: Duration,
    /// Bytes of stderr kept for classification and logs
    max_stderr_bytes: usize,
}

impl YtDlpResolver {
    /// Create a resolver.
    pub fn new(binary: impl Into<String>, timeout: Duration, max_stderr_bytes: usize) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            max_stderr_bytes,
        }
    }

    /// Resolver from the conversion settings.
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self::new(
            config.ytdlp_binary.clone(),
            Duration::from_secs(config.resolve_timeout_seconds),
            config.max_stderr_bytes,
        )
    }

    fn args(url: &str) -> Vec<String> {
        [
            "--dump-json",
            "--no-playlist",
            "--no-warnings",
            "--no-progress",
            "-f",
            "bestaudio/best",
            url,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

#[async_trait]
impl SourceResolver for YtDlpResolver {
    async fn resolve(&self, url: &str) -> Result<SourceMetadata, ConversionError> {
        let start = std::time::Instant::now();
        tracing::debug!("Resolving source: binary='{}', url='{}'", self.binary, url);

        let mut cmd = Command::new(&self.binary);
        cmd.args(Self::args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(spawn_error(&self.binary, e)),
            Err(_) => {
                tracing::warn!(
                    "Source resolution timed out after {}s: url='{}'",
                    self.timeout.as_secs(),
                    url
                );
                return Err(ConversionError::Timeout {
                    stage: "resolve",
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = tail(&output.stderr, self.max_stderr_bytes);
            tracing::warn!(
                "Source resolution failed: url='{}', exit_code={:?}, stderr='{}'",
                url,
                output.status.code(),
                stderr
            );
            return Err(classify_stderr(&stderr));
        }

        let metadata = parse_metadata(&output.stdout)?;
        tracing::info!(
            "Resolved source: title='{}', duration={}s, elapsed={}ms",
            metadata.title,
            metadata.duration_seconds,
            start.elapsed().as_millis()
        );
        Ok(metadata)
    }
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    title: Option<String>,
    duration: Option<f64>,
    url: Option<String>,
    #[serde(default)]
    http_headers: BTreeMap<String, String>,
    uploader: Option<String>,
    view_count: Option<u64>,
    is_live: Option<bool>,
}

/// Parse `yt-dlp --dump-json` output.
pub fn parse_metadata(stdout: &[u8]) -> Result<SourceMetadata, ConversionError> {
    // With --no-playlist the first line is the only document.
    let line = stdout
        .split(|b| *b == b'\n')
        .find(|l| !l.iter().all(u8::is_ascii_whitespace))
        .ok_or_else(|| ConversionError::Upstream("resolver produced no output".into()))?;
    let raw: RawInfo = serde_json::from_slice(line)
        .map_err(|e| ConversionError::Upstream(format!("unreadable resolver output: {e}")))?;

    if raw.is_live == Some(true) {
        return Err(ConversionError::NotFound("live streams cannot be converted".into()));
    }
    let duration = raw
        .duration
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| ConversionError::NotFound("source has no known duration".into()))?;
    let url = raw
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ConversionError::NotFound("no playable audio format".into()))?;

    let duration_seconds = duration.round() as u64;
    Ok(SourceMetadata {
        title: raw
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Unknown Title".to_string()),
        duration_seconds,
        duration_formatted: format_duration(duration_seconds),
        playable: PlayableSource {
            url,
            headers: raw.http_headers,
        },
        uploader: raw.uploader,
        view_count: raw.view_count,
    })
}

/// Classify resolver stderr into a conversion error.
pub fn classify_stderr(stderr: &str) -> ConversionError {
    let lower = stderr.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["sign in to confirm your age", "age-restricted", "age restricted", "inappropriate for some users"]) {
        ConversionError::Restricted(Restriction::Age)
    } else if has(&["available in your country", "geo restricted", "geo-restricted", "region"]) {
        ConversionError::Restricted(Restriction::Region)
    } else if has(&["429", "too many requests", "rate limit", "rate-limit"]) {
        ConversionError::RateLimited(last_line(stderr))
    } else if has(&[
        "private video",
        "video unavailable",
        "is unavailable",
        "has been removed",
        "does not exist",
        "404",
        "unsupported url",
        "incomplete youtube id",
    ]) {
        ConversionError::NotFound(last_line(stderr))
    } else {
        ConversionError::Upstream(last_line(stderr))
    }
}

fn tail(bytes: &[u8], limit: usize) -> String {
    let start = bytes.len().saturating_sub(limit);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

fn last_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("unknown error")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata() {
        let json = br#"{"id":"dQw4w9WgXcQ","title":"Never Gonna Give You Up","duration":212.4,
            "url":"https://rr1.example/videoplayback?x=1","http_headers":{"User-Agent":"Mozilla/5.0"},
            "uploader":"Rick Astley","view_count":1500000000}"#;
        let meta = parse_metadata(json).unwrap();
        assert_eq!(meta.title, "Never Gonna Give You Up");
        assert_eq!(meta.duration_seconds, 212);
        assert_eq!(meta.duration_formatted, "3:32");
        assert_eq!(meta.playable.url, "https://rr1.example/videoplayback?x=1");
        assert_eq!(meta.playable.headers.get("User-Agent").unwrap(), "Mozilla/5.0");
        assert_eq!(meta.uploader.as_deref(), Some("Rick Astley"));
    }

    #[test]
    fn test_parse_metadata_missing_fields() {
        let no_url = br#"{"title":"x","duration":10}"#;
        assert!(matches!(parse_metadata(no_url), Err(ConversionError::NotFound(_))));

        let live = br#"{"title":"x","url":"u","is_live":true}"#;
        assert!(matches!(parse_metadata(live), Err(ConversionError::NotFound(_))));

        assert!(matches!(parse_metadata(b"not json"), Err(ConversionError::Upstream(_))));
        assert!(matches!(parse_metadata(b"\n"), Err(ConversionError::Upstream(_))));
    }

    #[test]
    fn test_classify_stderr() {
        assert!(matches!(
            classify_stderr("ERROR: [youtube] abc: Sign in to confirm your age."),
            ConversionError::Restricted(Restriction::Age)
        ));
        assert!(matches!(
            classify_stderr("ERROR: The uploader has not made this video available in your country"),
            ConversionError::Restricted(Restriction::Region)
        ));
        assert!(matches!(
            classify_stderr("ERROR: [youtube] abc: Private video"),
            ConversionError::NotFound(_)
        ));
        assert!(matches!(
            classify_stderr("ERROR: unable to download webpage: HTTP Error 429: Too Many Requests"),
            ConversionError::RateLimited(_)
        ));
        assert!(matches!(
            classify_stderr("ERROR: unable to download webpage: <urlopen error [Errno 104] Connection reset>"),
            ConversionError::Upstream(_)
        ));
    }

    #[test]
    fn test_last_line_used_for_detail() {
        match classify_stderr("WARNING: retrying\nERROR: connection refused\n") {
            ConversionError::Upstream(detail) => assert_eq!(detail, "ERROR: connection refused"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
