//! Request and collaborator data models.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

use audiodrop_core::types::{Quality, TrimWindow};

/// A conversion submission as received from a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ConversionRequest {
    /// Source URL (or bare video ID).
    #[validate(length(min = 1, max = 2048, message = "URL must be 1-2048 characters"))]
    pub url: String,
    /// Requested quality preset such as `"192k"`.
    #[serde(default)]
    pub quality: Option<String>,
    /// Trim start as `HH:MM:SS` or `MM:SS`.
    #[serde(default)]
    pub start_time: Option<String>,
    /// Trim end as `HH:MM:SS` or `MM:SS`.
    #[serde(default)]
    pub end_time: Option<String>,
    /// Lower values are processed first.
    #[serde(default)]
    #[validate(range(min = -1000, max = 1000))]
    pub priority: i64,
}

impl ConversionRequest {
    /// A request for `url` with defaults everywhere else.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the quality preset.
    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    /// Set the trim bounds.
    pub fn with_trim(mut self, start: Option<&str>, end: Option<&str>) -> Self {
        self.start_time = start.map(str::to_string);
        self.end_time = end.map(str::to_string);
        self
    }
}

/// Where and how to fetch the playable media.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayableSource {
    /// Direct media URL.
    pub url: String,
    /// HTTP headers the media host expects.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Metadata returned by a source resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Human-readable title.
    pub title: String,
    /// Length in whole seconds.
    pub duration_seconds: u64,
    /// Length formatted as `H:MM:SS` or `M:SS`.
    pub duration_formatted: String,
    /// Playable media location.
    pub playable: PlayableSource,
    /// Channel or uploader name.
    pub uploader: Option<String>,
    /// View count, when known.
    pub view_count: Option<u64>,
}

/// Everything a transcoder needs for one run.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    /// Input media.
    pub input: PlayableSource,
    /// Output bitrate.
    pub quality: Quality,
    /// Section of the input to keep.
    pub trim: Option<TrimWindow>,
    /// Expected output length, used for progress reporting.
    pub output_seconds: u64,
}

/// Format seconds as `H:MM:SS` when an hour or longer, else `M:SS`.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("filename regex"));

/// Download filename derived from a title: punctuation stripped, `.mp3`
/// appended, `audio.mp3` when nothing is left.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(title, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "audio.mp3".to_string()
    } else {
        format!("{cleaned}.mp3")
    }
}
