//! Conversion pipeline configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::types::Quality;

/// Settings for source resolution, transcoding, and the quality policy.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConversionConfig {
    /// Directory where finished artifacts are written.
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: String,
    /// Path or name of the `yt-dlp` executable.
    #[serde(default = "default_ytdlp_binary")]
    pub ytdlp_binary: String,
    /// Path or name of the `ffmpeg` executable.
    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: String,
    /// Quality used when a request does not name one.
    #[serde(default = "default_quality")]
    pub default_quality: Quality,
    /// Sources longer than this many seconds get the long-source preset.
    #[serde(default = "default_long_source_threshold")]
    #[validate(range(min = 60))]
    pub long_source_threshold_seconds: u64,
    /// Preset forced on long sources.
    #[serde(default = "default_long_source_quality")]
    pub long_source_quality: Quality,
    /// Orphan timeout for a per-source dedup lock.
    #[serde(default = "default_lock_ttl")]
    #[validate(range(min = 10, max = 86400))]
    pub lock_ttl_seconds: u64,
    /// Timeout for one metadata resolution.
    #[serde(default = "default_resolve_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub resolve_timeout_seconds: u64,
    /// Timeout for one transcode.
    #[serde(default = "default_transcode_timeout")]
    #[validate(range(min = 10))]
    pub transcode_timeout_seconds: u64,
    /// Maximum bytes of collaborator stderr kept for logs.
    #[serde(default = "default_max_stderr_bytes")]
    pub max_stderr_bytes: usize,
    /// How long resolved source metadata is reused. `0` disables the cache.
    #[serde(default = "default_metadata_cache_ttl")]
    #[validate(range(max = 86400))]
    pub metadata_cache_ttl_seconds: u64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            downloads_dir: default_downloads_dir(),
            ytdlp_binary: default_ytdlp_binary(),
            ffmpeg_binary: default_ffmpeg_binary(),
            default_quality: default_quality(),
            long_source_threshold_seconds: default_long_source_threshold(),
            long_source_quality: default_long_source_quality(),
            lock_ttl_seconds: default_lock_ttl(),
            resolve_timeout_seconds: default_resolve_timeout(),
            transcode_timeout_seconds: default_transcode_timeout(),
            max_stderr_bytes: default_max_stderr_bytes(),
            metadata_cache_ttl_seconds: default_metadata_cache_ttl(),
        }
    }
}

fn default_downloads_dir() -> String {
    "./data/downloads".to_string()
}

fn default_ytdlp_binary() -> String {
    "yt-dlp".to_string()
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}

fn default_quality() -> Quality {
    Quality::K192
}

fn default_long_source_threshold() -> u64 {
    3 * 60 * 60
}

fn default_long_source_quality() -> Quality {
    Quality::K128
}

fn default_lock_ttl() -> u64 {
    5 * 60
}

fn default_resolve_timeout() -> u64 {
    60
}

fn default_transcode_timeout() -> u64 {
    4 * 60 * 60
}

fn default_max_stderr_bytes() -> usize {
    4096
}

fn default_metadata_cache_ttl() -> u64 {
    60 * 60
}
