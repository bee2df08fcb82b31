//! Unified error type for conversion operations.
//!
//! Every failure carries enough detail for logs, a retry classification,
//! and a short user-facing sentence. Raw tool output never reaches users.

use std::fmt;

use audiodrop_core::error::{AppError, ErrorKind};
use audiodrop_core::types::TrimError;
use thiserror::Error;

/// Why a source refused to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restriction {
    /// Viewer must sign in to confirm their age.
    Age,
    /// Not available from this location.
    Region,
}

impl fmt::Display for Restriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Age => f.write_str("age restricted"),
            Self::Region => f.write_str("region blocked"),
        }
    }
}

/// Unified error type for all conversion operations.
#[derive(Debug, Error)]
pub enum ConversionError {
    // --- Input errors ---
    /// The URL is not a recognised media source.
    #[error("Unsupported or malformed source URL: {0}")]
    InvalidSource(String),

    /// The requested quality is not a known preset.
    #[error("Invalid quality: {0}")]
    InvalidQuality(String),

    /// The trim window is malformed or outside the source.
    #[error("Invalid trim window: {0}")]
    InvalidTrim(#[from] TrimError),

    /// Any other request field failed validation.
    #[error("Invalid request: {0}")]
    Validation(String),

    // --- Source errors ---
    /// The source does not exist, is private, or was removed.
    #[error("Source unavailable: {0}")]
    NotFound(String),

    /// The source exists but cannot be played here.
    #[error("Source is {0}")]
    Restricted(Restriction),

    /// The upstream site throttled us.
    #[error("Rate limited by upstream: {0}")]
    RateLimited(String),

    /// A transient upstream failure (network, 5xx, ...).
    #[error("Upstream error: {0}")]
    Upstream(String),

    // --- Process execution errors ---
    /// An external tool ran past its deadline.
    #[error("{stage} timed out after {seconds}s")]
    Timeout {
        /// Which stage timed out.
        stage: &'static str,
        /// The timeout that was exceeded.
        seconds: u64,
    },

    /// The transcoder exited unsuccessfully or produced nothing.
    #[error("Transcoder failed (exit code {code:?}): {stderr}")]
    TranscodeFailed {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Tail of captured stderr.
        stderr: String,
    },

    /// An external tool is not installed.
    #[error("Executable not found: {tool}")]
    ToolNotFound {
        /// The configured executable.
        tool: String,
    },

    /// The conversion was cancelled.
    #[error("Conversion was cancelled")]
    Cancelled,

    /// Every conversion slot is in use.
    #[error("Server at capacity: all {max_slots} conversion slots are in use")]
    AtCapacity {
        /// Total number of conversion slots.
        max_slots: usize,
    },

    // --- Generic errors ---
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Queue or store failure.
    #[error("{0}")]
    Internal(#[from] AppError),
}

impl ConversionError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_)
                | Self::Upstream(_)
                | Self::Timeout { .. }
                | Self::TranscodeFailed { .. }
                | Self::Io(_)
        )
    }

    /// Short, non-technical sentence suitable for end users.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidSource(_) => {
                "Invalid YouTube URL. Please check the link and try again."
            }
            Self::InvalidQuality(_) | Self::Validation(_) => {
                "Invalid input provided. Please check your request and try again."
            }
            Self::InvalidTrim(TrimError::BeyondDuration { .. }) => {
                "The requested trim range goes past the end of the video."
            }
            Self::InvalidTrim(_) => {
                "Invalid trim times. Use HH:MM:SS or MM:SS with the end after the start."
            }
            Self::NotFound(_) => {
                "This YouTube video is unavailable or private. Please try a different video."
            }
            Self::Restricted(Restriction::Age) => {
                "This video is age-restricted and cannot be processed."
            }
            Self::Restricted(Restriction::Region) => "This video is not available in your region.",
            Self::RateLimited(_) => "Too many requests. Please wait a moment and try again.",
            Self::Upstream(_) | Self::Timeout { .. } => {
                "Network connection failed. Please check your internet connection and try again."
            }
            Self::TranscodeFailed { .. } | Self::Io(_) => "File processing error. Please try again.",
            Self::Cancelled => "The conversion was cancelled.",
            Self::AtCapacity { .. } => "The server is busy. Please try again in a moment.",
            Self::ToolNotFound { .. } | Self::Internal(_) => {
                "An unexpected error occurred. Please try again later."
            }
        }
    }
}

impl From<ConversionError> for AppError {
    fn from(err: ConversionError) -> Self {
        match err {
            ConversionError::Internal(inner) => inner,
            ConversionError::AtCapacity { .. } => AppError::service_unavailable(err.to_string()),
            ConversionError::Cancelled => AppError::conflict(err.to_string()),
            ConversionError::InvalidSource(_)
            | ConversionError::InvalidQuality(_)
            | ConversionError::InvalidTrim(_)
            | ConversionError::Validation(_)
            | ConversionError::Restricted(_) => AppError::validation(err.to_string()),
            ConversionError::NotFound(_) => AppError::not_found(err.to_string()),
            ConversionError::RateLimited(_) => AppError::rate_limit(err.to_string()),
            ConversionError::Io(_) => AppError::new(ErrorKind::Storage, err.to_string()),
            ConversionError::Upstream(_)
            | ConversionError::Timeout { .. }
            | ConversionError::TranscodeFailed { .. }
            | ConversionError::ToolNotFound { .. } => AppError::external_service(err.to_string()),
        }
    }
}
