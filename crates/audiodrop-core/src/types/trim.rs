//! Trim windows over a source timeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a trim window was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrimError {
    /// A timestamp could not be parsed.
    #[error("invalid timestamp '{0}': expected HH:MM:SS or MM:SS")]
    Malformed(String),
    /// The end is not after the start.
    #[error("trim end ({end}s) must be after trim start ({start}s)")]
    EmptyRange {
        /// Start offset in seconds.
        start: u64,
        /// End offset in seconds.
        end: u64,
    },
    /// The window reaches past the end of the source.
    #[error("trim window ends at {end}s but the source is only {duration}s long")]
    BeyondDuration {
        /// Requested end offset in seconds.
        end: u64,
        /// Source duration in seconds.
        duration: u64,
    },
}

/// A section of the source to keep: start offset plus an optional length.
///
/// Without a length the window runs to the end of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimWindow {
    /// Offset of the first kept second.
    pub start_seconds: u64,
    /// Length of the window; `None` keeps everything after the start.
    pub duration_seconds: Option<u64>,
}

impl TrimWindow {
    /// Build a window from optional start and end offsets.
    ///
    /// Returns `Ok(None)` when neither bound is given.
    pub fn from_bounds(start: Option<u64>, end: Option<u64>) -> Result<Option<Self>, TrimError> {
        match (start, end) {
            (None, None) => Ok(None),
            (start, Some(end)) => {
                let start = start.unwrap_or(0);
                if end <= start {
                    return Err(TrimError::EmptyRange { start, end });
                }
                Ok(Some(Self {
                    start_seconds: start,
                    duration_seconds: Some(end - start),
                }))
            }
            (Some(start), None) => Ok(Some(Self {
                start_seconds: start,
                duration_seconds: None,
            })),
        }
    }

    /// Offset of the last kept second, if the window is bounded.
    pub fn end_seconds(&self) -> Option<u64> {
        self.duration_seconds.map(|d| self.start_seconds + d)
    }

    /// Check the window against the resolved source length.
    pub fn check_within(&self, duration: u64) -> Result<(), TrimError> {
        let end = self.end_seconds().unwrap_or(self.start_seconds);
        if end > duration || self.start_seconds >= duration {
            return Err(TrimError::BeyondDuration { end, duration });
        }
        Ok(())
    }

    /// Length of audio this window produces from a source of `duration`.
    pub fn effective_length(&self, duration: u64) -> u64 {
        let end = self.end_seconds().unwrap_or(duration).min(duration);
        end.saturating_sub(self.start_seconds)
    }
}
