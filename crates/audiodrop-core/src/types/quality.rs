//! Audio bitrate presets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// An output bitrate preset.
///
/// Variants are declared in ascending bitrate order so that `Ord` compares
/// by bitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quality {
    /// 64 kbit/s.
    #[serde(rename = "64k")]
    K64,
    /// 128 kbit/s.
    #[serde(rename = "128k")]
    K128,
    /// 192 kbit/s.
    #[serde(rename = "192k")]
    K192,
    /// 256 kbit/s.
    #[serde(rename = "256k")]
    K256,
    /// 320 kbit/s.
    #[serde(rename = "320k")]
    K320,
}

impl Quality {
    /// All presets in ascending order.
    pub const ALL: [Quality; 5] = [
        Quality::K64,
        Quality::K128,
        Quality::K192,
        Quality::K256,
        Quality::K320,
    ];

    /// Bitrate in kbit/s.
    pub fn kbps(self) -> u32 {
        match self {
            Self::K64 => 64,
            Self::K128 => 128,
            Self::K192 => 192,
            Self::K256 => 256,
            Self::K320 => 320,
        }
    }

    /// The preset as passed to the encoder, e.g. `"192k"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::K64 => "64k",
            Self::K128 => "128k",
            Self::K192 => "192k",
            Self::K256 => "256k",
            Self::K320 => "320k",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|q| q.as_str() == normalized)
            .ok_or_else(|| {
                AppError::validation(format!(
                    "Invalid quality '{s}'. Must be one of: 64k, 128k, 192k, 256k, 320k"
                ))
            })
    }
}
