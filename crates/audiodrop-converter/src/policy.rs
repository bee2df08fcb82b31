//! Quality and trim policy.

use serde::{Deserialize, Serialize};

use audiodrop_core::config::conversion::ConversionConfig;
use audiodrop_core::types::{Quality, TrimError};

/// Outcome of applying the quality policy to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityDecision {
    /// Quality that will actually be produced.
    pub effective: Quality,
    /// Whether the requested quality was lowered.
    pub override_applied: bool,
    /// Notice shown to the user when an override happened.
    pub message: Option<String>,
}

/// Caps the bitrate of long sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPolicy {
    /// Sources strictly longer than this are capped.
    pub long_source_threshold_seconds: u64,
    /// The cap.
    pub long_source_quality: Quality,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            long_source_threshold_seconds: 3 * 60 * 60,
            long_source_quality: Quality::K128,
        }
    }
}

impl QualityPolicy {
    /// Policy from the conversion settings.
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            long_source_threshold_seconds: config.long_source_threshold_seconds,
            long_source_quality: config.long_source_quality,
        }
    }

    /// Decide the effective quality for a source of `duration_seconds`.
    ///
    /// A request at or below the cap is never raised.
    pub fn decide(&self, duration_seconds: u64, requested: Quality) -> QualityDecision {
        if duration_seconds > self.long_source_threshold_seconds
            && requested > self.long_source_quality
        {
            return QualityDecision {
                effective: self.long_source_quality,
                override_applied: true,
                message: Some(self.notice()),
            };
        }
        QualityDecision {
            effective: requested,
            override_applied: false,
            message: None,
        }
    }

    fn notice(&self) -> String {
        format!(
            "Note: For videos longer than {}, audio quality is automatically set to {} for faster processing.",
            describe_threshold(self.long_source_threshold_seconds),
            self.long_source_quality
        )
    }
}

fn describe_threshold(seconds: u64) -> String {
    match (seconds / 3600, seconds % 3600) {
        (1, 0) => "1 hour".to_string(),
        (hours, 0) => format!("{hours} hours"),
        _ => match seconds / 60 {
            1 => "1 minute".to_string(),
            minutes => format!("{minutes} minutes"),
        },
    }
}

/// Apply the default policy.
pub fn decide_quality(duration_seconds: u64, requested: Quality) -> QualityDecision {
    QualityPolicy::default().decide(duration_seconds, requested)
}

/// Parse `HH:MM:SS` or `MM:SS` into seconds.
///
/// Every part must be non-empty digits; minutes and seconds must be below 60.
pub fn parse_timestamp(input: &str) -> Result<u64, TrimError> {
    let malformed = || TrimError::Malformed(input.to_string());
    let trimmed = input.trim();

    let parts: Vec<&str> = trimmed.split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(malformed());
    }

    let mut values = Vec::with_capacity(parts.len());
    for part in &parts {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        values.push(part.parse::<u64>().map_err(|_| malformed())?);
    }

    let (hours, minutes, seconds) = match values.as_slice() {
        [m, s] => (0, *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(malformed()),
    };
    if seconds >= 60 || (parts.len() == 3 && minutes >= 60) {
        return Err(malformed());
    }

    hours
        .checked_mul(3600)
        .and_then(|h| minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
        .and_then(|t| t.checked_add(seconds))
        .ok_or_else(malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_HOURS: u64 = 3 * 3600;

    #[test]
    fn test_short_source_passes_through() {
        let decision = decide_quality(600, Quality::K320);
        assert_eq!(decision.effective, Quality::K320);
        assert!(!decision.override_applied);
        assert!(decision.message.is_none());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        assert!(!decide_quality(THREE_HOURS, Quality::K320).override_applied);
        assert!(decide_quality(THREE_HOURS + 1, Quality::K320).override_applied);
    }

    #[test]
    fn test_long_source_capped() {
        let decision = decide_quality(THREE_HOURS + 60, Quality::K256);
        assert_eq!(decision.effective, Quality::K128);
        assert_eq!(
            decision.message.as_deref(),
            Some(
                "Note: For videos longer than 3 hours, audio quality is automatically set to 128k for faster processing."
            )
        );
    }

    #[test]
    fn test_low_request_never_raised() {
        for q in [Quality::K64, Quality::K128] {
            let decision = decide_quality(THREE_HOURS * 2, q);
            assert_eq!(decision.effective, q);
            assert!(!decision.override_applied);
        }
    }

    #[test]
    fn test_custom_threshold_notice() {
        let policy = QualityPolicy {
            long_source_threshold_seconds: 90 * 60,
            long_source_quality: Quality::K64,
        };
        let decision = policy.decide(2 * 3600, Quality::K192);
        assert_eq!(decision.effective, Quality::K64);
        assert!(decision.message.unwrap().contains("90 minutes"));
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("00:00").unwrap(), 0);
        assert_eq!(parse_timestamp("1:30").unwrap(), 90);
        assert_eq!(parse_timestamp("75:00").unwrap(), 4500);
        assert_eq!(parse_timestamp("01:02:03").unwrap(), 3723);
        assert_eq!(parse_timestamp(" 10:00:00 ").unwrap(), 36000);
    }

    #[test]
    fn test_parse_timestamp_rejects() {
        for input in ["", "90", "1:60", "1:61:00", "a:10", "1::2", "-1:00", "1:2:3:4", "1.5:00"] {
            assert!(
                matches!(parse_timestamp(input), Err(TrimError::Malformed(_))),
                "{input}"
            );
        }
    }
}
