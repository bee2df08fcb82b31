//! Source URL recognition and normalization.
//!
//! A source ID names the media independent of how its URL was written, so
//! `youtu.be/X`, `youtube.com/watch?v=X&t=10` and `m.youtube.com/watch?v=X`
//! all deduplicate to `youtube:X`.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConversionError;

static WATCH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:(?:www\.|m\.|music\.|gaming\.)?youtube\.com/(?:watch\?(?:[^#\s]*&)?v=|embed/|v/|shorts/|live/)|youtu\.be/)([A-Za-z0-9_-]{11})(?:[^A-Za-z0-9_-]|$)",
    )
    .expect("watch url regex")
});

static BARE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("bare id regex"));

/// Extract the 11-character video ID from a URL or bare ID.
pub fn extract_video_id(input: &str) -> Option<String> {
    let input = input.trim();
    if BARE_ID.is_match(input) {
        return Some(input.to_string());
    }
    WATCH_PATTERN
        .captures(input)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Normalized source ID used for deduplication.
pub fn source_id(input: &str) -> Result<String, ConversionError> {
    extract_video_id(input)
        .map(|id| format!("youtube:{id}"))
        .ok_or_else(|| ConversionError::InvalidSource(input.to_string()))
}

/// Canonical watch URL for a video ID.
pub fn canonical_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "dQw4w9WgXcQ";

    #[test]
    fn test_recognized_forms() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ&t=42s",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ&list=RD",
            "https://gaming.youtube.com/watch?v=dQw4w9WgXcQ",
            "dQw4w9WgXcQ",
        ] {
            assert_eq!(extract_video_id(url).as_deref(), Some(ID), "{url}");
        }
    }

    #[test]
    fn test_rejected_forms() {
        for url in [
            "https://vimeo.com/12345",
            "https://www.youtube.com/watch?v=short",
            "https://www.youtube.com/channel/UCabc",
            "not a url",
            "",
        ] {
            assert!(extract_video_id(url).is_none(), "{url}");
        }
    }

    #[test]
    fn test_source_id_normalizes() {
        assert_eq!(
            source_id("https://youtu.be/dQw4w9WgXcQ").unwrap(),
            source_id("https://m.youtube.com/watch?v=dQw4w9WgXcQ&t=1").unwrap()
        );
        assert!(matches!(
            source_id("https://vimeo.com/1"),
            Err(ConversionError::InvalidSource(_))
        ));
    }
}
