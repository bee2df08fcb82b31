//! The validated submission carried by every job.

use serde::{Deserialize, Serialize};

use super::status::JobKind;
use crate::types::{Quality, TrimWindow};

/// What to convert and how.
///
/// Built only after the submission has been validated, so every field is
/// already well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    /// The URL the client submitted.
    pub source_url: String,
    /// Normalized identity of the source, used for deduplication.
    pub source_id: String,
    /// Requested output quality (before policy).
    pub quality: Quality,
    /// Optional section of the source to keep.
    pub trim: Option<TrimWindow>,
    /// Delivery mode.
    pub kind: JobKind,
}
