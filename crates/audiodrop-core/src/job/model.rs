//! Job record stored in the ephemeral store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::payload::JobPayload;
use super::status::JobStatus;
use crate::types::Quality;

/// A conversion job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque job ID (UUID v4 text).
    pub id: String,
    /// The validated submission.
    pub payload: JobPayload,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Progress percentage, 0..=100.
    pub progress: u8,
    /// Source title once resolved.
    pub title: Option<String>,
    /// Notice shown when the policy changed the requested quality.
    pub quality_notice: Option<String>,
    /// Output details once done.
    pub result: Option<JobResult>,
    /// User-facing failure message.
    pub error_message: Option<String>,
    /// Lower values dequeue first.
    pub priority: i64,
    /// Number of failed attempts so far.
    pub attempts: u32,
    /// Attempts allowed before failure is terminal.
    pub max_attempts: u32,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the job last entered `processing`.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the terminal job becomes eligible for purge.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        id: impl Into<String>,
        payload: JobPayload,
        priority: i64,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            payload,
            status: JobStatus::Pending,
            progress: 0,
            title: None,
            quality_notice: None,
            result: None,
            error_message: None,
            priority,
            attempts: 0,
            max_attempts,
            created_at: now,
            started_at: None,
            completed_at: None,
            expires_at: None,
        }
    }

    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the job is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    /// Client-facing projection.
    pub fn view(&self) -> JobView {
        JobView {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            title: self.title.clone(),
            result_reference: self.result.as_ref().map(|r| r.reference.clone()),
            error_message: self.error_message.clone(),
            quality_notice: self.quality_notice.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            expires_at: self.expires_at,
        }
    }
}

/// Output of a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Download handle handed to clients.
    pub reference: String,
    /// Artifact path on disk (empty for streamed jobs).
    pub path: String,
    /// Artifact size in bytes.
    pub size_bytes: u64,
    /// Quality actually used.
    pub quality: Quality,
    /// Length of the produced audio in seconds.
    pub duration_seconds: u64,
}

/// What clients polling a job get to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    /// Job ID.
    pub id: String,
    /// Current status.
    pub status: JobStatus,
    /// Progress percentage.
    pub progress: u8,
    /// Source title.
    pub title: Option<String>,
    /// Download handle once done.
    pub result_reference: Option<String>,
    /// User-facing failure message.
    pub error_message: Option<String>,
    /// Quality override notice.
    pub quality_notice: Option<String>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Terminal time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Purge time.
    pub expires_at: Option<DateTime<Utc>>,
}
