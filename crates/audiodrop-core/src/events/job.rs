//! Job lifecycle events.

use serde::{Deserialize, Serialize};

/// A job lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job entered the pending sequence.
    Added {
        /// Job ID.
        job_id: String,
        /// Priority it was queued with.
        priority: i64,
    },
    /// A job was admitted into processing.
    Processing {
        /// Job ID.
        job_id: String,
    },
    /// Progress advanced.
    Progress {
        /// Job ID.
        job_id: String,
        /// New progress percentage.
        progress: u8,
    },
    /// A job finished successfully.
    Completed {
        /// Job ID.
        job_id: String,
    },
    /// A job failed and went back to pending.
    Retrying {
        /// Job ID.
        job_id: String,
        /// Attempts used so far.
        attempts: u32,
        /// User-facing failure message.
        error: String,
    },
    /// A job failed terminally.
    Failed {
        /// Job ID.
        job_id: String,
        /// User-facing failure message.
        error: String,
    },
    /// A terminal job was removed from the store.
    Purged {
        /// Job ID.
        job_id: String,
    },
}

impl JobEvent {
    /// The job this event concerns.
    pub fn job_id(&self) -> &str {
        match self {
            Self::Added { job_id, .. }
            | Self::Processing { job_id }
            | Self::Progress { job_id, .. }
            | Self::Completed { job_id }
            | Self::Retrying { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Purged { job_id } => job_id,
        }
    }
}
