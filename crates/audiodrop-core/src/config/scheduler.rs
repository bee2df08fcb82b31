//! Periodic maintenance configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Cron schedules for job purge and age-based cleanup.
///
/// Expressions use the six-field form with a leading seconds column.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SchedulerConfig {
    /// Whether the maintenance scheduler runs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Schedule for purging jobs past their expiry.
    #[serde(default = "default_purge_cron")]
    pub purge_cron: String,
    /// Schedule for age-based cleanup of terminal jobs.
    #[serde(default = "default_cleanup_cron")]
    pub cleanup_cron: String,
    /// Terminal jobs older than this are removed by the cleanup task.
    #[serde(default = "default_cleanup_max_age")]
    #[validate(range(min = 1, max = 720))]
    pub cleanup_max_age_hours: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            purge_cron: default_purge_cron(),
            cleanup_cron: default_cleanup_cron(),
            cleanup_max_age_hours: default_cleanup_max_age(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_purge_cron() -> String {
    "0 * * * * *".to_string()
}

fn default_cleanup_cron() -> String {
    "0 0 * * * *".to_string()
}

fn default_cleanup_max_age() -> u64 {
    24
}
