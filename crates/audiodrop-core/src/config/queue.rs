//! Queue engine configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Queue engine and dequeue loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QueueConfig {
    /// Maximum number of jobs in `processing` at any instant.
    #[serde(default = "default_max_concurrent_jobs")]
    #[validate(range(min = 1, max = 256))]
    pub max_concurrent_jobs: usize,
    /// Attempts allowed before a retryable failure becomes terminal.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: u32,
    /// Added to a job's priority each time it is re-queued.
    #[serde(default = "default_retry_priority_penalty")]
    pub retry_priority_penalty: i64,
    /// Seconds a terminal job (and its artifact) is kept before purge.
    #[serde(default = "default_result_ttl")]
    #[validate(range(min = 1))]
    pub result_ttl_seconds: u64,
    /// Idle sleep of the dequeue loop in milliseconds.
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 10, max = 60000))]
    pub poll_interval_ms: u64,
    /// Sleep after an unexpected dequeue error in milliseconds.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,
    /// How long shutdown waits for in-flight jobs.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_attempts: default_max_attempts(),
            retry_priority_penalty: default_retry_priority_penalty(),
            result_ttl_seconds: default_result_ttl(),
            poll_interval_ms: default_poll_interval(),
            error_backoff_ms: default_error_backoff(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_priority_penalty() -> i64 {
    1000
}

fn default_result_ttl() -> u64 {
    30 * 60
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_error_backoff() -> u64 {
    5000
}

fn default_shutdown_grace() -> u64 {
    30
}
