//! Key builders for every store entry Audiodrop uses.
//!
//! Centralising key construction prevents typos and makes it easy
//! to find every key the application uses.

/// Prefix applied to all Audiodrop keys.
const PREFIX: &str = "audiodrop";

// ── Job keys ───────────────────────────────────────────────

/// JSON record of a job.
pub fn job(job_id: &str) -> String {
    format!("{PREFIX}:job:{job_id}")
}

// ── Queue partitions ───────────────────────────────────────

/// Sorted set of pending job IDs scored by priority.
pub fn queue_pending() -> String {
    format!("{PREFIX}:queue:pending")
}

/// Set of job IDs currently processing.
pub fn queue_processing() -> String {
    format!("{PREFIX}:queue:processing")
}

/// Set of completed job IDs.
pub fn queue_completed() -> String {
    format!("{PREFIX}:queue:completed")
}

/// Set of terminally failed job IDs.
pub fn queue_failed() -> String {
    format!("{PREFIX}:queue:failed")
}

// ── Stats counters ─────────────────────────────────────────

/// Counter for a named queue statistic.
pub fn stat(name: &str) -> String {
    format!("{PREFIX}:stats:{name}")
}

// ── Locks ──────────────────────────────────────────────────

/// Dedup lock held by the active job for a source.
pub fn source_lock(source_id: &str) -> String {
    format!("{PREFIX}:lock:source:{source_id}")
}

// ── Source caches ──────────────────────────────────────────

/// Resolved metadata for a source.
pub fn source_metadata(source_id: &str) -> String {
    format!("{PREFIX}:source:{source_id}:metadata")
}

/// Most recent completed file job for a source.
pub fn source_result(source_id: &str) -> String {
    format!("{PREFIX}:source:{source_id}:result")
}

// ── Channels ───────────────────────────────────────────────

/// Pub/sub channel carrying job lifecycle events.
pub fn job_events_channel() -> String {
    format!("{PREFIX}:events:jobs")
}
