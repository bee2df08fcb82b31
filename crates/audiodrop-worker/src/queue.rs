//! Queue engine: job lifecycle state kept in the ephemeral store.
//!
//! Jobs live in exactly one partition at a time: the pending sorted set
//! (scored by priority, ties by submission order) or one of the
//! processing/completed/failed sets. Every transition runs under the
//! admission mutex and never awaits, so the capacity check and the state
//! change cannot interleave with another transition.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use audiodrop_core::config::queue::QueueConfig;
use audiodrop_core::error::AppError;
use audiodrop_core::events::JobEvent;
use audiodrop_core::job::{Job, JobPayload, JobResult, JobStatus};
use audiodrop_core::result::AppResult;
use audiodrop_core::types::Clock;
use audiodrop_store::{EphemeralStore, SubscriptionId, keys};

const PENDING: &str = "pending";
const PROCESSING: &str = "processing";
const COMPLETED: &str = "completed";
const FAILED: &str = "failed";
const TOTAL_PROCESSED: &str = "total_processed";
const TOTAL_CREATED: &str = "total_created";
const TOTAL_REMOVED: &str = "total_removed";

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting to be admitted.
    pub pending: u64,
    /// Jobs currently admitted.
    pub processing: u64,
    /// Jobs finished successfully and not yet removed.
    pub completed: u64,
    /// Jobs failed terminally and not yet removed.
    pub failed: u64,
    /// Jobs that reached a terminal state.
    pub total_processed: u64,
    /// Jobs ever submitted.
    pub total_created: u64,
    /// Terminal jobs removed by purge or cleanup.
    pub total_removed: u64,
    /// Concurrency ceiling.
    pub max_concurrent_jobs: u64,
    /// Whether the dequeue loop is enabled.
    pub is_running: bool,
}

/// Job lifecycle manager.
pub struct QueueEngine {
    /// Backing store
    store: Arc<EphemeralStore>,
    /// Queue settings
    config: QueueConfig,
    /// Source of job timestamps
    clock: Arc<dyn Clock>,
    /// Serializes every lifecycle transition
    admission: Mutex<()>,
    /// Run flag consumed by the worker runner
    running: AtomicBool,
}

impl fmt::Debug for QueueEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEngine")
            .field("config", &self.config)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl QueueEngine {
    /// Create a queue engine over `store`.
    pub fn new(store: Arc<EphemeralStore>, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            admission: Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<EphemeralStore> {
        &self.store
    }

    /// Queue settings.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Current time according to the engine's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── Submission ─────────────────────────────────────────

    /// Submit a new job to the pending sequence.
    pub fn add_job(&self, job_id: &str, payload: JobPayload, priority: i64) -> AppResult<Job> {
        let job = {
            let _guard = self.admission.lock();
            self.ensure_new(job_id)?;

            let job = Job::new(
                job_id,
                payload,
                priority,
                self.config.max_attempts,
                self.clock.now(),
            );
            self.save(&job)?;
            self.store.zadd(&keys::queue_pending(), job_id, priority)?;
            self.store.incr(&keys::stat(PENDING))?;
            self.store.incr(&keys::stat(TOTAL_CREATED))?;
            job
        };

        tracing::debug!(
            "Enqueued job: id={}, source='{}', priority={}",
            job.id,
            job.payload.source_id,
            priority
        );
        self.emit(JobEvent::Added {
            job_id: job.id.clone(),
            priority,
        });
        Ok(job)
    }

    /// Admit a job straight into `processing`, bypassing the pending
    /// sequence. Returns `None` when the ceiling is reached.
    pub fn start_immediately(&self, job_id: &str, payload: JobPayload) -> AppResult<Option<Job>> {
        let job = {
            let _guard = self.admission.lock();
            self.ensure_new(job_id)?;
            if !self.has_capacity()? {
                return Ok(None);
            }

            let now = self.clock.now();
            let mut job = Job::new(job_id, payload, 0, self.config.max_attempts, now);
            job.status = JobStatus::Processing;
            job.started_at = Some(now);
            self.save(&job)?;
            self.store.sadd(&keys::queue_processing(), job_id)?;
            self.store.incr(&keys::stat(PROCESSING))?;
            self.store.incr(&keys::stat(TOTAL_CREATED))?;
            job
        };

        tracing::debug!("Admitted job directly: id={}", job.id);
        self.emit(JobEvent::Processing {
            job_id: job.id.clone(),
        });
        Ok(Some(job))
    }

    // ── Admission ──────────────────────────────────────────

    /// Admit the best pending job if the ceiling allows.
    pub fn get_next_job(&self) -> AppResult<Option<Job>> {
        let job = {
            let _guard = self.admission.lock();
            if !self.has_capacity()? {
                return Ok(None);
            }

            let Some((job_id, _)) = self.store.zpopmin(&keys::queue_pending())? else {
                return Ok(None);
            };
            self.store.decr(&keys::stat(PENDING))?;

            let Some(mut job) = self.load(&job_id)? else {
                tracing::warn!("Pending job {} has no record, dropping it", job_id);
                self.store.incr(&keys::stat(TOTAL_REMOVED))?;
                return Ok(None);
            };

            job.status = JobStatus::Processing;
            job.started_at = Some(self.clock.now());
            self.save(&job)?;
            self.store.sadd(&keys::queue_processing(), &job_id)?;
            self.store.incr(&keys::stat(PROCESSING))?;
            job
        };

        tracing::debug!(
            "Dequeued job: id={}, attempt={}/{}",
            job.id,
            job.attempts + 1,
            job.max_attempts
        );
        self.emit(JobEvent::Processing {
            job_id: job.id.clone(),
        });
        Ok(Some(job))
    }

    // ── Transitions ────────────────────────────────────────

    /// Mark a processing job as done.
    pub fn complete_job(&self, job_id: &str, result: JobResult) -> AppResult<Job> {
        let job = {
            let _guard = self.admission.lock();
            let mut job = self.require_processing(job_id)?;

            let now = self.clock.now();
            job.status = JobStatus::Done;
            job.progress = 100;
            job.result = Some(result);
            job.error_message = None;
            job.completed_at = Some(now);
            job.expires_at = Some(now + self.result_ttl());
            self.save(&job)?;

            self.store.srem(&keys::queue_processing(), job_id)?;
            self.store.sadd(&keys::queue_completed(), job_id)?;
            self.store.decr(&keys::stat(PROCESSING))?;
            self.store.incr(&keys::stat(COMPLETED))?;
            self.store.incr(&keys::stat(TOTAL_PROCESSED))?;
            job
        };

        tracing::debug!("Job completed: id={}", job_id);
        self.emit(JobEvent::Completed {
            job_id: job_id.to_string(),
        });
        Ok(job)
    }

    /// Record a failed attempt.
    ///
    /// With `retry` and attempts left the job goes back to pending behind
    /// fresh work; otherwise it fails terminally.
    pub fn fail_job(&self, job_id: &str, error: &str, retry: bool) -> AppResult<Job> {
        let (job, event) = {
            let _guard = self.admission.lock();
            let mut job = self.require_processing(job_id)?;

            job.attempts += 1;
            job.error_message = Some(error.to_string());
            self.store.srem(&keys::queue_processing(), job_id)?;
            self.store.decr(&keys::stat(PROCESSING))?;

            let event = if retry && job.attempts < job.max_attempts {
                job.status = JobStatus::Pending;
                job.priority = job.priority.saturating_add(self.config.retry_priority_penalty);
                self.save(&job)?;
                self.store.zadd(&keys::queue_pending(), job_id, job.priority)?;
                self.store.incr(&keys::stat(PENDING))?;
                JobEvent::Retrying {
                    job_id: job_id.to_string(),
                    attempts: job.attempts,
                    error: error.to_string(),
                }
            } else {
                let now = self.clock.now();
                job.status = JobStatus::Failed;
                job.completed_at = Some(now);
                job.expires_at = Some(now + self.result_ttl());
                self.save(&job)?;
                self.store.sadd(&keys::queue_failed(), job_id)?;
                self.store.incr(&keys::stat(FAILED))?;
                self.store.incr(&keys::stat(TOTAL_PROCESSED))?;
                JobEvent::Failed {
                    job_id: job_id.to_string(),
                    error: error.to_string(),
                }
            };
            (job, event)
        };

        match &event {
            JobEvent::Retrying { attempts, .. } => tracing::warn!(
                "Job {} failed (attempt {}/{}), re-queued: {}",
                job_id,
                attempts,
                job.max_attempts,
                error
            ),
            _ => tracing::warn!("Job {} failed permanently: {}", job_id, error),
        }
        self.emit(event);
        Ok(job)
    }

    /// Raise the progress of a processing job.
    ///
    /// Returns `false` when the job is not processing or `progress` does not
    /// exceed the current value.
    pub fn update_progress(&self, job_id: &str, progress: u8) -> AppResult<bool> {
        let progress = progress.min(100);
        {
            let _guard = self.admission.lock();
            let Some(mut job) = self.load(job_id)? else {
                return Err(AppError::not_found(format!("Job '{job_id}' not found")));
            };
            if job.status != JobStatus::Processing || progress <= job.progress {
                return Ok(false);
            }
            job.progress = progress;
            self.save(&job)?;
        }

        tracing::trace!("Job {} progress {}%", job_id, progress);
        self.emit(JobEvent::Progress {
            job_id: job_id.to_string(),
            progress,
        });
        Ok(true)
    }

    /// Attach resolved metadata to a job.
    pub fn record_metadata(
        &self,
        job_id: &str,
        title: Option<String>,
        quality_notice: Option<String>,
    ) -> AppResult<()> {
        let _guard = self.admission.lock();
        let Some(mut job) = self.load(job_id)? else {
            return Err(AppError::not_found(format!("Job '{job_id}' not found")));
        };
        if title.is_some() {
            job.title = title;
        }
        if quality_notice.is_some() {
            job.quality_notice = quality_notice;
        }
        self.save(&job)
    }

    // ── Run flag ───────────────────────────────────────────

    /// Enable the dequeue loop.
    pub fn start_processing(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            tracing::info!("Queue processing started");
        }
    }

    /// Ask the dequeue loop to stop after its current iteration.
    pub fn stop_processing(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Queue processing stopped");
        }
    }

    /// Whether the dequeue loop is enabled.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Reclamation ────────────────────────────────────────

    /// Remove terminal jobs that reached their terminal state more than
    /// `max_age_hours` ago. Returns how many were removed.
    pub fn cleanup_old_jobs(&self, max_age_hours: u64) -> AppResult<usize> {
        Ok(self.remove_older_than(max_age_hours)?.len())
    }

    /// Like [`cleanup_old_jobs`](Self::cleanup_old_jobs) but returns the
    /// removed records so callers can release what they reference.
    pub fn remove_older_than(&self, max_age_hours: u64) -> AppResult<Vec<Job>> {
        let hours = i64::try_from(max_age_hours).unwrap_or(i64::MAX);
        let threshold = self.clock.now() - Duration::hours(hours.min(100_000));
        let removed =
            self.remove_terminal(|job| job.completed_at.is_some_and(|at| at < threshold))?;

        if !removed.is_empty() {
            tracing::info!(
                "Cleaned up {} jobs older than {}h",
                removed.len(),
                max_age_hours
            );
        }
        Ok(removed)
    }

    /// Remove terminal jobs past their expiry and return them.
    pub fn purge_expired_jobs(&self) -> AppResult<Vec<Job>> {
        let now = self.clock.now();
        let removed = self.remove_terminal(|job| job.is_expired(now))?;

        if !removed.is_empty() {
            tracing::info!("Purged {} expired jobs", removed.len());
        }
        Ok(removed)
    }

    /// Remove every job and reset the counters.
    pub fn clear_queue(&self) -> AppResult<usize> {
        let removed = {
            let _guard = self.admission.lock();
            let mut ids: Vec<String> = self
                .store
                .zrange(&keys::queue_pending(), 0, usize::MAX)?
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            for partition in [
                keys::queue_processing(),
                keys::queue_completed(),
                keys::queue_failed(),
            ] {
                ids.extend(self.store.smembers(&partition)?);
            }

            for id in &ids {
                self.store.delete(&keys::job(id));
            }
            for key in [
                keys::queue_pending(),
                keys::queue_processing(),
                keys::queue_completed(),
                keys::queue_failed(),
            ] {
                self.store.delete(&key);
            }
            for name in [
                PENDING,
                PROCESSING,
                COMPLETED,
                FAILED,
                TOTAL_PROCESSED,
                TOTAL_CREATED,
                TOTAL_REMOVED,
            ] {
                self.store.delete(&keys::stat(name));
            }
            ids.len()
        };

        tracing::warn!("Queue cleared: {} jobs removed", removed);
        Ok(removed)
    }

    // ── Queries ────────────────────────────────────────────

    /// Fetch a job record.
    pub fn get_job(&self, job_id: &str) -> AppResult<Option<Job>> {
        self.load(job_id)
    }

    /// Every job, pending ones first in dequeue order.
    pub fn list_jobs(&self) -> AppResult<Vec<Job>> {
        let mut ids: Vec<String> = self
            .store
            .zrange(&keys::queue_pending(), 0, usize::MAX)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        for partition in [
            keys::queue_processing(),
            keys::queue_completed(),
            keys::queue_failed(),
        ] {
            ids.extend(self.store.smembers(&partition)?);
        }

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.load(&id)? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Counter snapshot.
    pub fn get_stats(&self) -> AppResult<QueueStats> {
        Ok(QueueStats {
            pending: self.counter(PENDING)?,
            processing: self.counter(PROCESSING)?,
            completed: self.counter(COMPLETED)?,
            failed: self.counter(FAILED)?,
            total_processed: self.counter(TOTAL_PROCESSED)?,
            total_created: self.counter(TOTAL_CREATED)?,
            total_removed: self.counter(TOTAL_REMOVED)?,
            max_concurrent_jobs: self.config.max_concurrent_jobs as u64,
            is_running: self.is_running(),
        })
    }

    /// Number of pending jobs.
    pub fn get_queue_length(&self) -> AppResult<usize> {
        Ok(self.store.zcard(&keys::queue_pending())?)
    }

    /// Number of processing jobs.
    pub fn get_processing_count(&self) -> AppResult<usize> {
        Ok(self.store.scard(&keys::queue_processing())?)
    }

    /// Whether the store answers and the dequeue loop is enabled.
    pub fn is_healthy(&self) -> bool {
        self.store.ping() && self.is_running()
    }

    /// Register a callback for lifecycle events.
    ///
    /// Callbacks run synchronously on the thread that made the transition,
    /// in registration order.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(JobEvent) + Send + Sync + 'static,
    {
        self.store
            .subscribe(&keys::job_events_channel(), move |_, message| {
                match serde_json::from_str::<JobEvent>(message) {
                    Ok(event) => handler(event),
                    Err(e) => tracing::warn!("Dropping malformed job event: {}", e),
                }
            })
    }

    /// Remove a lifecycle subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    // ── Internals ──────────────────────────────────────────

    fn result_ttl(&self) -> Duration {
        let secs = i64::try_from(self.config.result_ttl_seconds).unwrap_or(i64::MAX);
        Duration::seconds(secs.min(i64::MAX / 1000))
    }

    fn has_capacity(&self) -> AppResult<bool> {
        Ok(self.store.scard(&keys::queue_processing())? < self.config.max_concurrent_jobs)
    }

    fn ensure_new(&self, job_id: &str) -> AppResult<()> {
        if self.store.exists(&keys::job(job_id)) {
            return Err(AppError::conflict(format!("Job '{job_id}' already exists")));
        }
        Ok(())
    }

    fn load(&self, job_id: &str) -> AppResult<Option<Job>> {
        self.store.get_json(&keys::job(job_id))
    }

    fn save(&self, job: &Job) -> AppResult<()> {
        self.store.set_json(&keys::job(&job.id), job, None)
    }

    fn require_processing(&self, job_id: &str) -> AppResult<Job> {
        let job = self
            .load(job_id)?
            .ok_or_else(|| AppError::not_found(format!("Job '{job_id}' not found")))?;
        if job.status != JobStatus::Processing {
            return Err(AppError::internal(format!(
                "Job '{job_id}' is {} but must be processing",
                job.status
            )));
        }
        Ok(job)
    }

    fn counter(&self, name: &str) -> AppResult<u64> {
        let raw = self.store.get(&keys::stat(name))?;
        let value = match raw {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|e| AppError::internal(format!("Corrupt counter '{name}': {e}")))?,
            None => 0,
        };
        Ok(value.max(0) as u64)
    }

    fn remove_terminal(&self, expired: impl Fn(&Job) -> bool) -> AppResult<Vec<Job>> {
        let removed = {
            let _guard = self.admission.lock();
            let mut removed = Vec::new();

            for (partition, counter) in [
                (keys::queue_completed(), COMPLETED),
                (keys::queue_failed(), FAILED),
            ] {
                for job_id in self.store.smembers(&partition)? {
                    let job = self.load(&job_id)?;
                    let drop_it = match &job {
                        Some(job) => expired(job),
                        None => true,
                    };
                    if !drop_it {
                        continue;
                    }

                    self.store.delete(&keys::job(&job_id));
                    self.store.srem(&partition, &job_id)?;
                    self.store.decr(&keys::stat(counter))?;
                    self.store.incr(&keys::stat(TOTAL_REMOVED))?;
                    if let Some(job) = job {
                        removed.push(job);
                    }
                }
            }
            removed
        };

        for job in &removed {
            self.emit(JobEvent::Purged {
                job_id: job.id.clone(),
            });
        }
        Ok(removed)
    }

    fn emit(&self, event: JobEvent) {
        match serde_json::to_string(&event) {
            Ok(message) => {
                self.store.publish(&keys::job_events_channel(), &message);
            }
            Err(e) => tracing::warn!("Failed to serialize job event: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiodrop_core::config::store::StoreConfig;
    use audiodrop_core::job::JobKind;
    use audiodrop_core::types::{ManualClock, Quality};
    use chrono::TimeZone;

    fn payload(source: &str) -> JobPayload {
        JobPayload {
            source_url: format!("https://www.youtube.com/watch?v={source}"),
            source_id: format!("youtube:{source}"),
            quality: Quality::K192,
            trim: None,
            kind: JobKind::File,
        }
    }

    fn result() -> JobResult {
        JobResult {
            reference: "/api/download/x".to_string(),
            path: "/tmp/x.mp3".to_string(),
            size_bytes: 10,
            quality: Quality::K192,
            duration_seconds: 60,
        }
    }

    fn make_queue(max_concurrent_jobs: usize) -> (QueueEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let config = QueueConfig {
            max_concurrent_jobs,
            ..QueueConfig::default()
        };
        let queue = QueueEngine::new(
            EphemeralStore::shared(&StoreConfig::default()),
            config,
            clock.clone(),
        );
        (queue, clock)
    }

    fn assert_partition_sum(queue: &QueueEngine) {
        let s = queue.get_stats().unwrap();
        assert_eq!(
            s.pending + s.processing + s.completed + s.failed,
            s.total_created - s.total_removed
        );
    }

    #[test]
    fn test_priority_then_submission_order() {
        let (queue, _) = make_queue(5);
        queue.add_job("J2", payload("b"), 1).unwrap();
        queue.add_job("J1", payload("a"), 0).unwrap();
        queue.add_job("J3", payload("c"), 1).unwrap();

        let order: Vec<String> = (0..3)
            .map(|_| queue.get_next_job().unwrap().unwrap().id)
            .collect();
        assert_eq!(order, vec!["J1", "J2", "J3"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (queue, _) = make_queue(5);
        queue.add_job("J1", payload("a"), 0).unwrap();
        let err = queue.add_job("J1", payload("b"), 0).unwrap_err();
        assert_eq!(err.kind, audiodrop_core::error::ErrorKind::Conflict);
        assert_eq!(queue.get_stats().unwrap().total_created, 1);
    }

    #[test]
    fn test_ceiling_is_never_exceeded() {
        let (queue, _) = make_queue(2);
        for i in 0..4 {
            queue.add_job(&format!("J{i}"), payload(&i.to_string()), 0).unwrap();
        }
        assert!(queue.get_next_job().unwrap().is_some());
        assert!(queue.get_next_job().unwrap().is_some());
        assert!(queue.get_next_job().unwrap().is_none());
        assert_eq!(queue.get_processing_count().unwrap(), 2);
        assert_eq!(queue.get_queue_length().unwrap(), 2);

        // Streaming admission honours the same ceiling.
        assert!(queue.start_immediately("S1", payload("s")).unwrap().is_none());

        queue.complete_job("J0", result()).unwrap();
        assert!(queue.get_next_job().unwrap().is_some());
        assert_partition_sum(&queue);
    }

    #[test]
    fn test_complete_freezes_progress() {
        let (queue, clock) = make_queue(5);
        queue.add_job("J1", payload("a"), 0).unwrap();
        queue.get_next_job().unwrap();

        assert!(queue.update_progress("J1", 40).unwrap());
        assert!(!queue.update_progress("J1", 30).unwrap());
        assert_eq!(queue.get_job("J1").unwrap().unwrap().progress, 40);

        let done = queue.complete_job("J1", result()).unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.progress, 100);
        assert_eq!(
            done.expires_at.unwrap(),
            clock.now() + Duration::seconds(1800)
        );

        assert!(!queue.update_progress("J1", 100).unwrap());
        assert!(queue.complete_job("J1", result()).is_err());
        assert_eq!(queue.get_job("J1").unwrap().unwrap().progress, 100);
    }

    #[test]
    fn test_retry_until_max_attempts() {
        let (queue, _) = make_queue(5);
        queue.add_job("J1", payload("a"), 0).unwrap();

        queue.get_next_job().unwrap();
        let job = queue.fail_job("J1", "network", true).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.priority, 1000);

        // attempts == max_attempts - 1: the next retryable failure is final.
        queue.get_next_job().unwrap();
        let job = queue.fail_job("J1", "network", true).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 2);

        queue.get_next_job().unwrap();
        let job = queue.fail_job("J1", "network", true).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.error_message.as_deref(), Some("network"));
        assert!(job.expires_at.is_some());

        let stats = queue.get_stats().unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_processed, 1);
        assert_partition_sum(&queue);
    }

    #[test]
    fn test_retry_yields_to_fresh_work() {
        let (queue, _) = make_queue(5);
        queue.add_job("J1", payload("a"), 0).unwrap();
        queue.get_next_job().unwrap();
        queue.fail_job("J1", "network", true).unwrap();
        queue.add_job("J2", payload("b"), 5).unwrap();

        assert_eq!(queue.get_next_job().unwrap().unwrap().id, "J2");
        assert_eq!(queue.get_next_job().unwrap().unwrap().id, "J1");
    }

    #[test]
    fn test_permanent_failure_skips_retry() {
        let (queue, _) = make_queue(5);
        queue.add_job("J1", payload("a"), 0).unwrap();
        queue.get_next_job().unwrap();
        let job = queue.fail_job("J1", "private video", false).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn test_cleanup_old_jobs_by_age() {
        let (queue, clock) = make_queue(5);
        queue.add_job("old", payload("a"), 0).unwrap();
        queue.get_next_job().unwrap();
        queue.complete_job("old", result()).unwrap();

        clock.advance(Duration::minutes(90));
        queue.add_job("young", payload("b"), 0).unwrap();
        queue.get_next_job().unwrap();
        queue.complete_job("young", result()).unwrap();

        clock.advance(Duration::minutes(30));
        // "old" finished two hours ago, "young" thirty minutes ago.
        assert_eq!(queue.cleanup_old_jobs(1).unwrap(), 1);
        assert!(queue.get_job("old").unwrap().is_none());
        assert!(queue.get_job("young").unwrap().is_some());
        assert_partition_sum(&queue);
    }

    #[test]
    fn test_purge_expired_returns_jobs() {
        let (queue, clock) = make_queue(5);
        queue.add_job("J1", payload("a"), 0).unwrap();
        queue.get_next_job().unwrap();
        queue.complete_job("J1", result()).unwrap();

        clock.advance(Duration::minutes(29));
        assert!(queue.purge_expired_jobs().unwrap().is_empty());

        clock.advance(Duration::minutes(2));
        let purged = queue.purge_expired_jobs().unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].id, "J1");
        assert_eq!(queue.get_stats().unwrap().completed, 0);
        assert_partition_sum(&queue);
    }

    #[test]
    fn test_events_in_order() {
        let (queue, _) = make_queue(5);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            queue.subscribe(move |event| seen.lock().push(event));
        }

        queue.add_job("J1", payload("a"), 0).unwrap();
        queue.get_next_job().unwrap();
        queue.update_progress("J1", 50).unwrap();
        queue.complete_job("J1", result()).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 4);
        assert!(matches!(seen[0], JobEvent::Added { priority: 0, .. }));
        assert!(matches!(seen[1], JobEvent::Processing { .. }));
        assert!(matches!(seen[2], JobEvent::Progress { progress: 50, .. }));
        assert!(matches!(seen[3], JobEvent::Completed { .. }));
    }

    #[test]
    fn test_clear_queue_and_health() {
        let (queue, _) = make_queue(5);
        assert!(!queue.is_healthy());
        queue.start_processing();
        assert!(queue.is_healthy());

        queue.add_job("J1", payload("a"), 0).unwrap();
        queue.add_job("J2", payload("b"), 0).unwrap();
        queue.get_next_job().unwrap();

        assert_eq!(queue.clear_queue().unwrap(), 2);
        assert_eq!(queue.get_stats().unwrap(), QueueStats {
            max_concurrent_jobs: 5,
            is_running: true,
            ..QueueStats::default()
        });
        assert!(queue.list_jobs().unwrap().is_empty());

        queue.stop_processing();
        assert!(!queue.is_running());
    }

    #[test]
    fn test_record_metadata() {
        let (queue, _) = make_queue(5);
        queue.add_job("J1", payload("a"), 0).unwrap();
        queue
            .record_metadata("J1", Some("Song".to_string()), None)
            .unwrap();
        let job = queue.get_job("J1").unwrap().unwrap();
        assert_eq!(job.title.as_deref(), Some("Song"));
        assert!(job.quality_notice.is_none());
        assert!(queue.record_metadata("missing", None, None).is_err());
    }
}
