//! Per-source deduplication locks.
//!
//! At most one non-terminal job exists per source ID. The lock is a store
//! key holding the owning job ID. It never expires while its job waits in
//! the queue; once the job is admitted an orphan timeout starts, which the
//! worker keeps pushing back with heartbeats until the job settles.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use audiodrop_core::job::JobStatus;
use audiodrop_store::{EphemeralStore, keys};
use audiodrop_worker::QueueEngine;

/// Contents of a source lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Job that owns the source.
    pub job_id: String,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
}

/// Source locks kept in the ephemeral store.
#[derive(Debug, Clone)]
pub struct DedupLocks {
    store: Arc<EphemeralStore>,
    ttl: Duration,
}

impl DedupLocks {
    /// Locks in `store` whose orphan timeout is `ttl`.
    pub fn new(store: Arc<EphemeralStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Orphan timeout of an admitted job's lock.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Take the lock for `source_id` on behalf of a queued `job_id`.
    ///
    /// The lock has no expiry until [`refresh`](Self::refresh) starts the
    /// orphan timeout. Returns `false` if another job holds it.
    pub fn acquire(&self, source_id: &str, job_id: &str, now: DateTime<Utc>) -> bool {
        self.take(source_id, job_id, now, None)
    }

    /// Retake an absent lock for an admitted `job_id`, with the orphan
    /// timeout running.
    pub fn reclaim(&self, source_id: &str, job_id: &str, now: DateTime<Utc>) -> bool {
        self.take(source_id, job_id, now, Some(self.ttl))
    }

    /// Current holder of the lock, if any.
    pub fn holder(&self, source_id: &str) -> Option<LockRecord> {
        self.raw(source_id)
            .and_then(|raw| serde_json::from_str(&raw).ok())
    }

    /// Start or extend the orphan timeout if `job_id` still holds the lock.
    pub fn refresh(&self, source_id: &str, job_id: &str) -> bool {
        self.owned_by(source_id, job_id)
            && self.store.expire(&keys::source_lock(source_id), self.ttl)
    }

    /// Stop the orphan timeout while `job_id` waits in the queue again.
    pub fn hold(&self, source_id: &str, job_id: &str) -> bool {
        self.owned_by(source_id, job_id) && self.store.persist(&keys::source_lock(source_id))
    }

    /// Release the lock if `job_id` holds it.
    pub fn release(&self, source_id: &str, job_id: &str) -> bool {
        let Some(raw) = self.raw(source_id) else {
            return false;
        };
        let owned = serde_json::from_str::<LockRecord>(&raw)
            .map(|r| r.job_id == job_id)
            .unwrap_or(false);
        owned
            && self
                .store
                .compare_and_delete(&keys::source_lock(source_id), &raw)
    }

    /// Drop the lock regardless of holder.
    pub fn force_release(&self, source_id: &str) -> bool {
        self.store.delete(&keys::source_lock(source_id))
    }

    fn take(
        &self,
        source_id: &str,
        job_id: &str,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> bool {
        let record = LockRecord {
            job_id: job_id.to_string(),
            acquired_at: now,
        };
        let Ok(value) = serde_json::to_string(&record) else {
            return false;
        };
        self.store
            .set_nx(&keys::source_lock(source_id), value, ttl)
    }

    fn owned_by(&self, source_id: &str, job_id: &str) -> bool {
        self.holder(source_id)
            .is_some_and(|record| record.job_id == job_id)
    }

    fn raw(&self, source_id: &str) -> Option<String> {
        self.store
            .get(&keys::source_lock(source_id))
            .ok()
            .flatten()
    }
}

/// The lock held by one admitted job.
#[derive(Debug, Clone)]
struct Lease {
    queue: Arc<QueueEngine>,
    locks: DedupLocks,
    job_id: String,
    source_id: String,
}

impl Lease {
    /// Push back the orphan timeout, retaking the lock if it lapsed while
    /// the job is still processing.
    fn beat(&self) -> bool {
        if self.locks.refresh(&self.source_id, &self.job_id) {
            return true;
        }
        if let Some(record) = self.locks.holder(&self.source_id) {
            tracing::warn!(
                "Lock for {} taken over by job {} while job {} runs",
                self.source_id,
                record.job_id,
                self.job_id
            );
            return false;
        }
        match self.queue.get_job(&self.job_id) {
            Ok(Some(job)) if job.status == JobStatus::Processing => {
                let now = self.queue.now();
                self.locks.reclaim(&self.source_id, &self.job_id, now)
            }
            _ => false,
        }
    }
}

/// Settles a processing job and its source lock when dropped.
///
/// If the owner is dropped while the job is still processing (a panic, or a
/// stream whose client went away) the job fails with `interrupt_message`.
/// A job that went back to pending for a retry keeps its lock, without
/// expiry, until it is admitted again.
pub struct ProcessingGuard {
    lease: Lease,
    interrupt_message: &'static str,
}

impl ProcessingGuard {
    /// Guard `job_id`, which holds the lock for `source_id`.
    pub fn new(
        queue: Arc<QueueEngine>,
        locks: DedupLocks,
        job_id: impl Into<String>,
        source_id: impl Into<String>,
        interrupt_message: &'static str,
    ) -> Self {
        Self {
            lease: Lease {
                queue,
                locks,
                job_id: job_id.into(),
                source_id: source_id.into(),
            },
            interrupt_message,
        }
    }

    /// Keep the lock alive.
    pub fn heartbeat(&self) {
        if !self.lease.beat() {
            tracing::debug!(
                "Lock for {} no longer held by job {}",
                self.lease.source_id,
                self.lease.job_id
            );
        }
    }

    /// A heartbeat callable from other threads.
    pub fn heartbeat_fn(&self) -> impl Fn() + Send + Sync + 'static {
        let lease = self.lease.clone();
        move || {
            lease.beat();
        }
    }

    /// Beat on a timer, a third of the orphan timeout apart, until the
    /// returned guard is dropped.
    pub fn keep_alive(&self) -> DropGuard {
        let token = CancellationToken::new();
        let stop = token.clone();
        let lease = self.lease.clone();
        let period = (lease.locks.ttl() / 3).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        lease.beat();
                    }
                }
            }
        });
        token.drop_guard()
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        let Lease {
            queue,
            locks,
            job_id,
            source_id,
        } = &self.lease;
        let status = match queue.get_job(job_id) {
            Ok(Some(job)) => Some(job.status),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Could not read job {} while settling: {}", job_id, e);
                None
            }
        };

        match status {
            Some(JobStatus::Pending) => {
                if !locks.hold(source_id, job_id) && !locks.acquire(source_id, job_id, queue.now()) {
                    tracing::warn!("Job {} re-queued without the lock for {}", job_id, source_id);
                }
                return;
            }
            Some(JobStatus::Processing) => {
                if let Err(e) = queue.fail_job(job_id, self.interrupt_message, false) {
                    tracing::warn!("Could not fail interrupted job {}: {}", job_id, e);
                }
            }
            _ => {}
        }
        locks.release(source_id, job_id);
    }
}
