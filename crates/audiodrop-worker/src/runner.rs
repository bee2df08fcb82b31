//! Worker runner: the dequeue loop that admits jobs and dispatches them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time;
use tokio_util::task::TaskTracker;

use audiodrop_core::config::queue::QueueConfig;
use audiodrop_core::result::AppResult;

use crate::executor::JobExecutor;
use crate::queue::QueueEngine;

/// Recorded on jobs still running when the shutdown grace period ends.
const STRANDED_MESSAGE: &str = "The service restarted before the conversion finished.";

/// Main worker runner that polls the queue and executes jobs
#[derive(Debug)]
pub struct WorkerRunner {
    /// Queue engine for admission
    queue: Arc<QueueEngine>,
    /// Job executor for dispatching
    executor: Arc<JobExecutor>,
    /// Queue configuration
    config: QueueConfig,
    /// Worker identifier
    worker_id: String,
    /// Jobs dispatched and not yet returned
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl WorkerRunner {
    /// Create a new worker runner
    pub fn new(
        queue: Arc<QueueEngine>,
        executor: Arc<JobExecutor>,
        config: QueueConfig,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            executor,
            config,
            worker_id: worker_id.into(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run until `shutdown` flips to `true`, its sender is dropped, or the
    /// queue's run flag is cleared. In-flight jobs get the configured grace
    /// period to finish; any still processing after it are re-queued.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Worker '{}' started with max_concurrent_jobs={}, poll_interval={}ms",
            self.worker_id,
            self.config.max_concurrent_jobs,
            self.config.poll_interval_ms
        );

        self.queue.start_processing();
        let tracker = TaskTracker::new();
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let error_backoff = Duration::from_millis(self.config.error_backoff_ms);

        loop {
            if *shutdown.borrow() || !self.queue.is_running() {
                break;
            }

            let delay = match self.dispatch_ready(&tracker) {
                Ok(dispatched) => {
                    if dispatched == 0 {
                        tracing::trace!("No jobs admitted");
                    }
                    poll_interval
                }
                Err(e) => {
                    tracing::error!("Failed to dequeue job: {}", e);
                    error_backoff
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Worker '{}' received shutdown signal", self.worker_id);
                        break;
                    }
                }
                _ = time::sleep(delay) => {}
            }
        }

        self.queue.stop_processing();
        tracker.close();

        tracing::info!(
            "Worker '{}' waiting for {} in-flight jobs to complete...",
            self.worker_id,
            tracker.len()
        );

        let grace = Duration::from_secs(self.config.shutdown_grace_seconds);
        if time::timeout(grace, tracker.wait()).await.is_err() {
            self.release_stranded();
        }

        tracing::info!("Worker '{}' shut down complete", self.worker_id);
    }

    /// Admit and spawn every job the ceiling allows right now.
    fn dispatch_ready(&self, tracker: &TaskTracker) -> AppResult<usize> {
        let mut dispatched = 0;
        while let Some(job) = self.queue.get_next_job()? {
            let executor = Arc::clone(&self.executor);
            let in_flight = Arc::clone(&self.in_flight);
            let job_id = job.id.clone();
            in_flight.lock().insert(job_id.clone());
            tracker.spawn(async move {
                executor.execute(job).await;
                in_flight.lock().remove(&job_id);
            });
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Hand jobs that outlived the grace period back to the queue.
    fn release_stranded(&self) {
        let stranded: Vec<String> = self.in_flight.lock().drain().collect();
        tracing::warn!(
            "Worker '{}' gave up waiting on {} jobs: {}",
            self.worker_id,
            stranded.len(),
            stranded.join(", ")
        );
        for job_id in &stranded {
            match self.queue.fail_job(job_id, STRANDED_MESSAGE, true) {
                Ok(job) => tracing::info!("Stranded job {} is now {}", job_id, job.status),
                Err(e) => tracing::debug!("Stranded job {} already settled: {}", job_id, e),
            }
        }
    }
}
