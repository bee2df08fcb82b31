//! Job executor: runs the registered handler under supervision.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use audiodrop_core::error::AppError;
use audiodrop_core::job::{Job, JobStatus};

use crate::queue::QueueEngine;

/// Message recorded on a job whose handler task died.
const TASK_DIED_MESSAGE: &str = "An unexpected error occurred. Please try again later.";

/// Trait for job handler implementations.
///
/// A handler owns the job while it is processing and is expected to move it
/// to a terminal state (or back to pending) itself. An `Err` means the
/// handler could not do so; the executor then settles the job.
#[async_trait]
pub trait JobHandler: Send + Sync + fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Process one admitted job.
    async fn handle(&self, job: Job) -> Result<(), JobExecutionError>;
}

/// Error from job execution
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Permanent failure, do not retry
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// Transient failure, may retry
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

/// Runs jobs through the handler and settles jobs the handler left behind.
#[derive(Debug)]
pub struct JobExecutor {
    /// Queue used to settle abandoned jobs
    queue: Arc<QueueEngine>,
    /// The job handler
    handler: Arc<dyn JobHandler>,
}

impl JobExecutor {
    /// Create a new job executor
    pub fn new(queue: Arc<QueueEngine>, handler: Arc<dyn JobHandler>) -> Self {
        tracing::info!("Registered job handler '{}'", handler.name());
        Self { queue, handler }
    }

    /// Execute a job in its own task so a panic cannot take the caller down.
    pub async fn execute(&self, job: Job) {
        let job_id = job.id.clone();
        let handler = Arc::clone(&self.handler);

        tracing::info!(
            "Executing job: id={}, handler='{}', attempt={}/{}",
            job.id,
            self.handler.name(),
            job.attempts + 1,
            job.max_attempts
        );

        let outcome = tokio::spawn(async move { handler.handle(job).await }).await;

        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(join) if join.is_panic() => {
                tracing::error!("Handler task for job {} panicked", job_id);
                JobExecutionError::Permanent(TASK_DIED_MESSAGE.to_string())
            }
            Err(_) => JobExecutionError::Transient(TASK_DIED_MESSAGE.to_string()),
        };

        self.settle(&job_id, error);
    }

    /// Fail a job that is still processing after its handler gave up.
    fn settle(&self, job_id: &str, error: JobExecutionError) {
        match self.queue.get_job(job_id) {
            Ok(Some(job)) if job.status == JobStatus::Processing => {}
            Ok(_) => {
                tracing::debug!("Job {} already settled: {}", job_id, error);
                return;
            }
            Err(e) => {
                tracing::error!("Failed to load job {} for settling: {}", job_id, e);
                return;
            }
        }

        let (message, retry) = match &error {
            JobExecutionError::Permanent(msg) => (msg.clone(), false),
            JobExecutionError::Transient(msg) => (msg.clone(), true),
            JobExecutionError::Internal(err) => {
                tracing::error!("Job {} internal error: {}", job_id, err);
                (TASK_DIED_MESSAGE.to_string(), false)
            }
        };

        if let Err(e) = self.queue.fail_job(job_id, &message, retry) {
            tracing::error!("Failed to mark job {} as failed: {}", job_id, e);
        }
    }
}
