//! Direct-to-client streaming.
//!
//! A stream job skips the pending sequence: it is admitted immediately (or
//! refused when every slot is busy), resolved while the client waits, and
//! then encoded straight into the client's writer. Streams never retry. A
//! session dropped before it finishes fails its job and frees the slot.

use std::fmt;
use std::time::Instant;

use tokio::io::AsyncWrite;
use tokio_util::sync::{CancellationToken, DropGuard};

use audiodrop_core::job::{Job, JobKind, JobResult};
use audiodrop_core::types::Quality;

use crate::dedup::ProcessingGuard;
use crate::error::ConversionError;
use crate::metrics::Delivery;
use crate::models::{ConversionRequest, sanitize_filename};
use crate::orchestrator::{Claim, Orchestrator, PROGRESS_TRANSCODING, Plan, estimate_size};

/// Recorded on a stream job whose client went away.
const STREAM_ABANDONED_MESSAGE: &str = "The conversion was cancelled.";

/// Result of asking for a stream.
#[derive(Debug)]
pub enum StreamStart {
    /// The stream is resolved and ready to run.
    Ready(StreamSession),
    /// Another job is already working on this source.
    InFlight {
        /// The job that owns the source.
        job_id: String,
    },
}

impl Orchestrator {
    /// Admit and resolve a stream job.
    ///
    /// Fails with [`ConversionError::AtCapacity`] when no slot is free.
    pub async fn prepare_stream(
        &self,
        request: ConversionRequest,
    ) -> Result<StreamStart, ConversionError> {
        let payload = self.validate(&request, JobKind::Stream)?;
        let source_id = payload.source_id.clone();

        let job = {
            let _claim = self.claims.lock();
            let job_id = match self.claim(&source_id, None)? {
                Claim::Existing(job_id) => return Ok(StreamStart::InFlight { job_id }),
                Claim::Acquired(job_id) => job_id,
            };
            match self.queue.start_immediately(&job_id, payload) {
                Ok(Some(job)) => job,
                Ok(None) => {
                    self.locks.release(&source_id, &job_id);
                    let max_slots = self.queue.config().max_concurrent_jobs;
                    tracing::warn!("Stream refused for {}: all {} slots busy", source_id, max_slots);
                    return Err(ConversionError::AtCapacity { max_slots });
                }
                Err(e) => {
                    self.locks.release(&source_id, &job_id);
                    return Err(e.into());
                }
            }
        };

        let guard = ProcessingGuard::new(
            self.queue.clone(),
            self.locks.clone(),
            job.id.clone(),
            source_id,
            STREAM_ABANDONED_MESSAGE,
        );
        guard.heartbeat();
        let keep_alive = guard.keep_alive();
        self.metrics.record_started(Delivery::Stream);

        let plan = match self.resolve_plan(&job).await {
            Ok(plan) => plan,
            Err(err) => {
                if let Err(e) = self.queue.fail_job(&job.id, err.user_message(), false) {
                    tracing::warn!("Could not fail stream job {}: {}", job.id, e);
                }
                self.metrics.record_failure();
                tracing::warn!("Stream preparation failed: job={}, error={}", job.id, err);
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        self.active_streams.insert(job.id.clone(), cancel.clone());
        tracing::info!("Stream ready: job={}, title='{}'", job.id, plan.title);

        Ok(StreamStart::Ready(StreamSession {
            orchestrator: self.clone(),
            job,
            plan,
            cancel,
            finished: false,
            _keep_alive: keep_alive,
            _guard: guard,
        }))
    }

    async fn resolve_plan(&self, job: &Job) -> Result<Plan, ConversionError> {
        let metadata = self
            .resolve(&job.payload.source_id, &job.payload.source_url)
            .await?;
        let plan = self.plan(job, &metadata)?;
        self.queue.update_progress(&job.id, PROGRESS_TRANSCODING)?;
        Ok(plan)
    }
}

/// A resolved stream waiting to be written to a client.
pub struct StreamSession {
    orchestrator: Orchestrator,
    job: Job,
    plan: Plan,
    cancel: CancellationToken,
    finished: bool,
    // Heartbeats stop before the guard settles the job.
    _keep_alive: DropGuard,
    // Dropped after `Drop::drop` so the job is settled last.
    _guard: ProcessingGuard,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("job_id", &self.job.id)
            .field("title", &self.plan.title)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    /// The stream's job ID.
    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    /// Source title.
    pub fn title(&self) -> &str {
        &self.plan.title
    }

    /// Notice shown when the quality was lowered.
    pub fn quality_notice(&self) -> Option<&str> {
        self.plan.notice.as_deref()
    }

    /// Suggested filename for the client.
    pub fn filename(&self) -> String {
        sanitize_filename(&self.plan.title)
    }

    /// Quality being produced.
    pub fn quality(&self) -> Quality {
        self.plan.request.quality
    }

    /// Length of the produced audio in seconds.
    pub fn duration_seconds(&self) -> u64 {
        self.plan.request.output_seconds
    }

    /// Rough output size, suitable for a length hint.
    pub fn estimated_size(&self) -> u64 {
        estimate_size(self.plan.request.quality, self.plan.request.output_seconds)
    }

    /// Token that cancels this stream.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Encode into `sink` until done or failed.
    ///
    /// Cancelling `cancel`, or the session's own token through
    /// [`Orchestrator::cancel_stream`], stops the encoder.
    pub async fn run(
        mut self,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: CancellationToken,
    ) -> Result<u64, ConversionError> {
        let started = Instant::now();
        let orchestrator = self.orchestrator.clone();
        let transcode =
            orchestrator
                .transcoder
                .transcode_to_sink(&self.plan.request, sink, self.cancel.clone());
        let outcome = tokio::select! {
            outcome = transcode => outcome,
            _ = cancel.cancelled() => Err(ConversionError::Cancelled),
        };
        self.finished = true;

        match outcome {
            Ok(bytes) => {
                let result = JobResult {
                    reference: format!("/api/stream/{}", self.job.id),
                    path: String::new(),
                    size_bytes: bytes,
                    quality: self.plan.request.quality,
                    duration_seconds: self.plan.request.output_seconds,
                };
                orchestrator.queue.complete_job(&self.job.id, result)?;
                orchestrator.metrics.record_success(started.elapsed(), bytes);
                tracing::info!("Stream completed: job={}, bytes={}", self.job.id, bytes);
                Ok(bytes)
            }
            Err(ConversionError::Cancelled) => {
                let err = ConversionError::Cancelled;
                orchestrator.metrics.record_cancelled();
                orchestrator
                    .queue
                    .fail_job(&self.job.id, err.user_message(), false)?;
                tracing::info!("Stream cancelled: job={}", self.job.id);
                Err(err)
            }
            Err(err) => {
                if matches!(err, ConversionError::Timeout { .. }) {
                    orchestrator.metrics.record_timeout();
                }
                orchestrator.metrics.record_failure();
                orchestrator
                    .queue
                    .fail_job(&self.job.id, err.user_message(), false)?;
                tracing::warn!("Stream failed: job={}, error={}", self.job.id, err);
                Err(err)
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.orchestrator.active_streams.remove(&self.job.id);
        if !self.finished {
            self.cancel.cancel();
            self.orchestrator.metrics.record_cancelled();
            tracing::info!("Stream abandoned before completion: job={}", self.job.id);
        }
    }
}
