//! Conversion orchestration.
//!
//! The orchestrator sits between clients and the queue: it validates
//! submissions, deduplicates them per source, runs admitted jobs through
//! resolution and transcoding, and reclaims artifacts of expired jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use validator::Validate;

use audiodrop_core::config::conversion::ConversionConfig;
use audiodrop_core::error::AppError;
use audiodrop_core::job::{Job, JobKind, JobPayload, JobResult, JobStatus, JobView};
use audiodrop_core::result::AppResult;
use audiodrop_core::types::{Quality, TrimWindow};
use audiodrop_store::{StoreStats, keys};
use audiodrop_worker::{JobExecutionError, JobHandler, Maintenance, QueueEngine, QueueStats};

use crate::dedup::{DedupLocks, ProcessingGuard};
use crate::error::ConversionError;
use crate::metrics::{ConversionMetrics, Delivery, MetricsSnapshot};
use crate::models::{ConversionRequest, SourceMetadata, TranscodeRequest, sanitize_filename};
use crate::policy::{QualityDecision, QualityPolicy, parse_timestamp};
use crate::resolver::SourceResolver;
use crate::source;
use crate::transcoder::{ProgressFn, Transcoder};

/// Recorded on a file job whose worker went away mid-conversion.
const INTERRUPTED_MESSAGE: &str = "An unexpected error occurred. Please try again later.";

/// Progress once the source is resolved.
const PROGRESS_RESOLVED: u8 = 5;
/// Progress once transcoding starts.
pub(crate) const PROGRESS_TRANSCODING: u8 = 10;

/// Outcome of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    /// Job handling the request.
    pub job_id: String,
    /// Whether the job already existed for this source.
    pub existing: bool,
}

/// A finished artifact ready for download.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    /// Location on disk.
    pub path: PathBuf,
    /// Suggested download filename.
    pub filename: String,
    /// Size in bytes.
    pub size_bytes: u64,
}

/// Source lookup without creating a job.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Normalized source ID.
    pub source_id: String,
    /// Resolved metadata.
    pub metadata: SourceMetadata,
    /// Quality that a conversion would use.
    pub decision: QualityDecision,
    /// Rough output size at that quality.
    pub estimated_size_bytes: u64,
}

/// Service-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    /// Queue counters.
    pub queue: QueueStats,
    /// Store counters.
    pub store: StoreStats,
    /// Conversion counters.
    pub conversions: MetricsSnapshot,
    /// Bytes used by artifacts on disk.
    pub storage_bytes: u64,
    /// Number of artifacts on disk.
    pub artifact_count: u64,
    /// Seconds since the orchestrator was created.
    pub uptime_seconds: u64,
    /// Streams currently being served.
    pub active_streams: usize,
}

/// Everything decided about a job once its source is resolved.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub request: TranscodeRequest,
    pub title: String,
    pub notice: Option<String>,
}

pub(crate) enum Claim {
    /// A live job, or a reusable finished one, already covers the source.
    Existing(String),
    /// The lock was taken for this fresh job ID.
    Acquired(String),
}

/// Conversion orchestrator.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    pub(crate) queue: Arc<QueueEngine>,
    pub(crate) locks: DedupLocks,
    pub(crate) resolver: Arc<dyn SourceResolver>,
    pub(crate) transcoder: Arc<dyn Transcoder>,
    pub(crate) policy: QualityPolicy,
    pub(crate) config: Arc<ConversionConfig>,
    pub(crate) metrics: Arc<ConversionMetrics>,
    pub(crate) active_streams: Arc<DashMap<String, CancellationToken>>,
    /// Serializes lock inspection with job creation.
    pub(crate) claims: Arc<Mutex<()>>,
    started_at: Instant,
}

impl Orchestrator {
    /// Create an orchestrator over `queue`.
    pub fn new(
        queue: Arc<QueueEngine>,
        resolver: Arc<dyn SourceResolver>,
        transcoder: Arc<dyn Transcoder>,
        config: ConversionConfig,
    ) -> Self {
        let locks = DedupLocks::new(
            queue.store().clone(),
            Duration::from_secs(config.lock_ttl_seconds),
        );
        Self {
            locks,
            policy: QualityPolicy::from_config(&config),
            queue,
            resolver,
            transcoder,
            config: Arc::new(config),
            metrics: Arc::new(ConversionMetrics::new()),
            active_streams: Arc::new(DashMap::new()),
            claims: Arc::new(Mutex::new(())),
            started_at: Instant::now(),
        }
    }

    /// The queue this orchestrator feeds.
    pub fn queue(&self) -> &Arc<QueueEngine> {
        &self.queue
    }

    /// Conversion counters.
    pub fn metrics(&self) -> &ConversionMetrics {
        &self.metrics
    }

    // ── Submission ─────────────────────────────────────────

    /// Validate a request into a job payload.
    pub fn validate(
        &self,
        request: &ConversionRequest,
        kind: JobKind,
    ) -> Result<JobPayload, ConversionError> {
        request
            .validate()
            .map_err(|e| ConversionError::Validation(e.to_string()))?;

        let source_id = source::source_id(&request.url)?;
        let quality = match request.quality.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => q
                .parse::<Quality>()
                .map_err(|_| ConversionError::InvalidQuality(q.to_string()))?,
            _ => self.config.default_quality,
        };

        let bound = |value: &Option<String>| -> Result<Option<u64>, ConversionError> {
            match value.as_deref().map(str::trim) {
                Some(v) if !v.is_empty() => Ok(Some(parse_timestamp(v)?)),
                _ => Ok(None),
            }
        };
        let trim = TrimWindow::from_bounds(bound(&request.start_time)?, bound(&request.end_time)?)?;

        Ok(JobPayload {
            source_url: request.url.trim().to_string(),
            source_id,
            quality,
            trim,
            kind,
        })
    }

    /// Submit a file conversion.
    ///
    /// If a non-terminal job already exists for the same source, or a
    /// finished one with the same quality and trim whose artifact has not
    /// expired, its ID is returned instead and nothing is enqueued.
    pub fn create_job(&self, request: ConversionRequest) -> Result<Submission, ConversionError> {
        let payload = self.validate(&request, JobKind::File)?;
        let source_id = payload.source_id.clone();

        let _claim = self.claims.lock();
        let job_id = match self.claim(&source_id, Some(&payload))? {
            Claim::Existing(job_id) => {
                tracing::info!("Reusing job {} for {}", job_id, source_id);
                return Ok(Submission {
                    job_id,
                    existing: true,
                });
            }
            Claim::Acquired(job_id) => job_id,
        };

        if let Err(e) = self.queue.add_job(&job_id, payload, request.priority) {
            self.locks.release(&source_id, &job_id);
            return Err(e.into());
        }
        tracing::info!("Created job {} for {}", job_id, source_id);
        Ok(Submission {
            job_id,
            existing: false,
        })
    }

    /// Inspect the source lock and take it if free. Callers hold `claims`.
    ///
    /// With `reuse`, a completed job matching that payload counts as
    /// covering the source.
    pub(crate) fn claim(
        &self,
        source_id: &str,
        reuse: Option<&JobPayload>,
    ) -> Result<Claim, ConversionError> {
        if let Some(record) = self.locks.holder(source_id) {
            match self.queue.get_job(&record.job_id)? {
                Some(job) if !job.is_terminal() => return Ok(Claim::Existing(job.id)),
                _ => {
                    tracing::debug!(
                        "Releasing stale lock on {} held by {}",
                        source_id,
                        record.job_id
                    );
                    self.locks.force_release(source_id);
                }
            }
        }

        if let Some(payload) = reuse
            && let Some(job_id) = self.reusable_result(payload)?
        {
            return Ok(Claim::Existing(job_id));
        }

        let job_id = Uuid::new_v4().to_string();
        if !self.locks.acquire(source_id, &job_id, self.queue.now()) {
            return Err(AppError::conflict(format!("Source {source_id} is locked")).into());
        }
        Ok(Claim::Acquired(job_id))
    }

    /// The latest completed file job for the payload's source, if it was
    /// made with the same quality and trim and its artifact is still there.
    fn reusable_result(&self, payload: &JobPayload) -> AppResult<Option<String>> {
        let key = keys::source_result(&payload.source_id);
        let Some(job_id) = self.queue.store().get(&key)? else {
            return Ok(None);
        };
        let now = self.queue.now();
        let reusable = self.queue.get_job(&job_id)?.is_some_and(|job| {
            job.status == JobStatus::Done
                && job.payload.quality == payload.quality
                && job.payload.trim == payload.trim
                && job.expires_at.is_some_and(|at| at > now)
                && job
                    .result
                    .as_ref()
                    .is_some_and(|r| Path::new(&r.path).is_file())
        });
        Ok(reusable.then_some(job_id))
    }

    /// Remember a finished file job so identical submissions can reuse it
    /// until it expires.
    fn remember_result(&self, job: &Job) {
        let ttl = Duration::from_secs(self.queue.config().result_ttl_seconds);
        self.queue.store().set(
            &keys::source_result(&job.payload.source_id),
            job.id.clone(),
            Some(ttl),
        );
    }

    // ── Processing ─────────────────────────────────────────

    /// Run one admitted file job to a settled state.
    ///
    /// Conversion failures are recorded on the job; only queue errors are
    /// returned.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, source = %job.payload.source_id))]
    pub async fn process_job(&self, job: Job) -> AppResult<()> {
        let guard = ProcessingGuard::new(
            self.queue.clone(),
            self.locks.clone(),
            job.id.clone(),
            job.payload.source_id.clone(),
            INTERRUPTED_MESSAGE,
        );
        guard.heartbeat();
        let _keep_alive = guard.keep_alive();
        self.metrics.record_started(Delivery::File);

        let started = Instant::now();
        let output = self.artifact_path(&job.id);
        match self.convert(&job, &output, &guard).await {
            Ok(result) => {
                let size = result.size_bytes;
                self.queue.complete_job(&job.id, result)?;
                self.remember_result(&job);
                self.metrics.record_success(started.elapsed(), size);
                tracing::info!(
                    "Conversion completed: job={}, size={} bytes, elapsed={}ms",
                    job.id,
                    size,
                    started.elapsed().as_millis()
                );
            }
            Err(err) => {
                remove_file_quietly(&output).await;
                self.settle_failure(&job.id, &err)?;
            }
        }
        Ok(())
    }

    async fn convert(
        &self,
        job: &Job,
        output: &Path,
        guard: &ProcessingGuard,
    ) -> Result<JobResult, ConversionError> {
        let metadata = self
            .resolve(&job.payload.source_id, &job.payload.source_url)
            .await?;
        self.queue.update_progress(&job.id, PROGRESS_RESOLVED)?;
        guard.heartbeat();

        let plan = self.plan(job, &metadata)?;
        self.queue.update_progress(&job.id, PROGRESS_TRANSCODING)?;

        tokio::fs::create_dir_all(&self.config.downloads_dir).await?;
        let size = self
            .transcoder
            .transcode_to_file(&plan.request, output, self.progress_fn(&job.id, guard))
            .await?;

        Ok(JobResult {
            reference: format!("/api/download/{}", job.id),
            path: output.to_string_lossy().into_owned(),
            size_bytes: size,
            quality: plan.request.quality,
            duration_seconds: plan.request.output_seconds,
        })
    }

    /// Resolve a source, reusing recently cached metadata.
    pub(crate) async fn resolve(
        &self,
        source_id: &str,
        url: &str,
    ) -> Result<SourceMetadata, ConversionError> {
        let key = keys::source_metadata(source_id);
        let cache_ttl = self.config.metadata_cache_ttl_seconds;
        if cache_ttl > 0 {
            match self.queue.store().get_json::<SourceMetadata>(&key) {
                Ok(Some(metadata)) => {
                    tracing::debug!("Metadata cache hit for {}", source_id);
                    return Ok(metadata);
                }
                Ok(None) => {}
                Err(e) => tracing::debug!("Ignoring cached metadata for {}: {}", source_id, e),
            }
        }

        let seconds = self.config.resolve_timeout_seconds;
        let metadata =
            tokio::time::timeout(Duration::from_secs(seconds), self.resolver.resolve(url))
                .await
                .map_err(|_| ConversionError::Timeout {
                    stage: "resolve",
                    seconds,
                })??;

        if cache_ttl > 0
            && let Err(e) =
                self.queue
                    .store()
                    .set_json(&key, &metadata, Some(Duration::from_secs(cache_ttl)))
        {
            tracing::debug!("Could not cache metadata for {}: {}", source_id, e);
        }
        Ok(metadata)
    }

    /// Check the trim against the source, apply the quality policy, and
    /// record what was decided on the job.
    pub(crate) fn plan(&self, job: &Job, metadata: &SourceMetadata) -> Result<Plan, ConversionError> {
        let duration = metadata.duration_seconds;
        if let Some(trim) = &job.payload.trim {
            trim.check_within(duration)?;
        }
        let output_seconds = job
            .payload
            .trim
            .map(|t| t.effective_length(duration))
            .unwrap_or(duration);

        let decision = self.policy.decide(duration, job.payload.quality);
        if decision.override_applied {
            self.metrics.record_quality_override();
            tracing::info!(
                "Quality lowered from {} to {} for a {}s source",
                job.payload.quality,
                decision.effective,
                duration
            );
        }
        self.queue.record_metadata(
            &job.id,
            Some(metadata.title.clone()),
            decision.message.clone(),
        )?;

        Ok(Plan {
            request: TranscodeRequest {
                input: metadata.playable.clone(),
                quality: decision.effective,
                trim: job.payload.trim,
                output_seconds,
            },
            title: metadata.title.clone(),
            notice: decision.message,
        })
    }

    fn progress_fn(&self, job_id: &str, guard: &ProcessingGuard) -> ProgressFn {
        let queue = self.queue.clone();
        let job_id = job_id.to_string();
        let heartbeat = guard.heartbeat_fn();
        let span = u16::from(100 - 1 - PROGRESS_TRANSCODING);
        Arc::new(move |pct: u8| {
            let scaled = u16::from(pct.min(100)) * span / 100;
            let mapped = PROGRESS_TRANSCODING + scaled as u8;
            if let Err(e) = queue.update_progress(&job_id, mapped) {
                tracing::debug!("Progress update for {} dropped: {}", job_id, e);
            }
            heartbeat();
        })
    }

    /// Record a failed attempt, re-queueing it when the error is transient.
    pub(crate) fn settle_failure(&self, job_id: &str, err: &ConversionError) -> AppResult<Job> {
        if matches!(err, ConversionError::Timeout { .. }) {
            self.metrics.record_timeout();
        }
        let job = self
            .queue
            .fail_job(job_id, err.user_message(), err.is_retryable())?;
        if job.status == JobStatus::Pending {
            self.metrics.record_retry();
        } else {
            self.metrics.record_failure();
        }
        tracing::warn!("Conversion failed: job={}, error={}", job_id, err);
        Ok(job)
    }

    // ── Queries ────────────────────────────────────────────

    /// Client view of a job.
    pub fn job_view(&self, job_id: &str) -> AppResult<Option<JobView>> {
        Ok(self.queue.get_job(job_id)?.map(|job| job.view()))
    }

    /// The artifact of a finished file job.
    pub async fn artifact(&self, job_id: &str) -> Result<Artifact, ConversionError> {
        let job = self
            .queue
            .get_job(job_id)?
            .ok_or_else(|| ConversionError::NotFound(format!("job {job_id}")))?;
        let result = match (&job.status, &job.result) {
            (JobStatus::Done, Some(result)) if !result.path.is_empty() => result,
            _ => {
                return Err(ConversionError::NotFound(format!(
                    "job {job_id} has no downloadable artifact"
                )));
            }
        };

        let path = PathBuf::from(&result.path);
        let size_bytes = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConversionError::NotFound(format!(
                    "artifact for job {job_id} was removed"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Artifact {
            path,
            filename: sanitize_filename(job.title.as_deref().unwrap_or_default()),
            size_bytes,
        })
    }

    /// Resolve a source and report what a conversion would produce.
    pub async fn probe(
        &self,
        url: &str,
        quality: Option<&str>,
    ) -> Result<ProbeReport, ConversionError> {
        let mut request = ConversionRequest::new(url);
        request.quality = quality.map(str::to_string);
        let payload = self.validate(&request, JobKind::File)?;

        let metadata = self.resolve(&payload.source_id, &payload.source_url).await?;
        let decision = self.policy.decide(metadata.duration_seconds, payload.quality);
        let estimated_size_bytes = estimate_size(decision.effective, metadata.duration_seconds);
        Ok(ProbeReport {
            source_id: payload.source_id,
            metadata,
            decision,
            estimated_size_bytes,
        })
    }

    /// Cancel a running stream. Returns `false` if none is active for
    /// `job_id`.
    pub fn cancel_stream(&self, job_id: &str) -> bool {
        match self.active_streams.get(job_id) {
            Some(token) => {
                token.cancel();
                tracing::info!("Cancellation requested for stream {}", job_id);
                true
            }
            None => false,
        }
    }

    /// Service-wide statistics.
    pub async fn get_stats(&self) -> AppResult<ServiceStats> {
        let (storage_bytes, artifact_count) = self.storage_usage().await;
        Ok(ServiceStats {
            queue: self.queue.get_stats()?,
            store: self.queue.store().stats(),
            conversions: self.metrics.snapshot(),
            storage_bytes,
            artifact_count,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            active_streams: self.active_streams.len(),
        })
    }

    async fn storage_usage(&self) -> (u64, u64) {
        let mut bytes = 0;
        let mut count = 0;
        let Ok(mut entries) = tokio::fs::read_dir(&self.config.downloads_dir).await else {
            return (0, 0);
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if !is_artifact(&entry.path()) {
                continue;
            }
            if let Ok(meta) = entry.metadata().await
                && meta.is_file()
            {
                bytes += meta.len();
                count += 1;
            }
        }
        (bytes, count)
    }

    // ── Reclamation ────────────────────────────────────────

    fn artifact_path(&self, job_id: &str) -> PathBuf {
        Path::new(&self.config.downloads_dir).join(format!("{job_id}.mp3"))
    }

    async fn remove_artifacts(&self, jobs: &[Job]) {
        for job in jobs {
            if let Some(result) = job.result.as_ref().filter(|r| !r.path.is_empty()) {
                remove_file_quietly(Path::new(&result.path)).await;
            }
        }
    }

    /// Delete artifacts older than `max_age` that no job references.
    async fn sweep_orphan_artifacts(&self, max_age: Duration) -> usize {
        let Ok(mut entries) = tokio::fs::read_dir(&self.config.downloads_dir).await else {
            return 0;
        };
        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(job_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|_| is_artifact(&path))
            else {
                continue;
            };
            if matches!(self.queue.get_job(job_id), Ok(Some(_))) {
                continue;
            }
            let old_enough = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok())
                .is_some_and(|age| age >= max_age);
            if old_enough {
                remove_file_quietly(&path).await;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("Removed {} orphaned artifacts", removed);
        }
        removed
    }
}

#[async_trait]
impl JobHandler for Orchestrator {
    fn name(&self) -> &str {
        "audio-conversion"
    }

    async fn handle(&self, job: Job) -> Result<(), JobExecutionError> {
        self.process_job(job)
            .await
            .map_err(JobExecutionError::Internal)
    }
}

#[async_trait]
impl Maintenance for Orchestrator {
    async fn purge_expired(&self) -> AppResult<usize> {
        let removed = self.queue.purge_expired_jobs()?;
        self.remove_artifacts(&removed).await;
        Ok(removed.len())
    }

    async fn cleanup_old(&self, max_age_hours: u64) -> AppResult<usize> {
        let removed = self.queue.remove_older_than(max_age_hours)?;
        self.remove_artifacts(&removed).await;
        self.sweep_orphan_artifacts(Duration::from_secs(max_age_hours.saturating_mul(3600)))
            .await;
        Ok(removed.len())
    }
}

/// Rough MP3 size for `seconds` of audio at `quality`.
pub fn estimate_size(quality: Quality, seconds: u64) -> u64 {
    u64::from(quality.kbps()) * 1000 / 8 * seconds
}

fn is_artifact(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "mp3")
}

async fn remove_file_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed artifact '{}'", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove '{}': {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_size() {
        assert_eq!(estimate_size(Quality::K128, 60), 960_000);
        assert_eq!(estimate_size(Quality::K320, 0), 0);
    }

    #[test]
    fn test_is_artifact() {
        assert!(is_artifact(Path::new("/data/abc.mp3")));
        assert!(!is_artifact(Path::new("/data/abc.part")));
    }
}
