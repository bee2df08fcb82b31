//! In-process stand-ins for the external tools.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use audiodrop_converter::models::format_duration;
use audiodrop_converter::{
    ConversionError, Orchestrator, PlayableSource, ProgressFn, SourceMetadata, SourceResolver,
    TranscodeRequest, Transcoder,
};
use audiodrop_core::config::conversion::ConversionConfig;
use audiodrop_core::config::queue::QueueConfig;
use audiodrop_core::config::store::StoreConfig;
use audiodrop_core::types::ManualClock;
use audiodrop_store::EphemeralStore;
use audiodrop_worker::QueueEngine;

pub const VIDEO: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
pub const OTHER_VIDEO: &str = "https://youtu.be/9bZkp7q19f0";

pub fn metadata(title: &str, duration_seconds: u64) -> SourceMetadata {
    SourceMetadata {
        title: title.to_string(),
        duration_seconds,
        duration_formatted: format_duration(duration_seconds),
        playable: PlayableSource {
            url: "https://media.invalid/audio".to_string(),
            headers: BTreeMap::new(),
        },
        uploader: None,
        view_count: None,
    }
}

/// Returns queued outcomes first, then `fallback`.
#[derive(Debug)]
pub struct FakeResolver {
    outcomes: Mutex<VecDeque<Result<SourceMetadata, ConversionError>>>,
    fallback: Mutex<SourceMetadata>,
    pub calls: AtomicUsize,
}

impl FakeResolver {
    pub fn new(fallback: SourceMetadata) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, outcome: Result<SourceMetadata, ConversionError>) {
        self.outcomes.lock().push_back(outcome);
    }
}

#[async_trait]
impl SourceResolver for FakeResolver {
    async fn resolve(&self, _url: &str) -> Result<SourceMetadata, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.outcomes.lock().pop_front();
        match next {
            Some(outcome) => outcome,
            None => Ok(self.fallback.lock().clone()),
        }
    }
}

/// Writes a fixed payload; streams it in chunks with a pause between.
#[derive(Debug)]
pub struct FakeTranscoder {
    failures: Mutex<VecDeque<ConversionError>>,
    pub requests: Mutex<Vec<TranscodeRequest>>,
    pub chunks: usize,
    pub chunk_delay: Duration,
    pub file_delay: Duration,
}

pub const AUDIO: &[u8] = b"ID3\x04fake-mp3-frames";

impl FakeTranscoder {
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            chunks: 3,
            chunk_delay: Duration::from_millis(10),
            file_delay: Duration::ZERO,
        }
    }

    /// File transcodes take `delay` before writing anything.
    pub fn with_file_delay(delay: Duration) -> Self {
        Self {
            file_delay: delay,
            ..Self::new()
        }
    }

    /// Streams pause `delay` before each chunk.
    pub fn with_chunk_delay(delay: Duration) -> Self {
        Self {
            chunk_delay: delay,
            ..Self::new()
        }
    }

    pub fn fail_next(&self, err: ConversionError) {
        self.failures.lock().push_back(err);
    }

    fn begin(&self, request: &TranscodeRequest) -> Result<(), ConversionError> {
        self.requests.lock().push(request.clone());
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode_to_file(
        &self,
        request: &TranscodeRequest,
        output: &Path,
        progress: ProgressFn,
    ) -> Result<u64, ConversionError> {
        self.begin(request)?;
        if !self.file_delay.is_zero() {
            tokio::time::sleep(self.file_delay).await;
        }
        progress(50);
        tokio::fs::write(output, AUDIO).await?;
        progress(100);
        Ok(AUDIO.len() as u64)
    }

    async fn transcode_to_sink(
        &self,
        request: &TranscodeRequest,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: CancellationToken,
    ) -> Result<u64, ConversionError> {
        self.begin(request)?;
        let mut written = 0;
        for _ in 0..self.chunks {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ConversionError::Cancelled),
                _ = tokio::time::sleep(self.chunk_delay) => {}
            }
            sink.write_all(AUDIO).await?;
            written += AUDIO.len() as u64;
        }
        sink.flush().await?;
        Ok(written)
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub queue: Arc<QueueEngine>,
    pub resolver: Arc<FakeResolver>,
    pub transcoder: Arc<FakeTranscoder>,
    pub clock: Arc<ManualClock>,
    pub dir: TempDir,
}

pub fn harness(max_concurrent_jobs: usize) -> Harness {
    harness_with(max_concurrent_jobs, metadata("Rick Astley - Never Gonna Give You Up", 212))
}

pub fn harness_with(max_concurrent_jobs: usize, fallback: SourceMetadata) -> Harness {
    build(max_concurrent_jobs, fallback, FakeTranscoder::new(), |_| {})
}

/// A harness with a custom transcoder and conversion settings. The
/// metadata cache is off unless `tweak` turns it on.
pub fn build(
    max_concurrent_jobs: usize,
    fallback: SourceMetadata,
    transcoder: FakeTranscoder,
    tweak: impl FnOnce(&mut ConversionConfig),
) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let queue = Arc::new(QueueEngine::new(
        EphemeralStore::shared(&StoreConfig::default()),
        QueueConfig {
            max_concurrent_jobs,
            ..QueueConfig::default()
        },
        clock.clone(),
    ));
    let resolver = Arc::new(FakeResolver::new(fallback));
    let transcoder = Arc::new(transcoder);
    let mut config = ConversionConfig {
        downloads_dir: dir.path().join("downloads").to_string_lossy().into_owned(),
        metadata_cache_ttl_seconds: 0,
        ..ConversionConfig::default()
    };
    tweak(&mut config);
    let orchestrator = Orchestrator::new(queue.clone(), resolver.clone(), transcoder.clone(), config);
    Harness {
        orchestrator,
        queue,
        resolver,
        transcoder,
        clock,
        dir,
    }
}
