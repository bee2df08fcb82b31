//! Conversion counters and duration percentiles.
//!
//! Counters are plain atomics; the duration window sits behind a mutex and
//! holds the most recent successful runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Maximum number of duration samples kept.
const MAX_DURATION_SAMPLES: usize = 1000;

/// How a conversion was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the downloads directory.
    File,
    /// Piped to a connected client.
    Stream,
}

/// Conversion metrics collector.
#[derive(Debug, Default)]
pub struct ConversionMetrics {
    started: AtomicU64,
    streams_started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    quality_overrides: AtomicU64,
    total_output_bytes: AtomicU64,
    duration_samples: Mutex<VecDeque<Duration>>,
}

impl ConversionMetrics {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// An attempt began.
    pub fn record_started(&self, delivery: Delivery) {
        self.started.fetch_add(1, Ordering::Relaxed);
        if delivery == Delivery::Stream {
            self.streams_started.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// An attempt produced an artifact.
    pub fn record_success(&self, duration: Duration, output_bytes: u64) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.total_output_bytes
            .fetch_add(output_bytes, Ordering::Relaxed);

        let mut samples = self.duration_samples.lock();
        if samples.len() >= MAX_DURATION_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(duration);
    }

    /// An attempt failed terminally.
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// An attempt failed and the job was re-queued.
    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// An external tool ran past its deadline. Counted on top of the
    /// failure or retry it caused.
    pub fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// A stream was abandoned or cancelled.
    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// The quality policy lowered a request.
    pub fn record_quality_override(&self) {
        self.quality_overrides.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time view.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut sorted: Vec<Duration> = self.duration_samples.lock().iter().copied().collect();
        sorted.sort();
        let percentile = |p: usize| -> Option<Duration> {
            if sorted.is_empty() {
                return None;
            }
            let idx = ((sorted.len() - 1) * p) / 100;
            sorted.get(idx).copied()
        };

        MetricsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            streams_started: self.streams_started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            quality_overrides: self.quality_overrides.load(Ordering::Relaxed),
            total_output_bytes: self.total_output_bytes.load(Ordering::Relaxed),
            duration_p50: percentile(50),
            duration_p95: percentile(95),
            duration_p99: percentile(99),
            sample_count: sorted.len() as u64,
        }
    }
}

/// A point-in-time snapshot of conversion metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Attempts started, file and stream.
    pub started: u64,
    /// Of which were streams.
    pub streams_started: u64,
    /// Attempts that produced an artifact.
    pub succeeded: u64,
    /// Attempts that failed terminally.
    pub failed: u64,
    /// Attempts that failed and were re-queued.
    pub retried: u64,
    /// Attempts that hit a tool deadline.
    pub timed_out: u64,
    /// Streams cancelled or abandoned.
    pub cancelled: u64,
    /// Requests whose quality was lowered.
    pub quality_overrides: u64,
    /// Bytes produced.
    pub total_output_bytes: u64,
    /// Median conversion time.
    #[serde(with = "opt_millis")]
    pub duration_p50: Option<Duration>,
    /// 95th percentile conversion time.
    #[serde(with = "opt_millis")]
    pub duration_p95: Option<Duration>,
    /// 99th percentile conversion time.
    #[serde(with = "opt_millis")]
    pub duration_p99: Option<Duration>,
    /// Samples behind the percentiles.
    pub sample_count: u64,
}

/// Optional durations as whole milliseconds.
mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
