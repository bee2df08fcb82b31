//! # audiodrop-converter
//!
//! Turns admitted jobs into audio artifacts. Validates submissions,
//! enforces one active job per source, applies the quality/trim policy,
//! and drives the external resolution (`yt-dlp`) and transcoding
//! (`ffmpeg`) tools, either to a file or straight to a connected client.

pub mod dedup;
pub mod error;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod process;
pub mod resolver;
pub mod source;
pub mod streaming;
pub mod transcoder;

pub use dedup::{DedupLocks, ProcessingGuard};
pub use error::{ConversionError, Restriction};
pub use metrics::{ConversionMetrics, MetricsSnapshot};
pub use models::{ConversionRequest, PlayableSource, SourceMetadata, TranscodeRequest};
pub use orchestrator::{Artifact, Orchestrator, ProbeReport, ServiceStats, Submission};
pub use policy::{QualityDecision, QualityPolicy, decide_quality, parse_timestamp};
pub use resolver::{SourceResolver, YtDlpResolver};
pub use streaming::{StreamSession, StreamStart};
pub use transcoder::{FfmpegTranscoder, ProgressFn, Transcoder};
