//! The conversion job record and its lifecycle vocabulary.

pub mod model;
pub mod payload;
pub mod status;

pub use model::{Job, JobResult, JobView};
pub use payload::JobPayload;
pub use status::{JobKind, JobStatus};
