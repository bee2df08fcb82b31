//! Job queue engine and background processing for Audiodrop.
//!
//! This crate provides:
//! - The queue engine that owns job lifecycle state in the ephemeral store
//! - A worker runner that dequeues jobs under the concurrency ceiling
//! - A job executor that supervises handler tasks
//! - A cron scheduler for purge and age-based cleanup

pub mod executor;
pub mod queue;
pub mod runner;
pub mod scheduler;

pub use executor::{JobExecutionError, JobExecutor, JobHandler};
pub use queue::{QueueEngine, QueueStats};
pub use runner::WorkerRunner;
pub use scheduler::{CleanupScheduler, Maintenance};
