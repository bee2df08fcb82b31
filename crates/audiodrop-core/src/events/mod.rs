//! Lifecycle events emitted by the queue engine.
//!
//! Events are published on the store's job channel and consumed by
//! subscribers such as progress logging and the CLI watcher.

pub mod job;

pub use job::JobEvent;
