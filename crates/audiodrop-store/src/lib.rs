//! # audiodrop-store
//!
//! In-process ephemeral store for Audiodrop. Provides scalar, hash, list,
//! set and sorted-set values with per-key expiry, atomic counters, and a
//! synchronous publish/subscribe channel registry.
//!
//! Every operation takes a single internal lock and never awaits, so a
//! call observes and mutates state atomically.

pub mod error;
pub mod keys;
pub mod pubsub;
pub mod stats;
pub mod store;
pub mod sweeper;
pub mod value;

pub use error::{StoreError, StoreResult};
pub use pubsub::SubscriptionId;
pub use stats::StoreStats;
pub use store::{EphemeralStore, Ttl};
pub use sweeper::spawn_sweeper;
