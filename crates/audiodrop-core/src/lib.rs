//! # audiodrop-core
//!
//! Core crate for Audiodrop. Contains configuration schemas, the job
//! model, lifecycle events, shared value types (quality presets, clocks),
//! and the unified error system.
//!
//! This crate has **no** internal dependencies on other Audiodrop crates.

pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
