//! Shared value types used across Audiodrop crates.

pub mod clock;
pub mod quality;
pub mod trim;

pub use clock::{Clock, ManualClock, SystemClock};
pub use quality::Quality;
pub use trim::{TrimError, TrimWindow};
