//! Convenience result type alias for Audiodrop.

use crate::error::AppError;

/// A specialized `Result` type for Audiodrop operations.
pub type AppResult<T> = Result<T, AppError>;
