//! Store-specific error types.

use audiodrop_core::error::AppError;
use thiserror::Error;

/// Errors raised by store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The operation does not apply to the type stored at the key.
    #[error("operation against key '{key}' holding the wrong kind of value (expected {expected}, found {found})")]
    WrongType {
        /// The key.
        key: String,
        /// The value type the operation needs.
        expected: &'static str,
        /// The value type actually stored.
        found: &'static str,
    },
    /// A counter operation hit a non-integer scalar.
    #[error("value at key '{0}' is not an integer")]
    NotAnInteger(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::store(err.to_string())
    }
}
