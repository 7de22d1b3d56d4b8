//! Validation errors for model values.

use thiserror::Error;

/// Errors raised while constructing model values from raw input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Capacity was zero, negative or not a number.
    #[error("Invalid capacity: {0} (must be a positive integer)")]
    InvalidCapacity(String),

    /// Timestamp text could not be parsed.
    #[error("Invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    /// Unknown entity kind name.
    #[error("Unknown entity kind: {0}")]
    UnknownKind(String),

    /// Unknown operation name.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
}

/// Result type alias using ModelError.
pub type ModelResult<T> = Result<T, ModelError>;
