//! Error types for the wire codec.

use planning_model::ModelError;
use thiserror::Error;

/// Decoding failures.
///
/// Encoding is infallible: every in-memory message has a valid rendering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The payload is not well-formed XML.
    #[error("Malformed XML: {0}")]
    MalformedXml(String),

    /// Well-formed XML that does not match the message schema.
    ///
    /// Covers unknown root tags, missing required elements and typed fields
    /// that fail validation (capacity, timestamps).
    #[error("Schema violation at <{element}>: {reason}")]
    SchemaViolation {
        /// Element that failed validation.
        element: String,
        /// Human-readable reason.
        reason: String,
    },
}

impl WireError {
    pub(crate) fn missing(element: &str) -> Self {
        Self::SchemaViolation {
            element: element.to_string(),
            reason: "required element is missing or empty".to_string(),
        }
    }

    pub(crate) fn invalid(element: &str, source: ModelError) -> Self {
        Self::SchemaViolation {
            element: element.to_string(),
            reason: source.to_string(),
        }
    }

    pub(crate) fn malformed(source: impl std::fmt::Display) -> Self {
        Self::MalformedXml(source.to_string())
    }
}

/// Result type alias using WireError.
pub type WireResult<T> = Result<T, WireError>;
