//! Error types for remote calendar operations.
//!
//! Defines error variants for network, API, serialization, credential and
//! configuration failures.

use thiserror::Error;

/// Error type for all calendar operations.
#[derive(Debug, Error)]
pub enum CalendarError {
    /// Network or transport-level HTTP error from reqwest.
    ///
    /// Includes connection failures, timeouts and TLS errors.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The calendar API returned a non-success HTTP status.
    #[error("Calendar API error: {status} - {message}")]
    Api {
        /// The HTTP status code returned by the API.
        status: u16,
        /// The response body, typically containing error details.
        message: String,
    },

    /// The addressed calendar or entry does not exist (HTTP 404/410).
    #[error("Remote resource not found: {0}")]
    NotFound(String),

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Credentials could not be loaded or signed.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Reading the credentials file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid base URL or other setup issue.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CalendarError {
    /// True when retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::NotFound(_) | Self::Json(_) | Self::Auth(_) | Self::Io(_) | Self::Config(_) => {
                false
            }
        }
    }
}

/// Convenience Result type alias for calendar operations.
pub type CalendarResult<T> = Result<T, CalendarError>;
