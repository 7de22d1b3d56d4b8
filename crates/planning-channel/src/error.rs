//! Error types for the message channel.

use thiserror::Error;

/// Channel error type.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Unexpected reply shape from the broker
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The broker could not be reached within the retry budget
    #[error("Transport unavailable after {attempts} attempt(s): {reason}")]
    TransportUnavailable {
        /// Connection attempts made.
        attempts: u32,
        /// Last failure seen.
        reason: String,
    },
}

impl ChannelError {
    /// True when the error means the connection itself is gone.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Redis(e) => {
                e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
            }
            Self::TransportUnavailable { .. } => true,
            Self::Protocol(_) => false,
        }
    }
}

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
