//! Error taxonomy of the sync engine.
//!
//! Every failure a consumer can hit while handling a delivery maps to a
//! [`Disposition`] that decides how the delivery is settled.

use calendar_client::CalendarError;
use planning_channel::ChannelError;
use planning_database::DatabaseError;
use planning_model::EntityId;
use planning_wire::WireError;
use thiserror::Error;

/// How a failed delivery is settled with the broker. Successful
/// deliveries are always acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Retry later.
    Requeue,
    /// Never retry; dead-letter.
    Reject,
}

#[derive(Error, Debug)]
pub enum SyncError {
    /// The payload is not a valid message for the topic it arrived on.
    #[error("Schema violation: {0}")]
    SchemaViolation(#[from] WireError),

    /// A referenced parent is not present (or not mirrored) yet.
    #[error("Dependency not ready: {0}")]
    DependencyNotReady(String),

    /// The broker could not be reached within the retry budget.
    #[error("Transport unavailable after {attempts} attempt(s): {reason}")]
    TransportUnavailable { attempts: u32, reason: String },

    /// The local write committed but the remote mirror failed.
    #[error("Partial apply failure for {entity_id}: {source}")]
    PartialApplyFailure {
        entity_id: EntityId,
        #[source]
        source: CalendarError,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Remote call failed before anything was written locally.
    #[error("Remote calendar error: {0}")]
    Remote(#[from] CalendarError),

    #[error("Channel error: {0}")]
    Channel(ChannelError),
}

impl From<ChannelError> for SyncError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::TransportUnavailable { attempts, reason } => {
                Self::TransportUnavailable { attempts, reason }
            }
            other => Self::Channel(other),
        }
    }
}

impl SyncError {
    pub(crate) fn partial(entity_id: &EntityId, source: CalendarError) -> Self {
        Self::PartialApplyFailure {
            entity_id: entity_id.clone(),
            source,
        }
    }

    /// True when retrying the same delivery later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::SchemaViolation(_) | Self::Database(_) => false,
            Self::DependencyNotReady(_) => true,
            Self::TransportUnavailable { .. } | Self::Channel(_) => true,
            Self::PartialApplyFailure { source, .. } | Self::Remote(source) => {
                source.is_transient()
            }
        }
    }

    /// True when the broker is gone for good and the owning loop must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TransportUnavailable { .. })
    }

    /// Settlement for a delivery whose handling failed with this error.
    pub fn disposition(&self) -> Disposition {
        if self.is_transient() {
            Disposition::Requeue
        } else {
            Disposition::Reject
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
