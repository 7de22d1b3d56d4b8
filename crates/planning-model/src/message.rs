//! Sync messages exchanged between producer and consumers.

use crate::{
    EntityId, EntityKind, EventPatch, EventRecord, Operation, SessionPatch, SessionRecord,
};
use chrono::{DateTime, Utc};

/// One create/update/delete instruction for a single entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityMessage<R, P> {
    /// Full record.
    Create(R),
    /// Identifier plus the changed subset.
    Update { id: EntityId, patch: P },
    /// Identifier plus the time the deletion was observed (audit only).
    Delete {
        id: EntityId,
        action_at: DateTime<Utc>,
    },
}

pub type EventMessage = EntityMessage<EventRecord, EventPatch>;
pub type SessionMessage = EntityMessage<SessionRecord, SessionPatch>;

impl<R: crate::Entity, P> EntityMessage<R, P> {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Create(_) => Operation::Create,
            Self::Update { .. } => Operation::Update,
            Self::Delete { .. } => Operation::Delete,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        match self {
            Self::Create(record) => record.id(),
            Self::Update { id, .. } | Self::Delete { id, .. } => id,
        }
    }
}

/// A decoded wire message of either kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    Event(EventMessage),
    Session(SessionMessage),
}

impl SyncMessage {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Event(_) => EntityKind::Event,
            Self::Session(_) => EntityKind::Session,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Self::Event(message) => message.operation(),
            Self::Session(message) => message.operation(),
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        match self {
            Self::Event(message) => message.entity_id(),
            Self::Session(message) => message.entity_id(),
        }
    }
}

impl From<EventMessage> for SyncMessage {
    fn from(message: EventMessage) -> Self {
        Self::Event(message)
    }
}

impl From<SessionMessage> for SyncMessage {
    fn from(message: SessionMessage) -> Self {
        Self::Session(message)
    }
}
