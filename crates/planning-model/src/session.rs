//! Session records (children of an event, mirrored as calendar entries).

use crate::{truncate_millis, Capacity, Entity, EntityId, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A session scheduled inside an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: EntityId,
    /// Owning event.
    pub event_id: EntityId,
    pub name: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: String,
    pub organizer: String,
    pub session_type: String,
    pub capacity: Capacity,
    pub guest_speakers: BTreeSet<String>,
    pub registered_users: BTreeSet<String>,
    /// Calendar of the owning event, copied when the mirror is created.
    pub remote_container_id: Option<String>,
    /// Calendar entry id of the mirror.
    pub remote_resource_id: Option<String>,
}

impl SessionRecord {
    /// Truncate timestamps to the wire precision.
    pub fn normalized(mut self) -> Self {
        self.start = truncate_millis(self.start);
        self.end = truncate_millis(self.end);
        self
    }

    /// True once both remote identifiers are known.
    pub fn is_mirrored(&self) -> bool {
        self.remote_container_id.is_some() && self.remote_resource_id.is_some()
    }
}

impl Entity for SessionRecord {
    const KIND: EntityKind = EntityKind::Session;

    fn id(&self) -> &EntityId {
        &self.id
    }
}

/// Tracked session fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionField {
    EventId,
    Name,
    Description,
    StartDateTime,
    EndDateTime,
    Location,
    Organizer,
    SessionType,
    Capacity,
    GuestSpeakers,
    RegisteredUsers,
}

impl SessionField {
    /// Logical (column) name of the field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventId => "event_id",
            Self::Name => "name",
            Self::Description => "description",
            Self::StartDateTime => "start_datetime",
            Self::EndDateTime => "end_datetime",
            Self::Location => "location",
            Self::Organizer => "organizer",
            Self::SessionType => "session_type",
            Self::Capacity => "capacity",
            Self::GuestSpeakers => "guest_speakers",
            Self::RegisteredUsers => "registered_users",
        }
    }
}

/// Changed subset of a session. `None` means "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub event_id: Option<EntityId>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub organizer: Option<String>,
    pub session_type: Option<String>,
    pub capacity: Option<Capacity>,
    /// Full replacement set when membership changed.
    pub guest_speakers: Option<BTreeSet<String>>,
    /// Full replacement set when membership changed.
    pub registered_users: Option<BTreeSet<String>>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    /// Fields carried by this patch, in wire order.
    pub fn changed_fields(&self) -> Vec<SessionField> {
        let present = [
            (self.event_id.is_some(), SessionField::EventId),
            (self.name.is_some(), SessionField::Name),
            (self.description.is_some(), SessionField::Description),
            (self.start.is_some(), SessionField::StartDateTime),
            (self.end.is_some(), SessionField::EndDateTime),
            (self.location.is_some(), SessionField::Location),
            (self.organizer.is_some(), SessionField::Organizer),
            (self.session_type.is_some(), SessionField::SessionType),
            (self.capacity.is_some(), SessionField::Capacity),
            (self.guest_speakers.is_some(), SessionField::GuestSpeakers),
            (self.registered_users.is_some(), SessionField::RegisteredUsers),
        ];
        present
            .into_iter()
            .filter_map(|(is_set, field)| is_set.then_some(field))
            .collect()
    }
}
