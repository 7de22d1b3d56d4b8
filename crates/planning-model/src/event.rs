//! Event records (the parent entity, mirrored as one remote calendar).

use crate::{truncate_millis, Capacity, Entity, EntityId, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A planned event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: String,
    pub organizer: String,
    pub capacity: Capacity,
    pub event_type: String,
    /// Registered participant identifiers.
    pub registered_users: BTreeSet<String>,
    /// Remote calendar id, set once the mirror exists.
    pub remote_container_id: Option<String>,
}

impl EventRecord {
    /// Truncate timestamps to the wire precision.
    pub fn normalized(mut self) -> Self {
        self.start = truncate_millis(self.start);
        self.end = truncate_millis(self.end);
        self
    }
}

impl Entity for EventRecord {
    const KIND: EntityKind = EntityKind::Event;

    fn id(&self) -> &EntityId {
        &self.id
    }
}

/// Tracked event fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventField {
    Name,
    Description,
    StartDateTime,
    EndDateTime,
    Location,
    Organizer,
    Capacity,
    EventType,
    RegisteredUsers,
}

impl EventField {
    /// Logical (column) name of the field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
            Self::StartDateTime => "start_datetime",
            Self::EndDateTime => "end_datetime",
            Self::Location => "location",
            Self::Organizer => "organizer",
            Self::Capacity => "capacity",
            Self::EventType => "event_type",
            Self::RegisteredUsers => "registered_users",
        }
    }
}

/// Changed subset of an event. `None` means "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub organizer: Option<String>,
    pub capacity: Option<Capacity>,
    pub event_type: Option<String>,
    /// Full replacement set when membership changed.
    pub registered_users: Option<BTreeSet<String>>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    /// Fields carried by this patch, in wire order.
    pub fn changed_fields(&self) -> Vec<EventField> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push(EventField::Name);
        }
        if self.description.is_some() {
            fields.push(EventField::Description);
        }
        if self.start.is_some() {
            fields.push(EventField::StartDateTime);
        }
        if self.end.is_some() {
            fields.push(EventField::EndDateTime);
        }
        if self.location.is_some() {
            fields.push(EventField::Location);
        }
        if self.organizer.is_some() {
            fields.push(EventField::Organizer);
        }
        if self.capacity.is_some() {
            fields.push(EventField::Capacity);
        }
        if self.event_type.is_some() {
            fields.push(EventField::EventType);
        }
        if self.registered_users.is_some() {
            fields.push(EventField::RegisteredUsers);
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> EventRecord {
        EventRecord {
            id: EntityId::from("evt-1"),
            name: "Hackathon".to_string(),
            description: "24h build".to_string(),
            start: Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap(),
            location: "Hall A".to_string(),
            organizer: "events@example.com".to_string(),
            capacity: Capacity::new(100).unwrap(),
            event_type: "workshop".to_string(),
            registered_users: ["u1".to_string(), "u2".to_string()].into_iter().collect(),
            remote_container_id: None,
        }
    }

    #[test]
    fn test_normalized_drops_sub_millisecond_precision() {
        let mut event = sample();
        event.start = event.start + chrono::Duration::nanoseconds(1_234_567);

        let normalized = event.normalized();
        assert_eq!(normalized.start.timestamp_subsec_nanos(), 1_000_000);
        assert_eq!(normalized.registered_users.len(), 2);
    }

    #[test]
    fn test_empty_patch() {
        assert!(EventPatch::default().is_empty());
        let patch = EventPatch {
            capacity: Some(Capacity::new(5).unwrap()),
            ..Default::default()
        };
        assert_eq!(patch.changed_fields(), vec![EventField::Capacity]);
    }
}
