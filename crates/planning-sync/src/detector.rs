//! Change detection between two versions of a record.
//!
//! Only the tracked fields are compared: timestamps by their wire
//! rendering (millisecond precision), participant sets as sets. Remote
//! ids belong to the mirror and never produce a change.

use chrono::{DateTime, Utc};
use planning_model::{
    format_timestamp, Entity, EntityId, EntityMessage, EventPatch, EventRecord, SessionPatch,
    SessionRecord,
};
use std::collections::BTreeSet;

/// A record type whose changes can be expressed as a patch.
pub trait Tracked: Entity + Clone {
    type Patch: Clone + Default;

    /// Fields of `current` that differ from `self`.
    fn diff(&self, current: &Self) -> Self::Patch;

    fn patch_is_empty(patch: &Self::Patch) -> bool;
}

/// Outcome of comparing two versions of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<T: Tracked> {
    Created(T),
    Updated { current: T, patch: T::Patch },
    Deleted(EntityId),
    Unchanged,
}

/// Compare the previously known version with the current one.
///
/// `None` on a side means the record is absent there.
pub fn detect<T: Tracked>(previous: Option<&T>, current: Option<&T>) -> Change<T> {
    match (previous, current) {
        (None, None) => Change::Unchanged,
        (None, Some(current)) => Change::Created(current.clone()),
        (Some(previous), None) => Change::Deleted(previous.id().clone()),
        (Some(previous), Some(current)) => {
            let patch = previous.diff(current);
            if T::patch_is_empty(&patch) {
                Change::Unchanged
            } else {
                Change::Updated {
                    current: current.clone(),
                    patch,
                }
            }
        }
    }
}

impl<T: Tracked> Change<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }

    /// The message announcing this change; deletions are stamped with `at`.
    pub fn to_message(&self, at: DateTime<Utc>) -> Option<EntityMessage<T, T::Patch>> {
        match self {
            Self::Created(record) => Some(EntityMessage::Create(record.clone())),
            Self::Updated { current, patch } => Some(EntityMessage::Update {
                id: current.id().clone(),
                patch: patch.clone(),
            }),
            Self::Deleted(id) => Some(EntityMessage::Delete {
                id: id.clone(),
                action_at: at,
            }),
            Self::Unchanged => None,
        }
    }
}

fn changed<V: PartialEq + Clone>(previous: &V, current: &V) -> Option<V> {
    (previous != current).then(|| current.clone())
}

fn changed_time(previous: DateTime<Utc>, current: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (format_timestamp(previous) != format_timestamp(current)).then_some(current)
}

fn changed_set(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> Option<BTreeSet<String>> {
    changed(previous, current)
}

impl Tracked for EventRecord {
    type Patch = EventPatch;

    fn diff(&self, current: &Self) -> EventPatch {
        EventPatch {
            name: changed(&self.name, &current.name),
            description: changed(&self.description, &current.description),
            start: changed_time(self.start, current.start),
            end: changed_time(self.end, current.end),
            location: changed(&self.location, &current.location),
            organizer: changed(&self.organizer, &current.organizer),
            capacity: changed(&self.capacity, &current.capacity),
            event_type: changed(&self.event_type, &current.event_type),
            registered_users: changed_set(&self.registered_users, &current.registered_users),
        }
    }

    fn patch_is_empty(patch: &EventPatch) -> bool {
        patch.is_empty()
    }
}

impl Tracked for SessionRecord {
    type Patch = SessionPatch;

    fn diff(&self, current: &Self) -> SessionPatch {
        SessionPatch {
            event_id: changed(&self.event_id, &current.event_id),
            name: changed(&self.name, &current.name),
            description: changed(&self.description, &current.description),
            start: changed_time(self.start, current.start),
            end: changed_time(self.end, current.end),
            location: changed(&self.location, &current.location),
            organizer: changed(&self.organizer, &current.organizer),
            session_type: changed(&self.session_type, &current.session_type),
            capacity: changed(&self.capacity, &current.capacity),
            guest_speakers: changed_set(&self.guest_speakers, &current.guest_speakers),
            registered_users: changed_set(&self.registered_users, &current.registered_users),
        }
    }

    fn patch_is_empty(patch: &SessionPatch) -> bool {
        patch.is_empty()
    }
}
