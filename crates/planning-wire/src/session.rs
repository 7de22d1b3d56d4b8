//! `CreateSession` / `UpdateSession` / `DeleteSession` documents.
//!
//! Unlike events, session updates carry each changed attribute as a direct
//! child element of the root.

use crate::error::{WireError, WireResult};
use crate::xml::{XmlBuilder, XmlNode};
use chrono::Utc;
use planning_model::{
    format_timestamp, parse_timestamp, EntityId, SessionMessage, SessionPatch, SessionRecord,
};

pub(crate) const CREATE_ROOT: &str = "CreateSession";
pub(crate) const UPDATE_ROOT: &str = "UpdateSession";
pub(crate) const DELETE_ROOT: &str = "DeleteSession";

pub(crate) fn encode(message: &SessionMessage) -> String {
    match message {
        SessionMessage::Create(session) => {
            let mut xml = XmlBuilder::new(CREATE_ROOT);
            xml.leaf("SessionUUID", session.id.as_str())
                .leaf("EventUUID", session.event_id.as_str())
                .leaf("SessionName", &session.name)
                .leaf("SessionDescription", &session.description)
                .set("GuestSpeakers", "GuestSpeaker", "email", &session.guest_speakers)
                .leaf("Capacity", &session.capacity.to_string())
                .leaf("StartDateTime", &format_timestamp(session.start))
                .leaf("EndDateTime", &format_timestamp(session.end))
                .leaf("SessionLocation", &session.location)
                .leaf("SessionType", &session.session_type);
            if !session.organizer.is_empty() {
                xml.leaf("Organizer", &session.organizer);
            }
            xml.set("RegisteredUsers", "User", "email", &session.registered_users);
            xml.finish()
        }
        SessionMessage::Update { id, patch } => {
            let mut xml = XmlBuilder::new(UPDATE_ROOT);
            xml.leaf("SessionUUID", id.as_str());
            if let Some(event_id) = &patch.event_id {
                xml.leaf("EventUUID", event_id.as_str());
            }
            if let Some(name) = &patch.name {
                xml.leaf("SessionName", name);
            }
            if let Some(description) = &patch.description {
                xml.leaf("SessionDescription", description);
            }
            if let Some(speakers) = &patch.guest_speakers {
                xml.set("GuestSpeakers", "GuestSpeaker", "email", speakers);
            }
            if let Some(capacity) = patch.capacity {
                xml.leaf("Capacity", &capacity.to_string());
            }
            if let Some(start) = patch.start {
                xml.leaf("StartDateTime", &format_timestamp(start));
            }
            if let Some(end) = patch.end {
                xml.leaf("EndDateTime", &format_timestamp(end));
            }
            if let Some(location) = &patch.location {
                xml.leaf("SessionLocation", location);
            }
            if let Some(session_type) = &patch.session_type {
                xml.leaf("SessionType", session_type);
            }
            if let Some(organizer) = &patch.organizer {
                xml.leaf("Organizer", organizer);
            }
            if let Some(users) = &patch.registered_users {
                xml.set("RegisteredUsers", "User", "email", users);
            }
            xml.finish()
        }
        SessionMessage::Delete { id, action_at } => {
            let mut xml = XmlBuilder::new(DELETE_ROOT);
            xml.leaf("ActionType", "DELETE")
                .leaf("SessionUUID", id.as_str())
                .leaf("TimeOfAction", &format_timestamp(*action_at));
            xml.finish()
        }
    }
}

pub(crate) fn decode_create(root: &XmlNode) -> WireResult<SessionMessage> {
    let session = SessionRecord {
        id: EntityId::from(root.required_text("SessionUUID")?),
        event_id: EntityId::from(root.required_text("EventUUID")?),
        name: root.required_text("SessionName")?.to_string(),
        description: root.optional_text("SessionDescription").unwrap_or_default().to_string(),
        start: root.required_timestamp("StartDateTime")?,
        end: root.required_timestamp("EndDateTime")?,
        location: root.optional_text("SessionLocation").unwrap_or_default().to_string(),
        organizer: root.optional_text("Organizer").unwrap_or_default().to_string(),
        session_type: root.required_text("SessionType")?.to_string(),
        capacity: root.required_capacity("Capacity")?,
        guest_speakers: root
            .child("GuestSpeakers")
            .map(|block| block.collect_set("GuestSpeaker", "email"))
            .unwrap_or_default(),
        registered_users: root
            .child("RegisteredUsers")
            .map(|block| block.collect_set("User", "email"))
            .unwrap_or_default(),
        remote_container_id: None,
        remote_resource_id: None,
    };
    Ok(SessionMessage::Create(session))
}

pub(crate) fn decode_update(root: &XmlNode) -> WireResult<SessionMessage> {
    let id = EntityId::from(root.required_text("SessionUUID")?);
    let text = |name: &str| root.optional_text(name).map(str::to_string);
    let required = |name: &str| match root.optional_text(name) {
        Some("") => Err(WireError::missing(name)),
        other => Ok(other.map(str::to_string)),
    };

    let mut patch = SessionPatch {
        event_id: match root.optional_text("EventUUID") {
            Some("") => return Err(WireError::missing("EventUUID")),
            other => other.map(EntityId::from),
        },
        name: required("SessionName")?,
        description: text("SessionDescription"),
        location: text("SessionLocation"),
        organizer: text("Organizer"),
        session_type: required("SessionType")?,
        guest_speakers: root
            .child("GuestSpeakers")
            .map(|block| block.collect_set("GuestSpeaker", "email")),
        registered_users: root
            .child("RegisteredUsers")
            .map(|block| block.collect_set("User", "email")),
        ..Default::default()
    };
    if root.has_child("StartDateTime") {
        patch.start = Some(root.required_timestamp("StartDateTime")?);
    }
    if root.has_child("EndDateTime") {
        patch.end = Some(root.required_timestamp("EndDateTime")?);
    }
    if root.has_child("Capacity") {
        patch.capacity = Some(root.required_capacity("Capacity")?);
    }

    Ok(SessionMessage::Update { id, patch })
}

pub(crate) fn decode_delete(root: &XmlNode) -> WireResult<SessionMessage> {
    let id = EntityId::from(root.required_text("SessionUUID")?);
    let action_at = match root.optional_text("TimeOfAction") {
        Some(text) if !text.is_empty() => {
            parse_timestamp(text).map_err(|e| WireError::invalid("TimeOfAction", e))?
        }
        _ => Utc::now(),
    };
    Ok(SessionMessage::Delete { id, action_at })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode, encode};
    use chrono::TimeZone;
    use planning_model::{Capacity, SyncMessage};

    fn sample() -> SessionRecord {
        SessionRecord {
            id: EntityId::from("ses-1"),
            event_id: EntityId::from("evt-42"),
            name: "Keynote".to_string(),
            description: "Opening talk".to_string(),
            start: Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 3, 14, 10, 30, 0).unwrap(),
            location: "Room 1".to_string(),
            organizer: String::new(),
            session_type: "talk".to_string(),
            capacity: Capacity::new(80).unwrap(),
            guest_speakers: ["speaker@example.com".to_string()].into_iter().collect(),
            registered_users: ["a@example.com".to_string(), "b@example.com".to_string()]
                .into_iter()
                .collect(),
            remote_container_id: None,
            remote_resource_id: None,
        }
    }

    #[test]
    fn test_create_round_trip() {
        let message = SyncMessage::Session(SessionMessage::Create(sample()));
        let xml = encode(&message);
        assert!(xml.contains(
            "<GuestSpeakers><GuestSpeaker><email>speaker@example.com</email></GuestSpeaker></GuestSpeakers>"
        ));
        assert!(!xml.contains("<Organizer>"));
        assert_eq!(decode(&xml).unwrap(), message);
    }

    #[test]
    fn test_update_carries_changed_elements_only() {
        let patch = SessionPatch {
            end: Some(Utc.with_ymd_and_hms(2025, 3, 14, 11, 0, 0).unwrap()),
            registered_users: Some(["c@example.com".to_string()].into_iter().collect()),
            ..Default::default()
        };
        let message = SyncMessage::Session(SessionMessage::Update {
            id: EntityId::from("ses-1"),
            patch,
        });
        let xml = encode(&message);
        assert!(xml.contains("<EndDateTime>2025-03-14T11:00:00.000Z</EndDateTime>"));
        assert!(!xml.contains("StartDateTime"));
        assert!(!xml.contains("GuestSpeakers"));
        assert_eq!(decode(&xml).unwrap(), message);
    }

    #[test]
    fn test_update_ignores_unknown_elements() {
        let xml = "<UpdateSession><SessionUUID>ses-1</SessionUUID><Mood>great</Mood></UpdateSession>";
        let SyncMessage::Session(SessionMessage::Update { patch, .. }) = decode(xml).unwrap() else {
            panic!("expected session update");
        };
        assert!(patch.is_empty());
    }

    #[test]
    fn test_update_rejects_invalid_capacity() {
        let xml = "<UpdateSession><SessionUUID>ses-1</SessionUUID><Capacity>-3</Capacity></UpdateSession>";
        assert!(matches!(
            decode(xml),
            Err(WireError::SchemaViolation { ref element, .. }) if element == "Capacity"
        ));
    }

    #[test]
    fn test_update_rejects_blank_required_text() {
        let xml = "<UpdateSession><SessionUUID>ses-1</SessionUUID><SessionName/></UpdateSession>";
        assert_eq!(decode(xml).unwrap_err(), WireError::missing("SessionName"));

        let xml = "<UpdateSession><SessionUUID>ses-1</SessionUUID><Organizer/></UpdateSession>";
        let SyncMessage::Session(SessionMessage::Update { patch, .. }) = decode(xml).unwrap() else {
            panic!("expected session update");
        };
        assert_eq!(patch.organizer.as_deref(), Some(""));
    }

    #[test]
    fn test_create_requires_parent_reference() {
        let xml = encode(&SyncMessage::Session(SessionMessage::Create(sample())))
            .replace("<EventUUID>evt-42</EventUUID>", "");
        assert_eq!(decode(&xml).unwrap_err(), WireError::missing("EventUUID"));
    }

    #[test]
    fn test_delete_carries_action_type() {
        let message = SyncMessage::Session(SessionMessage::Delete {
            id: EntityId::from("ses-1"),
            action_at: Utc.with_ymd_and_hms(2025, 3, 15, 8, 0, 0).unwrap(),
        });
        let xml = encode(&message);
        assert!(xml.contains("<ActionType>DELETE</ActionType>"));
        assert_eq!(decode(&xml).unwrap(), message);
    }
}
