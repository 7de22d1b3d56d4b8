//! `CreateEvent` / `UpdateEvent` / `DeleteEvent` documents.

use crate::error::{WireError, WireResult};
use crate::xml::{XmlBuilder, XmlNode};
use chrono::Utc;
use planning_model::{
    format_timestamp, parse_timestamp, Capacity, EntityId, EventField, EventMessage, EventPatch,
    EventRecord,
};

pub(crate) const CREATE_ROOTS: [&str; 2] = ["CreateEvent", "Event"];
pub(crate) const UPDATE_ROOTS: [&str; 2] = ["UpdateEvent", "EventUpdate"];
pub(crate) const DELETE_ROOTS: [&str; 2] = ["DeleteEvent", "EventDelete"];

/// Element name used for a field inside `FieldsToUpdate`.
fn element_name(field: EventField) -> &'static str {
    match field {
        EventField::Name => "Name",
        EventField::Description => "Description",
        EventField::StartDateTime => "StartDateTime",
        EventField::EndDateTime => "EndDateTime",
        EventField::Location => "Location",
        EventField::Organizer => "Organisator",
        EventField::Capacity => "Capacity",
        EventField::EventType => "EventType",
        EventField::RegisteredUsers => "RegisteredUsers",
    }
}

/// Resolves a field tag given either as element name or logical name.
fn field_from_tag(tag: &str) -> Option<EventField> {
    let folded: String = tag
        .chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match folded.as_str() {
        "name" => Some(EventField::Name),
        "description" => Some(EventField::Description),
        "startdatetime" => Some(EventField::StartDateTime),
        "enddatetime" => Some(EventField::EndDateTime),
        "location" => Some(EventField::Location),
        "organisator" | "organizer" => Some(EventField::Organizer),
        "capacity" => Some(EventField::Capacity),
        "eventtype" => Some(EventField::EventType),
        _ => None,
    }
}

pub(crate) fn encode(message: &EventMessage) -> String {
    match message {
        EventMessage::Create(event) => {
            let mut xml = XmlBuilder::new("CreateEvent");
            xml.leaf("UUID", event.id.as_str())
                .leaf("Name", &event.name)
                .leaf("Description", &event.description)
                .leaf("StartDateTime", &format_timestamp(event.start))
                .leaf("EndDateTime", &format_timestamp(event.end))
                .leaf("Location", &event.location)
                .leaf("Organisator", &event.organizer)
                .leaf("Capacity", &event.capacity.to_string())
                .leaf("EventType", &event.event_type)
                .set("RegisteredUsers", "User", "UUID", &event.registered_users);
            xml.finish()
        }
        EventMessage::Update { id, patch } => {
            let mut xml = XmlBuilder::new("UpdateEvent");
            xml.leaf("UUID", id.as_str()).open("FieldsToUpdate");
            for field in patch.changed_fields() {
                let value = match field {
                    EventField::Name => patch.name.clone(),
                    EventField::Description => patch.description.clone(),
                    EventField::StartDateTime => patch.start.map(format_timestamp),
                    EventField::EndDateTime => patch.end.map(format_timestamp),
                    EventField::Location => patch.location.clone(),
                    EventField::Organizer => patch.organizer.clone(),
                    EventField::Capacity => patch.capacity.map(|c| c.to_string()),
                    EventField::EventType => patch.event_type.clone(),
                    EventField::RegisteredUsers => None,
                };
                if let Some(value) = value {
                    xml.open("Field")
                        .leaf("Name", element_name(field))
                        .leaf("NewValue", &value)
                        .close();
                }
            }
            xml.close();
            if let Some(users) = &patch.registered_users {
                xml.set("RegisteredUsers", "User", "UUID", users);
            }
            xml.finish()
        }
        EventMessage::Delete { id, action_at } => {
            let mut xml = XmlBuilder::new("DeleteEvent");
            xml.leaf("UUID", id.as_str())
                .leaf("TimeOfAction", &format_timestamp(*action_at));
            xml.finish()
        }
    }
}

pub(crate) fn decode_create(root: &XmlNode) -> WireResult<EventMessage> {
    let event = EventRecord {
        id: EntityId::from(root.required_text("UUID")?),
        name: root.required_text("Name")?.to_string(),
        description: root.optional_text("Description").unwrap_or_default().to_string(),
        start: root.required_timestamp("StartDateTime")?,
        end: root.required_timestamp("EndDateTime")?,
        location: root.required_text("Location")?.to_string(),
        organizer: root.required_text("Organisator")?.to_string(),
        capacity: root.required_capacity("Capacity")?,
        event_type: root.required_text("EventType")?.to_string(),
        registered_users: root
            .child("RegisteredUsers")
            .map(|users| users.collect_set("User", "UUID"))
            .unwrap_or_default(),
        remote_container_id: None,
    };
    Ok(EventMessage::Create(event))
}

pub(crate) fn decode_update(root: &XmlNode) -> WireResult<EventMessage> {
    let id = EntityId::from(root.required_text("UUID")?);
    let mut patch = EventPatch::default();

    let fields = root
        .child("FieldsToUpdate")
        .map(|block| block.children.as_slice())
        .unwrap_or_default();
    for entry in fields.iter().filter(|c| c.name == "Field") {
        let tag = entry.required_text("Name")?;
        let Some(field) = field_from_tag(tag) else {
            tracing::debug!(entity_id = %id, field = tag, "Ignoring unknown event field");
            continue;
        };
        let value = entry.optional_text("NewValue").unwrap_or_default();
        let invalid = |e| WireError::invalid(tag, e);
        // Fields a create requires may not be blanked by an update either.
        let required = || match value {
            "" => Err(WireError::missing(tag)),
            text => Ok(Some(text.to_string())),
        };
        match field {
            EventField::Name => patch.name = required()?,
            EventField::Description => patch.description = Some(value.to_string()),
            EventField::StartDateTime => patch.start = Some(parse_timestamp(value).map_err(invalid)?),
            EventField::EndDateTime => patch.end = Some(parse_timestamp(value).map_err(invalid)?),
            EventField::Location => patch.location = required()?,
            EventField::Organizer => patch.organizer = required()?,
            EventField::Capacity => patch.capacity = Some(Capacity::parse(value).map_err(invalid)?),
            EventField::EventType => patch.event_type = required()?,
            EventField::RegisteredUsers => {}
        }
    }

    if let Some(users) = root.child("RegisteredUsers") {
        patch.registered_users = Some(users.collect_set("User", "UUID"));
    }

    Ok(EventMessage::Update { id, patch })
}

pub(crate) fn decode_delete(root: &XmlNode) -> WireResult<EventMessage> {
    let id = EntityId::from(root.required_text("UUID")?);
    let action_at = match root.optional_text("TimeOfAction") {
        Some(text) if !text.is_empty() => {
            parse_timestamp(text).map_err(|e| WireError::invalid("TimeOfAction", e))?
        }
        _ => Utc::now(),
    };
    Ok(EventMessage::Delete { id, action_at })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode, encode};
    use chrono::TimeZone;
    use planning_model::SyncMessage;

    fn sample() -> EventRecord {
        EventRecord {
            id: EntityId::from("evt-42"),
            name: "Open Day".to_string(),
            description: "Campus tour & talks".to_string(),
            start: Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 3, 14, 17, 0, 0).unwrap(),
            location: "Main building".to_string(),
            organizer: "Student Office".to_string(),
            capacity: Capacity::new(250).unwrap(),
            event_type: "open-day".to_string(),
            registered_users: ["u-2".to_string(), "u-1".to_string()].into_iter().collect(),
            remote_container_id: None,
        }
    }

    #[test]
    fn test_create_round_trip() {
        let message = SyncMessage::Event(EventMessage::Create(sample()));
        let xml = encode(&message);
        assert!(xml.contains("<CreateEvent>"));
        assert!(xml.contains("<StartDateTime>2025-03-14T09:00:00.000Z</StartDateTime>"));
        assert_eq!(decode(&xml).unwrap(), message);
    }

    #[test]
    fn test_update_encodes_only_changed_fields() {
        let patch = EventPatch {
            location: Some("Aula".to_string()),
            capacity: Some(Capacity::new(300).unwrap()),
            ..Default::default()
        };
        let message = SyncMessage::Event(EventMessage::Update {
            id: EntityId::from("evt-42"),
            patch,
        });
        let xml = encode(&message);
        assert!(xml.contains("<Field><Name>Location</Name><NewValue>Aula</NewValue></Field>"));
        assert!(!xml.contains("EventType"));
        assert!(!xml.contains("RegisteredUsers"));
        assert_eq!(decode(&xml).unwrap(), message);
    }

    #[test]
    fn test_update_accepts_logical_field_names() {
        let xml = "<UpdateEvent><UUID>evt-1</UUID><FieldsToUpdate>\
            <Field><Name>start_datetime</Name><NewValue>2025-03-14T10:00:00</NewValue></Field>\
            <Field><Name>organizer</Name><NewValue>Dean</NewValue></Field>\
            <Field><Name>colour</Name><NewValue>blue</NewValue></Field>\
            </FieldsToUpdate></UpdateEvent>";
        let SyncMessage::Event(EventMessage::Update { patch, .. }) = decode(xml).unwrap() else {
            panic!("expected event update");
        };
        assert_eq!(
            patch.start,
            Some(Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap())
        );
        assert_eq!(patch.organizer.as_deref(), Some("Dean"));
        assert_eq!(patch.changed_fields().len(), 2);
    }

    #[test]
    fn test_update_rejects_blank_required_text() {
        let xml = "<UpdateEvent><UUID>evt-1</UUID><FieldsToUpdate>\
            <Field><Name>Name</Name></Field>\
            </FieldsToUpdate></UpdateEvent>";
        assert_eq!(decode(xml).unwrap_err(), WireError::missing("Name"));

        let xml = "<UpdateEvent><UUID>evt-1</UUID><FieldsToUpdate>\
            <Field><Name>Description</Name><NewValue></NewValue></Field>\
            </FieldsToUpdate></UpdateEvent>";
        let SyncMessage::Event(EventMessage::Update { patch, .. }) = decode(xml).unwrap() else {
            panic!("expected event update");
        };
        assert_eq!(patch.description.as_deref(), Some(""));
    }

    #[test]
    fn test_update_with_empty_participant_block_clears_set() {
        let xml = "<UpdateEvent><UUID>evt-1</UUID><RegisteredUsers/></UpdateEvent>";
        let SyncMessage::Event(EventMessage::Update { patch, .. }) = decode(xml).unwrap() else {
            panic!("expected event update");
        };
        assert_eq!(patch.registered_users, Some(Default::default()));
    }

    #[test]
    fn test_create_rejects_zero_capacity() {
        let xml = encode(&SyncMessage::Event(EventMessage::Create(sample())))
            .replace("<Capacity>250</Capacity>", "<Capacity>0</Capacity>");
        let err = decode(&xml).unwrap_err();
        assert!(matches!(err, WireError::SchemaViolation { ref element, .. } if element == "Capacity"));
    }

    #[test]
    fn test_create_rejects_missing_required_element() {
        let xml = encode(&SyncMessage::Event(EventMessage::Create(sample())))
            .replace("<Location>Main building</Location>", "");
        let err = decode(&xml).unwrap_err();
        assert_eq!(err, WireError::missing("Location"));
    }

    #[test]
    fn test_create_defaults_missing_description() {
        let xml = encode(&SyncMessage::Event(EventMessage::Create(sample())))
            .replace("<Description>Campus tour &amp; talks</Description>", "");
        let SyncMessage::Event(EventMessage::Create(event)) = decode(&xml).unwrap() else {
            panic!("expected event create");
        };
        assert_eq!(event.description, "");
    }

    #[test]
    fn test_legacy_root_aliases() {
        let xml = encode(&SyncMessage::Event(EventMessage::Create(sample())))
            .replace("CreateEvent>", "Event>");
        assert!(matches!(
            decode(&xml).unwrap(),
            SyncMessage::Event(EventMessage::Create(_))
        ));

        let delete = decode("<EventDelete><UUID>evt-1</UUID></EventDelete>").unwrap();
        assert_eq!(delete.entity_id().as_str(), "evt-1");
    }

    #[test]
    fn test_delete_round_trip() {
        let message = SyncMessage::Event(EventMessage::Delete {
            id: EntityId::from("evt-7"),
            action_at: Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap(),
        });
        assert_eq!(decode(&encode(&message)).unwrap(), message);
    }
}
