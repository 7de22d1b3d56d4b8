//! Mapping between planning records and calendar resources.
//!
//! An event is mirrored as a whole calendar whose description holds the
//! event attributes as JSON; a session is an entry in its event's calendar
//! with its own JSON description. Reading a snapshot reverses the mapping;
//! resources whose description cannot be read as a planning record are
//! skipped with a warning.

use chrono::{DateTime, Utc};
use planning_model::{
    format_timestamp, parse_timestamp, Capacity, EntityId, EventRecord, SessionRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Calendar list item (`calendarList` resource).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendarItem {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventTime {
    #[serde(rename = "dateTime", default)]
    pub date_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub email: Option<String>,
}

/// Calendar entry (`events` resource).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryItem {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub start: Option<EventTime>,
    #[serde(default)]
    pub end: Option<EventTime>,
    #[serde(default)]
    pub organizer: Option<Person>,
    #[serde(default)]
    pub attendees: Vec<Person>,
}

/// JSON stored in a calendar's description.
#[derive(Debug, Default, Serialize, Deserialize)]
struct EventAttributes {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(rename = "startDateTime", default)]
    start_date_time: Option<String>,
    #[serde(rename = "endDateTime", default)]
    end_date_time: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    capacity: Option<Value>,
    #[serde(default)]
    organizer: Option<String>,
    #[serde(rename = "eventType", default)]
    event_type: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    registered_users: Option<Vec<String>>,
}

/// One guest speaker or a list of them.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Speakers {
    One(String),
    Many(Vec<String>),
}

/// JSON stored in a calendar entry's description.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionAttributes {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    session_type: Option<String>,
    #[serde(default)]
    capacity: Option<Value>,
    #[serde(default)]
    guestspeaker: Option<Speakers>,
    #[serde(default)]
    registered_users: Option<Vec<String>>,
}

/// Capacity given as a number or numeric string.
fn capacity_from(value: Option<&Value>) -> Option<Capacity> {
    match value? {
        Value::Number(n) => n.as_i64().and_then(|v| Capacity::new(v).ok()),
        Value::String(s) => Capacity::parse(s).ok(),
        _ => None,
    }
}

fn timestamp_from(text: Option<&str>) -> Option<DateTime<Utc>> {
    text.and_then(|t| parse_timestamp(t).ok())
}

fn uuid_from(uuid: Option<String>) -> Option<EntityId> {
    uuid.map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .map(EntityId::from)
}

// ==========================================
// Records -> request bodies
// ==========================================

/// Request body for inserting or patching an event's calendar.
pub fn calendar_body(event: &EventRecord) -> Value {
    let attributes = EventAttributes {
        uuid: Some(event.id.to_string()),
        start_date_time: Some(format_timestamp(event.start)),
        end_date_time: Some(format_timestamp(event.end)),
        description: Some(event.description.clone()),
        capacity: Some(json!(event.capacity.get())),
        organizer: Some(event.organizer.clone()),
        event_type: Some(event.event_type.clone()),
        location: Some(event.location.clone()),
        registered_users: Some(event.registered_users.iter().cloned().collect()),
    };
    json!({
        "summary": event.name,
        "description": serde_json::to_string(&attributes).unwrap_or_default(),
        "timeZone": "UTC",
    })
}

/// Request body for inserting or patching a session's calendar entry.
pub fn entry_body(session: &SessionRecord) -> Value {
    let attributes = SessionAttributes {
        uuid: Some(session.id.to_string()),
        description: Some(session.description.clone()),
        session_type: Some(session.session_type.clone()),
        capacity: Some(json!(session.capacity.get())),
        guestspeaker: Some(Speakers::Many(session.guest_speakers.iter().cloned().collect())),
        registered_users: Some(session.registered_users.iter().cloned().collect()),
    };
    let attendees: Vec<Value> = session
        .registered_users
        .iter()
        .filter(|user| user.contains('@'))
        .map(|email| json!({ "email": email }))
        .collect();

    json!({
        "summary": session.name,
        "description": serde_json::to_string(&attributes).unwrap_or_default(),
        "location": session.location,
        "start": { "dateTime": format_timestamp(session.start), "timeZone": "UTC" },
        "end": { "dateTime": format_timestamp(session.end), "timeZone": "UTC" },
        "attendees": attendees,
    })
}

// ==========================================
// Snapshot resources -> records
// ==========================================

/// Read an event from its calendar; `None` for calendars that are not planning events.
pub fn event_from_calendar(item: &CalendarItem) -> Option<EventRecord> {
    let Some(description) = item.description.as_deref().filter(|d| !d.trim().is_empty()) else {
        debug!(calendar_id = %item.id, "Skipping calendar without description");
        return None;
    };

    let attributes: EventAttributes = match serde_json::from_str(description) {
        Ok(attributes) => attributes,
        Err(e) => {
            warn!(calendar_id = %item.id, error = %e, "Skipping calendar with invalid description JSON");
            return None;
        }
    };

    let Some(id) = uuid_from(attributes.uuid) else {
        warn!(calendar_id = %item.id, "Skipping calendar without uuid");
        return None;
    };
    let Some(capacity) = capacity_from(attributes.capacity.as_ref()) else {
        warn!(calendar_id = %item.id, entity_id = %id, "Skipping event without positive capacity");
        return None;
    };
    let (Some(start), Some(end)) = (
        timestamp_from(attributes.start_date_time.as_deref()),
        timestamp_from(attributes.end_date_time.as_deref()),
    ) else {
        warn!(calendar_id = %item.id, entity_id = %id, "Skipping event with invalid start or end");
        return None;
    };

    Some(EventRecord {
        id,
        name: item.summary.clone().unwrap_or_default(),
        description: attributes.description.unwrap_or_default(),
        start,
        end,
        location: attributes.location.unwrap_or_default(),
        organizer: attributes.organizer.unwrap_or_default(),
        capacity,
        event_type: attributes.event_type.unwrap_or_default(),
        registered_users: attributes
            .registered_users
            .unwrap_or_default()
            .into_iter()
            .filter(|u| !u.trim().is_empty())
            .collect(),
        remote_container_id: Some(item.id.clone()),
    })
}

/// Read a session from a calendar entry of `event`'s calendar.
pub fn session_from_entry(event: &EventRecord, calendar_id: &str, item: &EntryItem) -> Option<SessionRecord> {
    if item.status.as_deref() == Some("cancelled") {
        return None;
    }
    let Some(description) = item.description.as_deref().filter(|d| !d.trim().is_empty()) else {
        debug!(entry_id = %item.id, "Skipping calendar entry without description");
        return None;
    };

    let attributes: SessionAttributes = match serde_json::from_str(description) {
        Ok(attributes) => attributes,
        Err(e) => {
            warn!(entry_id = %item.id, error = %e, "Skipping entry with invalid description JSON");
            return None;
        }
    };

    let Some(id) = uuid_from(attributes.uuid) else {
        warn!(entry_id = %item.id, "Skipping entry without uuid");
        return None;
    };
    let Some(capacity) = capacity_from(attributes.capacity.as_ref()) else {
        warn!(entry_id = %item.id, entity_id = %id, "Skipping session without positive capacity");
        return None;
    };
    let (Some(start), Some(end)) = (
        timestamp_from(item.start.as_ref().and_then(|t| t.date_time.as_deref())),
        timestamp_from(item.end.as_ref().and_then(|t| t.date_time.as_deref())),
    ) else {
        warn!(entry_id = %item.id, entity_id = %id, "Skipping session without timed start and end");
        return None;
    };

    let guest_speakers: BTreeSet<String> = match attributes.guestspeaker {
        Some(Speakers::One(speaker)) => [speaker].into_iter().collect(),
        Some(Speakers::Many(speakers)) => speakers.into_iter().collect(),
        None => BTreeSet::new(),
    };
    let registered_users: BTreeSet<String> = attributes
        .registered_users
        .unwrap_or_default()
        .into_iter()
        .chain(item.attendees.iter().filter_map(|a| a.email.clone()))
        .collect();

    Some(SessionRecord {
        id,
        event_id: event.id.clone(),
        name: item.summary.clone().unwrap_or_default(),
        description: attributes.description.unwrap_or_default(),
        start,
        end,
        location: item.location.clone().unwrap_or_default(),
        organizer: item
            .organizer
            .as_ref()
            .and_then(|o| o.email.clone())
            .unwrap_or_default(),
        session_type: attributes.session_type.unwrap_or_default(),
        capacity,
        guest_speakers: guest_speakers.into_iter().filter(|s| !s.trim().is_empty()).collect(),
        registered_users: registered_users.into_iter().filter(|u| !u.trim().is_empty()).collect(),
        remote_container_id: Some(calendar_id.to_string()),
        remote_resource_id: Some(item.id.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event() -> EventRecord {
        EventRecord {
            id: EntityId::from("evt-1"),
            name: "Summer School".to_string(),
            description: "Two weeks".to_string(),
            start: Utc.with_ymd_and_hms(2025, 7, 1, 8, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 7, 14, 17, 0, 0).unwrap(),
            location: "Campus".to_string(),
            organizer: "Faculty".to_string(),
            capacity: Capacity::new(40).unwrap(),
            event_type: "course".to_string(),
            registered_users: ["u1".to_string()].into_iter().collect(),
            remote_container_id: Some("cal-1".to_string()),
        }
    }

    #[test]
    fn test_calendar_body_reads_back() {
        let original = event();
        let body = calendar_body(&original);
        let item = CalendarItem {
            id: "cal-1".to_string(),
            summary: body["summary"].as_str().map(str::to_string),
            description: body["description"].as_str().map(str::to_string),
        };
        assert_eq!(event_from_calendar(&item), Some(original));
    }

    #[test]
    fn test_calendar_without_planning_description_is_skipped() {
        let plain = CalendarItem {
            id: "primary".to_string(),
            summary: Some("Personal".to_string()),
            description: None,
        };
        assert_eq!(event_from_calendar(&plain), None);

        let broken = CalendarItem {
            description: Some("{not json".to_string()),
            ..plain.clone()
        };
        assert_eq!(event_from_calendar(&broken), None);

        let zero_capacity = CalendarItem {
            description: Some(
                r#"{"uuid":"e","startDateTime":"2025-01-01T10:00:00Z","endDateTime":"2025-01-01T11:00:00Z","capacity":0}"#
                    .to_string(),
            ),
            ..plain
        };
        assert_eq!(event_from_calendar(&zero_capacity), None);
    }

    #[test]
    fn test_session_entry_merges_attendees_and_single_speaker() {
        let item = EntryItem {
            id: "entry-1".to_string(),
            summary: Some("Intro".to_string()),
            description: Some(
                r#"{"uuid":"ses-1","description":"Welcome","session_type":"talk","capacity":"30","guestspeaker":"host@example.com","registered_users":["a@example.com"]}"#
                    .to_string(),
            ),
            location: Some("Room 4".to_string()),
            start: Some(EventTime {
                date_time: Some("2025-07-01T10:00:00+02:00".to_string()),
            }),
            end: Some(EventTime {
                date_time: Some("2025-07-01T11:00:00+02:00".to_string()),
            }),
            attendees: vec![
                Person {
                    email: Some("b@example.com".to_string()),
                },
                Person {
                    email: Some("a@example.com".to_string()),
                },
            ],
            ..Default::default()
        };

        let session = session_from_entry(&event(), "cal-1", &item).unwrap();
        assert_eq!(session.id.as_str(), "ses-1");
        assert_eq!(session.event_id.as_str(), "evt-1");
        assert_eq!(session.capacity.get(), 30);
        assert_eq!(format_timestamp(session.start), "2025-07-01T08:00:00.000Z");
        assert_eq!(session.guest_speakers.len(), 1);
        assert_eq!(session.registered_users.len(), 2);
        assert_eq!(session.remote_resource_id.as_deref(), Some("entry-1"));
    }

    #[test]
    fn test_cancelled_entry_is_skipped() {
        let item = EntryItem {
            id: "entry-2".to_string(),
            status: Some("cancelled".to_string()),
            ..Default::default()
        };
        assert!(session_from_entry(&event(), "cal-1", &item).is_none());
    }

    #[test]
    fn test_entry_body_lists_email_attendees() {
        let session = SessionRecord {
            id: EntityId::from("ses-1"),
            event_id: EntityId::from("evt-1"),
            name: "Intro".to_string(),
            description: String::new(),
            start: Utc.with_ymd_and_hms(2025, 7, 1, 8, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap(),
            location: String::new(),
            organizer: String::new(),
            session_type: "talk".to_string(),
            capacity: Capacity::new(10).unwrap(),
            guest_speakers: BTreeSet::new(),
            registered_users: ["a@example.com".to_string(), "user-17".to_string()]
                .into_iter()
                .collect(),
            remote_container_id: None,
            remote_resource_id: None,
        };
        let body = entry_body(&session);
        assert_eq!(body["attendees"].as_array().unwrap().len(), 1);
        assert_eq!(body["start"]["dateTime"], "2025-07-01T08:00:00.000Z");
    }
}
