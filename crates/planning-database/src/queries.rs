//! Standalone query functions.
//!
//! Each function takes a `&Connection` as its first parameter, so they work
//! the same on a plain connection and inside a transaction.

use crate::{DatabaseResult, NewOutboxEntry, OutboxEntry, OutboxStatus};
use chrono::{DateTime, Utc};
use planning_model::{
    format_timestamp, parse_timestamp, Capacity, EntityId, EventPatch, EventRecord, SessionPatch,
    SessionRecord,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::collections::BTreeSet;
use tracing::debug;

// ==========================================
// Events
// ==========================================

const EVENT_COLUMNS: &str = "id, name, description, start_datetime, end_datetime, location, organizer, capacity, event_type, calendar_id";

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    Ok(EventRecord {
        id: EntityId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        start: timestamp_column(row, 3)?,
        end: timestamp_column(row, 4)?,
        location: row.get(5)?,
        organizer: row.get(6)?,
        capacity: capacity_column(row, 7)?,
        event_type: row.get(8)?,
        registered_users: BTreeSet::new(),
        remote_container_id: row.get(9)?,
    })
}

/// Get an event with its registered users.
pub fn get_event(conn: &Connection, id: &EntityId) -> DatabaseResult<Option<EventRecord>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"))?;
    let event = stmt.query_row(params![id.as_str()], event_from_row).optional()?;

    match event {
        Some(mut event) => {
            event.registered_users = list_members(conn, Members::EVENT_USERS, &event.id)?;
            Ok(Some(event))
        }
        None => Ok(None),
    }
}

/// List all events with their registered users, ordered by id.
pub fn list_events(conn: &Connection) -> DatabaseResult<Vec<EventRecord>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY id"))?;
    let mut events = stmt
        .query_map([], event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    for event in &mut events {
        event.registered_users = list_members(conn, Members::EVENT_USERS, &event.id)?;
    }
    Ok(events)
}

/// Insert or fully overwrite an event, replacing its registered users.
///
/// A stored calendar id survives when the incoming record has none.
pub fn upsert_event(conn: &Connection, event: &EventRecord) -> DatabaseResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO events (id, name, description, start_datetime, end_datetime, location, organizer, capacity, event_type, calendar_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            start_datetime = excluded.start_datetime,
            end_datetime = excluded.end_datetime,
            location = excluded.location,
            organizer = excluded.organizer,
            capacity = excluded.capacity,
            event_type = excluded.event_type,
            calendar_id = COALESCE(excluded.calendar_id, events.calendar_id),
            updated_at = excluded.updated_at",
        params![
            event.id.as_str(),
            event.name,
            event.description,
            format_timestamp(event.start),
            format_timestamp(event.end),
            event.location,
            event.organizer,
            i64::from(event.capacity),
            event.event_type,
            event.remote_container_id,
            now,
        ],
    )?;
    replace_members(conn, Members::EVENT_USERS, &event.id, &event.registered_users)?;
    debug!(entity_id = %event.id, "Event upserted");
    Ok(())
}

/// Apply the present fields of a patch. Returns false when the event is unknown.
pub fn update_event(conn: &Connection, id: &EntityId, patch: &EventPatch) -> DatabaseResult<bool> {
    if !row_exists(conn, "events", id)? {
        return Ok(false);
    }

    let mut columns: Vec<(&'static str, Box<dyn ToSql>)> = Vec::new();
    if let Some(name) = &patch.name {
        columns.push(("name", Box::new(name.clone())));
    }
    if let Some(description) = &patch.description {
        columns.push(("description", Box::new(description.clone())));
    }
    if let Some(start) = patch.start {
        columns.push(("start_datetime", Box::new(format_timestamp(start))));
    }
    if let Some(end) = patch.end {
        columns.push(("end_datetime", Box::new(format_timestamp(end))));
    }
    if let Some(location) = &patch.location {
        columns.push(("location", Box::new(location.clone())));
    }
    if let Some(organizer) = &patch.organizer {
        columns.push(("organizer", Box::new(organizer.clone())));
    }
    if let Some(capacity) = patch.capacity {
        columns.push(("capacity", Box::new(i64::from(capacity))));
    }
    if let Some(event_type) = &patch.event_type {
        columns.push(("event_type", Box::new(event_type.clone())));
    }
    update_columns(conn, "events", id, columns)?;

    if let Some(users) = &patch.registered_users {
        replace_members(conn, Members::EVENT_USERS, id, users)?;
    }
    Ok(true)
}

/// Store (or clear) the remote calendar id of an event.
pub fn set_event_calendar_id(
    conn: &Connection,
    id: &EntityId,
    calendar_id: Option<&str>,
) -> DatabaseResult<bool> {
    let count = conn.execute(
        "UPDATE events SET calendar_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![calendar_id, Utc::now().to_rfc3339(), id.as_str()],
    )?;
    Ok(count > 0)
}

/// Delete an event; its sessions and participants cascade.
pub fn delete_event(conn: &Connection, id: &EntityId) -> DatabaseResult<bool> {
    let count = conn.execute("DELETE FROM events WHERE id = ?1", params![id.as_str()])?;
    Ok(count > 0)
}

// ==========================================
// Sessions
// ==========================================

const SESSION_COLUMNS: &str = "id, event_id, name, description, start_datetime, end_datetime, location, organizer, session_type, capacity, calendar_id, remote_event_id";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: EntityId(row.get(0)?),
        event_id: EntityId(row.get(1)?),
        name: row.get(2)?,
        description: row.get(3)?,
        start: timestamp_column(row, 4)?,
        end: timestamp_column(row, 5)?,
        location: row.get(6)?,
        organizer: row.get(7)?,
        session_type: row.get(8)?,
        capacity: capacity_column(row, 9)?,
        guest_speakers: BTreeSet::new(),
        registered_users: BTreeSet::new(),
        remote_container_id: row.get(10)?,
        remote_resource_id: row.get(11)?,
    })
}

fn load_session_members(conn: &Connection, session: &mut SessionRecord) -> DatabaseResult<()> {
    session.guest_speakers = list_members(conn, Members::SESSION_SPEAKERS, &session.id)?;
    session.registered_users = list_members(conn, Members::SESSION_USERS, &session.id)?;
    Ok(())
}

/// Get a session with its speakers and registered users.
pub fn get_session(conn: &Connection, id: &EntityId) -> DatabaseResult<Option<SessionRecord>> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"))?;
    let session = stmt.query_row(params![id.as_str()], session_from_row).optional()?;

    match session {
        Some(mut session) => {
            load_session_members(conn, &mut session)?;
            Ok(Some(session))
        }
        None => Ok(None),
    }
}

/// List all sessions, ordered by id.
pub fn list_sessions(conn: &Connection) -> DatabaseResult<Vec<SessionRecord>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY id"))?;
    let mut sessions = stmt
        .query_map([], session_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    for session in &mut sessions {
        load_session_members(conn, session)?;
    }
    Ok(sessions)
}

/// Insert or fully overwrite a session, replacing both participant sets.
///
/// Stored remote ids survive when the incoming record has none. The parent
/// event must exist.
pub fn upsert_session(conn: &Connection, session: &SessionRecord) -> DatabaseResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO sessions (id, event_id, name, description, start_datetime, end_datetime, location, organizer, session_type, capacity, calendar_id, remote_event_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
         ON CONFLICT(id) DO UPDATE SET
            event_id = excluded.event_id,
            name = excluded.name,
            description = excluded.description,
            start_datetime = excluded.start_datetime,
            end_datetime = excluded.end_datetime,
            location = excluded.location,
            organizer = excluded.organizer,
            session_type = excluded.session_type,
            capacity = excluded.capacity,
            calendar_id = COALESCE(excluded.calendar_id, sessions.calendar_id),
            remote_event_id = COALESCE(excluded.remote_event_id, sessions.remote_event_id),
            updated_at = excluded.updated_at",
        params![
            session.id.as_str(),
            session.event_id.as_str(),
            session.name,
            session.description,
            format_timestamp(session.start),
            format_timestamp(session.end),
            session.location,
            session.organizer,
            session.session_type,
            i64::from(session.capacity),
            session.remote_container_id,
            session.remote_resource_id,
            now,
        ],
    )?;
    replace_members(conn, Members::SESSION_SPEAKERS, &session.id, &session.guest_speakers)?;
    replace_members(conn, Members::SESSION_USERS, &session.id, &session.registered_users)?;
    debug!(entity_id = %session.id, event_id = %session.event_id, "Session upserted");
    Ok(())
}

/// Apply the present fields of a patch. Returns false when the session is unknown.
pub fn update_session(
    conn: &Connection,
    id: &EntityId,
    patch: &SessionPatch,
) -> DatabaseResult<bool> {
    if !row_exists(conn, "sessions", id)? {
        return Ok(false);
    }

    let mut columns: Vec<(&'static str, Box<dyn ToSql>)> = Vec::new();
    if let Some(event_id) = &patch.event_id {
        columns.push(("event_id", Box::new(event_id.0.clone())));
    }
    if let Some(name) = &patch.name {
        columns.push(("name", Box::new(name.clone())));
    }
    if let Some(description) = &patch.description {
        columns.push(("description", Box::new(description.clone())));
    }
    if let Some(start) = patch.start {
        columns.push(("start_datetime", Box::new(format_timestamp(start))));
    }
    if let Some(end) = patch.end {
        columns.push(("end_datetime", Box::new(format_timestamp(end))));
    }
    if let Some(location) = &patch.location {
        columns.push(("location", Box::new(location.clone())));
    }
    if let Some(organizer) = &patch.organizer {
        columns.push(("organizer", Box::new(organizer.clone())));
    }
    if let Some(session_type) = &patch.session_type {
        columns.push(("session_type", Box::new(session_type.clone())));
    }
    if let Some(capacity) = patch.capacity {
        columns.push(("capacity", Box::new(i64::from(capacity))));
    }
    update_columns(conn, "sessions", id, columns)?;

    if let Some(speakers) = &patch.guest_speakers {
        replace_members(conn, Members::SESSION_SPEAKERS, id, speakers)?;
    }
    if let Some(users) = &patch.registered_users {
        replace_members(conn, Members::SESSION_USERS, id, users)?;
    }
    Ok(true)
}

/// Store (or clear) both remote ids of a session.
pub fn set_session_remote_ids(
    conn: &Connection,
    id: &EntityId,
    calendar_id: Option<&str>,
    remote_event_id: Option<&str>,
) -> DatabaseResult<bool> {
    let count = conn.execute(
        "UPDATE sessions SET calendar_id = ?1, remote_event_id = ?2, updated_at = ?3 WHERE id = ?4",
        params![calendar_id, remote_event_id, Utc::now().to_rfc3339(), id.as_str()],
    )?;
    Ok(count > 0)
}

/// Delete a session and its participants.
pub fn delete_session(conn: &Connection, id: &EntityId) -> DatabaseResult<bool> {
    let count = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id.as_str()])?;
    Ok(count > 0)
}

// ==========================================
// Participant sets
// ==========================================

/// Join table holding one participant set.
#[derive(Clone, Copy)]
struct Members {
    table: &'static str,
    owner_column: &'static str,
    member_column: &'static str,
}

impl Members {
    const EVENT_USERS: Members = Members {
        table: "event_users",
        owner_column: "event_id",
        member_column: "user_id",
    };
    const SESSION_USERS: Members = Members {
        table: "session_users",
        owner_column: "session_id",
        member_column: "user_email",
    };
    const SESSION_SPEAKERS: Members = Members {
        table: "session_guest_speakers",
        owner_column: "session_id",
        member_column: "email",
    };
}

fn list_members(conn: &Connection, members: Members, owner: &EntityId) -> DatabaseResult<BTreeSet<String>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        members.member_column, members.table, members.owner_column
    ))?;
    let set = stmt
        .query_map(params![owner.as_str()], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(set)
}

/// Replace a participant set wholesale.
fn replace_members(
    conn: &Connection,
    members: Members,
    owner: &EntityId,
    values: &BTreeSet<String>,
) -> DatabaseResult<()> {
    conn.execute(
        &format!("DELETE FROM {} WHERE {} = ?1", members.table, members.owner_column),
        params![owner.as_str()],
    )?;
    let mut stmt = conn.prepare_cached(&format!(
        "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, ?2)",
        members.table, members.owner_column, members.member_column
    ))?;
    for value in values {
        stmt.execute(params![owner.as_str(), value])?;
    }
    Ok(())
}

// ==========================================
// Sync Outbox
// ==========================================

/// Insert a pending outbox row and return its id.
pub fn insert_outbox_entry(conn: &Connection, entry: &NewOutboxEntry) -> DatabaseResult<i64> {
    let topics = serde_json::to_string(&entry.topics)?;
    conn.execute(
        "INSERT INTO sync_outbox (entity_kind, entity_id, operation, topics, payload, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
        params![
            entry.entity_kind.as_str(),
            entry.entity_id.as_str(),
            entry.operation.as_str(),
            topics,
            entry.payload,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn outbox_from_row(row: &Row<'_>) -> rusqlite::Result<OutboxEntry> {
    let topics: String = row.get(4)?;
    Ok(OutboxEntry {
        id: row.get(0)?,
        entity_kind: parsed_column(row, 1)?,
        entity_id: EntityId(row.get(2)?),
        operation: parsed_column(row, 3)?,
        topics: serde_json::from_str(&topics)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        payload: row.get(5)?,
        status: OutboxStatus::parse(&row.get::<_, String>(6)?),
        attempts: row.get(7)?,
        last_error: row.get(8)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?),
        published_at: row.get::<_, Option<String>>(10)?.as_deref().map(parse_datetime),
    })
}

/// Get pending outbox rows in insertion order.
pub fn get_pending_outbox_entries(conn: &Connection, limit: usize) -> DatabaseResult<Vec<OutboxEntry>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, entity_kind, entity_id, operation, topics, payload, status, attempts, last_error, created_at, published_at
         FROM sync_outbox
         WHERE status = 'pending'
         ORDER BY id ASC
         LIMIT ?1",
    )?;

    let entries = stmt
        .query_map(params![limit as i64], outbox_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Mark an outbox row as published.
pub fn mark_outbox_entry_published(conn: &Connection, id: i64) -> DatabaseResult<bool> {
    let count = conn.execute(
        "UPDATE sync_outbox
         SET status = 'published', published_at = ?1, attempts = attempts + 1, last_error = NULL
         WHERE id = ?2",
        params![Utc::now().to_rfc3339(), id],
    )?;
    Ok(count > 0)
}

/// Record a failed publish attempt; the row stays pending.
pub fn mark_outbox_entry_failed(conn: &Connection, id: i64, error: &str) -> DatabaseResult<bool> {
    let count = conn.execute(
        "UPDATE sync_outbox
         SET attempts = attempts + 1, last_error = ?1
         WHERE id = ?2",
        params![error, id],
    )?;
    Ok(count > 0)
}

/// Number of rows still waiting to be published.
pub fn count_pending_outbox_entries(conn: &Connection) -> DatabaseResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sync_outbox WHERE status = 'pending'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ==========================================
// Helpers
// ==========================================

fn row_exists(conn: &Connection, table: &str, id: &EntityId) -> DatabaseResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE id = ?1"),
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// `UPDATE <table> SET col = ?, ... WHERE id = ?` for the given columns.
fn update_columns(
    conn: &Connection,
    table: &str,
    id: &EntityId,
    columns: Vec<(&'static str, Box<dyn ToSql>)>,
) -> DatabaseResult<()> {
    if columns.is_empty() {
        return Ok(());
    }

    let assignments = columns
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{} = ?{}", column, i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {} SET {}, updated_at = ?{} WHERE id = ?{}",
        table,
        assignments,
        columns.len() + 1,
        columns.len() + 2
    );

    let now = Utc::now().to_rfc3339();
    let mut params_vec: Vec<&dyn ToSql> = columns.iter().map(|(_, value)| &**value as &dyn ToSql).collect();
    params_vec.push(&now);
    params_vec.push(&id.0);

    conn.execute(&sql, params_vec.as_slice())?;
    Ok(())
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_timestamp(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn capacity_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Capacity> {
    let value: i64 = row.get(idx)?;
    Capacity::new(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

/// Parse an RFC3339 bookkeeping timestamp, falling back to now.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
