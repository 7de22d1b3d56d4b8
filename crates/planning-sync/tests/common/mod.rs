#![allow(dead_code)]

use async_trait::async_trait;
use calendar_client::{CalendarError, CalendarResult, RemoteCalendar, SnapshotSource};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use planning_database::AsyncDatabase;
use planning_model::{Capacity, EntityId, EventRecord, SessionRecord};
use planning_sync::ApplyEngine;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Default)]
struct CalendarState {
    containers: BTreeMap<String, EventRecord>,
    entries: BTreeMap<(String, String), SessionRecord>,
    calls: Vec<String>,
    failures: Vec<(&'static str, u16)>,
    next_id: u32,
}

impl CalendarState {
    fn record(&mut self, call: &'static str) -> CalendarResult<()> {
        self.calls.push(call.to_string());
        if let Some(pos) = self.failures.iter().position(|(name, _)| *name == call) {
            let (_, status) = self.failures.remove(pos);
            return Err(CalendarError::Api {
                status,
                message: format!("injected {call} failure"),
            });
        }
        Ok(())
    }

    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// In-memory [`RemoteCalendar`] that records every call.
#[derive(Default)]
pub struct RecordingCalendar {
    state: Mutex<CalendarState>,
}

impl RecordingCalendar {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next call named `call` fail with HTTP `status`.
    pub fn fail_next(&self, call: &'static str, status: u16) {
        self.state.lock().failures.push((call, status));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn containers(&self) -> BTreeMap<String, EventRecord> {
        self.state.lock().containers.clone()
    }

    /// Entries keyed by (container id, entry id).
    pub fn entries(&self) -> BTreeMap<(String, String), SessionRecord> {
        self.state.lock().entries.clone()
    }

    /// Drop a container behind the engine's back.
    pub fn forget_container(&self, container_id: &str) {
        let mut state = self.state.lock();
        state.containers.remove(container_id);
        state.entries.retain(|(container, _), _| container != container_id);
    }
}

#[async_trait]
impl RemoteCalendar for RecordingCalendar {
    async fn create_container(&self, event: &EventRecord) -> CalendarResult<String> {
        let mut state = self.state.lock();
        state.record("create_container")?;
        let id = state.next("cal");
        state.containers.insert(id.clone(), event.clone());
        Ok(id)
    }

    async fn update_container(&self, container_id: &str, event: &EventRecord) -> CalendarResult<()> {
        let mut state = self.state.lock();
        state.record("update_container")?;
        match state.containers.get_mut(container_id) {
            Some(stored) => {
                *stored = event.clone();
                Ok(())
            }
            None => Err(CalendarError::NotFound(format!("calendars/{container_id}"))),
        }
    }

    async fn delete_container(&self, container_id: &str) -> CalendarResult<()> {
        let mut state = self.state.lock();
        state.record("delete_container")?;
        state.containers.remove(container_id);
        state.entries.retain(|(container, _), _| container != container_id);
        Ok(())
    }

    async fn create_entry(&self, container_id: &str, session: &SessionRecord) -> CalendarResult<String> {
        let mut state = self.state.lock();
        state.record("create_entry")?;
        if !state.containers.contains_key(container_id) {
            return Err(CalendarError::NotFound(format!("calendars/{container_id}")));
        }
        let id = state.next("entry");
        state
            .entries
            .insert((container_id.to_string(), id.clone()), session.clone());
        Ok(id)
    }

    async fn update_entry(
        &self,
        container_id: &str,
        entry_id: &str,
        session: &SessionRecord,
    ) -> CalendarResult<()> {
        let mut state = self.state.lock();
        state.record("update_entry")?;
        let key = (container_id.to_string(), entry_id.to_string());
        match state.entries.get_mut(&key) {
            Some(stored) => {
                *stored = session.clone();
                Ok(())
            }
            None => Err(CalendarError::NotFound(format!(
                "calendars/{container_id}/events/{entry_id}"
            ))),
        }
    }

    async fn delete_entry(&self, container_id: &str, entry_id: &str) -> CalendarResult<()> {
        let mut state = self.state.lock();
        state.record("delete_entry")?;
        state
            .entries
            .remove(&(container_id.to_string(), entry_id.to_string()));
        Ok(())
    }
}

/// Snapshot source whose contents the test replaces between passes.
#[derive(Default)]
pub struct FakeSource {
    snapshot: Mutex<(Vec<EventRecord>, Vec<SessionRecord>)>,
    failing: Mutex<bool>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, events: Vec<EventRecord>, sessions: Vec<SessionRecord>) {
        *self.snapshot.lock() = (events, sessions);
    }

    pub fn fail_next_fetch(&self) {
        *self.failing.lock() = true;
    }
}

#[async_trait]
impl SnapshotSource for FakeSource {
    async fn fetch_events(&self) -> CalendarResult<Vec<EventRecord>> {
        let mut failing = self.failing.lock();
        if *failing {
            *failing = false;
            return Err(CalendarError::Api {
                status: 503,
                message: "source unavailable".to_string(),
            });
        }
        Ok(self.snapshot.lock().0.clone())
    }

    async fn fetch_sessions(&self, events: &[EventRecord]) -> CalendarResult<Vec<SessionRecord>> {
        let ids: BTreeSet<&EntityId> = events.iter().map(|e| &e.id).collect();
        Ok(self
            .snapshot
            .lock()
            .1
            .iter()
            .filter(|s| ids.contains(&s.event_id))
            .cloned()
            .collect())
    }
}

pub async fn engine() -> (ApplyEngine, Arc<RecordingCalendar>) {
    let db = AsyncDatabase::open_in_memory()
        .await
        .expect("failed to open database");
    let calendar = RecordingCalendar::new();
    (ApplyEngine::new(db, calendar.clone()), calendar)
}

pub fn event(id: &str) -> EventRecord {
    EventRecord {
        id: EntityId::from(id),
        name: format!("Event {id}"),
        description: "Yearly gathering".to_string(),
        start: Utc.with_ymd_and_hms(2025, 6, 12, 8, 30, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2025, 6, 12, 17, 0, 0).unwrap(),
        location: "Campus Kaai".to_string(),
        organizer: "Student Affairs".to_string(),
        capacity: Capacity::new(250).unwrap(),
        event_type: "conference".to_string(),
        registered_users: users(&["u-1", "u-2"]),
        remote_container_id: None,
    }
}

pub fn session(id: &str, event_id: &str) -> SessionRecord {
    SessionRecord {
        id: EntityId::from(id),
        event_id: EntityId::from(event_id),
        name: format!("Session {id}"),
        description: "Keynote".to_string(),
        start: Utc.with_ymd_and_hms(2025, 6, 12, 9, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2025, 6, 12, 10, 0, 0).unwrap(),
        location: "Aula 1".to_string(),
        organizer: "Student Affairs".to_string(),
        session_type: "keynote".to_string(),
        capacity: Capacity::new(120).unwrap(),
        guest_speakers: users(&["speaker@example.com"]),
        registered_users: users(&["alice@example.com"]),
        remote_container_id: None,
        remote_resource_id: None,
    }
}

pub fn users(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

/// Strip the mirror ids so records from both sides compare.
pub fn without_remote_ids(mut event: EventRecord) -> EventRecord {
    event.remote_container_id = None;
    event
}

pub fn session_without_remote_ids(mut session: SessionRecord) -> SessionRecord {
    session.remote_container_id = None;
    session.remote_resource_id = None;
    session
}
