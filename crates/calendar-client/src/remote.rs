//! Seams between the sync engine and the remote calendar.

use crate::error::CalendarResult;
use async_trait::async_trait;
use planning_model::{EventRecord, SessionRecord};

/// Mirror of planning entities in a remote calendar service.
///
/// Events map to containers (calendars), sessions to entries inside their
/// event's container. Updates always carry the full record so repeating a
/// call leaves the remote side unchanged.
#[async_trait]
pub trait RemoteCalendar: Send + Sync {
    /// Create the container for `event`; returns the remote container id.
    async fn create_container(&self, event: &EventRecord) -> CalendarResult<String>;

    async fn update_container(&self, container_id: &str, event: &EventRecord) -> CalendarResult<()>;

    /// Delete a container. A container that is already gone is not an error.
    async fn delete_container(&self, container_id: &str) -> CalendarResult<()>;

    /// Create the entry for `session` in `container_id`; returns the entry id.
    async fn create_entry(&self, container_id: &str, session: &SessionRecord) -> CalendarResult<String>;

    async fn update_entry(
        &self,
        container_id: &str,
        entry_id: &str,
        session: &SessionRecord,
    ) -> CalendarResult<()>;

    /// Delete an entry. An entry that is already gone is not an error.
    async fn delete_entry(&self, container_id: &str, entry_id: &str) -> CalendarResult<()>;
}

/// Read side used by the producer to snapshot the authoritative state.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Every event currently present in the source.
    async fn fetch_events(&self) -> CalendarResult<Vec<EventRecord>>;

    /// Every session belonging to one of `events`.
    async fn fetch_sessions(&self, events: &[EventRecord]) -> CalendarResult<Vec<SessionRecord>>;
}
