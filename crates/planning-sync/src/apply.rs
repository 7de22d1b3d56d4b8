//! Idempotent application of decoded messages.
//!
//! Every operation converges: applying the same message twice leaves the
//! local store and the remote mirror as after the first application.
//! Local writes commit in one transaction; the remote call follows. A remote
//! failure after the commit surfaces as [`SyncError::PartialApplyFailure`]
//! and the redelivered message finishes the job.

use crate::error::{SyncError, SyncResult};
use calendar_client::{CalendarError, CalendarResult, RemoteCalendar};
use planning_database::{queries, AsyncDatabase, DatabaseError};
use planning_model::{
    EntityId, EntityMessage, EventPatch, EventRecord, SessionPatch, SessionRecord, SyncMessage,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of applying one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Local store and mirror now reflect the message.
    Applied,
    /// Nothing to do (unknown entity or empty change set).
    Ignored,
}

/// Treat a remote resource that is already gone as deleted.
fn ignore_missing(result: CalendarResult<()>) -> CalendarResult<()> {
    match result {
        Err(CalendarError::NotFound(path)) => {
            debug!(%path, "Remote resource already absent");
            Ok(())
        }
        other => other,
    }
}

fn vanished(kind: &str, id: &EntityId) -> DatabaseError {
    DatabaseError::InvalidData(format!("{kind} {id} missing right after write"))
}

/// Applies messages to the relational store and the remote calendar.
#[derive(Clone)]
pub struct ApplyEngine {
    db: AsyncDatabase,
    remote: Arc<dyn RemoteCalendar>,
}

impl ApplyEngine {
    pub fn new(db: AsyncDatabase, remote: Arc<dyn RemoteCalendar>) -> Self {
        Self { db, remote }
    }

    pub fn database(&self) -> &AsyncDatabase {
        &self.db
    }

    pub async fn apply(&self, message: &SyncMessage) -> SyncResult<ApplyOutcome> {
        match message {
            SyncMessage::Event(EntityMessage::Create(record)) => self.create_event(record).await,
            SyncMessage::Event(EntityMessage::Update { id, patch }) => {
                self.update_event(id, patch).await
            }
            SyncMessage::Event(EntityMessage::Delete { id, .. }) => self.delete_event(id).await,
            SyncMessage::Session(EntityMessage::Create(record)) => {
                self.create_session(record).await
            }
            SyncMessage::Session(EntityMessage::Update { id, patch }) => {
                self.update_session(id, patch).await
            }
            SyncMessage::Session(EntityMessage::Delete { id, .. }) => {
                self.delete_session(id).await
            }
        }
    }

    // =========================================================================
    // Events
    // =========================================================================

    async fn create_event(&self, record: &EventRecord) -> SyncResult<ApplyOutcome> {
        let incoming = EventRecord {
            remote_container_id: None,
            ..record.clone().normalized()
        };

        let stored = self
            .db
            .transaction(move |tx| {
                queries::upsert_event(tx, &incoming)?;
                queries::get_event(tx, &incoming.id)?.ok_or_else(|| vanished("event", &incoming.id))
            })
            .await?;

        self.mirror_event(&stored).await?;
        info!(entity_id = %stored.id, "Event created");
        Ok(ApplyOutcome::Applied)
    }

    async fn update_event(&self, id: &EntityId, patch: &EventPatch) -> SyncResult<ApplyOutcome> {
        if patch.is_empty() {
            debug!(entity_id = %id, "Empty event update ignored");
            return Ok(ApplyOutcome::Ignored);
        }

        let (key, patch) = (id.clone(), patch.clone());
        let stored = self
            .db
            .transaction(move |tx| {
                if !queries::update_event(tx, &key, &patch)? {
                    return Ok(None);
                }
                queries::get_event(tx, &key)
            })
            .await?;

        let Some(stored) = stored else {
            info!(entity_id = %id, "Update for unknown event ignored");
            return Ok(ApplyOutcome::Ignored);
        };

        self.mirror_event(&stored).await?;
        info!(entity_id = %stored.id, "Event updated");
        Ok(ApplyOutcome::Applied)
    }

    async fn delete_event(&self, id: &EntityId) -> SyncResult<ApplyOutcome> {
        let lookup = id.clone();
        let Some(stored) = self
            .db
            .call(move |conn| queries::get_event(conn, &lookup))
            .await?
        else {
            debug!(entity_id = %id, "Delete for unknown event ignored");
            return Ok(ApplyOutcome::Ignored);
        };

        // Remote first: on failure the row (and its calendar id) stays for the retry.
        if let Some(calendar_id) = stored.remote_container_id.as_deref() {
            ignore_missing(self.remote.delete_container(calendar_id).await)?;
        }

        let id = stored.id.clone();
        self.db
            .call(move |conn| queries::delete_event(conn, &id))
            .await?;
        info!(entity_id = %stored.id, "Event deleted");
        Ok(ApplyOutcome::Applied)
    }

    /// Bring the remote calendar of a stored event in line with it.
    async fn mirror_event(&self, stored: &EventRecord) -> SyncResult<()> {
        if let Some(calendar_id) = stored.remote_container_id.as_deref() {
            match self.remote.update_container(calendar_id, stored).await {
                Ok(()) => return Ok(()),
                Err(CalendarError::NotFound(_)) => {
                    warn!(entity_id = %stored.id, calendar_id, "Calendar vanished remotely, recreating");
                }
                Err(e) => return Err(SyncError::partial(&stored.id, e)),
            }
        }

        let calendar_id = self
            .remote
            .create_container(stored)
            .await
            .map_err(|e| SyncError::partial(&stored.id, e))?;

        let id = stored.id.clone();
        let stored_id = calendar_id.clone();
        self.db
            .call(move |conn| {
                queries::set_event_calendar_id(conn, &id, Some(stored_id.as_str()))
            })
            .await?;
        debug!(entity_id = %stored.id, %calendar_id, "Event mirrored");
        Ok(())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    async fn create_session(&self, record: &SessionRecord) -> SyncResult<ApplyOutcome> {
        let incoming = SessionRecord {
            remote_container_id: None,
            remote_resource_id: None,
            ..record.clone().normalized()
        };

        let written = self
            .db
            .transaction(move |tx| {
                let Some(parent) = queries::get_event(tx, &incoming.event_id)? else {
                    return Ok(Err(format!("event {} is not stored", incoming.event_id)));
                };
                let Some(calendar_id) = parent.remote_container_id else {
                    return Ok(Err(format!("event {} is not mirrored", incoming.event_id)));
                };
                queries::upsert_session(tx, &incoming)?;
                let stored = queries::get_session(tx, &incoming.id)?
                    .ok_or_else(|| vanished("session", &incoming.id))?;
                Ok(Ok((stored, calendar_id)))
            })
            .await?;

        let (stored, calendar_id) = written.map_err(SyncError::DependencyNotReady)?;
        self.mirror_session(&stored, &calendar_id).await?;
        info!(entity_id = %stored.id, event_id = %stored.event_id, "Session created");
        Ok(ApplyOutcome::Applied)
    }

    async fn update_session(&self, id: &EntityId, patch: &SessionPatch) -> SyncResult<ApplyOutcome> {
        if patch.is_empty() {
            debug!(entity_id = %id, "Empty session update ignored");
            return Ok(ApplyOutcome::Ignored);
        }

        let (key, patch) = (id.clone(), patch.clone());
        let written = self
            .db
            .transaction(move |tx| {
                if queries::get_session(tx, &key)?.is_none() {
                    return Ok(Ok(None));
                }
                if let Some(new_parent) = &patch.event_id {
                    match queries::get_event(tx, new_parent)? {
                        None => return Ok(Err(format!("event {new_parent} is not stored"))),
                        Some(parent) if parent.remote_container_id.is_none() => {
                            return Ok(Err(format!("event {new_parent} is not mirrored")));
                        }
                        Some(_) => {}
                    }
                }

                queries::update_session(tx, &key, &patch)?;
                let stored =
                    queries::get_session(tx, &key)?.ok_or_else(|| vanished("session", &key))?;
                let calendar_id = queries::get_event(tx, &stored.event_id)?
                    .and_then(|parent| parent.remote_container_id);
                Ok(Ok(Some((stored, calendar_id))))
            })
            .await?;

        let Some((stored, calendar_id)) = written.map_err(SyncError::DependencyNotReady)? else {
            info!(entity_id = %id, "Update for unknown session ignored");
            return Ok(ApplyOutcome::Ignored);
        };

        let Some(calendar_id) = calendar_id else {
            // Committed locally; the redelivery mirrors once the parent is.
            return Err(SyncError::DependencyNotReady(format!(
                "event {} is not mirrored",
                stored.event_id
            )));
        };

        self.mirror_session(&stored, &calendar_id).await?;
        info!(entity_id = %stored.id, "Session updated");
        Ok(ApplyOutcome::Applied)
    }

    async fn delete_session(&self, id: &EntityId) -> SyncResult<ApplyOutcome> {
        let lookup = id.clone();
        let Some(stored) = self
            .db
            .call(move |conn| queries::get_session(conn, &lookup))
            .await?
        else {
            debug!(entity_id = %id, "Delete for unknown session ignored");
            return Ok(ApplyOutcome::Ignored);
        };

        if let (Some(calendar_id), Some(entry_id)) = (
            stored.remote_container_id.as_deref(),
            stored.remote_resource_id.as_deref(),
        ) {
            ignore_missing(self.remote.delete_entry(calendar_id, entry_id).await)?;
        }

        let id = stored.id.clone();
        self.db
            .call(move |conn| queries::delete_session(conn, &id))
            .await?;
        info!(entity_id = %stored.id, "Session deleted");
        Ok(ApplyOutcome::Applied)
    }

    /// Bring the calendar entry of a stored session in line with it.
    ///
    /// A session whose entry lives in another calendar (its event changed)
    /// gets a new entry in `calendar_id`; the old entry is removed after.
    async fn mirror_session(&self, stored: &SessionRecord, calendar_id: &str) -> SyncResult<()> {
        let mut stale_entry = None;

        if let (Some(current_calendar), Some(entry_id)) = (
            stored.remote_container_id.as_deref(),
            stored.remote_resource_id.as_deref(),
        ) {
            if current_calendar == calendar_id {
                match self.remote.update_entry(calendar_id, entry_id, stored).await {
                    Ok(()) => return Ok(()),
                    Err(CalendarError::NotFound(_)) => {
                        warn!(entity_id = %stored.id, entry_id, "Calendar entry vanished remotely, recreating");
                    }
                    Err(e) => return Err(SyncError::partial(&stored.id, e)),
                }
            } else {
                stale_entry = Some((current_calendar.to_string(), entry_id.to_string()));
            }
        }

        let entry_id = self
            .remote
            .create_entry(calendar_id, stored)
            .await
            .map_err(|e| SyncError::partial(&stored.id, e))?;

        let id = stored.id.clone();
        let (container, entry) = (calendar_id.to_string(), entry_id.clone());
        self.db
            .call(move |conn| {
                queries::set_session_remote_ids(conn, &id, Some(container.as_str()), Some(entry.as_str()))
            })
            .await?;
        debug!(entity_id = %stored.id, %entry_id, "Session mirrored");

        if let Some((old_calendar, old_entry)) = stale_entry {
            if let Err(e) = ignore_missing(self.remote.delete_entry(&old_calendar, &old_entry).await) {
                warn!(
                    entity_id = %stored.id,
                    calendar_id = %old_calendar,
                    entry_id = %old_entry,
                    error = %e,
                    "Failed to remove entry from previous calendar"
                );
            }
        }
        Ok(())
    }
}
