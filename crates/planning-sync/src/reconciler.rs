//! Producer reconciliation loop.
//!
//! Each pass compares the authoritative snapshot with the last state the
//! producer recorded, writes the new state together with one outbox row
//! per outbound message in a single transaction, then publishes the
//! outbox. Rows that fail to publish stay pending and go out first on the
//! next pass.

use crate::detector::{detect, Change, Tracked};
use crate::error::{SyncError, SyncResult};
use crate::ticker::Ticker;
use crate::topics::TopicMap;
use calendar_client::SnapshotSource;
use chrono::{DateTime, Utc};
use planning_channel::MessagePublisher;
use planning_database::{queries, AsyncDatabase, NewOutboxEntry};
use planning_model::{
    Entity, EntityId, EntityMessage, EventRecord, Operation, SessionRecord, SyncMessage,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const OUTBOX_BATCH: usize = 100;

/// Authoritative state at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub events: Vec<EventRecord>,
    pub sessions: Vec<SessionRecord>,
}

/// Local write that accompanies an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalWrite {
    UpsertEvent(EventRecord),
    DeleteEvent(EntityId),
    UpsertSession(SessionRecord),
    DeleteSession(EntityId),
}

/// One detected change: what to store and what to announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub write: LocalWrite,
    pub message: SyncMessage,
}

/// Ordered changes of one pass: parents are written before their children
/// and children deleted before their parents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub changes: Vec<PlannedChange>,
    /// Sessions left out because their event is not part of the snapshot.
    pub skipped_sessions: usize,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.changes
            .iter()
            .filter(|change| change.message.operation() == operation)
            .count()
    }
}

/// Changes of one entity kind, split by the order they must be applied in.
struct KindChanges {
    upserts: Vec<PlannedChange>,
    deletes: Vec<PlannedChange>,
}

fn by_id<T: Entity + Clone>(records: &[T]) -> BTreeMap<EntityId, T> {
    records
        .iter()
        .map(|record| (record.id().clone(), record.clone()))
        .collect()
}

fn diff_kind<T, W, M>(
    stored: &[T],
    current: &[T],
    at: DateTime<Utc>,
    upsert: W,
    delete: fn(EntityId) -> LocalWrite,
    wrap: M,
) -> KindChanges
where
    T: Tracked,
    W: Fn(T) -> LocalWrite,
    M: Fn(EntityMessage<T, T::Patch>) -> SyncMessage,
{
    let previous = by_id(stored);
    let current = by_id(current);
    let mut upserts = Vec::new();
    let mut deletes = Vec::new();

    for (id, record) in &current {
        let change = detect(previous.get(id), Some(record));
        if let Some(message) = change.to_message(at) {
            upserts.push(PlannedChange {
                write: upsert(record.clone()),
                message: wrap(message),
            });
        }
    }
    for (id, record) in &previous {
        if current.contains_key(id) {
            continue;
        }
        let change: Change<T> = detect(Some(record), None);
        if let Some(message) = change.to_message(at) {
            deletes.push(PlannedChange {
                write: delete(id.clone()),
                message: wrap(message),
            });
        }
    }

    KindChanges { upserts, deletes }
}

/// Decide what changed between the stored state and `snapshot`.
pub fn plan_pass(
    snapshot: &Snapshot,
    stored_events: &[EventRecord],
    stored_sessions: &[SessionRecord],
    at: DateTime<Utc>,
) -> Plan {
    let events: Vec<EventRecord> = snapshot
        .events
        .iter()
        .cloned()
        .map(EventRecord::normalized)
        .collect();
    let known_events: BTreeSet<&EntityId> = events.iter().map(|event| &event.id).collect();

    let mut skipped_sessions = 0;
    let sessions: Vec<SessionRecord> = snapshot
        .sessions
        .iter()
        .filter(|session| {
            let known = known_events.contains(&session.event_id);
            if !known {
                warn!(
                    entity_id = %session.id,
                    event_id = %session.event_id,
                    "Skipping session whose event is not in the snapshot"
                );
                skipped_sessions += 1;
            }
            known
        })
        .cloned()
        .map(SessionRecord::normalized)
        .collect();

    let event_changes = diff_kind(
        stored_events,
        &events,
        at,
        LocalWrite::UpsertEvent,
        LocalWrite::DeleteEvent,
        SyncMessage::Event,
    );
    let session_changes = diff_kind(
        stored_sessions,
        &sessions,
        at,
        LocalWrite::UpsertSession,
        LocalWrite::DeleteSession,
        SyncMessage::Session,
    );

    let mut changes = event_changes.upserts;
    changes.extend(session_changes.upserts);
    changes.extend(session_changes.deletes);
    changes.extend(event_changes.deletes);

    Plan {
        changes,
        skipped_sessions,
    }
}

/// Counters of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub published: usize,
    /// Outbox rows still waiting after the pass.
    pub pending: usize,
}

/// Outcome of draining the outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub published: usize,
    /// Publishing stopped at a failing row.
    pub interrupted: bool,
}

/// Producer: snapshot, diff, store with outbox, publish.
pub struct Reconciler {
    db: AsyncDatabase,
    source: Arc<dyn SnapshotSource>,
    publisher: Arc<dyn MessagePublisher>,
    topics: TopicMap,
}

impl Reconciler {
    pub fn new(
        db: AsyncDatabase,
        source: Arc<dyn SnapshotSource>,
        publisher: Arc<dyn MessagePublisher>,
        topics: TopicMap,
    ) -> Self {
        Self {
            db,
            source,
            publisher,
            topics,
        }
    }

    /// Run passes on every tick until the ticker ends. Failed passes are
    /// logged and the next tick tries again, except when the broker is
    /// unreachable: that error is returned.
    pub async fn run<T: Ticker>(&self, mut ticker: T) -> SyncResult<()> {
        info!("Reconciliation loop started");
        while ticker.tick().await {
            match self.run_pass().await {
                Ok(report) if report == PassReport::default() => {
                    debug!("Reconciliation pass found no changes");
                }
                Ok(report) => {
                    info!(
                        created = report.created,
                        updated = report.updated,
                        deleted = report.deleted,
                        skipped = report.skipped,
                        published = report.published,
                        pending = report.pending,
                        "Reconciliation pass complete"
                    );
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Broker unavailable, stopping reconciliation loop");
                    return Err(e);
                }
                Err(e) => error!(error = %e, "Reconciliation pass failed"),
            }
        }
        info!("Reconciliation loop stopped");
        Ok(())
    }

    /// One full pass.
    pub async fn run_pass(&self) -> SyncResult<PassReport> {
        // Leftovers from a previous pass go out before anything newer.
        let mut published = self.flush_outbox().await?.published;

        let events = self.source.fetch_events().await?;
        let sessions = self.source.fetch_sessions(&events).await?;
        let snapshot = Snapshot { events, sessions };

        let (stored_events, stored_sessions) = self
            .db
            .call(|conn| Ok((queries::list_events(conn)?, queries::list_sessions(conn)?)))
            .await?;

        let plan = plan_pass(&snapshot, &stored_events, &stored_sessions, Utc::now());
        let mut report = PassReport {
            created: plan.count(Operation::Create),
            updated: plan.count(Operation::Update),
            deleted: plan.count(Operation::Delete),
            skipped: plan.skipped_sessions,
            ..Default::default()
        };

        if !plan.is_empty() {
            self.commit(plan).await?;
            published += self.flush_outbox().await?.published;
        }

        report.published = published;
        report.pending = self
            .db
            .call(|conn| queries::count_pending_outbox_entries(conn))
            .await? as usize;
        Ok(report)
    }

    /// Store the new state and queue its messages atomically.
    async fn commit(&self, plan: Plan) -> SyncResult<()> {
        let rows: Vec<(LocalWrite, NewOutboxEntry)> = plan
            .changes
            .into_iter()
            .map(|change| {
                let kind = change.message.kind();
                let operation = change.message.operation();
                let entry = NewOutboxEntry {
                    entity_kind: kind,
                    entity_id: change.message.entity_id().clone(),
                    operation,
                    topics: self.topics.topics(kind, operation).to_vec(),
                    payload: planning_wire::encode(&change.message),
                };
                (change.write, entry)
            })
            .collect();
        let count = rows.len();

        self.db
            .transaction(move |tx| {
                for (write, entry) in &rows {
                    match write {
                        LocalWrite::UpsertEvent(event) => queries::upsert_event(tx, event)?,
                        LocalWrite::DeleteEvent(id) => {
                            queries::delete_event(tx, id)?;
                        }
                        LocalWrite::UpsertSession(session) => queries::upsert_session(tx, session)?,
                        LocalWrite::DeleteSession(id) => {
                            queries::delete_session(tx, id)?;
                        }
                    }
                    queries::insert_outbox_entry(tx, entry)?;
                }
                Ok(())
            })
            .await?;

        debug!(count, "Committed changes with outbox rows");
        Ok(())
    }

    /// Publish pending outbox rows in order, stopping at the first failure
    /// so per-entity ordering is preserved.
    ///
    /// The failing row stays pending either way; a lost broker is returned
    /// as [`SyncError::TransportUnavailable`].
    pub async fn flush_outbox(&self) -> SyncResult<FlushReport> {
        let mut report = FlushReport::default();

        loop {
            let batch = self
                .db
                .call(|conn| queries::get_pending_outbox_entries(conn, OUTBOX_BATCH))
                .await?;
            if batch.is_empty() {
                return Ok(report);
            }

            for entry in batch {
                match self.publisher.publish(&entry.topics, &entry.payload).await {
                    Ok(()) => {
                        self.db
                            .call(move |conn| queries::mark_outbox_entry_published(conn, entry.id))
                            .await?;
                        debug!(
                            outbox_id = entry.id,
                            entity_kind = %entry.entity_kind,
                            entity_id = %entry.entity_id,
                            operation = %entry.operation,
                            "Published outbox entry"
                        );
                        report.published += 1;
                    }
                    Err(e) => {
                        let e = SyncError::from(e);
                        warn!(
                            outbox_id = entry.id,
                            entity_id = %entry.entity_id,
                            error = %e,
                            "Failed to publish outbox entry, will retry next pass"
                        );
                        let message = e.to_string();
                        self.db
                            .call(move |conn| {
                                queries::mark_outbox_entry_failed(conn, entry.id, &message)
                            })
                            .await?;
                        if e.is_fatal() {
                            return Err(e);
                        }
                        report.interrupted = true;
                        return Ok(report);
                    }
                }
            }
        }
    }
}
