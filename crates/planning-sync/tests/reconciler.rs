mod common;

use common::{
    engine, event, session, session_without_remote_ids, users, without_remote_ids, FakeSource,
};
use planning_channel::memory::MemoryBroker;
use planning_database::{queries, AsyncDatabase};
use planning_model::{EntityMessage, Operation, SyncMessage};
use planning_sync::{
    Dispatcher, InboundRoutes, ManualTicker, PassReport, Reconciler, SyncError, TopicMap,
};
use std::sync::Arc;

fn subscribers(domains: &[&str]) -> Vec<String> {
    domains.iter().map(|d| d.to_string()).collect()
}

async fn producer(
    source: Arc<FakeSource>,
    broker: &MemoryBroker,
    domains: &[&str],
) -> (Reconciler, AsyncDatabase) {
    let db = AsyncDatabase::open_in_memory()
        .await
        .expect("failed to open database");
    let topics = TopicMap::fan_out(&subscribers(domains), &subscribers(domains));
    let reconciler = Reconciler::new(db.clone(), source, Arc::new(broker.clone()), topics);
    (reconciler, db)
}

#[tokio::test]
async fn first_pass_publishes_creates_to_every_subscriber() {
    let broker = MemoryBroker::new();
    let source = FakeSource::new();
    source.set(vec![event("evt-1")], vec![session("ses-1", "evt-1")]);
    let (reconciler, _db) = producer(source, &broker, &["crm", "kassa"]).await;

    let report = reconciler.run_pass().await.unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(report.published, 2);
    assert_eq!(report.pending, 0);

    for topic in ["crm.event.create", "kassa.event.create"] {
        let published = broker.published(topic);
        assert_eq!(published.len(), 1);
        let decoded = planning_wire::decode(&published[0]).unwrap();
        assert_eq!(decoded.operation(), Operation::Create);
        assert_eq!(decoded.entity_id().as_str(), "evt-1");
    }
    assert_eq!(broker.published("crm.session.create").len(), 1);
}

#[tokio::test]
async fn unchanged_snapshot_publishes_nothing() {
    let broker = MemoryBroker::new();
    let source = FakeSource::new();
    source.set(vec![event("evt-1")], vec![session("ses-1", "evt-1")]);
    let (reconciler, _db) = producer(source, &broker, &["crm"]).await;

    reconciler.run_pass().await.unwrap();
    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report, PassReport::default());
    assert_eq!(broker.published("crm.event.create").len(), 1);
    assert!(broker.published("crm.event.update").is_empty());
}

#[tokio::test]
async fn changed_field_publishes_update_with_only_that_field() {
    let broker = MemoryBroker::new();
    let source = FakeSource::new();
    source.set(vec![event("evt-1")], vec![]);
    let (reconciler, _db) = producer(source.clone(), &broker, &["crm"]).await;
    reconciler.run_pass().await.unwrap();

    let mut moved = event("evt-1");
    moved.location = "Campus Dansaert".to_string();
    source.set(vec![moved], vec![]);
    let report = reconciler.run_pass().await.unwrap();
    assert_eq!(report.updated, 1);

    let published = broker.published("crm.event.update");
    assert_eq!(published.len(), 1);
    let SyncMessage::Event(EntityMessage::Update { patch, .. }) =
        planning_wire::decode(&published[0]).unwrap()
    else {
        panic!("expected event update");
    };
    assert_eq!(patch.location.as_deref(), Some("Campus Dansaert"));
    assert!(patch.name.is_none());
    assert!(patch.registered_users.is_none());
}

#[tokio::test]
async fn removed_records_are_deleted_children_first() {
    let broker = MemoryBroker::new();
    let source = FakeSource::new();
    source.set(vec![event("evt-1")], vec![session("ses-1", "evt-1")]);
    let (reconciler, db) = producer(source.clone(), &broker, &["crm"]).await;
    reconciler.run_pass().await.unwrap();

    source.set(vec![], vec![]);
    let report = reconciler.run_pass().await.unwrap();
    assert_eq!(report.deleted, 2);
    assert_eq!(broker.published("crm.session.delete").len(), 1);
    assert_eq!(broker.published("crm.event.delete").len(), 1);

    let events = db.call(|conn| queries::list_events(conn)).await.unwrap();
    assert!(events.is_empty());
}

#[tokio::test]
async fn failed_publish_stays_in_outbox_until_next_pass() {
    let broker = MemoryBroker::new();
    let source = FakeSource::new();
    source.set(vec![event("evt-1")], vec![]);
    let (reconciler, db) = producer(source, &broker, &["crm"]).await;

    broker.fail_next_publishes(1);
    let report = reconciler.run_pass().await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.published, 0);
    assert_eq!(report.pending, 1);
    assert!(broker.published("crm.event.create").is_empty());

    // The state was committed, so the retry is a pure outbox flush.
    let report = reconciler.run_pass().await.unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.published, 1);
    assert_eq!(report.pending, 0);
    assert_eq!(broker.published("crm.event.create").len(), 1);

    let pending = db
        .call(|conn| queries::count_pending_outbox_entries(conn))
        .await
        .unwrap();
    assert_eq!(pending, 0);
}

#[tokio::test]
async fn unreachable_broker_stops_loop_with_changes_kept() {
    let broker = MemoryBroker::new();
    let source = FakeSource::new();
    source.set(vec![event("evt-1")], vec![]);
    let (reconciler, db) = producer(source, &broker, &["crm"]).await;

    broker.set_offline(true);
    // The handle stays alive, so only the error can end the loop.
    let (ticker, handle) = ManualTicker::new();
    handle.tick();
    handle.tick();
    let err = reconciler.run(ticker).await.unwrap_err();
    assert!(matches!(err, SyncError::TransportUnavailable { .. }));

    let events = db.call(|conn| queries::list_events(conn)).await.unwrap();
    assert_eq!(events.len(), 1);
    let pending = db
        .call(|conn| queries::count_pending_outbox_entries(conn))
        .await
        .unwrap();
    assert_eq!(pending, 1);
}

#[tokio::test]
async fn failed_snapshot_leaves_state_untouched() {
    let broker = MemoryBroker::new();
    let source = FakeSource::new();
    source.set(vec![event("evt-1")], vec![]);
    let (reconciler, db) = producer(source.clone(), &broker, &["crm"]).await;

    source.fail_next_fetch();
    assert!(reconciler.run_pass().await.is_err());
    let events = db.call(|conn| queries::list_events(conn)).await.unwrap();
    assert!(events.is_empty());

    reconciler.run(ManualTicker::times(1)).await.unwrap();
    assert_eq!(broker.published("crm.event.create").len(), 1);
}

#[tokio::test]
async fn producer_and_consumer_converge() {
    let broker = MemoryBroker::new();
    let source = FakeSource::new();
    let mut workshop = session("ses-2", "evt-1");
    workshop.guest_speakers = users(&["a@example.com", "b@example.com"]);
    source.set(
        vec![event("evt-1"), event("evt-2")],
        vec![session("ses-1", "evt-1"), workshop],
    );
    let (reconciler, _producer_db) = producer(source.clone(), &broker, &["planning"]).await;

    let routes = InboundRoutes::for_domain("planning");
    let (engine, calendar) = engine().await;
    let consumer_db = engine.database().clone();
    let mut dispatcher = Dispatcher::new(broker.consumer(&routes.topics()), engine, routes);

    reconciler.run_pass().await.unwrap();
    dispatcher.drain().await.unwrap();

    // Second round: move one session, drop the other together with its event.
    let mut moved = session("ses-1", "evt-2");
    moved.registered_users = users(&["carol@example.com"]);
    source.set(vec![event("evt-2")], vec![moved.clone()]);
    reconciler.run_pass().await.unwrap();
    dispatcher.drain().await.unwrap();

    let events: Vec<_> = consumer_db
        .call(|conn| queries::list_events(conn))
        .await
        .unwrap()
        .into_iter()
        .map(without_remote_ids)
        .collect();
    assert_eq!(events, vec![event("evt-2")]);

    let sessions: Vec<_> = consumer_db
        .call(|conn| queries::list_sessions(conn))
        .await
        .unwrap()
        .into_iter()
        .map(session_without_remote_ids)
        .collect();
    assert_eq!(sessions, vec![moved]);

    assert_eq!(calendar.containers().len(), 1);
    let entries = calendar.entries();
    assert_eq!(entries.len(), 1);
    let mirrored = entries.values().next().unwrap();
    assert_eq!(mirrored.registered_users, users(&["carol@example.com"]));
}

#[tokio::test]
async fn pending_outbox_survives_restart() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("producer.sqlite");
    let broker = MemoryBroker::new();
    let source = FakeSource::new();
    source.set(vec![event("evt-1")], vec![session("ses-1", "evt-1")]);
    let topics = TopicMap::fan_out(&subscribers(&["crm"]), &subscribers(&["crm"]));

    {
        let db = AsyncDatabase::open(&path).await.unwrap();
        let reconciler =
            Reconciler::new(db, source.clone(), Arc::new(broker.clone()), topics.clone());
        broker.set_offline(true);
        let err = reconciler.run_pass().await.unwrap_err();
        assert!(matches!(err, SyncError::TransportUnavailable { .. }));
    }

    broker.set_offline(false);
    let db = AsyncDatabase::open(&path).await.unwrap();
    let pending = db
        .call(|conn| queries::count_pending_outbox_entries(conn))
        .await
        .unwrap();
    assert_eq!(pending, 2);
    let reconciler = Reconciler::new(db, source, Arc::new(broker.clone()), topics);
    let flushed = reconciler.flush_outbox().await.unwrap();
    assert_eq!(flushed.published, 2);
    assert!(!flushed.interrupted);
    assert_eq!(broker.published("crm.event.create").len(), 1);
    assert_eq!(broker.published("crm.session.create").len(), 1);
}
