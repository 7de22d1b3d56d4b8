//! Synchronization engine for planning events and sessions.
//!
//! Producer side:
//! - [`detector`] compares two versions of a record
//! - [`Reconciler`] diffs the authoritative snapshot against the last known
//!   state and publishes the delta through a transactional outbox
//!
//! Consumer side:
//! - [`Dispatcher`] settles deliveries one at a time
//! - [`ApplyEngine`] applies decoded messages idempotently to SQLite and the
//!   remote calendar
//!
//! Loops run on a [`Ticker`]; [`HeartbeatPublisher`] reports liveness.

mod apply;
pub mod detector;
mod dispatcher;
mod error;
mod heartbeat;
mod reconciler;
mod ticker;
mod topics;

pub use apply::{ApplyEngine, ApplyOutcome};
pub use detector::{detect, Change, Tracked};
pub use dispatcher::{DeliveryState, Dispatcher, Settlement};
pub use error::{Disposition, SyncError, SyncResult};
pub use heartbeat::HeartbeatPublisher;
pub use reconciler::{
    plan_pass, FlushReport, LocalWrite, PassReport, Plan, PlannedChange, Reconciler, Snapshot,
};
pub use ticker::{IntervalTicker, ManualTicker, TickHandle, Ticker};
pub use topics::{topic_name, InboundRoutes, Route, TopicMap, HEARTBEAT_TOPIC};
