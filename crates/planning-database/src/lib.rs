//! SQLite persistence for the planning sync services.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Forward-only schema migrations
//! - Parameterized queries for events, sessions and the sync outbox
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let events = db.call(|conn| queries::list_events(conn)).await?;
//! ```
//!
//! Only SQL should run inside `db.call()`; network calls to the message bus
//! or the remote calendar happen outside.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::{NewOutboxEntry, OutboxEntry, OutboxStatus};
