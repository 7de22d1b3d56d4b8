//! Shared record types for the planning sync services.
//!
//! Events and sessions are modelled as closed records with one patch type
//! each. A patch carries `Some` for every changed field; collections inside a
//! patch are always full replacement sets.

mod error;
mod event;
mod message;
mod session;
mod timestamp;
mod types;

pub use error::{ModelError, ModelResult};
pub use event::{EventField, EventPatch, EventRecord};
pub use message::{EntityMessage, EventMessage, SessionMessage, SyncMessage};
pub use session::{SessionField, SessionPatch, SessionRecord};
pub use timestamp::{format_timestamp, parse_timestamp, truncate_millis};
pub use types::{Capacity, Entity, EntityId, EntityKind, Operation};
