//! Remote calendar integration for planning sync.
//!
//! Consumers mirror events as calendars and sessions as calendar entries
//! through [`RemoteCalendar`]; the producer snapshots the authoritative
//! calendar state through [`SnapshotSource`]. [`GoogleCalendarClient`]
//! implements both against the Google Calendar v3 REST API.

mod auth;
mod error;
mod google;
pub mod mapping;
mod remote;

pub use auth::{ServiceAccountAuth, ServiceAccountKey, TokenSource, CALENDAR_SCOPE};
pub use error::{CalendarError, CalendarResult};
pub use google::{GoogleCalendarClient, DEFAULT_BASE_URL};
pub use remote::{RemoteCalendar, SnapshotSource};
