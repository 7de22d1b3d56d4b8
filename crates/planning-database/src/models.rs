//! Row types that are not plain model records.

use chrono::{DateTime, Utc};
use planning_model::{EntityId, EntityKind, Operation};
use serde::{Deserialize, Serialize};

/// Outbox row status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    #[default]
    Pending,
    Published,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "published" => Self::Published,
            _ => Self::Pending,
        }
    }
}

/// A message written in the same transaction as the change it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub id: i64,
    pub entity_kind: EntityKind,
    pub entity_id: EntityId,
    pub operation: Operation,
    /// Fan-out topics for this message.
    pub topics: Vec<String>,
    /// Encoded wire document.
    pub payload: String,
    pub status: OutboxStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// New outbox row for insertion.
#[derive(Debug, Clone)]
pub struct NewOutboxEntry {
    pub entity_kind: EntityKind,
    pub entity_id: EntityId,
    pub operation: Operation,
    pub topics: Vec<String>,
    pub payload: String,
}
