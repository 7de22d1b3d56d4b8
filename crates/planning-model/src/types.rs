//! Identifier, kind, operation and capacity types.

use crate::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::str::FromStr;

/// Opaque entity identifier.
///
/// Upstream systems sometimes use a creation timestamp as the identifier, so
/// the value is carried verbatim and never parsed.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Returns the entity ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The two kinds of synchronized records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Event,
    Session,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Session => "session",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ModelError;

    fn from_str(s: &str) -> ModelResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "event" => Ok(Self::Event),
            "session" => Ok(Self::Session),
            other => Err(ModelError::UnknownKind(other.to_string())),
        }
    }
}

/// Operation carried by a sync message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// All operations in causal order.
    pub const ALL: [Operation; 3] = [Operation::Create, Operation::Update, Operation::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ModelError;

    fn from_str(s: &str) -> ModelResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" | "created" => Ok(Self::Create),
            "update" | "updated" => Ok(Self::Update),
            "delete" | "deleted" => Ok(Self::Delete),
            other => Err(ModelError::UnknownOperation(other.to_string())),
        }
    }
}

/// Strictly positive seat capacity.
///
/// There is no default: a missing or zero capacity is a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Capacity(NonZeroU32);

impl Capacity {
    /// Validates a raw integer capacity.
    pub fn new(value: i64) -> ModelResult<Self> {
        u32::try_from(value)
            .ok()
            .and_then(NonZeroU32::new)
            .map(Self)
            .ok_or_else(|| ModelError::InvalidCapacity(value.to_string()))
    }

    /// Parses capacity text such as `"120"`.
    pub fn parse(text: &str) -> ModelResult<Self> {
        let value: i64 = text
            .trim()
            .parse()
            .map_err(|_| ModelError::InvalidCapacity(text.to_string()))?;
        Self::new(value)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl TryFrom<i64> for Capacity {
    type Error = ModelError;

    fn try_from(value: i64) -> ModelResult<Self> {
        Self::new(value)
    }
}

impl From<Capacity> for i64 {
    fn from(capacity: Capacity) -> Self {
        i64::from(capacity.get())
    }
}

impl std::fmt::Display for Capacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A synchronized record with a stable identity.
pub trait Entity {
    /// Kind of this record.
    const KIND: EntityKind;

    /// Identifier used as the idempotency key.
    fn id(&self) -> &EntityId;
}
