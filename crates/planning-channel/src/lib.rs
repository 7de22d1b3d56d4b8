//! Message channel for the planning sync services.
//!
//! Topics map one-to-one onto Redis streams. Producers `XADD` to every topic
//! of a fan-out list; consumers read through a consumer group one message
//! at a time and settle each delivery explicitly:
//!
//! ```text
//! XADD topic ──> stream ──> XREADGROUP COUNT 1 ──> handler
//!                  ^                                  |
//!                  |── XAUTOCLAIM (requeue) <── nack ─┤
//!                  └── XACK <──────────────── ack ────┘
//! ```
//!
//! Delivery is at-least-once; consumers must apply messages idempotently.

mod config;
mod error;
mod streams;

#[cfg(any(test, feature = "memory"))]
pub mod memory;

pub use config::{dead_letter_topic, ChannelConfig};
pub use error::{ChannelError, ChannelResult};
pub use streams::{connect_with_retry, RedisChannel};

use async_trait::async_trait;

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic (stream) the message was read from.
    pub topic: String,
    /// Broker-assigned message id.
    pub delivery_id: String,
    /// Wire document.
    pub payload: String,
    /// How many times this process has been handed the message.
    pub attempts: u32,
}

/// Publishes one payload to a list of topics.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Append `payload` to every topic. Fails if any topic could not be written.
    async fn publish(&self, topics: &[String], payload: &str) -> ChannelResult<()>;
}

/// Consumes deliveries from subscribed topics.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next delivery; `None` when nothing arrived in time.
    async fn next_delivery(&mut self) -> ChannelResult<Option<Delivery>>;

    /// Settle a delivery as processed.
    async fn ack(&mut self, delivery: &Delivery) -> ChannelResult<()>;

    /// Settle a delivery as failed.
    ///
    /// With `requeue` the message is delivered again later; without it the
    /// message goes to the topic's dead-letter stream.
    async fn nack(&mut self, delivery: &Delivery, requeue: bool, reason: &str) -> ChannelResult<()>;

    /// Fetch at most one message from `topic`, acknowledged on receipt.
    async fn pull(&mut self, topic: &str) -> ChannelResult<Option<Delivery>>;

    /// Re-establish the broker connection.
    async fn reconnect(&mut self) -> ChannelResult<()>;
}
