//! Channel configuration.

use std::time::Duration;

/// Redis Streams channel settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Redis connection URL
    pub redis_url: String,

    /// Consumer group shared by every consumer of one service
    pub consumer_group: String,

    /// Consumer name (unique per process)
    pub consumer_name: String,

    /// XREADGROUP block timeout in milliseconds
    pub block_timeout_ms: u64,

    /// Approximate per-stream length cap applied on XADD
    pub stream_max_len: usize,

    /// Idle time after which a requeued message is claimed again
    pub requeue_delay: Duration,

    /// Deliveries of one message before it is dead-lettered
    pub max_redeliveries: u32,

    /// Connection attempts before giving up
    pub connect_attempts: u32,

    /// Fixed delay between connection attempts
    pub connect_delay: Duration,
}

impl ChannelConfig {
    /// Settings for `redis_url` with default tuning.
    pub fn new(redis_url: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        let consumer_group = consumer_group.into();
        Self {
            redis_url: redis_url.into(),
            consumer_name: format!("{}-{}", consumer_group, uuid::Uuid::new_v4()),
            consumer_group,
            block_timeout_ms: 5000,
            stream_max_len: 10_000,
            requeue_delay: Duration::from_secs(5),
            max_redeliveries: 5,
            connect_attempts: 5,
            connect_delay: Duration::from_secs(5),
        }
    }
}

/// Stream holding rejected messages of `topic`.
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}.dead-letter")
}
