//! Liveness heartbeat.

use crate::error::SyncResult;
use crate::ticker::Ticker;
use crate::topics::HEARTBEAT_TOPIC;
use chrono::{DateTime, Utc};
use planning_channel::MessagePublisher;
use planning_wire::{encode_heartbeat, Heartbeat};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const STATUS_ONLINE: &str = "Online";

/// Publishes a heartbeat document to the control room on every tick.
pub struct HeartbeatPublisher {
    publisher: Arc<dyn MessagePublisher>,
    topics: Vec<String>,
    service_name: String,
    version: String,
    host: String,
    environment: String,
    interval: Duration,
}

impl HeartbeatPublisher {
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        service_name: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            publisher,
            topics: vec![HEARTBEAT_TOPIC.to_string()],
            service_name: service_name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            environment: "development".to_string(),
            interval,
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn heartbeat(&self, now: DateTime<Utc>) -> Heartbeat {
        Heartbeat {
            service_name: self.service_name.clone(),
            status: STATUS_ONLINE.to_string(),
            timestamp: now,
            interval_secs: self.interval.as_secs(),
            version: self.version.clone(),
            host: self.host.clone(),
            environment: self.environment.clone(),
        }
    }

    pub async fn publish_once(&self) -> SyncResult<()> {
        let payload = encode_heartbeat(&self.heartbeat(Utc::now()));
        self.publisher.publish(&self.topics, &payload).await?;
        debug!(service = %self.service_name, "Heartbeat published");
        Ok(())
    }

    /// Publish on every tick; a failed heartbeat is logged and skipped.
    /// Returns early with the error once the broker is unreachable.
    pub async fn run<T: Ticker>(&self, mut ticker: T) -> SyncResult<()> {
        info!(
            service = %self.service_name,
            interval_secs = self.interval.as_secs(),
            "Heartbeat started"
        );
        while ticker.tick().await {
            match self.publish_once().await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Broker unavailable, stopping heartbeat");
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "Failed to publish heartbeat"),
            }
        }
        Ok(())
    }
}
