//! Consumer dispatcher.
//!
//! Takes one delivery at a time from a [`MessageSource`], decodes it,
//! checks it against the route of the topic it arrived on, hands it to the
//! [`ApplyEngine`] and settles it:
//!
//! ```text
//! Received -> Decoding -> Applying -> Acknowledged
//!                 \           \
//!                  +-----------+--> Failed -> NegativelyAcknowledged
//! ```
//!
//! A delivery is acknowledged only after the local commit and the remote
//! mirror both succeeded.

use crate::apply::{ApplyEngine, ApplyOutcome};
use crate::error::{Disposition, SyncError, SyncResult};
use crate::ticker::Ticker;
use crate::topics::InboundRoutes;
use planning_channel::{Delivery, MessageSource};
use planning_wire::WireError;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Lifecycle of one delivery inside the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    Decoding,
    Applying,
    Acknowledged,
    Failed,
    NegativelyAcknowledged,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Decoding => "decoding",
            Self::Applying => "applying",
            Self::Acknowledged => "acknowledged",
            Self::Failed => "failed",
            Self::NegativelyAcknowledged => "negatively_acknowledged",
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a handled delivery was settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked(ApplyOutcome),
    Requeued,
    Rejected,
}

fn is_connection_loss(error: &SyncError) -> bool {
    match error {
        SyncError::TransportUnavailable { .. } => true,
        SyncError::Channel(e) => e.is_connection_error(),
        _ => false,
    }
}

pub struct Dispatcher<S> {
    source: S,
    engine: ApplyEngine,
    routes: InboundRoutes,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
}

impl<S: MessageSource> Dispatcher<S> {
    pub fn new(source: S, engine: ApplyEngine, routes: InboundRoutes) -> Self {
        Self {
            source,
            engine,
            routes,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Bound the reconnect loop that follows a lost broker connection.
    pub fn with_reconnect(mut self, attempts: u32, delay: Duration) -> Self {
        self.reconnect_attempts = attempts.max(1);
        self.reconnect_delay = delay;
        self
    }

    pub fn routes(&self) -> &InboundRoutes {
        &self.routes
    }

    /// Consume until the broker is gone for good.
    ///
    /// Returns only with [`SyncError::TransportUnavailable`] once the
    /// reconnect budget is exhausted.
    pub async fn run(&mut self) -> SyncResult<()> {
        info!(topics = ?self.routes.topics(), "Consumer dispatcher started");

        loop {
            match self.process_one().await {
                Ok(Some(_)) => {}
                Ok(None) => debug!("No deliveries available, continuing to poll..."),
                Err(e) if is_connection_loss(&e) => {
                    warn!(error = %e, "Broker connection lost, reconnecting...");
                    self.reconnect().await?;
                }
                Err(e) => {
                    error!(error = %e, "Error processing delivery");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Handle deliveries until none is immediately available.
    pub async fn drain(&mut self) -> SyncResult<usize> {
        let mut handled = 0;
        while self.process_one().await?.is_some() {
            handled += 1;
        }
        Ok(handled)
    }

    /// Take and settle at most one delivery; `None` when nothing arrived.
    pub async fn process_one(&mut self) -> SyncResult<Option<Settlement>> {
        let Some(delivery) = self.source.next_delivery().await? else {
            return Ok(None);
        };
        self.handle(&delivery).await.map(Some)
    }

    /// Settle one delivery. Errors returned here come from the broker only;
    /// decode and apply failures are settled with a nack.
    pub async fn handle(&mut self, delivery: &Delivery) -> SyncResult<Settlement> {
        self.transition(delivery, DeliveryState::Received);

        match self.process(delivery).await {
            Ok(outcome) => {
                self.source.ack(delivery).await?;
                self.transition(delivery, DeliveryState::Acknowledged);
                Ok(Settlement::Acked(outcome))
            }
            Err(e) => {
                let disposition = e.disposition();
                warn!(
                    topic = %delivery.topic,
                    delivery_id = %delivery.delivery_id,
                    attempts = delivery.attempts,
                    state = %DeliveryState::Failed,
                    ?disposition,
                    error = %e,
                    "Delivery failed"
                );

                let requeue = disposition == Disposition::Requeue;
                self.source.nack(delivery, requeue, &e.to_string()).await?;
                self.transition(delivery, DeliveryState::NegativelyAcknowledged);
                Ok(if requeue {
                    Settlement::Requeued
                } else {
                    Settlement::Rejected
                })
            }
        }
    }

    /// Pull-mode pass: fetch at most one message from every routed topic.
    ///
    /// Pulled messages are acknowledged on receipt, so failures are only
    /// logged. Returns how many messages were fetched.
    pub async fn poll_once(&mut self) -> SyncResult<usize> {
        let mut fetched = 0;

        for topic in self.routes.topics() {
            let Some(delivery) = self.source.pull(&topic).await? else {
                continue;
            };
            fetched += 1;

            match self.process(&delivery).await {
                Ok(outcome) => info!(
                    topic = %delivery.topic,
                    delivery_id = %delivery.delivery_id,
                    ?outcome,
                    "Polled message applied"
                ),
                Err(e) => warn!(
                    topic = %delivery.topic,
                    delivery_id = %delivery.delivery_id,
                    error = %e,
                    "Polled message dropped"
                ),
            }
        }

        Ok(fetched)
    }

    /// Run [`poll_once`](Self::poll_once) on every tick.
    pub async fn run_polling<T: Ticker>(&mut self, mut ticker: T) -> SyncResult<()> {
        info!(topics = ?self.routes.topics(), "Poller started");

        while ticker.tick().await {
            match self.poll_once().await {
                Ok(fetched) => debug!(fetched, "Poll pass complete"),
                Err(e) if is_connection_loss(&e) => {
                    warn!(error = %e, "Broker connection lost, reconnecting...");
                    self.reconnect().await?;
                }
                Err(e) => error!(error = %e, "Poll pass failed"),
            }
        }
        Ok(())
    }

    async fn process(&self, delivery: &Delivery) -> SyncResult<ApplyOutcome> {
        self.transition(delivery, DeliveryState::Decoding);
        let route = self.routes.route(&delivery.topic).ok_or_else(|| {
            SyncError::SchemaViolation(WireError::SchemaViolation {
                element: delivery.topic.clone(),
                reason: "topic has no route".to_string(),
            })
        })?;

        let message = planning_wire::decode(&delivery.payload)?;
        if message.kind() != route.kind || message.operation() != route.operation {
            return Err(SyncError::SchemaViolation(WireError::SchemaViolation {
                element: delivery.topic.clone(),
                reason: format!(
                    "{} {} message on a {} {} topic",
                    message.kind(),
                    message.operation(),
                    route.kind,
                    route.operation
                ),
            }));
        }

        self.transition(delivery, DeliveryState::Applying);
        debug!(
            topic = %delivery.topic,
            entity_id = %message.entity_id(),
            "Applying message"
        );
        self.engine.apply(&message).await
    }

    async fn reconnect(&mut self) -> SyncResult<()> {
        let mut last_error = String::new();

        for attempt in 1..=self.reconnect_attempts {
            match self.source.reconnect().await {
                Ok(()) => {
                    info!(attempt, "Reconnected to broker");
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        attempt,
                        max_attempts = self.reconnect_attempts,
                        error = %e,
                        "Failed to reconnect, retrying..."
                    );
                    if attempt < self.reconnect_attempts {
                        tokio::time::sleep(self.reconnect_delay).await;
                    }
                }
            }
        }

        error!(attempts = self.reconnect_attempts, "Giving up on broker connection");
        Err(SyncError::TransportUnavailable {
            attempts: self.reconnect_attempts,
            reason: last_error,
        })
    }

    fn transition(&self, delivery: &Delivery, state: DeliveryState) {
        match state {
            DeliveryState::Acknowledged | DeliveryState::NegativelyAcknowledged => info!(
                topic = %delivery.topic,
                delivery_id = %delivery.delivery_id,
                state = %state,
                "Delivery settled"
            ),
            _ => debug!(
                topic = %delivery.topic,
                delivery_id = %delivery.delivery_id,
                state = %state,
                "Delivery state changed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(DeliveryState::Received.to_string(), "received");
        assert_eq!(
            DeliveryState::NegativelyAcknowledged.to_string(),
            "negatively_acknowledged"
        );
    }

    #[test]
    fn test_connection_loss() {
        assert!(is_connection_loss(&SyncError::TransportUnavailable {
            attempts: 1,
            reason: "refused".to_string()
        }));
        assert!(!is_connection_loss(&SyncError::DependencyNotReady(
            "event e".to_string()
        )));
    }
}
