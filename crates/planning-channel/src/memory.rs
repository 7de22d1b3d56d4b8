//! In-process broker with the same delivery semantics as the Redis channel.
//!
//! Every topic is a queue; a delivered message stays unacknowledged until it
//! is acked, requeued (appended to the back of its queue) or dead-lettered.

use crate::config::dead_letter_topic;
use crate::error::{ChannelError, ChannelResult};
use crate::{Delivery, MessagePublisher, MessageSource};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    payload: String,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct BrokerState {
    ready: HashMap<String, VecDeque<StoredMessage>>,
    unacked: HashMap<(String, String), StoredMessage>,
    published: HashMap<String, Vec<String>>,
    next_id: u64,
    failing_publishes: u32,
    offline: bool,
}

impl BrokerState {
    fn push(&mut self, topic: &str, payload: &str) {
        self.next_id += 1;
        let message = StoredMessage {
            id: format!("{}-0", self.next_id),
            payload: payload.to_string(),
            deliveries: 0,
        };
        self.ready.entry(topic.to_string()).or_default().push_back(message);
        self.published
            .entry(topic.to_string())
            .or_default()
            .push(payload.to_string());
    }
}

/// Shared in-memory broker. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A consumer subscribed to `topics`, polled in the given order.
    pub fn consumer(&self, topics: &[String]) -> MemoryConsumer {
        MemoryConsumer {
            broker: self.clone(),
            topics: topics.to_vec(),
            max_redeliveries: 5,
            idle_wait: Duration::from_millis(0),
        }
    }

    /// Every payload ever published to `topic`, in order.
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.state.lock().published.get(topic).cloned().unwrap_or_default()
    }

    /// Payloads currently held in the dead-letter stream of `topic`.
    pub fn dead_letters(&self, topic: &str) -> Vec<String> {
        self.state
            .lock()
            .ready
            .get(&dead_letter_topic(topic))
            .map(|queue| queue.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Messages of `topic` not yet acknowledged (queued or in flight).
    pub fn pending(&self, topic: &str) -> usize {
        let state = self.state.lock();
        let queued = state.ready.get(topic).map_or(0, VecDeque::len);
        let in_flight = state.unacked.keys().filter(|(t, _)| t == topic).count();
        queued + in_flight
    }

    /// Make the next `count` publish calls fail with a command error; the
    /// connection itself stays up.
    pub fn fail_next_publishes(&self, count: u32) {
        self.state.lock().failing_publishes = count;
    }

    /// Simulate the broker going away (or coming back).
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    fn unavailable() -> ChannelError {
        ChannelError::TransportUnavailable {
            attempts: 1,
            reason: "in-memory broker offline".to_string(),
        }
    }
}

#[async_trait]
impl MessagePublisher for MemoryBroker {
    async fn publish(&self, topics: &[String], payload: &str) -> ChannelResult<()> {
        let mut state = self.state.lock();
        if state.offline {
            return Err(Self::unavailable());
        }
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(ChannelError::Redis(redis::RedisError::from((
                redis::ErrorKind::ResponseError,
                "injected publish failure",
            ))));
        }
        for topic in topics {
            state.push(topic, payload);
        }
        Ok(())
    }
}

/// Consumer half of [`MemoryBroker`].
pub struct MemoryConsumer {
    broker: MemoryBroker,
    topics: Vec<String>,
    max_redeliveries: u32,
    idle_wait: Duration,
}

impl MemoryConsumer {
    pub fn with_max_redeliveries(mut self, max_redeliveries: u32) -> Self {
        self.max_redeliveries = max_redeliveries;
        self
    }

    /// Sleep this long when no message is ready, like a blocking read would.
    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    fn take_next(&self) -> ChannelResult<Option<Delivery>> {
        let mut state = self.broker.state.lock();
        if state.offline {
            return Err(MemoryBroker::unavailable());
        }

        for topic in &self.topics {
            while let Some(mut message) = state.ready.get_mut(topic).and_then(VecDeque::pop_front) {
                message.deliveries += 1;
                if message.deliveries > self.max_redeliveries {
                    state.push(&dead_letter_topic(topic), &message.payload);
                    continue;
                }
                let delivery = Delivery {
                    topic: topic.clone(),
                    delivery_id: message.id.clone(),
                    payload: message.payload.clone(),
                    attempts: message.deliveries,
                };
                state.unacked.insert((topic.clone(), message.id.clone()), message);
                return Ok(Some(delivery));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl MessageSource for MemoryConsumer {
    async fn next_delivery(&mut self) -> ChannelResult<Option<Delivery>> {
        let delivery = self.take_next()?;
        if delivery.is_none() && !self.idle_wait.is_zero() {
            tokio::time::sleep(self.idle_wait).await;
        }
        Ok(delivery)
    }

    async fn ack(&mut self, delivery: &Delivery) -> ChannelResult<()> {
        let mut state = self.broker.state.lock();
        state
            .unacked
            .remove(&(delivery.topic.clone(), delivery.delivery_id.clone()));
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery, requeue: bool, _reason: &str) -> ChannelResult<()> {
        let mut state = self.broker.state.lock();
        let key = (delivery.topic.clone(), delivery.delivery_id.clone());
        let Some(message) = state.unacked.remove(&key) else {
            return Ok(());
        };
        if requeue {
            state.ready.entry(delivery.topic.clone()).or_default().push_back(message);
        } else {
            state.push(&dead_letter_topic(&delivery.topic), &message.payload);
        }
        Ok(())
    }

    async fn pull(&mut self, topic: &str) -> ChannelResult<Option<Delivery>> {
        let mut state = self.broker.state.lock();
        if state.offline {
            return Err(MemoryBroker::unavailable());
        }
        Ok(state
            .ready
            .get_mut(topic)
            .and_then(VecDeque::pop_front)
            .map(|message| Delivery {
                topic: topic.to_string(),
                delivery_id: message.id,
                payload: message.payload,
                attempts: message.deliveries + 1,
            }))
    }

    async fn reconnect(&mut self) -> ChannelResult<()> {
        if self.broker.state.lock().offline {
            return Err(MemoryBroker::unavailable());
        }
        Ok(())
    }
}
