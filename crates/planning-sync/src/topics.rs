//! Topic naming and routing.
//!
//! Topics are named `<domain>.<entity-kind>.<operation>`. The producer fans
//! each (kind, operation) out to one topic per subscribing domain; a
//! consumer maps each inbound topic back to exactly one (kind, operation).

use planning_model::{EntityKind, Operation};
use std::collections::HashMap;

/// Topic carrying service heartbeats.
pub const HEARTBEAT_TOPIC: &str = "controlroom.heartbeat";

pub fn topic_name(domain: &str, kind: EntityKind, operation: Operation) -> String {
    format!("{domain}.{kind}.{}", operation.as_str())
}

/// Outbound fan-out table.
#[derive(Debug, Clone, Default)]
pub struct TopicMap {
    routes: HashMap<(EntityKind, Operation), Vec<String>>,
}

impl TopicMap {
    /// Every operation of events goes to each of `event_domains`, every
    /// operation of sessions to each of `session_domains`.
    pub fn fan_out(event_domains: &[String], session_domains: &[String]) -> Self {
        let mut routes = HashMap::new();
        for (kind, domains) in [
            (EntityKind::Event, event_domains),
            (EntityKind::Session, session_domains),
        ] {
            for operation in Operation::ALL {
                let topics = domains
                    .iter()
                    .map(|domain| topic_name(domain, kind, operation))
                    .collect();
                routes.insert((kind, operation), topics);
            }
        }
        Self { routes }
    }

    /// Topics a message of this kind and operation is published to.
    pub fn topics(&self, kind: EntityKind, operation: Operation) -> &[String] {
        self.routes
            .get(&(kind, operation))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Where an inbound topic's messages are expected to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub kind: EntityKind,
    pub operation: Operation,
}

/// Inbound routing table: one queue per (kind, operation).
#[derive(Debug, Clone)]
pub struct InboundRoutes {
    routes: Vec<(String, Route)>,
}

impl InboundRoutes {
    /// Routes for every kind and operation under `domain`.
    ///
    /// Listed in dependency order, which is also the order a consumer
    /// drains them in: parent writes, then child writes and deletes, then
    /// parent deletes.
    pub fn for_domain(domain: &str) -> Self {
        let order = [
            (EntityKind::Event, Operation::Create),
            (EntityKind::Event, Operation::Update),
            (EntityKind::Session, Operation::Create),
            (EntityKind::Session, Operation::Update),
            (EntityKind::Session, Operation::Delete),
            (EntityKind::Event, Operation::Delete),
        ];
        let routes = order
            .into_iter()
            .map(|(kind, operation)| (topic_name(domain, kind, operation), Route { kind, operation }))
            .collect();
        Self { routes }
    }

    /// Restrict to a single entity kind.
    pub fn only(mut self, kind: EntityKind) -> Self {
        self.routes.retain(|(_, route)| route.kind == kind);
        self
    }

    pub fn topics(&self) -> Vec<String> {
        self.routes.iter().map(|(topic, _)| topic.clone()).collect()
    }

    pub fn route(&self, topic: &str) -> Option<Route> {
        self.routes
            .iter()
            .find(|(name, _)| name == topic)
            .map(|(_, route)| *route)
    }
}
