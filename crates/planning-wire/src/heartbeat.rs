//! Liveness document published to the control room.

use crate::xml::XmlBuilder;
use chrono::{DateTime, Utc};
use planning_model::format_timestamp;

/// Heartbeat contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub service_name: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// Seconds between two heartbeats.
    pub interval_secs: u64,
    pub version: String,
    pub host: String,
    pub environment: String,
}

/// Renders a `<Heartbeat>` document.
pub fn encode_heartbeat(heartbeat: &Heartbeat) -> String {
    let mut xml = XmlBuilder::new("Heartbeat");
    xml.leaf("ServiceName", &heartbeat.service_name)
        .leaf("Status", &heartbeat.status)
        .leaf("Timestamp", &format_timestamp(heartbeat.timestamp))
        .leaf("HeartBeatInterval", &heartbeat.interval_secs.to_string())
        .open("Metadata")
        .leaf("Version", &heartbeat.version)
        .leaf("Host", &heartbeat.host)
        .leaf("Environment", &heartbeat.environment)
        .close();
    xml.finish()
}
