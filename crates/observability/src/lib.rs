//! # Observability
//!
//! Logging setup for the planning sync processes. Each process calls
//! [`init_with_config`] once at startup and logs through the `tracing`
//! macros.
//!
//! Events are written as JSON lines to a log file (by default
//! `~/.planning-sync/logs/<service>.jsonl`) and optionally in compact form
//! to stderr. `RUST_LOG` overrides the configured default level.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "planning-producer".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! })?;
//! ```

mod json_layer;
mod writer;

use json_layer::JsonLayer;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use writer::LogFileWriter;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the process, included in every log line.
    pub service_name: String,

    /// Default filter (e.g. "info", "planning_sync=debug").
    /// `RUST_LOG` takes precedence when set.
    pub default_level: String,

    /// Log file; defaults to `~/.planning-sync/logs/<service>.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit human-readable logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "planning-sync".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

impl LogConfig {
    /// Log file this configuration writes to.
    pub fn resolved_log_path(&self) -> PathBuf {
        self.log_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(".planning-sync")
                .join("logs")
                .join(format!("{}.jsonl", self.service_name))
        })
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize logging with default settings for `service_name`.
pub fn init(service_name: &str) -> io::Result<()> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Install the global subscriber.
///
/// Fails when the log file cannot be opened or a global subscriber is
/// already installed.
pub fn init_with_config(config: LogConfig) -> io::Result<()> {
    let log_path = config.resolved_log_path();
    let writer = LogFileWriter::new(&log_path)?;

    let json_layer = JsonLayer::new(config.service_name.clone(), writer)
        .with_filter(env_filter(&config.default_level));

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        log_path = %log_path.display(),
        "observability initialized"
    );
    Ok(())
}

pub use tracing::{debug, error, info, instrument, trace, warn};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "planning-sync");
        assert_eq!(config.default_level, "info");
        assert!(!config.also_stderr);
        assert!(config
            .resolved_log_path()
            .ends_with(".planning-sync/logs/planning-sync.jsonl"));
    }

    #[test]
    fn test_explicit_log_path() {
        let config = LogConfig {
            log_path: Some(PathBuf::from("/tmp/sync.jsonl")),
            ..Default::default()
        };
        assert_eq!(config.resolved_log_path(), PathBuf::from("/tmp/sync.jsonl"));
    }
}
