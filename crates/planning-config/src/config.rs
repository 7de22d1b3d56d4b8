//! Process configuration.
//!
//! Values come from built-in defaults, then an optional JSON file, then
//! environment variables. Command-line flags are applied last by the binary.

use crate::{ConfigError, ConfigResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_CALENDAR_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";
pub const DEFAULT_CONSUMER_GROUP: &str = "planning-sync";
pub const DEFAULT_SERVICE_NAME: &str = "planning-sync";
/// Domain prefix of the topics this service consumes.
pub const DEFAULT_INBOUND_DOMAIN: &str = "planning";

/// Runtime configuration shared by every subcommand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Redis connection URL of the message bus.
    pub redis_url: String,
    /// SQLite database file; `None` means the default under the base directory.
    pub database_path: Option<PathBuf>,
    /// Service account key file for the calendar API.
    pub credentials_path: Option<PathBuf>,
    /// User the service account acts for.
    pub impersonated_user: Option<String>,
    pub calendar_base_url: String,
    /// Seconds between producer reconciliation passes.
    pub sync_interval_secs: u64,
    /// Seconds between pull-mode polls.
    pub poll_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub consumer_group: String,
    /// Domains that receive every event change (`<domain>.event.<op>`).
    pub event_subscribers: Vec<String>,
    /// Domains that receive every session change.
    pub session_subscribers: Vec<String>,
    pub inbound_domain: String,
    /// XREADGROUP block timeout in milliseconds.
    pub block_timeout_ms: u64,
    pub max_redeliveries: u32,
    pub requeue_delay_secs: u64,
    pub connect_attempts: u32,
    pub connect_delay_secs: u64,
    pub service_name: String,
    /// Deployment name reported in heartbeats.
    pub environment: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            database_path: None,
            credentials_path: None,
            impersonated_user: None,
            calendar_base_url: DEFAULT_CALENDAR_BASE_URL.to_string(),
            sync_interval_secs: 15,
            poll_interval_secs: 60,
            heartbeat_interval_secs: 1,
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            event_subscribers: vec!["crm".to_string(), "kassa".to_string()],
            session_subscribers: vec!["crm".to_string(), "kassa".to_string()],
            inbound_domain: DEFAULT_INBOUND_DOMAIN.to_string(),
            block_timeout_ms: 5000,
            max_redeliveries: 5,
            requeue_delay_secs: 5,
            connect_attempts: 5,
            connect_delay_secs: 5,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            environment: "development".to_string(),
        }
    }
}

impl Config {
    /// Load from `paths.config_file()` when present, then apply the
    /// process environment.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        Self::load_with_file(&paths.config_file())
    }

    /// Like [`Config::load`] with an explicit config file location.
    pub fn load_with_file(config_path: &Path) -> ConfigResult<Self> {
        let mut config = if config_path.exists() {
            debug!(path = %config_path.display(), "Loading config file");
            Self::load_from_file(config_path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file. Missing keys keep their defaults.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Override settings from environment variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PLANNING_LOG_LEVEL") {
            self.log_level = value;
        }
        if let Some(value) = lookup("REDIS_URL") {
            self.redis_url = value;
        }
        if let Some(value) = lookup("PLANNING_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("GOOGLE_APPLICATION_CREDENTIALS") {
            self.credentials_path = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("IMPERSONATED_USER") {
            self.impersonated_user = Some(value).filter(|v| !v.is_empty());
        }
        if let Some(value) = lookup("PLANNING_CALENDAR_BASE_URL") {
            self.calendar_base_url = value;
        }
        if let Some(value) = lookup("PLANNING_SYNC_INTERVAL_SECS") {
            self.sync_interval_secs = parse_number("PLANNING_SYNC_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = lookup("PLANNING_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = parse_number("PLANNING_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = lookup("PLANNING_HEARTBEAT_INTERVAL_SECS") {
            self.heartbeat_interval_secs =
                parse_number("PLANNING_HEARTBEAT_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = lookup("PLANNING_CONSUMER_GROUP") {
            self.consumer_group = value;
        }
        if let Some(value) = lookup("PLANNING_EVENT_SUBSCRIBERS") {
            self.event_subscribers = split_list(&value);
        }
        if let Some(value) = lookup("PLANNING_SESSION_SUBSCRIBERS") {
            self.session_subscribers = split_list(&value);
        }
        if let Some(value) = lookup("PLANNING_INBOUND_DOMAIN") {
            self.inbound_domain = value;
        }
        if let Some(value) = lookup("PLANNING_MAX_REDELIVERIES") {
            self.max_redeliveries = parse_number("PLANNING_MAX_REDELIVERIES", &value)?;
        }
        if let Some(value) = lookup("PLANNING_ENVIRONMENT") {
            self.environment = value;
        }
        Ok(())
    }

    /// Reject settings the processes cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        Url::parse(&self.redis_url)?;
        Url::parse(&self.calendar_base_url)?;

        for (key, value) in [
            ("sync_interval_secs", self.sync_interval_secs),
            ("poll_interval_secs", self.poll_interval_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
        ] {
            if value == 0 {
                return Err(invalid(key, "0", "interval must be positive"));
            }
        }
        if self.connect_attempts == 0 {
            return Err(invalid("connect_attempts", "0", "at least one attempt is required"));
        }
        if self.inbound_domain.trim().is_empty() {
            return Err(invalid("inbound_domain", &self.inbound_domain, "must not be empty"));
        }
        Ok(())
    }

    /// Database file, defaulting to the one under the base directory.
    pub fn database_path(&self, paths: &Paths) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| paths.database_file())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_secs(self.requeue_delay_secs)
    }

    pub fn connect_delay(&self) -> Duration {
        Duration::from_secs(self.connect_delay_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, value, "expected a non-negative integer"))
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Comma separated list, blanks dropped.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sync_interval(), Duration::from_secs(15));
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(config.event_subscribers, vec!["crm", "kassa"]);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_load_from_file_keeps_missing_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, r#"{ "log_level": "debug", "sync_interval_secs": 30 }"#).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.sync_interval_secs, 30);
        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("REDIS_URL", "redis://bus:6379/2"),
                ("IMPERSONATED_USER", "planner@example.com"),
                ("PLANNING_EVENT_SUBSCRIBERS", "crm, kassa,,frontend"),
                ("PLANNING_POLL_INTERVAL_SECS", "120"),
                ("GOOGLE_APPLICATION_CREDENTIALS", "/secrets/key.json"),
            ]))
            .unwrap();

        assert_eq!(config.redis_url, "redis://bus:6379/2");
        assert_eq!(config.impersonated_user.as_deref(), Some("planner@example.com"));
        assert_eq!(config.event_subscribers, vec!["crm", "kassa", "frontend"]);
        assert_eq!(config.poll_interval_secs, 120);
        assert_eq!(config.credentials_path, Some(PathBuf::from("/secrets/key.json")));
        assert_eq!(config.session_subscribers, vec!["crm", "kassa"]);
    }

    #[test]
    fn test_env_invalid_number() {
        let mut config = Config::default();
        let result = config.apply_env(env(&[("PLANNING_SYNC_INTERVAL_SECS", "soon")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_interval_and_bad_url() {
        let mut config = Config::default();
        config.heartbeat_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.redis_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_database_path_default() {
        let paths = Paths::with_base_dir(PathBuf::from("/srv/planning"));
        let mut config = Config::default();
        assert_eq!(config.database_path(&paths), PathBuf::from("/srv/planning/planning.sqlite"));

        config.database_path = Some(PathBuf::from("/data/sync.db"));
        assert_eq!(config.database_path(&paths), PathBuf::from("/data/sync.db"));
    }
}
