//! Configuration for the planning sync processes.

mod config;
mod error;
mod paths;

pub use config::{
    Config, DEFAULT_CALENDAR_BASE_URL, DEFAULT_CONSUMER_GROUP, DEFAULT_INBOUND_DOMAIN,
    DEFAULT_LOG_LEVEL, DEFAULT_REDIS_URL, DEFAULT_SERVICE_NAME,
};
pub use error::{ConfigError, ConfigResult};
pub use paths::Paths;
