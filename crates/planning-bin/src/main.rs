//! planning-sync binary entry point.
//!
//! Usage: planning-sync [--config <file>] <producer|consumer|poll|heartbeat>
//!
//! Settings come from the config file (default
//! `~/.planning-sync/config.json`), then the environment, then the flags
//! given here.

use anyhow::Context;
use calendar_client::GoogleCalendarClient;
use clap::{Parser, Subcommand, ValueEnum};
use planning_channel::{connect_with_retry, ChannelConfig, RedisChannel};
use planning_config::{Config, Paths};
use planning_database::AsyncDatabase;
use planning_model::EntityKind;
use planning_sync::{
    ApplyEngine, Dispatcher, HeartbeatPublisher, InboundRoutes, IntervalTicker, Reconciler,
    TopicMap,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Planning sync: keeps events and sessions in step across services.
#[derive(Parser, Debug)]
#[command(name = "planning-sync")]
#[command(about = "Synchronize planning events and sessions over a message bus")]
struct Cli {
    /// Config file (JSON).
    #[arg(long, env = "PLANNING_CONFIG")]
    config: Option<PathBuf>,

    /// Redis connection URL.
    #[arg(long)]
    redis_url: Option<String>,

    /// SQLite database file.
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile the calendar snapshot and publish changes.
    Producer,

    /// Apply inbound changes as they arrive.
    Consumer {
        /// Only consume messages of this entity kind.
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },

    /// Pull inbound changes on a fixed interval.
    Poll {
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },

    /// Publish liveness heartbeats.
    Heartbeat,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer { .. } => "consumer",
            Self::Poll { .. } => "poll",
            Self::Heartbeat => "heartbeat",
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Event,
    Session,
}

impl From<KindArg> for EntityKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Event => EntityKind::Event,
            KindArg::Session => EntityKind::Session,
        }
    }
}

fn load_config(cli: &Cli, paths: &Paths) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_with_file(path),
        None => Config::load(paths),
    }
    .context("failed to load configuration")?;

    if let Some(redis_url) = &cli.redis_url {
        config.redis_url = redis_url.clone();
    }
    if let Some(database) = &cli.database {
        config.database_path = Some(database.clone());
    }
    if let Some(log_level) = &cli.log_level {
        config.log_level = log_level.clone();
    }
    Ok(config)
}

fn channel_config(config: &Config) -> ChannelConfig {
    let mut channel = ChannelConfig::new(&config.redis_url, &config.consumer_group);
    channel.block_timeout_ms = config.block_timeout_ms;
    channel.max_redeliveries = config.max_redeliveries;
    channel.requeue_delay = config.requeue_delay();
    channel.connect_attempts = config.connect_attempts;
    channel.connect_delay = config.connect_delay();
    channel
}

fn inbound_routes(config: &Config, kind: Option<KindArg>) -> InboundRoutes {
    let routes = InboundRoutes::for_domain(&config.inbound_domain);
    match kind {
        Some(kind) => routes.only(kind.into()),
        None => routes,
    }
}

fn calendar_client(config: &Config) -> anyhow::Result<Arc<GoogleCalendarClient>> {
    let credentials = config
        .credentials_path
        .as_deref()
        .context("GOOGLE_APPLICATION_CREDENTIALS is not set")?;
    let client = GoogleCalendarClient::from_service_account_file(
        credentials,
        config.impersonated_user.clone(),
        &config.calendar_base_url,
    )?;
    Ok(Arc::new(client))
}

async fn open_database(config: &Config, paths: &Paths) -> anyhow::Result<AsyncDatabase> {
    let path = config.database_path(paths);
    let db = AsyncDatabase::open(&path)
        .await
        .with_context(|| format!("failed to open database at {}", path.display()))?;
    db.health_check()
        .await
        .with_context(|| format!("database at {} failed its health check", db.path()))?;
    Ok(db)
}

async fn subscribed_channel(
    config: &Config,
    routes: &InboundRoutes,
) -> anyhow::Result<RedisChannel> {
    let mut channel = connect_with_retry(channel_config(config)).await?;
    channel.subscribe(&routes.topics()).await?;
    Ok(channel)
}

/// Run `task` until it finishes or Ctrl-C arrives.
async fn until_shutdown<F>(task: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    tokio::select! {
        result = task => {
            if let Err(e) = &result {
                error!(error = %e, "Exited with error");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, exiting...");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let paths = Paths::new()?;
    let config = load_config(&cli, &paths)?;

    paths.ensure_dirs()?;
    let service_name = format!("{}-{}", config.service_name, cli.command.name());
    observability::init_with_config(observability::LogConfig {
        log_path: Some(paths.logs_dir().join(format!("{service_name}.jsonl"))),
        service_name,
        default_level: config.log_level.clone(),
        also_stderr: true,
    })?;

    info!(
        command = cli.command.name(),
        redis_url = %config.redis_url,
        environment = %config.environment,
        "planning-sync starting..."
    );

    match cli.command {
        Command::Producer => {
            let db = open_database(&config, &paths).await?;
            let source = calendar_client(&config)?;
            let publisher = Arc::new(connect_with_retry(channel_config(&config)).await?);
            let topics = TopicMap::fan_out(&config.event_subscribers, &config.session_subscribers);

            info!(
                interval_secs = config.sync_interval_secs,
                event_subscribers = ?config.event_subscribers,
                session_subscribers = ?config.session_subscribers,
                "Starting reconciliation loop"
            );
            let reconciler = Reconciler::new(db, source, publisher, topics);
            let ticker = IntervalTicker::new(config.sync_interval());
            until_shutdown(async { Ok(reconciler.run(ticker).await?) }).await
        }

        Command::Consumer { kind } => {
            let db = open_database(&config, &paths).await?;
            let engine = ApplyEngine::new(db, calendar_client(&config)?);
            let routes = inbound_routes(&config, kind);
            let channel = subscribed_channel(&config, &routes).await?;

            let mut dispatcher = Dispatcher::new(channel, engine, routes)
                .with_reconnect(config.connect_attempts, config.connect_delay());
            until_shutdown(async { Ok(dispatcher.run().await?) }).await
        }

        Command::Poll { kind } => {
            let db = open_database(&config, &paths).await?;
            let engine = ApplyEngine::new(db, calendar_client(&config)?);
            let routes = inbound_routes(&config, kind);
            let channel = subscribed_channel(&config, &routes).await?;

            let mut dispatcher = Dispatcher::new(channel, engine, routes)
                .with_reconnect(config.connect_attempts, config.connect_delay());
            let ticker = IntervalTicker::new(config.poll_interval());
            until_shutdown(async { Ok(dispatcher.run_polling(ticker).await?) }).await
        }

        Command::Heartbeat => {
            let publisher = Arc::new(connect_with_retry(channel_config(&config)).await?);
            let heartbeat = HeartbeatPublisher::new(
                publisher,
                config.service_name.clone(),
                config.heartbeat_interval(),
            )
            .with_environment(config.environment.clone());
            let ticker = IntervalTicker::new(config.heartbeat_interval());
            until_shutdown(async { Ok(heartbeat.run(ticker).await?) }).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_consumer_kind() {
        let cli = Cli::try_parse_from(["planning-sync", "consumer", "--kind", "session"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Consumer {
                kind: Some(KindArg::Session)
            }
        ));
    }

    #[test]
    fn test_inbound_routes_filtered_by_kind() {
        let config = Config::default();
        let routes = inbound_routes(&config, Some(KindArg::Event));
        assert_eq!(routes.topics().len(), 3);
        assert!(routes.topics().iter().all(|t| t.starts_with("planning.event.")));
    }

    #[tokio::test]
    async fn test_open_database_runs_health_check() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let config = Config {
            database_path: Some(dir.path().join("planning.sqlite")),
            ..Config::default()
        };

        let db = open_database(&config, &paths).await.unwrap();
        assert!(db.path().ends_with("planning.sqlite"));
    }

    #[test]
    fn test_channel_config_follows_settings() {
        let config = Config {
            max_redeliveries: 2,
            connect_attempts: 7,
            ..Config::default()
        };
        let channel = channel_config(&config);
        assert_eq!(channel.max_redeliveries, 2);
        assert_eq!(channel.connect_attempts, 7);
        assert_eq!(channel.consumer_group, config.consumer_group);
    }
}
