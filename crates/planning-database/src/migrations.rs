//! Database migrations.
//!
//! Migrations are forward-only, run in order and tracked in the
//! `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_planning_schema(conn)?;
    }
    if current_version < 2 {
        migrate_v2_sync_outbox(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: events, sessions and their participant tables.
fn migrate_v1_planning_schema(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: planning schema");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            start_datetime TEXT NOT NULL,
            end_datetime TEXT NOT NULL,
            location TEXT NOT NULL,
            organizer TEXT NOT NULL,
            capacity INTEGER NOT NULL CHECK (capacity > 0),
            event_type TEXT NOT NULL,
            calendar_id TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS event_users (
            event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            PRIMARY KEY (event_id, user_id)
        );
        ",
    )?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            start_datetime TEXT NOT NULL,
            end_datetime TEXT NOT NULL,
            location TEXT NOT NULL DEFAULT '',
            organizer TEXT NOT NULL DEFAULT '',
            session_type TEXT NOT NULL,
            capacity INTEGER NOT NULL CHECK (capacity > 0),
            calendar_id TEXT,
            remote_event_id TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_event_id
            ON sessions(event_id);

        CREATE TABLE IF NOT EXISTS session_users (
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            user_email TEXT NOT NULL,
            PRIMARY KEY (session_id, user_email)
        );

        CREATE TABLE IF NOT EXISTS session_guest_speakers (
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            email TEXT NOT NULL,
            PRIMARY KEY (session_id, email)
        );
        ",
    )?;

    record_migration(conn, 1, "planning_schema")?;
    Ok(())
}

/// V2: transactional outbox for outbound sync messages.
fn migrate_v2_sync_outbox(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: sync outbox");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sync_outbox (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            topics TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT NOT NULL,
            published_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sync_outbox_status
            ON sync_outbox(status, id);
        ",
    )?;

    record_migration(conn, 2, "sync_outbox")?;
    Ok(())
}
