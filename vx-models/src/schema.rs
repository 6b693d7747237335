//! Database schema definitions and table creation.
//!
//! Three tables back the push subsystem: the flat key-value `settings` store,
//! the `sessions` a device is logged into, and a single-row
//! `notification_snapshot` holding the aggregated pending notifications.

use rusqlite::Connection;
use tracing::info;
use vx_core::error::{VxError, VxResult};

/// Tables owned by this schema, in drop order.
pub const TABLES: &[&str] = &["notification_snapshot", "sessions", "settings", "schema_version"];

/// Create all database tables and indexes if they do not exist.
pub fn create_tables(conn: &Connection) -> VxResult<()> {
    conn.execute_batch(SCHEMA_SQL)
        .map_err(|e| VxError::Database(format!("failed to create schema: {e}")))?;
    info!("database schema verified");
    Ok(())
}

/// Drop all tables (used for database reset).
pub fn drop_tables(conn: &Connection) -> VxResult<()> {
    let sql: String = TABLES
        .iter()
        .map(|t| format!("DROP TABLE IF EXISTS {t};"))
        .collect();
    conn.execute_batch(&sql)
        .map_err(|e| VxError::Database(format!("failed to drop tables: {e}")))?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

-- Flat key-value store: registration state, push token, preference toggles
CREATE TABLE IF NOT EXISTS settings (
    key                             TEXT PRIMARY KEY NOT NULL,
    value                           TEXT NOT NULL
);

-- Logged-in sessions, one pusher per session on this device
CREATE TABLE IF NOT EXISTS sessions (
    user_id                         TEXT PRIMARY KEY NOT NULL,
    homeserver_url                  TEXT NOT NULL,
    access_token                    TEXT NOT NULL,
    device_id                       TEXT,
    created_at                      TEXT NOT NULL
);

-- Aggregated pending notifications, versioned payload
CREATE TABLE IF NOT EXISTS notification_snapshot (
    id                              INTEGER PRIMARY KEY CHECK (id = 1),
    version                         INTEGER NOT NULL,
    payload                         TEXT NOT NULL,
    saved_at                        TEXT NOT NULL
);
"#;
