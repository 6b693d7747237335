//! Database initialization, connection pooling, and lifecycle management.
//!
//! Uses SQLite in WAL mode with r2d2 connection pooling.
//! Runs integrity checks on startup and applies versioned migrations.

use std::path::Path;
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::{error, info, warn};

use vx_core::config::DatabaseConfig;
use vx_core::error::{VxError, VxResult};

use crate::migrations;
use crate::schema;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database wrapper providing initialization, pooling, and lifecycle management.
#[derive(Clone)]
pub struct Database {
    pool: Arc<DbPool>,
}

impl Database {
    /// Initialize the database at the given path with the provided configuration.
    ///
    /// This:
    /// 1. Creates the database file and parent directories if needed
    /// 2. Enables WAL mode for concurrent read/write
    /// 3. Sets up connection pooling
    /// 4. Runs integrity checks if configured
    /// 5. Creates the schema tables and runs pending migrations
    pub fn init(db_path: &Path, config: &DatabaseConfig) -> VxResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("initializing database at {}", db_path.display());

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_customizer(Box::new(ConnectionCustomizer {
                wal_mode: config.wal_mode,
            }))
            .build(manager)
            .map_err(|e| VxError::Pool(e.to_string()))?;

        let db = Self {
            pool: Arc::new(pool),
        };

        if config.integrity_check_on_startup {
            db.run_integrity_check()?;
        }

        db.prepare_schema()?;
        info!("database initialized successfully");
        Ok(db)
    }

    /// Open a private in-memory database. Each pooled connection to
    /// `:memory:` would be a distinct database, so the pool is capped at one.
    pub fn in_memory() -> VxResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| VxError::Pool(e.to_string()))?;
        let db = Self {
            pool: Arc::new(pool),
        };
        db.prepare_schema()?;
        Ok(db)
    }

    fn prepare_schema(&self) -> VxResult<()> {
        let conn = self.conn()?;
        schema::create_tables(&conn)?;
        migrations::run_migrations(&conn)
    }

    /// Get a connection from the pool.
    pub fn conn(&self) -> VxResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| VxError::Pool(e.to_string()))
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Run a SQLite integrity check.
    pub fn run_integrity_check(&self) -> VxResult<()> {
        let conn = self.conn()?;
        let result: String = conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .map_err(|e| VxError::Database(e.to_string()))?;

        if result != "ok" {
            error!("database integrity check failed: {result}");
            return Err(VxError::IntegrityCheck(result));
        }

        info!("database integrity check passed");
        Ok(())
    }

    /// Execute a function within a database transaction.
    pub fn transaction<T, F>(&self, f: F) -> VxResult<T>
    where
        F: FnOnce(&Connection) -> VxResult<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| VxError::Database(e.to_string()))?;

        let result = f(&tx)?;

        tx.commit().map_err(|e| VxError::Database(e.to_string()))?;

        Ok(result)
    }

    /// Row counts per table.
    pub fn stats(&self) -> VxResult<DatabaseStats> {
        let conn = self.conn()?;

        let count = |table: &str| -> VxResult<i64> {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            conn.query_row(&sql, [], |row| row.get(0))
                .map_err(|e| VxError::Database(e.to_string()))
        };

        Ok(DatabaseStats {
            settings: count("settings")?,
            sessions: count("sessions")?,
            snapshots: count("notification_snapshot")?,
        })
    }

    /// Reset the database by dropping and recreating all tables.
    pub fn reset(&self) -> VxResult<()> {
        warn!("resetting database - all data will be lost");
        let conn = self.conn()?;
        schema::drop_tables(&conn)?;
        schema::create_tables(&conn)?;
        migrations::run_migrations(&conn)?;
        info!("database reset complete");
        Ok(())
    }
}

/// Database row count statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    pub settings: i64,
    pub sessions: i64,
    pub snapshots: i64,
}

impl std::fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "settings={}, sessions={}, snapshots={}",
            self.settings, self.sessions, self.snapshots
        )
    }
}

/// r2d2 connection customizer that applies PRAGMA settings.
#[derive(Debug)]
struct ConnectionCustomizer {
    wal_mode: bool,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        if self.wal_mode {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }

        conn.execute_batch(
            "PRAGMA synchronous=NORMAL;
             PRAGMA temp_store=MEMORY;
             PRAGMA busy_timeout=5000;",
        )?;

        Ok(())
    }
}
