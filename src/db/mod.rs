//! Persistent store: connection pool, migrations, and health check.
//!
//! One SQLite file shared by every worker (task or process) and the CLI.
//! WAL mode plus a busy timeout lets concurrent writers queue up instead of
//! failing. Each relation gets its own submodule of `impl Db` operations.

pub mod control;
pub mod dlq;
pub mod jobs;
pub mod metrics;
pub mod settings;
pub mod workers;

use crate::error::Result;
use crate::model::RuntimeConfig;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Database handle. Owns the connection pool shared across all modules.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open (creating if missing) the database file and create a pool.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Connect and bring the schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Self::connect(path).await?;
        db.migrate().await?;
        Ok(db)
    }

    /// Run all pending migrations and seed runtime configuration defaults.
    /// Existing config values are never overwritten.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;

        for (key, value) in RuntimeConfig::default_entries() {
            sqlx::query("INSERT OR IGNORE INTO config (key, value) VALUES (?1, ?2)")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Simple health check, run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
