// Database connection and pool management
// This module handles SQLite database connections using sqlx

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::debug;

/// Largest `IN (...)` list bound in one statement, below SQLite's variable limit
pub const MAX_BIND_PARAMS: usize = 900;

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

// 원본 스토어와 동일한 테이블 이름과 컬럼 (리포트 레이어 호환)
const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS car_queue (
        car_id TEXT PRIMARY KEY,
        status TEXT NOT NULL DEFAULT 'PENDING',
        retry_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        updated_at TEXT DEFAULT CURRENT_TIMESTAMP
    )
    ",
    "CREATE INDEX IF NOT EXISTS ix_car_queue_status ON car_queue(status)",
    r"
    CREATE TABLE IF NOT EXISTS car_state (
        car_id TEXT PRIMARY KEY,
        first_seen_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        last_seen_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        status TEXT NOT NULL DEFAULT 'ACTIVE',
        last_change_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_car_state_status ON car_state(status)",
    "CREATE INDEX IF NOT EXISTS idx_car_state_last_seen ON car_state(last_seen_at)",
    r"
    CREATE TABLE IF NOT EXISTS car_snapshot_today (
        car_id TEXT PRIMARY KEY,
        seen_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS vehicle_raw (
        car_id TEXT PRIMARY KEY,
        payload TEXT,
        fetched_at TEXT DEFAULT CURRENT_TIMESTAMP
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS inspection_raw (
        car_id TEXT PRIMARY KEY,
        payload TEXT,
        fetched_at TEXT DEFAULT CURRENT_TIMESTAMP
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS record_raw (
        car_id TEXT PRIMARY KEY,
        vehicle_no TEXT,
        payload TEXT,
        fetched_at TEXT DEFAULT CURRENT_TIMESTAMP
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS options_choice_raw (
        car_id TEXT PRIMARY KEY,
        payload TEXT,
        fetched_at TEXT DEFAULT CURRENT_TIMESTAMP
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS user_raw (
        user_id TEXT PRIMARY KEY,
        payload TEXT,
        fetched_at TEXT DEFAULT CURRENT_TIMESTAMP
    )
    ",
];

/// `?, ?, ?` for an `IN (...)` list of `count` binds
#[must_use]
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Opens (creating if needed) a file-backed store.
    /// Accepts a plain path or a `sqlite:` URL.
    pub async fn new(database_url: &str) -> Result<Self> {
        let db_path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);

        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("temp_store", "MEMORY")
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {db_path}"))?;

        debug!("Opened database {}", db_path);
        Ok(Self { pool })
    }

    /// Opens the store at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        Self::new(&path.to_string_lossy()).await
    }

    /// Private in-memory store. A single connection that never expires, so
    /// every query sees the same database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .pragma("temp_store", "MEMORY")
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates every table and index that does not exist yet
    pub async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
