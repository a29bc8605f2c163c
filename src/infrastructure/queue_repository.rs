//! Repository for the detail-fetch queue (`car_queue`)
//!
//! The enumerator only inserts; the worker claims and resolves; operator
//! actions move ERROR and stale RUNNING entries back to PENDING.

use std::collections::HashSet;

use anyhow::{Result, anyhow};
use chrono::NaiveDateTime;
use sqlx::{Row, SqliteConnection, SqlitePool, sqlite::SqliteRow};

use crate::domain::queue::{QueueCounts, QueueEntry, QueueStatus};

/// Longest error text stored on an entry
pub const MAX_ERROR_CHARS: usize = 500;

#[must_use]
pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_CHARS).collect()
}

#[derive(Clone)]
pub struct SqliteQueueRepository {
    pool: SqlitePool,
}

impl SqliteQueueRepository {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &SqliteRow) -> Result<QueueEntry> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<QueueStatus>()
            .map_err(|e| anyhow!("car_queue row: {e}"))?;

        Ok(QueueEntry {
            car_id: row.try_get("car_id")?,
            status,
            retry_count: row.try_get::<i64, _>("retry_count")? as u32,
            last_error: row.try_get("last_error")?,
            updated_at: row.try_get::<Option<NaiveDateTime>, _>("updated_at")?,
        })
    }

    /// Every id currently in the queue, regardless of status
    pub async fn load_ids(&self) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT car_id FROM car_queue")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    /// Inserts PENDING entries for ids not yet queued. Existing entries are
    /// left untouched whatever their status. Returns the number inserted.
    pub async fn enqueue_if_absent(conn: &mut SqliteConnection, ids: &[String]) -> Result<u64> {
        let mut inserted = 0;
        for id in ids {
            inserted += sqlx::query("INSERT OR IGNORE INTO car_queue(car_id, status) VALUES (?, 'PENDING')")
                .bind(id)
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }
        Ok(inserted)
    }

    /// [`Self::enqueue_if_absent`] in its own transaction
    pub async fn enqueue(&self, ids: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let inserted = Self::enqueue_if_absent(&mut tx, ids).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn get(&self, car_id: &str) -> Result<Option<QueueEntry>> {
        let row = sqlx::query(
            "SELECT car_id, status, retry_count, last_error, updated_at FROM car_queue WHERE car_id = ?",
        )
        .bind(car_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    /// Up to `limit` PENDING entries, longest waiting first
    pub async fn fetch_pending_batch(&self, limit: u32) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(
            r"
            SELECT car_id, status, retry_count, last_error, updated_at
              FROM car_queue
             WHERE status = 'PENDING'
             ORDER BY updated_at ASC, rowid ASC
             LIMIT ?
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// PENDING -> RUNNING. False when the entry was not PENDING anymore.
    pub async fn claim(&self, car_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE car_queue
               SET status = 'RUNNING', last_error = NULL, updated_at = CURRENT_TIMESTAMP
             WHERE car_id = ? AND status = 'PENDING'
            ",
        )
        .bind(car_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Runs inside the item transaction so DONE commits together with the detail rows
    pub async fn mark_done(conn: &mut SqliteConnection, car_id: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE car_queue
               SET status = 'DONE', last_error = NULL, updated_at = CURRENT_TIMESTAMP
             WHERE car_id = ?
            ",
        )
        .bind(car_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// ERROR with the (truncated) message; the only place `retry_count` grows
    pub async fn mark_error(&self, car_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE car_queue
               SET status = 'ERROR',
                   last_error = ?,
                   retry_count = retry_count + 1,
                   updated_at = CURRENT_TIMESTAMP
             WHERE car_id = ?
            ",
        )
        .bind(truncate_error(error))
        .bind(car_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// ERROR entries with `retry_count < max_retries` go back to PENDING
    pub async fn requeue_errors(&self, max_retries: u32) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE car_queue
               SET status = 'PENDING', updated_at = CURRENT_TIMESTAMP
             WHERE status = 'ERROR' AND retry_count < ?
            ",
        )
        .bind(i64::from(max_retries))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// RUNNING entries left behind by an interrupted worker go back to PENDING
    pub async fn recover_running(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE car_queue SET status = 'PENDING', updated_at = CURRENT_TIMESTAMP WHERE status = 'RUNNING'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM car_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            // 알 수 없는 상태는 집계에서 제외
            if let Ok(status) = status.parse::<QueueStatus>() {
                counts.add(status, n as u64);
            }
        }
        Ok(counts)
    }
}
