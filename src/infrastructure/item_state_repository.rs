//! Repository for the presence ledger (`car_state`) and the run snapshot
//! (`car_snapshot_today`).

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::domain::item_state::{ItemState, ItemStatus};
use crate::infrastructure::database_connection::{MAX_BIND_PARAMS, placeholders};

/// Ledger totals after a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerCounts {
    pub active: u64,
    pub inactive: u64,
    pub snapshot: u64,
}

#[derive(Clone)]
pub struct SqliteItemStateRepository {
    pool: SqlitePool,
}

impl SqliteItemStateRepository {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Empties the run snapshot; called once at the start of a full run
    pub async fn reset_snapshot(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM car_snapshot_today")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Records sightings for this run (idempotent)
    pub async fn insert_snapshot(conn: &mut SqliteConnection, ids: &[String]) -> Result<()> {
        for id in ids {
            sqlx::query("INSERT OR IGNORE INTO car_snapshot_today(car_id) VALUES (?)")
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    /// Raw status text of the ids already in the ledger
    pub async fn select_existing_states(
        conn: &mut SqliteConnection,
        ids: &[String],
    ) -> Result<HashMap<String, String>> {
        let mut existing = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_BIND_PARAMS) {
            let sql = format!(
                "SELECT car_id, status FROM car_state WHERE car_id IN ({})",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            for row in query.fetch_all(&mut *conn).await? {
                existing.insert(row.try_get("car_id")?, row.try_get("status")?);
            }
        }
        Ok(existing)
    }

    /// New ACTIVE ledger rows; ids already present are ignored
    pub async fn insert_new_states(conn: &mut SqliteConnection, ids: &[String]) -> Result<u64> {
        let mut inserted = 0;
        for id in ids {
            inserted += sqlx::query("INSERT OR IGNORE INTO car_state(car_id, status) VALUES (?, 'ACTIVE')")
                .bind(id)
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }
        Ok(inserted)
    }

    /// Marks every id as sighted now and ACTIVE. `last_change_at` only moves
    /// for rows whose status actually changes.
    pub async fn touch_states(conn: &mut SqliteConnection, ids: &[String]) -> Result<u64> {
        let mut touched = 0;
        for chunk in ids.chunks(MAX_BIND_PARAMS) {
            let sql = format!(
                r"
                UPDATE car_state
                   SET last_seen_at = CURRENT_TIMESTAMP,
                       status = 'ACTIVE',
                       last_change_at = CASE WHEN status != 'ACTIVE' THEN CURRENT_TIMESTAMP ELSE last_change_at END
                 WHERE car_id IN ({})
                ",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            touched += query.execute(&mut *conn).await?.rows_affected();
        }
        Ok(touched)
    }

    /// ACTIVE rows missing from this run's snapshot become INACTIVE.
    /// Returns how many rows changed.
    pub async fn finalize_inactive(&self) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE car_state
               SET status = 'INACTIVE',
                   last_change_at = CURRENT_TIMESTAMP
             WHERE status = 'ACTIVE'
               AND car_id NOT IN (SELECT car_id FROM car_snapshot_today)
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get(&self, car_id: &str) -> Result<Option<ItemState>> {
        let row = sqlx::query(
            "SELECT car_id, first_seen_at, last_seen_at, status, last_change_at FROM car_state WHERE car_id = ?",
        )
        .bind(car_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status")?;
        Ok(Some(ItemState {
            car_id: row.try_get("car_id")?,
            first_seen_at: row.try_get("first_seen_at")?,
            last_seen_at: row.try_get("last_seen_at")?,
            status: status
                .parse::<ItemStatus>()
                .map_err(|e| anyhow!("car_state row: {e}"))?,
            last_change_at: row.try_get("last_change_at")?,
        }))
    }

    pub async fn counts(&self) -> Result<LedgerCounts> {
        let row = sqlx::query(
            r"
            SELECT
                (SELECT COUNT(*) FROM car_state WHERE status = 'ACTIVE') AS active,
                (SELECT COUNT(*) FROM car_state WHERE status = 'INACTIVE') AS inactive,
                (SELECT COUNT(*) FROM car_snapshot_today) AS snapshot
            ",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerCounts {
            active: row.try_get::<i64, _>("active")? as u64,
            inactive: row.try_get::<i64, _>("inactive")? as u64,
            snapshot: row.try_get::<i64, _>("snapshot")? as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestDatabase;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[tokio::test]
    async fn existing_states_are_looked_up_in_chunks() -> Result<()> {
        let db = TestDatabase::new().await?;
        let mut conn = db.pool().acquire().await?;

        let many: Vec<String> = (0..2000).map(|i| format!("car{i}")).collect();
        SqliteItemStateRepository::insert_new_states(&mut conn, &many).await?;

        let existing = SqliteItemStateRepository::select_existing_states(&mut conn, &many).await?;
        assert_eq!(existing.len(), 2000);
        assert!(existing.values().all(|s| s == "ACTIVE"));

        let touched = SqliteItemStateRepository::touch_states(&mut conn, &many).await?;
        assert_eq!(touched, 2000);
        Ok(())
    }

    #[tokio::test]
    async fn touch_reactivates_and_stamps_change() -> Result<()> {
        let db = TestDatabase::new().await?;
        let repo = SqliteItemStateRepository::new(db.pool());
        {
            let mut conn = db.pool().acquire().await?;
            SqliteItemStateRepository::insert_new_states(&mut conn, &ids(&["A", "B"])).await?;
        }
        sqlx::query(
            r"
            UPDATE car_state
               SET status = 'INACTIVE',
                   last_seen_at = '2024-01-01 00:00:00',
                   last_change_at = '2024-01-01 00:00:00'
            ",
        )
        .execute(&db.pool())
        .await?;
        sqlx::query("UPDATE car_state SET status = 'ACTIVE' WHERE car_id = 'B'")
            .execute(&db.pool())
            .await?;

        {
            let mut conn = db.pool().acquire().await?;
            SqliteItemStateRepository::touch_states(&mut conn, &ids(&["A", "B"])).await?;
        }

        let a = repo.get("A").await?.unwrap();
        let b = repo.get("B").await?.unwrap();
        let old = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(a.status, ItemStatus::Active);
        assert!(a.last_change_at > old);
        assert!(a.last_seen_at > old);
        assert_eq!(b.status, ItemStatus::Active);
        assert_eq!(b.last_change_at, old);
        assert!(b.last_seen_at > old);
        Ok(())
    }

    #[tokio::test]
    async fn finalize_only_touches_active_rows_outside_snapshot() -> Result<()> {
        let db = TestDatabase::new().await?;
        let repo = SqliteItemStateRepository::new(db.pool());
        {
            let mut conn = db.pool().acquire().await?;
            SqliteItemStateRepository::insert_new_states(&mut conn, &ids(&["seen", "gone", "old"])).await?;
            SqliteItemStateRepository::insert_snapshot(&mut conn, &ids(&["seen", "seen"])).await?;
        }
        sqlx::query("UPDATE car_state SET status = 'INACTIVE' WHERE car_id = 'old'")
            .execute(&db.pool())
            .await?;

        assert_eq!(repo.finalize_inactive().await?, 1);
        assert_eq!(repo.finalize_inactive().await?, 0);

        assert_eq!(repo.get("seen").await?.unwrap().status, ItemStatus::Active);
        assert_eq!(repo.get("gone").await?.unwrap().status, ItemStatus::Inactive);
        assert_eq!(
            repo.counts().await?,
            LedgerCounts {
                active: 1,
                inactive: 2,
                snapshot: 1
            }
        );

        assert_eq!(repo.reset_snapshot().await?, 1);
        Ok(())
    }
}
