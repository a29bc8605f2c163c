//! Repository for raw detail payloads (`*_raw` tables)
//!
//! Rows are only written inside a worker item transaction, so a reader
//! never sees a half-processed listing.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};

use crate::domain::detail::{DetailKind, DetailRecord};
use crate::infrastructure::database_connection::{MAX_BIND_PARAMS, placeholders};

#[derive(Clone)]
pub struct SqliteDetailRepository {
    pool: SqlitePool,
}

impl SqliteDetailRepository {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or overwrite one payload; `fetched_at` is always refreshed
    pub async fn upsert(conn: &mut SqliteConnection, record: &DetailRecord) -> Result<()> {
        let table = record.kind.table();
        let key_column = record.kind.key_column();
        let payload = serde_json::to_string(&record.payload)
            .with_context(|| format!("Failed to serialize {} payload", record.kind))?;

        let sql = if record.kind == DetailKind::Record {
            format!(
                r"
                INSERT INTO {table} ({key_column}, payload, vehicle_no) VALUES (?, ?, ?)
                ON CONFLICT({key_column}) DO UPDATE SET
                    payload = excluded.payload,
                    vehicle_no = excluded.vehicle_no,
                    fetched_at = CURRENT_TIMESTAMP
                "
            )
        } else {
            format!(
                r"
                INSERT INTO {table} ({key_column}, payload) VALUES (?, ?)
                ON CONFLICT({key_column}) DO UPDATE SET
                    payload = excluded.payload,
                    fetched_at = CURRENT_TIMESTAMP
                "
            )
        };

        let mut query = sqlx::query(&sql).bind(&record.key).bind(payload);
        if record.kind == DetailKind::Record {
            query = query.bind(record.vehicle_no.as_deref());
        }
        query.execute(conn).await?;
        Ok(())
    }

    /// Drops ids that already have a primary (vehicle) record, keeping order
    pub async fn filter_out_detailed(
        conn: &mut SqliteConnection,
        ids: &[String],
    ) -> Result<Vec<String>> {
        let primary = DetailKind::Vehicle;
        let mut keep = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_BIND_PARAMS) {
            let sql = format!(
                "SELECT {key} FROM {table} WHERE {key} IN ({})",
                placeholders(chunk.len()),
                key = primary.key_column(),
                table = primary.table(),
            );
            let mut query = sqlx::query_scalar::<_, String>(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            let detailed: std::collections::HashSet<String> =
                query.fetch_all(&mut *conn).await?.into_iter().collect();
            keep.extend(chunk.iter().filter(|id| !detailed.contains(*id)).cloned());
        }
        Ok(keep)
    }

    /// Stored payload of one resource, decoded
    pub async fn get_payload(&self, kind: DetailKind, key: &str) -> Result<Option<Value>> {
        let sql = format!(
            "SELECT payload FROM {} WHERE {} = ?",
            kind.table(),
            kind.key_column()
        );
        let payload: Option<Option<String>> = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        payload
            .flatten()
            .map(|text| serde_json::from_str(&text).context("Stored payload is not JSON"))
            .transpose()
    }

    /// Vehicle number stored next to an ownership/accident record
    pub async fn record_vehicle_no(&self, car_id: &str) -> Result<Option<String>> {
        let vehicle_no: Option<Option<String>> =
            sqlx::query_scalar("SELECT vehicle_no FROM record_raw WHERE car_id = ?")
                .bind(car_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(vehicle_no.flatten())
    }

    /// Row count per detail table
    pub async fn row_counts(&self) -> Result<Vec<(DetailKind, u64)>> {
        let mut counts = Vec::with_capacity(DetailKind::ALL.len());
        for kind in DetailKind::ALL {
            let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
            let n: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
            counts.push((kind, n as u64));
        }
        Ok(counts)
    }
}
