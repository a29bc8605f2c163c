//! Operator actions on the queue and store-wide statistics

use std::fmt;

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use crate::domain::detail::DetailKind;
use crate::domain::queue::QueueCounts;
use crate::infrastructure::detail_repository::SqliteDetailRepository;
use crate::infrastructure::item_state_repository::{LedgerCounts, SqliteItemStateRepository};
use crate::infrastructure::queue_repository::SqliteQueueRepository;

/// Snapshot of queue, ledger and detail table sizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub queue: QueueCounts,
    pub ledger: LedgerCounts,
    pub details: Vec<(DetailKind, u64)>,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "car_queue  PENDING={} RUNNING={} DONE={} ERROR={} total={}",
            self.queue.pending,
            self.queue.running,
            self.queue.done,
            self.queue.error,
            self.queue.total()
        )?;
        writeln!(
            f,
            "car_state  ACTIVE={} INACTIVE={} snapshot_today={}",
            self.ledger.active, self.ledger.inactive, self.ledger.snapshot
        )?;
        for (kind, rows) in &self.details {
            writeln!(f, "{:<18} rows={}", kind.table(), rows)?;
        }
        Ok(())
    }
}

pub struct Maintenance {
    queue: SqliteQueueRepository,
    states: SqliteItemStateRepository,
    details: SqliteDetailRepository,
}

impl Maintenance {
    pub fn new(pool: &SqlitePool) -> Self {
        Self {
            queue: SqliteQueueRepository::new(pool.clone()),
            states: SqliteItemStateRepository::new(pool.clone()),
            details: SqliteDetailRepository::new(pool.clone()),
        }
    }

    /// Seeds PENDING entries by hand; existing entries keep their state
    pub async fn enqueue(&self, ids: &[String]) -> Result<u64> {
        let inserted = self.queue.enqueue(ids).await?;
        info!("Enqueued {} of {} ids", inserted, ids.len());
        Ok(inserted)
    }

    /// Gives ERROR entries below the retry ceiling another attempt
    pub async fn requeue_errors(&self, max_retries: u32) -> Result<u64> {
        let requeued = self.queue.requeue_errors(max_retries).await?;
        info!("Requeued {} ERROR entries (retry_count < {})", requeued, max_retries);
        Ok(requeued)
    }

    /// Releases entries left RUNNING by an interrupted worker
    pub async fn recover_running(&self) -> Result<u64> {
        let recovered = self.queue.recover_running().await?;
        info!("Recovered {} RUNNING entries", recovered);
        Ok(recovered)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            queue: self.queue.counts().await?,
            ledger: self.states.counts().await?,
            details: self.details.row_counts().await?,
        })
    }
}
