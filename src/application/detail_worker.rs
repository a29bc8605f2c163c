//! Detail worker
//!
//! Drains PENDING queue entries oldest first. For each claimed listing it
//! fetches the vehicle record, then the dependent resources, and commits
//! every payload together with the DONE transition in one transaction.
//! Any failure rolls the item back and records ERROR on the entry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::pacing;
use crate::domain::detail::{DetailKind, DetailRecord, DetailRequest};
use crate::domain::errors::FetchError;
use crate::domain::extract;
use crate::domain::upstream::DetailSource;
use crate::infrastructure::config::{MissingKeyPolicy, WorkerConfig};
use crate::infrastructure::detail_repository::SqliteDetailRepository;
use crate::infrastructure::queue_repository::SqliteQueueRepository;

/// Why one item attempt failed
#[derive(Error, Debug)]
pub enum ItemError {
    #[error("{kind} fetch failed: {source}")]
    Fetch { kind: DetailKind, source: FetchError },

    #[error("vehicle record has no {key}; {kind} cannot be fetched")]
    MissingKey { key: &'static str, kind: DetailKind },

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl From<sqlx::Error> for ItemError {
    fn from(error: sqlx::Error) -> Self {
        Self::Store(error.into())
    }
}

/// Run-scoped state shared by the items of one worker run
#[derive(Debug, Default)]
pub struct WorkerContext {
    /// Seller payloads (sentinels included) fetched during this run
    seller_cache: HashMap<String, Value>,
    /// Sellers whose row was committed by an earlier item of this run
    committed_sellers: HashSet<String>,
}

impl WorkerContext {
    #[must_use]
    pub fn cached_sellers(&self) -> usize {
        self.seller_cache.len()
    }
}

/// Payloads fetched for one listing, not yet committed
#[derive(Debug, Default)]
pub struct FetchedItem {
    pub records: Vec<DetailRecord>,
    /// Dependent resources left out (missing key or rejected request)
    pub skipped: Vec<DetailKind>,
}

impl FetchedItem {
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub batch: u64,
    pub claimed: u64,
    pub done: u64,
    pub error: u64,
    /// DONE items with at least one dependent resource skipped
    pub partial: u64,
    /// Entries that were no longer PENDING when claimed
    pub not_claimed: u64,
    pub cached_sellers: u64,
    pub cancelled: bool,
}

pub struct DetailWorker {
    source: Arc<dyn DetailSource>,
    pool: SqlitePool,
    queue: SqliteQueueRepository,
    config: WorkerConfig,
}

impl DetailWorker {
    pub fn new(source: Arc<dyn DetailSource>, pool: SqlitePool, config: WorkerConfig) -> Self {
        Self {
            source,
            queue: SqliteQueueRepository::new(pool.clone()),
            pool,
            config,
        }
    }

    /// Processes one batch of PENDING entries. Item failures are recorded on
    /// their entries; only store failures outside an item abort the run.
    pub async fn run(&self, cancel: &CancellationToken) -> anyhow::Result<WorkerReport> {
        let batch = self.queue.fetch_pending_batch(self.config.batch_size).await?;
        let mut report = WorkerReport {
            batch: batch.len() as u64,
            ..WorkerReport::default()
        };
        if batch.is_empty() {
            info!("✅ No PENDING entries");
            return Ok(report);
        }

        info!("🔧 Worker start: batch={}", batch.len());
        let mut context = WorkerContext::default();

        for (index, entry) in batch.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("🛑 Worker cancelled after {} of {} entries", index, batch.len());
                report.cancelled = true;
                break;
            }

            let car_id = entry.car_id.as_str();
            if !self.queue.claim(car_id).await? {
                debug!("{} is no longer PENDING, skipping", car_id);
                report.not_claimed += 1;
                continue;
            }
            report.claimed += 1;

            match self.process_item(car_id, &mut context, cancel).await {
                Ok(fetched) => {
                    report.done += 1;
                    if fetched.is_partial() {
                        report.partial += 1;
                        info!(
                            "[{}/{}] {} ✅ DONE (skipped: {:?})",
                            index + 1,
                            batch.len(),
                            car_id,
                            fetched.skipped
                        );
                    } else {
                        info!("[{}/{}] {} ✅ DONE", index + 1, batch.len(), car_id);
                    }
                }
                Err(error) => {
                    report.error += 1;
                    let message = error.to_string();
                    warn!("[{}/{}] {} ❌ ERROR: {}", index + 1, batch.len(), car_id, message);
                    self.queue.mark_error(car_id, &message).await?;
                }
            }
        }

        report.cached_sellers = context.cached_sellers() as u64;
        info!(
            "🏁 Worker finished: done={} error={} partial={} not_claimed={}",
            report.done, report.error, report.partial, report.not_claimed
        );
        Ok(report)
    }

    /// Fetches and commits one claimed listing. Nothing is written unless
    /// every required fetch succeeded.
    pub async fn process_item(
        &self,
        car_id: &str,
        context: &mut WorkerContext,
        cancel: &CancellationToken,
    ) -> Result<FetchedItem, ItemError> {
        let fetched = self.fetch_item(car_id, context, cancel).await?;

        let mut tx = self.pool.begin().await?;
        for record in &fetched.records {
            SqliteDetailRepository::upsert(&mut tx, record).await?;
        }
        SqliteQueueRepository::mark_done(&mut tx, car_id).await?;
        tx.commit().await?;

        context.committed_sellers.extend(
            fetched
                .records
                .iter()
                .filter(|record| record.kind == DetailKind::Seller)
                .map(|record| record.key.clone()),
        );

        Ok(fetched)
    }

    async fn fetch_item(
        &self,
        car_id: &str,
        context: &mut WorkerContext,
        cancel: &CancellationToken,
    ) -> Result<FetchedItem, ItemError> {
        let mut item = FetchedItem::default();

        let vehicle_request = DetailRequest::Vehicle {
            car_id: car_id.to_string(),
        };
        pacing::pause(self.config.delay, cancel).await;
        let vehicle = self
            .source
            .fetch_detail(&vehicle_request)
            .await
            .map_err(|source| ItemError::Fetch {
                kind: DetailKind::Vehicle,
                source,
            })?;

        let seller_id = extract::seller_id(&vehicle);
        let vehicle_no = extract::vehicle_no(&vehicle);
        item.records.push(DetailRecord::new(&vehicle_request, vehicle));

        self.fetch_dependent(
            DetailRequest::Inspection {
                car_id: car_id.to_string(),
            },
            &mut item,
            cancel,
        )
        .await?;

        match vehicle_no {
            Some(vehicle_no) => {
                self.fetch_dependent(
                    DetailRequest::Record {
                        car_id: car_id.to_string(),
                        vehicle_no,
                    },
                    &mut item,
                    cancel,
                )
                .await?;
            }
            None => self.missing_key(car_id, "vehicle number", DetailKind::Record, &mut item)?,
        }

        self.fetch_dependent(
            DetailRequest::OptionsChoice {
                car_id: car_id.to_string(),
            },
            &mut item,
            cancel,
        )
        .await?;

        match seller_id {
            Some(user_id) => {
                let request = DetailRequest::Seller { user_id };
                if context.committed_sellers.contains(request.key()) {
                    debug!("seller {} already stored in this run", request.key());
                } else if let Some(payload) = context.seller_cache.get(request.key()) {
                    // fetched by an item that rolled back; write it with this one
                    debug!("seller {} served from cache", request.key());
                    item.records.push(DetailRecord::new(&request, payload.clone()));
                } else if let Some(record) = self.fetch_dependent(request, &mut item, cancel).await? {
                    context
                        .seller_cache
                        .insert(record.key.clone(), record.payload.clone());
                }
            }
            None => self.missing_key(car_id, "seller id", DetailKind::Seller, &mut item)?,
        }

        Ok(item)
    }

    /// Fetches a dependent resource into `item`. Not-found becomes a
    /// sentinel record, a rejected request is skipped, anything else fails
    /// the item. Returns the record that was added, if any.
    async fn fetch_dependent(
        &self,
        request: DetailRequest,
        item: &mut FetchedItem,
        cancel: &CancellationToken,
    ) -> Result<Option<DetailRecord>, ItemError> {
        pacing::pause(self.config.delay, cancel).await;

        let record = match self.source.fetch_detail(&request).await {
            Ok(payload) => DetailRecord::new(&request, payload),
            Err(error) if error.is_not_found() => {
                debug!("{} {} confirmed absent", request.kind(), request.key());
                DetailRecord::not_found(&request)
            }
            Err(error) if error.is_bad_request() => {
                warn!("{} {} skipped: {}", request.kind(), request.key(), error);
                item.skipped.push(request.kind());
                return Ok(None);
            }
            Err(source) => {
                return Err(ItemError::Fetch {
                    kind: request.kind(),
                    source,
                });
            }
        };

        item.records.push(record.clone());
        Ok(Some(record))
    }

    fn missing_key(
        &self,
        car_id: &str,
        key: &'static str,
        kind: DetailKind,
        item: &mut FetchedItem,
    ) -> Result<(), ItemError> {
        match self.config.missing_secondary_key {
            MissingKeyPolicy::Skip => {
                debug!("{}: no {}, {} skipped", car_id, key, kind);
                item.skipped.push(kind);
                Ok(())
            }
            MissingKeyPolicy::Fail => Err(ItemError::MissingKey { key, kind }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::detail::is_not_found_payload;
    use crate::domain::queue::QueueStatus;
    use crate::infrastructure::config::DelayRange;
    use crate::test_utils::{FakeDetails, TestDatabase, exhausted, not_found};
    use serde_json::json;

    struct Harness {
        db: TestDatabase,
        queue: SqliteQueueRepository,
        details: SqliteDetailRepository,
    }

    async fn harness(ids: &[&str]) -> anyhow::Result<Harness> {
        let db = TestDatabase::new().await?;
        let queue = SqliteQueueRepository::new(db.pool());
        let details = SqliteDetailRepository::new(db.pool());
        let ids: Vec<String> = ids.iter().map(|id| (*id).to_string()).collect();
        queue.enqueue(&ids).await?;
        Ok(Harness { db, queue, details })
    }

    fn config(policy: MissingKeyPolicy) -> WorkerConfig {
        WorkerConfig {
            delay: DelayRange::none(),
            missing_secondary_key: policy,
            ..WorkerConfig::default()
        }
    }

    async fn run(h: &Harness, source: Arc<FakeDetails>, policy: MissingKeyPolicy) -> anyhow::Result<WorkerReport> {
        DetailWorker::new(source, h.db.pool(), config(policy))
            .run(&CancellationToken::new())
            .await
    }

    async fn rows(h: &Harness, table: &str) -> anyhow::Result<i64> {
        Ok(sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&h.db.pool())
            .await?)
    }

    #[tokio::test]
    async fn complete_item_writes_every_resource() -> anyhow::Result<()> {
        let h = harness(&["A"]).await?;
        let source = Arc::new(FakeDetails::new().with_vehicle("A", Some("seller1"), Some("12가3456")));

        let report = run(&h, source, MissingKeyPolicy::Skip).await?;

        assert_eq!(report.done, 1);
        assert_eq!(report.partial, 0);
        assert_eq!(h.queue.get("A").await?.unwrap().status, QueueStatus::Done);
        for kind in DetailKind::ALL {
            let key = if kind == DetailKind::Seller { "seller1" } else { "A" };
            assert!(h.details.get_payload(kind, key).await?.is_some(), "{kind}");
        }
        assert_eq!(h.details.record_vehicle_no("A").await?.as_deref(), Some("12가3456"));
        Ok(())
    }

    #[tokio::test]
    async fn not_found_dependent_is_stored_as_sentinel() -> anyhow::Result<()> {
        let h = harness(&["A"]).await?;
        let source = Arc::new(
            FakeDetails::new()
                .with_vehicle("A", Some("s"), Some("v"))
                .with(
                    DetailRequest::Inspection { car_id: "A".into() },
                    Err(not_found("inspection")),
                ),
        );

        let report = run(&h, source, MissingKeyPolicy::Skip).await?;

        assert_eq!(report.done, 1);
        assert_eq!(h.queue.get("A").await?.unwrap().status, QueueStatus::Done);
        let payload = h.details.get_payload(DetailKind::Inspection, "A").await?.unwrap();
        assert!(is_not_found_payload(&payload));
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_vehicle_fetch_marks_error_without_rows() -> anyhow::Result<()> {
        let h = harness(&["A"]).await?;
        let source = Arc::new(FakeDetails::new().with(
            DetailRequest::Vehicle { car_id: "A".into() },
            Err(exhausted("vehicle")),
        ));

        let report = run(&h, source, MissingKeyPolicy::Skip).await?;

        assert_eq!(report.error, 1);
        let entry = h.queue.get("A").await?.unwrap();
        assert_eq!(entry.status, QueueStatus::Error);
        assert_eq!(entry.retry_count, 1);
        assert!(entry.last_error.unwrap().contains("vehicle fetch failed"));
        for kind in DetailKind::ALL {
            assert_eq!(rows(&h, kind.table()).await?, 0);
        }
        Ok(())
    }

    #[tokio::test]
    async fn late_failure_rolls_back_earlier_payloads() -> anyhow::Result<()> {
        let h = harness(&["A", "B"]).await?;
        let source = Arc::new(
            FakeDetails::new()
                .with_vehicle("A", Some("s"), Some("v"))
                .with(
                    DetailRequest::OptionsChoice { car_id: "A".into() },
                    Err(exhausted("options")),
                )
                .with_vehicle("B", Some("s"), Some("v")),
        );

        let report = run(&h, source, MissingKeyPolicy::Skip).await?;

        assert_eq!(report.error, 1);
        assert_eq!(report.done, 1);
        assert_eq!(h.queue.get("A").await?.unwrap().status, QueueStatus::Error);
        assert_eq!(h.queue.get("B").await?.unwrap().status, QueueStatus::Done);
        assert!(h.details.get_payload(DetailKind::Vehicle, "A").await?.is_none());
        assert!(h.details.get_payload(DetailKind::Inspection, "A").await?.is_none());
        assert!(h.details.get_payload(DetailKind::Vehicle, "B").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn done_entries_are_not_touched_again() -> anyhow::Result<()> {
        let h = harness(&["A"]).await?;
        let source = Arc::new(FakeDetails::new().with_vehicle("A", Some("s"), Some("v")));
        run(&h, Arc::clone(&source), MissingKeyPolicy::Skip).await?;
        sqlx::query("UPDATE car_queue SET updated_at = '2024-01-01 00:00:00'")
            .execute(&h.db.pool())
            .await?;
        let calls_before = source.calls().len();

        let report = run(&h, Arc::clone(&source), MissingKeyPolicy::Skip).await?;

        assert_eq!(report.batch, 0);
        assert_eq!(source.calls().len(), calls_before);
        let entry = h.queue.get("A").await?.unwrap();
        assert_eq!(entry.status, QueueStatus::Done);
        assert_eq!(
            entry.updated_at.map(|t| t.to_string()).as_deref(),
            Some("2024-01-01 00:00:00")
        );
        Ok(())
    }

    #[tokio::test]
    async fn seller_is_fetched_and_written_once_per_run() -> anyhow::Result<()> {
        let h = harness(&["A", "B"]).await?;
        sqlx::query("CREATE TABLE seller_rewrites (user_id TEXT)")
            .execute(&h.db.pool())
            .await?;
        sqlx::query(
            "CREATE TRIGGER count_seller_rewrites AFTER UPDATE ON user_raw \
             BEGIN INSERT INTO seller_rewrites VALUES (NEW.user_id); END",
        )
        .execute(&h.db.pool())
        .await?;
        let source = Arc::new(
            FakeDetails::new()
                .with_vehicle("A", Some("dealer"), Some("v1"))
                .with_vehicle("B", Some("dealer"), Some("v2"))
                .with(
                    DetailRequest::Seller { user_id: "dealer".into() },
                    Ok(json!({ "name": "Dealer" })),
                ),
        );

        let report = run(&h, Arc::clone(&source), MissingKeyPolicy::Skip).await?;

        assert_eq!(report.done, 2);
        assert_eq!(report.cached_sellers, 1);
        assert_eq!(
            source.call_count(|r| matches!(r, DetailRequest::Seller { .. })),
            1
        );
        assert_eq!(
            h.details.get_payload(DetailKind::Seller, "dealer").await?,
            Some(json!({ "name": "Dealer" }))
        );
        // B reused the cached seller without rewriting the row or its fetched_at
        assert_eq!(rows(&h, "seller_rewrites").await?, 0);
        assert_eq!(rows(&h, "user_raw").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn missing_keys_are_skipped_by_default() -> anyhow::Result<()> {
        let h = harness(&["A"]).await?;
        let source = Arc::new(FakeDetails::new().with_vehicle("A", None, None));

        let report = run(&h, Arc::clone(&source), MissingKeyPolicy::Skip).await?;

        assert_eq!(report.done, 1);
        assert_eq!(report.partial, 1);
        assert_eq!(rows(&h, "record_raw").await?, 0);
        assert_eq!(rows(&h, "user_raw").await?, 0);
        assert_eq!(rows(&h, "options_choice_raw").await?, 1);
        assert_eq!(source.calls().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn missing_keys_fail_the_item_when_configured() -> anyhow::Result<()> {
        let h = harness(&["A"]).await?;
        let source = Arc::new(FakeDetails::new().with_vehicle("A", Some("s"), None));

        let report = run(&h, source, MissingKeyPolicy::Fail).await?;

        assert_eq!(report.error, 1);
        let entry = h.queue.get("A").await?.unwrap();
        assert_eq!(entry.status, QueueStatus::Error);
        assert!(entry.last_error.unwrap().contains("vehicle number"));
        assert_eq!(rows(&h, "vehicle_raw").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn bad_request_on_dependent_is_skipped() -> anyhow::Result<()> {
        let h = harness(&["A"]).await?;
        let source = Arc::new(
            FakeDetails::new()
                .with_vehicle("A", Some("s"), Some("bad"))
                .with(
                    DetailRequest::Record {
                        car_id: "A".into(),
                        vehicle_no: "bad".into(),
                    },
                    Err(FetchError::BadRequest {
                        url: "record".into(),
                        body: "invalid vehicleNo".into(),
                    }),
                ),
        );

        let report = run(&h, source, MissingKeyPolicy::Skip).await?;

        assert_eq!(report.done, 1);
        assert_eq!(report.partial, 1);
        assert_eq!(rows(&h, "record_raw").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn entries_changed_by_someone_else_are_not_processed() -> anyhow::Result<()> {
        let h = harness(&["A"]).await?;
        let source = Arc::new(FakeDetails::new());
        let worker = DetailWorker::new(Arc::clone(&source) as Arc<dyn DetailSource>, h.db.pool(), config(MissingKeyPolicy::Skip));

        // another actor claims the entry first
        assert!(h.queue.claim("A").await?);
        let report = worker.run(&CancellationToken::new()).await?;

        assert_eq!(report.batch, 0);
        assert!(source.calls().is_empty());
        assert_eq!(h.queue.get("A").await?.unwrap().status, QueueStatus::Running);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_worker_leaves_entries_pending() -> anyhow::Result<()> {
        let h = harness(&["A", "B"]).await?;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = DetailWorker::new(Arc::new(FakeDetails::new()), h.db.pool(), config(MissingKeyPolicy::Skip))
            .run(&cancel)
            .await?;

        assert!(report.cancelled);
        assert_eq!(report.claimed, 0);
        assert_eq!(h.queue.counts().await?.pending, 2);
        Ok(())
    }
}
