//! Catalog enumerator
//!
//! Pages through every configured category, reconciles each page against
//! the presence ledger inside one transaction, queues newly discovered and
//! reappeared listings, and finally marks listings missing from this run
//! as INACTIVE.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::pacing;
use crate::domain::category::Category;
use crate::domain::errors::FetchError;
use crate::domain::extract;
use crate::domain::item_state::PageClassification;
use crate::domain::upstream::CatalogSource;
use crate::infrastructure::config::EnumeratorConfig;
use crate::infrastructure::detail_repository::SqliteDetailRepository;
use crate::infrastructure::item_state_repository::{LedgerCounts, SqliteItemStateRepository};
use crate::infrastructure::queue_repository::SqliteQueueRepository;

#[derive(Error, Debug)]
pub enum EnumerationError {
    #[error("category {category}: listing page at offset {offset} failed: {source}")]
    Fetch {
        category: String,
        offset: u64,
        source: FetchError,
    },

    #[error("category {category}: listing response carries no total count")]
    MissingTotalCount { category: String },

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl From<sqlx::Error> for EnumerationError {
    fn from(error: sqlx::Error) -> Self {
        Self::Store(error.into())
    }
}

/// Run-scoped memory of ids already in the queue, seeded from the store
#[derive(Debug, Default)]
pub struct EnumerationContext {
    queued_ids: HashSet<String>,
}

impl EnumerationContext {
    pub async fn load(queue: &SqliteQueueRepository) -> anyhow::Result<Self> {
        Ok(Self {
            queued_ids: queue.load_ids().await?,
        })
    }

    #[must_use]
    pub fn is_queued(&self, id: &str) -> bool {
        self.queued_ids.contains(id)
    }

    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queued_ids.len()
    }
}

/// Effects of one committed page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PageOutcome {
    /// Ids inserted into the ledger
    pub new: u64,
    /// Ledger ids that went back to ACTIVE
    pub reappeared: u64,
    /// Ids actually inserted into the queue; detailed listings never count
    pub queued: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    pub category: String,
    pub total_count: u64,
    pub pages: u64,
    pub new: u64,
    pub reappeared: u64,
    pub queued: u64,
    pub skipped_items: u64,
    /// False when the scan stopped early on cancellation
    pub completed: bool,
}

impl CategoryReport {
    fn new(category: &Category, total_count: u64) -> Self {
        Self {
            category: category.key.clone(),
            total_count,
            ..Self::default()
        }
    }

    fn absorb(&mut self, outcome: PageOutcome, skipped: usize) {
        self.pages += 1;
        self.new += outcome.new;
        self.reappeared += outcome.reappeared;
        self.queued += outcome.queued;
        self.skipped_items += skipped as u64;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnumerationReport {
    pub categories: Vec<CategoryReport>,
    pub new: u64,
    pub reappeared: u64,
    pub queued: u64,
    pub pages: u64,
    pub skipped_items: u64,
    /// `None` when finalization did not run
    pub became_inactive: Option<u64>,
    pub ledger: LedgerCounts,
    pub cancelled: bool,
}

impl EnumerationReport {
    fn push(&mut self, category: CategoryReport) {
        self.new += category.new;
        self.reappeared += category.reappeared;
        self.queued += category.queued;
        self.pages += category.pages;
        self.skipped_items += category.skipped_items;
        self.categories.push(category);
    }
}

pub struct CatalogEnumerator {
    source: Arc<dyn CatalogSource>,
    pool: SqlitePool,
    queue: SqliteQueueRepository,
    states: SqliteItemStateRepository,
    config: EnumeratorConfig,
}

impl CatalogEnumerator {
    pub fn new(source: Arc<dyn CatalogSource>, pool: SqlitePool, config: EnumeratorConfig) -> Self {
        Self {
            source,
            queue: SqliteQueueRepository::new(pool.clone()),
            states: SqliteItemStateRepository::new(pool.clone()),
            pool,
            config,
        }
    }

    /// Full run: reset the snapshot, scan every category, then finalize.
    ///
    /// A failing category aborts the run before finalization. A cancelled
    /// run stops after the last committed page and skips finalization too,
    /// so an incomplete scan never marks listings INACTIVE.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<EnumerationReport, EnumerationError> {
        let categories: Vec<&Category> = self.config.categories.iter().collect();
        self.scan(&categories, true, cancel).await
    }

    /// Scans only the configured categories named in `keys`. The ledger and
    /// queue are updated as usual but finalization never runs, since the
    /// snapshot does not cover the whole catalog.
    pub async fn run_partial(
        &self,
        keys: &[String],
        cancel: &CancellationToken,
    ) -> Result<EnumerationReport, EnumerationError> {
        let categories: Vec<&Category> = self
            .config
            .categories
            .iter()
            .filter(|category| keys.contains(&category.key))
            .collect();
        self.scan(&categories, false, cancel).await
    }

    async fn scan(
        &self,
        categories: &[&Category],
        finalize: bool,
        cancel: &CancellationToken,
    ) -> Result<EnumerationReport, EnumerationError> {
        let mut context = EnumerationContext::load(&self.queue).await?;
        let cleared = self.states.reset_snapshot().await?;
        info!(
            "🚗 Enumeration start: {} categories, page size {}, {} ids already queued, {} snapshot rows cleared",
            categories.len(),
            self.config.page_size,
            context.queued_len(),
            cleared
        );

        let mut report = EnumerationReport::default();
        for category in categories {
            let category_report = self.enumerate_category(category, &mut context, cancel).await?;
            let completed = category_report.completed;
            report.push(category_report);
            if !completed {
                warn!("🛑 Enumeration cancelled during {}; finalization skipped", category.key);
                report.cancelled = true;
                report.ledger = self.states.counts().await?;
                return Ok(report);
            }
        }

        if finalize {
            report.became_inactive = Some(self.finalize().await?);
        } else {
            info!("Partial scan; finalization skipped");
        }
        report.ledger = self.states.counts().await?;

        info!(
            "✅ Enumeration done: new={} reappeared={} queued={} skipped_items={} became_inactive={:?} active={} inactive={} snapshot={}",
            report.new,
            report.reappeared,
            report.queued,
            report.skipped_items,
            report.became_inactive,
            report.ledger.active,
            report.ledger.inactive,
            report.ledger.snapshot
        );
        Ok(report)
    }

    /// Scans one category from offset 0 until the reported total.
    /// The count response doubles as the first page.
    pub async fn enumerate_category(
        &self,
        category: &Category,
        context: &mut EnumerationContext,
        cancel: &CancellationToken,
    ) -> Result<CategoryReport, EnumerationError> {
        let limit = self.config.page_size.max(1);
        if cancel.is_cancelled() {
            return Ok(CategoryReport::new(category, 0));
        }

        let first = self.fetch(category, 0, limit).await?;
        let total = extract::total_count(&first).ok_or_else(|| EnumerationError::MissingTotalCount {
            category: category.key.clone(),
        })?;
        info!("🚗 {} ({}): total={} limit={}", category.key, category.manufacturer, total, limit);

        let mut report = CategoryReport::new(category, total);
        let mut prefetched = Some(first);
        let mut offset = 0u64;

        while offset < total {
            if cancel.is_cancelled() {
                return Ok(report);
            }

            let page = match prefetched.take() {
                Some(page) => page,
                None => {
                    pacing::pause(self.config.delay, cancel).await;
                    if cancel.is_cancelled() {
                        return Ok(report);
                    }
                    self.fetch(category, offset, limit).await?
                }
            };

            let (page_ids, skipped) = extract::page_item_ids(&page);
            if skipped > 0 {
                warn!("{} offset={}: {} entries without a usable id skipped", category.key, offset, skipped);
            }

            let outcome = self.apply_page(&page_ids, context).await?;
            report.absorb(outcome, skipped);
            info!(
                "{} offset={}/{} page_ids={} new+={} reappeared+={} queued+={}",
                category.key,
                offset,
                total,
                page_ids.len(),
                outcome.new,
                outcome.reappeared,
                outcome.queued
            );

            offset += u64::from(limit);
        }

        report.completed = true;
        info!(
            "🏁 {} done: new={} reappeared={} queued={} pages={}",
            category.key, report.new, report.reappeared, report.queued, report.pages
        );
        Ok(report)
    }

    async fn fetch(
        &self,
        category: &Category,
        offset: u64,
        limit: u32,
    ) -> Result<serde_json::Value, EnumerationError> {
        self.source
            .fetch_page(category, offset, limit)
            .await
            .map_err(|source| EnumerationError::Fetch {
                category: category.key.clone(),
                offset,
                source,
            })
    }

    /// Reconciles one page against the store in a single transaction
    pub async fn apply_page(
        &self,
        page_ids: &[String],
        context: &mut EnumerationContext,
    ) -> Result<PageOutcome, EnumerationError> {
        if page_ids.is_empty() {
            return Ok(PageOutcome::default());
        }

        let mut tx = self.pool.begin().await?;

        SqliteItemStateRepository::insert_snapshot(&mut tx, page_ids).await?;
        let existing = SqliteItemStateRepository::select_existing_states(&mut tx, page_ids).await?;
        let classification = PageClassification::classify(page_ids, &existing);

        // 원장은 모든 신규 id를 기록하고, 큐 후보만 상세 수집 여부로 거른다.
        // new/reappeared 는 원장 기준, queued 만 필터 이후 값이다.
        let new = SqliteItemStateRepository::insert_new_states(&mut tx, &classification.new_ids).await?;
        let reappeared = classification.reappeared_ids.len() as u64;
        SqliteItemStateRepository::touch_states(&mut tx, page_ids).await?;

        let not_detailed: HashSet<String> =
            SqliteDetailRepository::filter_out_detailed(&mut tx, &classification.queue_candidates())
                .await?
                .into_iter()
                .collect();
        let mut candidates = classification;
        candidates.retain(|id| not_detailed.contains(id));

        let to_queue: Vec<String> = candidates
            .queue_candidates()
            .into_iter()
            .filter(|id| !context.is_queued(id))
            .collect();
        let queued = SqliteQueueRepository::enqueue_if_absent(&mut tx, &to_queue).await?;

        tx.commit().await?;
        context.queued_ids.extend(to_queue);

        Ok(PageOutcome {
            new,
            reappeared,
            queued,
        })
    }

    /// ACTIVE listings absent from this run's snapshot become INACTIVE
    pub async fn finalize(&self) -> Result<u64, EnumerationError> {
        let became_inactive = self.states.finalize_inactive().await?;
        info!("Finalization: {} listings became INACTIVE", became_inactive);
        Ok(became_inactive)
    }
}
