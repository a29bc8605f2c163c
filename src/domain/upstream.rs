//! Upstream service traits
//!
//! The crawl state machine only talks to the listing site through these
//! traits; the HTTP implementation lives in `infrastructure::encar_api`.

use async_trait::async_trait;
use serde_json::Value;

use super::category::Category;
use super::detail::DetailRequest;
use super::errors::FetchError;

/// Paginated listing endpoint
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// One listing page of `category` starting at `offset`.
    /// The response includes the total count of the filtered result set.
    async fn fetch_page(
        &self,
        category: &Category,
        offset: u64,
        limit: u32,
    ) -> Result<Value, FetchError>;
}

/// Per-listing detail endpoints
#[async_trait]
pub trait DetailSource: Send + Sync {
    async fn fetch_detail(&self, request: &DetailRequest) -> Result<Value, FetchError>;
}
