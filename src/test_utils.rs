//! Test utilities for encar-tracker
//!
//! Provides an isolated in-memory store and in-process fakes of the
//! upstream listing and detail endpoints.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::domain::category::Category;
use crate::domain::detail::DetailRequest;
use crate::domain::errors::FetchError;
use crate::domain::upstream::{CatalogSource, DetailSource};
use crate::infrastructure::DatabaseConnection;

/// Test database configuration
pub struct TestDatabase {
    pub connection: DatabaseConnection,
}

impl TestDatabase {
    /// Create a new in-memory test database with the schema applied
    ///
    /// Each test gets a fresh, clean database state.
    pub async fn new() -> Result<Self> {
        let db = DatabaseConnection::in_memory().await?;
        db.migrate().await?;
        Ok(Self { connection: db })
    }

    /// Get the database pool for use in repositories
    pub fn pool(&self) -> sqlx::SqlitePool {
        self.connection.pool().clone()
    }
}

pub fn not_found(url: &str) -> FetchError {
    FetchError::NotFound {
        status: 404,
        url: url.to_string(),
    }
}

pub fn exhausted(url: &str) -> FetchError {
    FetchError::Exhausted {
        url: url.to_string(),
        attempts: 3,
        last_error: "HTTP 503".to_string(),
    }
}

enum FakeListing {
    Ids(Vec<String>),
    Raw(Value),
}

/// Listing endpoint serving fixed id lists per category key
#[derive(Default)]
pub struct FakeCatalog {
    listings: HashMap<String, FakeListing>,
    failing: HashSet<(String, u64)>,
    calls: Mutex<Vec<(String, u64)>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, key: &str, ids: &[&str]) -> Self {
        let ids = ids.iter().map(|id| (*id).to_string()).collect();
        self.listings.insert(key.to_string(), FakeListing::Ids(ids));
        self
    }

    /// Same response for every offset
    pub fn with_raw_page(mut self, key: &str, page: Value) -> Self {
        self.listings.insert(key.to_string(), FakeListing::Raw(page));
        self
    }

    pub fn with_failing_offset(mut self, key: &str, offset: u64) -> Self {
        self.failing.insert((key.to_string(), offset));
        self
    }

    pub fn calls(&self) -> Vec<(String, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn fetch_page(
        &self,
        category: &Category,
        offset: u64,
        limit: u32,
    ) -> Result<Value, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((category.key.clone(), offset));

        if self.failing.contains(&(category.key.clone(), offset)) {
            return Err(exhausted("listing"));
        }

        match self.listings.get(&category.key) {
            Some(FakeListing::Raw(page)) => Ok(page.clone()),
            Some(FakeListing::Ids(ids)) => {
                let items: Vec<Value> = ids
                    .iter()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .map(|id| json!({ "Id": id }))
                    .collect();
                Ok(json!({ "Count": ids.len(), "SearchResults": items }))
            }
            None => Ok(json!({ "Count": 0, "SearchResults": [] })),
        }
    }
}

/// Detail endpoints with per-request canned answers.
/// Unconfigured requests succeed with a small payload naming the request.
#[derive(Default)]
pub struct FakeDetails {
    responses: HashMap<DetailRequest, Result<Value, FetchError>>,
    calls: Mutex<Vec<DetailRequest>>,
}

impl FakeDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, request: DetailRequest, response: Result<Value, FetchError>) -> Self {
        self.responses.insert(request, response);
        self
    }

    /// Vehicle payload carrying a seller id and a plate number
    pub fn with_vehicle(self, car_id: &str, seller: Option<&str>, vehicle_no: Option<&str>) -> Self {
        let mut payload = json!({ "vehicleId": car_id });
        if let Some(seller) = seller {
            payload["contact"] = json!({ "userId": seller });
        }
        if let Some(vehicle_no) = vehicle_no {
            payload["vehicleNo"] = json!(vehicle_no);
        }
        self.with(
            DetailRequest::Vehicle {
                car_id: car_id.to_string(),
            },
            Ok(payload),
        )
    }

    pub fn calls(&self) -> Vec<DetailRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, matches: impl Fn(&DetailRequest) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|r| matches(r)).count()
    }
}

#[async_trait]
impl DetailSource for FakeDetails {
    async fn fetch_detail(&self, request: &DetailRequest) -> Result<Value, FetchError> {
        self.calls.lock().unwrap().push(request.clone());
        self.responses.get(request).cloned().unwrap_or_else(|| {
            Ok(json!({
                "kind": request.kind().to_string(),
                "key": request.key(),
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_creation() {
        let db = TestDatabase::new().await.unwrap();
        assert!(!db.pool().is_closed());
    }

    #[tokio::test]
    async fn test_multiple_databases_are_isolated() {
        let db1 = TestDatabase::new().await.unwrap();
        let db2 = TestDatabase::new().await.unwrap();

        sqlx::query("INSERT INTO car_queue(car_id) VALUES ('only-in-db1')")
            .execute(&db1.pool())
            .await
            .unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM car_queue")
            .fetch_one(&db2.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn fake_catalog_pages_ids() {
        let catalog = FakeCatalog::new().with_category("kia", &["A", "B", "C"]);
        let page = catalog
            .fetch_page(&Category::new("kia", "기아"), 2, 2)
            .await
            .unwrap();
        assert_eq!(page, json!({ "Count": 3, "SearchResults": [{ "Id": "C" }] }));
    }
}
