//! Infrastructure layer for the store, upstream HTTP access and runtime setup
//!
//! This module provides the SQLite store and its repositories, the rate
//! limited HTTP client with its retry policy, the Encar endpoints,
//! configuration loading and logging.

pub mod config; // Configuration file and defaults
pub mod database_connection;
pub mod detail_repository;
pub mod encar_api;
pub mod http_client;
pub mod item_state_repository;
pub mod logging; // Logging infrastructure
pub mod queue_repository;
pub mod retry_policy;

// Re-export commonly used items
pub use config::{AppConfig, ConfigManager};
pub use database_connection::DatabaseConnection;
pub use detail_repository::SqliteDetailRepository;
pub use encar_api::EncarApi;
pub use http_client::{HttpClient, HttpClientConfig};
pub use item_state_repository::{LedgerCounts, SqliteItemStateRepository};
pub use logging::init_logging_with_config;
pub use queue_repository::SqliteQueueRepository;
pub use retry_policy::RetryPolicy;
