//! Configuration infrastructure
//!
//! Contains configuration loading and management for Encar crawling.
//!
//! Every section is optional in the JSON file; missing sections and
//! fields fall back to the defaults in [`defaults`]. Values are read once
//! per invocation and treated as fixed parameters afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::domain::category::{Category, ListingQuery};
use crate::infrastructure::retry_policy::RetryPolicy;

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub http: HttpConfig,
    pub enumerator: EnumeratorConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

/// Embedded store location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: PathBuf,
}

/// Outbound HTTP settings shared by listing and detail calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub accept_language: String,
    pub referer: String,
    pub origin: String,
    pub listing_base_url: String,
    pub detail_base_url: String,
    pub connect_timeout_seconds: u64,
    /// Total timeout for listing page requests
    pub listing_timeout_seconds: u64,
    /// Total timeout for detail requests
    pub detail_timeout_seconds: u64,
    /// 0 disables the client-side rate limiter
    pub max_requests_per_second: u32,
    pub listing_retry: RetryPolicy,
    pub detail_retry: RetryPolicy,
}

/// Random pause between outbound calls, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    #[must_use]
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    #[must_use]
    pub const fn none() -> Self {
        Self::new(0, 0)
    }
}

/// Catalog enumeration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumeratorConfig {
    pub categories: Vec<Category>,
    pub page_size: u32,
    pub query: ListingQuery,
    pub delay: DelayRange,
}

/// What to do when a secondary key (seller id, vehicle number) cannot be derived
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    /// Skip the dependent resource; the item still completes and is reported as partial
    #[default]
    Skip,
    /// Fail the item so an operator requeue retries it later
    Fail,
}

/// Detail worker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum PENDING entries claimed per run
    pub batch_size: u32,
    pub delay: DelayRange,
    pub missing_secondary_key: MissingKeyPolicy,
    /// ERROR entries at or above this retry count are left alone by `requeue-errors`
    pub max_retry_count: u32,
}

/// Logging configuration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    /// Enable JSON formatted logs (file output only)
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Defaults to `logs/` next to the executable
    pub log_directory: Option<PathBuf>,
    pub file_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(defaults::DATABASE_PATH),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::USER_AGENT.to_string(),
            accept_language: defaults::ACCEPT_LANGUAGE.to_string(),
            referer: defaults::REFERER.to_string(),
            origin: defaults::ORIGIN.to_string(),
            listing_base_url: defaults::LISTING_BASE_URL.to_string(),
            detail_base_url: defaults::DETAIL_BASE_URL.to_string(),
            connect_timeout_seconds: defaults::CONNECT_TIMEOUT_SECONDS,
            listing_timeout_seconds: defaults::LISTING_TIMEOUT_SECONDS,
            detail_timeout_seconds: defaults::DETAIL_TIMEOUT_SECONDS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            listing_retry: RetryPolicy::listing(),
            detail_retry: RetryPolicy::detail(),
        }
    }
}

impl Default for EnumeratorConfig {
    fn default() -> Self {
        Self {
            categories: defaults::MANUFACTURERS
                .iter()
                .map(|(key, name)| Category::new(*key, *name))
                .collect(),
            page_size: defaults::PAGE_SIZE,
            query: ListingQuery::default(),
            delay: DelayRange::new(
                defaults::LISTING_DELAY_MIN_MS,
                defaults::LISTING_DELAY_MAX_MS,
            ),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::WORKER_BATCH_SIZE,
            delay: DelayRange::new(defaults::DETAIL_DELAY_MIN_MS, defaults::DETAIL_DELAY_MAX_MS),
            missing_secondary_key: MissingKeyPolicy::default(),
            max_retry_count: defaults::MAX_RETRY_COUNT,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            log_directory: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
        }
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join("encar-tracker");

        Ok(config_dir)
    }

    /// Manager for the per-user configuration file
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_dir()?.join("config.json");
        Ok(Self { config_path })
    }

    /// Manager for an explicit configuration file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    /// Load configuration from file, creating default if it doesn't exist.
    ///
    /// The file is layered over [`AppConfig::default`], so any field it
    /// leaves out keeps the default of its own section (a partial
    /// `detail_retry` keeps the detail schedule, not the listing one).
    /// A file that cannot be parsed is an error and is never overwritten.
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!("Configuration file not found, creating default: {:?}", self.config_path);
            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("Failed to read configuration file")?;

        let config = Self::parse_layered(&content).with_context(|| {
            format!(
                "Invalid configuration file {:?}; fix or remove it",
                self.config_path
            )
        })?;
        info!("Loaded configuration from: {:?}", self.config_path);
        Ok(config)
    }

    /// Parses `content` on top of the default configuration
    pub fn parse_layered(content: &str) -> Result<AppConfig> {
        let overlay: Value = serde_json::from_str(content).context("Malformed JSON")?;
        if !overlay.is_object() {
            anyhow::bail!("Configuration root must be a JSON object");
        }
        let mut merged = serde_json::to_value(AppConfig::default())
            .context("Failed to serialize default configuration")?;
        merge_json(&mut merged, overlay);
        serde_json::from_value(merged).context("Configuration does not match the expected layout")
    }

    /// Save configuration to file
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

/// Recursively overlays `overlay` onto `base`; objects merge key by key,
/// everything else replaces
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Default configuration values
pub mod defaults {
    pub const DATABASE_PATH: &str = "encar_dump.db";

    pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36";
    pub const ACCEPT_LANGUAGE: &str = "ko-KR,ko;q=0.9,en;q=0.8";
    pub const REFERER: &str = "https://www.encar.com/";
    pub const ORIGIN: &str = "https://www.encar.com";

    pub const LISTING_BASE_URL: &str = "https://api.encar.com/search/car/list/pricesupply";
    pub const DETAIL_BASE_URL: &str = "https://api.encar.com/v1/readside";

    pub const CONNECT_TIMEOUT_SECONDS: u64 = 3;
    pub const LISTING_TIMEOUT_SECONDS: u64 = 20;
    pub const DETAIL_TIMEOUT_SECONDS: u64 = 15;
    pub const MAX_REQUESTS_PER_SECOND: u32 = 10;

    /// Listing page size (offset step)
    pub const PAGE_SIZE: u32 = 500;
    pub const LISTING_DELAY_MIN_MS: u64 = 200;
    pub const LISTING_DELAY_MAX_MS: u64 = 550;

    pub const WORKER_BATCH_SIZE: u32 = 500;
    pub const DETAIL_DELAY_MIN_MS: u64 = 0;
    pub const DETAIL_DELAY_MAX_MS: u64 = 150;
    pub const MAX_RETRY_COUNT: u32 = 5;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_JSON_FORMAT: bool = false;
    pub const LOG_CONSOLE_OUTPUT: bool = true;
    pub const LOG_FILE_OUTPUT: bool = false;
    pub const LOG_FILE_NAME: &str = "encar-tracker.log";

    /// Domestic manufacturers enumerated by default: (key, listing filter name)
    pub const MANUFACTURERS: &[(&str, &str)] = &[
        ("hyundai", "현대"),
        ("kia", "기아"),
        ("genesis", "제네시스"),
        ("chevrolet", "쉐보레(GM대우)"),
        ("renault", "르노코리아(삼성)"),
        ("kgm", "KG모빌리티(쌍용)"),
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_cover_all_manufacturers() {
        let config = AppConfig::default();
        assert_eq!(config.enumerator.categories.len(), 6);
        assert_eq!(config.enumerator.page_size, 500);
        assert_eq!(config.http.listing_retry.max_attempts, 5);
        assert_eq!(config.http.detail_retry.max_attempts, 3);
        assert_eq!(config.worker.missing_secondary_key, MissingKeyPolicy::Skip);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "worker": { "batch_size": 10, "missing_secondary_key": "fail" } }"#,
        )
        .unwrap();
        assert_eq!(config.worker.batch_size, 10);
        assert_eq!(config.worker.missing_secondary_key, MissingKeyPolicy::Fail);
        assert_eq!(config.worker.max_retry_count, defaults::MAX_RETRY_COUNT);
        assert_eq!(config.store, StoreConfig::default());
    }

    #[tokio::test]
    async fn load_creates_default_file() -> Result<()> {
        let dir = tempdir()?;
        let manager = ConfigManager::with_path(dir.path().join("nested/config.json"));

        let config = manager.load_config().await?;
        assert_eq!(config, AppConfig::default());
        assert!(manager.config_path().exists());
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_file_is_an_error_and_left_untouched() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "{ not json").await?;

        let manager = ConfigManager::with_path(&path);
        assert!(manager.load_config().await.is_err());
        assert_eq!(tokio::fs::read_to_string(&path).await?, "{ not json");

        tokio::fs::write(&path, r#"{ "worker": { "batch_size": "many" } }"#).await?;
        assert!(manager.load_config().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn partial_nested_sections_keep_their_own_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        let content = r#"{
            "store": { "database_path": "/data/prod.db" },
            "http": {
                "listing_retry": { "max_attempts": 8 },
                "detail_retry": { "max_attempts": 4 }
            },
            "enumerator": { "query": { "max_mileage": 150000 }, "delay": { "max_ms": 900 } }
        }"#;
        tokio::fs::write(&path, content).await?;

        let config = ConfigManager::with_path(&path).load_config().await?;

        assert_eq!(config.store.database_path, PathBuf::from("/data/prod.db"));
        assert_eq!(config.http.listing_retry.max_attempts, 8);
        assert_eq!(config.http.detail_retry.max_attempts, 4);
        assert_eq!(
            config.http.detail_retry.forbidden_step_ms,
            RetryPolicy::detail().forbidden_step_ms
        );
        assert_eq!(config.enumerator.query.max_mileage, 150_000);
        assert_eq!(config.enumerator.query.sort_field, "PriceAsc");
        assert_eq!(
            config.enumerator.delay,
            DelayRange::new(defaults::LISTING_DELAY_MIN_MS, 900)
        );
        assert_eq!(tokio::fs::read_to_string(&path).await?, content);
        Ok(())
    }

    #[test]
    fn nested_structs_deserialize_from_partial_objects() {
        let policy: RetryPolicy = serde_json::from_str(r#"{ "max_attempts": 8 }"#).unwrap();
        assert_eq!(policy.max_attempts, 8);
        assert_eq!(policy.base_delay_ms, RetryPolicy::default().base_delay_ms);

        let range: DelayRange = serde_json::from_str(r#"{ "max_ms": 10 }"#).unwrap();
        assert_eq!(range, DelayRange::new(0, 10));

        let query: ListingQuery = serde_json::from_str(r#"{ "sort_field": "Year" }"#).unwrap();
        assert_eq!(query.max_mileage, ListingQuery::default().max_mileage);
    }

    #[tokio::test]
    async fn round_trips_saved_values() -> Result<()> {
        let dir = tempdir()?;
        let manager = ConfigManager::with_path(dir.path().join("config.json"));

        let mut config = AppConfig::default();
        config.enumerator.categories = vec![Category::new("kia", "기아")];
        config.worker.delay = DelayRange::none();
        manager.save_config(&config).await?;

        assert_eq!(manager.load_config().await?, config);
        Ok(())
    }
}
