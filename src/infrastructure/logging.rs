//! Logging system configuration and initialization
//!
//! This module provides the logging setup for the crawler:
//! - Console output with KST (Korea Standard Time) timestamps
//! - Optional daily-rotated file output through a non-blocking writer
//! - Structured JSON logging for the file (optional)
//! - Noisy dependency targets suppressed unless TRACE is requested
//! - A `run` span carrying a fresh `run_id` for every invocation

use anyhow::{Result, anyhow};
use chrono::{FixedOffset, Utc};
use lazy_static::lazy_static;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{Span, Subscriber, info, info_span};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};
use uuid::Uuid;

pub use crate::infrastructure::config::LoggingConfig;

const KST_OFFSET_SECONDS: i32 = 9 * 3600;

/// Dependency targets kept quiet below TRACE
const QUIET_TARGETS: &[&str] = &[
    "sqlx::query=warn",
    "sqlx::sqlite=warn",
    "reqwest=info",
    "hyper=warn",
    "hyper_util=warn",
    "h2=warn",
    "rustls=warn",
    "tokio=info",
    "runtime=warn",
];

// Global guard to keep the log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

/// Custom time formatter for KST (Korea Standard Time, UTC+9)
struct KstTimeFormatter;

impl FormatTime for KstTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Utc::now();
        match FixedOffset::east_opt(KST_OFFSET_SECONDS) {
            Some(kst) => write!(w, "{}", now.with_timezone(&kst).format("%Y-%m-%d %H:%M:%S%.3f %Z")),
            None => write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S%.3f UTC")),
        }
    }
}

/// Get the log directory relative to the executable location
fn get_log_directory() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(std::path::Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    exe_dir.join("logs")
}

/// `RUST_LOG` wins when set; otherwise the configured level for our crates
/// with dependency chatter suppressed unless the level is TRACE.
pub fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(level)?;
    if !level.to_lowercase().contains("trace") {
        for directive in QUIET_TARGETS {
            filter = filter.add_directive(directive.parse()?);
        }
        for target in ["encar_tracker_lib", "encar_tracker"] {
            filter = filter.add_directive(format!("{target}={level}").parse()?);
        }
    }
    Ok(filter)
}

fn console_layer<S>(enabled: bool) -> Option<impl Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    enabled.then(|| {
        fmt::Layer::new()
            .with_writer(std::io::stdout)
            .with_timer(KstTimeFormatter)
            .with_target(false)
    })
}

/// Initialize logging with custom configuration
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(&config.level)?;
    let registry = Registry::default().with(env_filter);

    if !config.file_output {
        if !config.console_output {
            return Err(anyhow!("No logging output configured"));
        }
        registry.with(console_layer(true)).try_init()?;
        info!("Logging system initialized (level: {})", config.level);
        return Ok(());
    }

    let log_dir = config
        .log_directory
        .clone()
        .unwrap_or_else(get_log_directory);
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;

    let file_appender = rolling::daily(&log_dir, &config.file_name);
    let (file_writer, file_guard) = non_blocking(file_appender);

    // Store the guard globally to prevent it from being dropped
    LOG_GUARDS
        .lock()
        .map_err(|_| anyhow!("Log guard registry poisoned"))?
        .push(file_guard);

    if config.json_format {
        let file_layer = fmt::Layer::new()
            .json()
            .with_writer(file_writer)
            .with_timer(KstTimeFormatter)
            .with_target(true)
            .with_current_span(true)
            .with_ansi(false);
        registry
            .with(file_layer)
            .with(console_layer(config.console_output))
            .try_init()?;
    } else {
        // time + level + message only
        let file_layer = fmt::Layer::new()
            .with_writer(file_writer)
            .with_timer(KstTimeFormatter)
            .with_target(false)
            .with_ansi(false);
        registry
            .with(file_layer)
            .with(console_layer(config.console_output))
            .try_init()?;
    }

    info!("Logging system initialized");
    info!("Log directory: {:?}", log_dir);
    info!("Log level: {}", config.level);
    info!("JSON format: {}", config.json_format);
    Ok(())
}

/// Span wrapping one CLI invocation; every event inside carries its `run_id`
pub fn run_span(command: &str) -> Span {
    info_span!("run", run_id = %Uuid::new_v4(), command = command)
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== Encar Tracker System Information ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);

    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }
    info!("========================================");
}
