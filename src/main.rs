//! Encar Tracker command line
//!
//! Usage:
//!     encar-tracker enumerate
//!     encar-tracker work --batch-size 500
//!     encar-tracker requeue-errors --max-retries 5
//!     encar-tracker stats

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};

use encar_tracker_lib::application::{CatalogEnumerator, DetailWorker, Maintenance};
use encar_tracker_lib::infrastructure::logging::{log_system_info, run_span};
use encar_tracker_lib::infrastructure::{
    AppConfig, ConfigManager, DatabaseConnection, EncarApi, init_logging_with_config,
};

#[derive(Parser, Debug)]
#[command(name = "encar-tracker", version, about = "Encar listing tracker and detail collector")]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, env = "ENCAR_TRACKER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// SQLite database file, overrides the configuration
    #[arg(long, env = "ENCAR_TRACKER_DB", global = true)]
    db: Option<PathBuf>,

    /// Log level, overrides the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the catalog, update the presence ledger and queue new listings
    Enumerate {
        /// Only these category keys (finalization is skipped for partial scans)
        #[arg(long = "category")]
        categories: Vec<String>,
    },
    /// Fetch details for one batch of PENDING listings
    Work {
        #[arg(long)]
        batch_size: Option<u32>,
    },
    /// Queue listing ids by hand
    Enqueue {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Move ERROR entries below the retry ceiling back to PENDING
    RequeueErrors {
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Move RUNNING entries left by an interrupted worker back to PENDING
    RecoverRunning,
    /// Print queue, ledger and detail table counts
    Stats,
    /// Create the database schema and exit
    InitDb,
}

impl Command {
    const fn name(&self) -> &'static str {
        match self {
            Self::Enumerate { .. } => "enumerate",
            Self::Work { .. } => "work",
            Self::Enqueue { .. } => "enqueue",
            Self::RequeueErrors { .. } => "requeue-errors",
            Self::RecoverRunning => "recover-running",
            Self::Stats => "stats",
            Self::InitDb => "init-db",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    let mut config = manager.load_config().await?;
    if let Some(db) = cli.db {
        config.store.database_path = db;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_logging_with_config(&config.logging)?;
    log_system_info();
    info!("Configuration: {:?}", manager.config_path());

    let span = run_span(cli.command.name());
    execute(cli.command, config).instrument(span).await
}

async fn execute(command: Command, config: AppConfig) -> Result<()> {
    let db = DatabaseConnection::open(&config.store.database_path).await?;
    db.migrate().await?;
    info!("Database: {}", config.store.database_path.display());

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received, stopping at the next transaction boundary");
            signal_token.cancel();
        }
    });

    let result = dispatch(command, &config, db.pool().clone(), &cancel).await;
    db.close().await;
    result
}

/// Runs one command against an open store. Errors propagate to `execute`,
/// which closes the pool either way.
async fn dispatch(
    command: Command,
    config: &AppConfig,
    pool: SqlitePool,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        Command::Enumerate { categories } => {
            for key in &categories {
                if !config.enumerator.categories.iter().any(|c| &c.key == key) {
                    bail!("unknown category: {key}");
                }
            }
            let api = Arc::new(EncarApi::new(&config.http, config.enumerator.query.clone())?);
            let enumerator = CatalogEnumerator::new(api, pool, config.enumerator.clone());
            let report = if categories.is_empty() {
                enumerator.run(cancel).await?
            } else {
                enumerator.run_partial(&categories, cancel).await?
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Work { batch_size } => {
            let mut worker_config = config.worker.clone();
            if let Some(batch_size) = batch_size {
                worker_config.batch_size = batch_size;
            }
            let api = Arc::new(EncarApi::new(&config.http, config.enumerator.query.clone())?);
            let worker = DetailWorker::new(api, pool, worker_config);
            let report = worker.run(cancel).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Enqueue { ids } => {
            let inserted = Maintenance::new(&pool).enqueue(&ids).await?;
            println!("enqueued={inserted}");
            Ok(())
        }
        Command::RequeueErrors { max_retries } => {
            let max_retries = max_retries.unwrap_or(config.worker.max_retry_count);
            let requeued = Maintenance::new(&pool).requeue_errors(max_retries).await?;
            println!("requeued={requeued}");
            Ok(())
        }
        Command::RecoverRunning => {
            let recovered = Maintenance::new(&pool).recover_running().await?;
            println!("recovered={recovered}");
            Ok(())
        }
        Command::Stats => {
            let stats = Maintenance::new(&pool).stats().await?;
            print!("{stats}");
            Ok(())
        }
        Command::InitDb => {
            println!("✅ DB OK: {}", config.store.database_path.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_command_still_closes_the_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = AppConfig::default();
        config.store.database_path = dir.path().join("encar.db");
        let command = Command::Enumerate {
            categories: vec!["unknown".to_string()],
        };

        let error = execute(command, config).await.unwrap_err();

        assert!(error.to_string().contains("unknown category"));
        assert!(dir.path().join("encar.db").exists());
        // the last connection to close checkpoints and removes the WAL file
        assert!(!dir.path().join("encar.db-wal").exists());
        Ok(())
    }
}
