mod admin_api;
mod config;
mod detection;
mod models;
mod scheduler;
mod storage;
mod sync;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::admin_api::routes::AppState;
use crate::admin_api::server::AdminApiServer;
use crate::config::settings::{LoggingConfig, Settings};
use crate::detection::engine::DetectionEngine;
use crate::detection::ip_index::IpRangeIndex;
use crate::detection::patterns::{PatternCatalog, CATALOG_VERSION};
use crate::scheduler::Scheduler;
use crate::storage::sqlite::SqliteStore;
use crate::storage::RangeStore;
use crate::sync::synchronizer::Synchronizer;

const DEFAULT_CONFIG_PATH: &str = "/etc/botwatch/botwatch.toml";

struct CliArgs {
    config_path: String,
    sync_once: bool,
}

/// Parse `--config <path>` and `--sync-once`.
fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_path: DEFAULT_CONFIG_PATH.to_string(),
        sync_once: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if let Some(path) = args.get(i + 1) {
                    cli.config_path = path.clone();
                }
                i += 2;
            }
            "--sync-once" => {
                cli.sync_once = true;
                i += 1;
            }
            _ => i += 1,
        }
    }

    cli
}

/// Initialise the `tracing` subscriber with stdout and, when the log file
/// can be opened, file output.
fn init_tracing(logging: &LoggingConfig) {
    let log_file = Path::new(&logging.file)
        .parent()
        .map(std::fs::create_dir_all)
        .transpose()
        .and_then(|_| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&logging.file)
        });
    let log_file = match log_file {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("Cannot open log file {}: {}; logging to stdout only", logging.file, e);
            None
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},botwatch=debug", logging.level)));

    let (plain_stdout, json_stdout) = if logging.json {
        (None, Some(fmt::layer().json().with_writer(std::io::stdout)))
    } else {
        (Some(fmt::layer().with_writer(std::io::stdout).with_target(true)), None)
    };

    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(plain_stdout)
        .with(json_stdout)
        .with(file_layer)
        .init();
}

fn open_store(path: &str) -> Result<SqliteStore> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create storage directory {}", parent.display()))?;
        }
    }
    SqliteStore::new(path).with_context(|| format!("Failed to open SQLite store at {}", path))
}

/// Run every source once, print a summary, and report failure if nothing
/// could be updated.
async fn sync_once(sync: &Synchronizer) -> Result<ExitCode> {
    let batch = sync.update_all().await;

    for report in &batch.sources {
        match &report.error {
            None => println!(
                "{:<20} ok      +{} -{} ({} invalid) in {} ms",
                report.source, report.added, report.deactivated, report.invalid, report.duration_ms
            ),
            Some(e) => println!("{:<20} FAILED  {}", report.source, e),
        }
    }
    println!(
        "{} sources: {} ok, {} failed",
        batch.total, batch.successful, batch.failed
    );

    let stats = sync.stats(None)?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if batch.total > 0 && batch.successful == 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // ---------------------------------------------------------------
    // 1. Configuration
    // ---------------------------------------------------------------
    let cli = parse_args();
    let (settings, found) = Settings::load_or_default(&cli.config_path)?;

    // ---------------------------------------------------------------
    // 2. Logging
    // ---------------------------------------------------------------
    init_tracing(&settings.logging);

    info!("Starting botwatch {}", env!("CARGO_PKG_VERSION"));
    if found {
        info!("Config loaded from {}", cli.config_path);
    } else {
        warn!("Config file {} not found, using built-in defaults", cli.config_path);
    }

    // ---------------------------------------------------------------
    // 3. Storage and detection
    // ---------------------------------------------------------------
    let store: Arc<dyn RangeStore> = Arc::new(open_store(&settings.storage.sqlite_path)?);
    info!("Storage layer initialised at {}", settings.storage.sqlite_path);

    let catalog = Arc::new(PatternCatalog::new().context("Failed to compile pattern catalog")?);
    info!(
        version = CATALOG_VERSION,
        signatures = catalog.signatures().len(),
        "Pattern catalog compiled"
    );

    let index = Arc::new(IpRangeIndex::init(store.clone(), &settings.detection));
    if index.current().is_empty() {
        warn!("IP index is empty until the first successful sync");
    }
    let engine = Arc::new(DetectionEngine::new(catalog, index.clone()));

    // ---------------------------------------------------------------
    // 4. Synchronizer
    // ---------------------------------------------------------------
    let sync = Arc::new(
        Synchronizer::new(store.clone(), index.clone(), &settings.sync, &settings.scrape)
            .context("Failed to build HTTP client")?,
    );

    if cli.sync_once {
        return sync_once(&sync).await;
    }

    // ---------------------------------------------------------------
    // 5. Scheduler
    // ---------------------------------------------------------------
    let scheduler = Arc::new(Scheduler::new(sync.clone(), &settings.scheduler)?);
    if settings.scheduler.enabled {
        scheduler.start();
    } else {
        info!("Scheduler disabled by configuration");
    }

    // ---------------------------------------------------------------
    // 6. Admin API
    // ---------------------------------------------------------------
    let admin_handle = if !settings.admin_api.enabled {
        info!("Admin API disabled by configuration");
        None
    } else if settings.admin_api.api_key.is_empty() {
        warn!("admin_api.api_key is empty, admin API not started");
        None
    } else {
        let state = AppState {
            engine: engine.clone(),
            index: index.clone(),
            sync: sync.clone(),
            scheduler: scheduler.clone(),
            start_time: Instant::now(),
            api_key: settings.admin_api.api_key.clone(),
        };
        let admin_server = AdminApiServer::new(state, settings.admin_api.bind.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = admin_server.run().await {
                error!("Admin API server error: {}", e);
            }
        }))
    };

    info!("botwatch is running. Press Ctrl+C to shut down.");

    // ---------------------------------------------------------------
    // 7. Wait for shutdown signal
    // ---------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Shutting down botwatch...");

    scheduler.stop();
    if let Some(handle) = admin_handle {
        handle.abort();
    }

    info!("botwatch shut down gracefully");
    Ok(ExitCode::SUCCESS)
}
