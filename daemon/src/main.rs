mod config;
mod watcher;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use snapsync::{DirStore, SyncEngine, SyncService};

use crate::config::{DaemonConfig, DaemonSettings};
use crate::watcher::NotifyWatcher;

#[derive(Parser, Debug)]
#[command(
    name = "snapsync-daemon",
    version,
    about = "Keeps configured directories in sync with a snapshot store"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level (e.g. "debug", "snapsync=trace")
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(DaemonConfig::default_path);
    let config = DaemonConfig::load(&config_path)?;
    config.validate()?;

    let _log_guard = init_tracing(&config.daemon, cli.log_level.as_deref())?;
    info!(config = %config_path.display(), "starting snapsync daemon");

    let mut services = Vec::new();
    for dir in &config.dirs {
        let exclude = dir.sync.exclusion_matcher()?;
        let store = Arc::new(DirStore::new(&dir.store_path).with_exclude(exclude));
        let engine = Arc::new(SyncEngine::new(dir.sync.clone(), store)?);
        let watcher = Box::new(NotifyWatcher::new(engine.config().versions_root()));
        let service = SyncService::start(engine, watcher)
            .await
            .with_context(|| format!("failed to start sync for '{}'", dir.sync.local_dir.display()))?;
        services.push(service);
    }
    info!(directories = services.len(), "all sync services running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    for service in services {
        service.stop().await;
    }
    info!("snapsync daemon stopped");
    Ok(())
}

/// Install the tracing subscriber; returns the appender guard that must stay
/// alive for file logging to flush.
fn init_tracing(settings: &DaemonSettings, override_level: Option<&str>) -> Result<Option<WorkerGuard>> {
    let level = override_level.unwrap_or(&settings.log_level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log level")?;

    match &settings.log_file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| "snapsync.log".as_ref());
            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}
