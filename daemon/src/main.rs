mod config;
mod engine;
mod error;
mod event;
mod gateway;
mod ledger;
mod monitor;
mod paths;
mod probe;
mod status;
mod store;
mod tracker;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, RwLock};
use tracing_subscriber::EnvFilter;

use crate::engine::Engine;
use crate::gateway::Gateway;
use crate::monitor::StatusMonitor;
use crate::probe::{ProcessGameDetector, TcpProbe};
use crate::store::LedgerStore;

#[derive(Debug, Parser)]
#[command(author, version, about = "Tracks time spent playing games while offline")]
struct Cli {
    /// Serve gateway requests as JSON lines on stdin/stdout; exit on stdin EOF.
    #[arg(long)]
    stdio: bool,
    /// Data directory holding config.toml, the ledger and status.toml.
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to the gateway in --stdio mode.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = match cli.data_dir {
        Some(dir) => dir,
        None => paths::app_data_dir()?,
    };
    std::fs::create_dir_all(&app_dir)
        .with_context(|| format!("Failed to create data directory {}", app_dir.display()))?;

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::config_file_path(&app_dir);
    let initial_config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Using default config");
        config::Config::default()
    });
    let poll_interval = initial_config.tracking.poll_interval();
    let checkpoint_interval = initial_config.tracking.checkpoint_interval();
    let shared_config = Arc::new(RwLock::new(initial_config));

    // ── Engine ────────────────────────────────────────────────────────────────
    let engine = Engine::start(
        LedgerStore::new(paths::ledger_file_path(&app_dir)),
        paths::status_file_path(&app_dir),
    );

    let (event_tx, event_rx) = mpsc::channel::<event::DaemonEvent>(32);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path, event_tx.clone()));

    let monitor = StatusMonitor::new(
        TcpProbe::new(Arc::clone(&shared_config)),
        ProcessGameDetector::new(Arc::clone(&shared_config)),
    );
    tokio::spawn(monitor::run(
        monitor,
        poll_interval,
        engine.resync_handle(),
        event_tx.clone(),
    ));
    tokio::spawn(engine::checkpoint_timer(checkpoint_interval, event_tx.clone()));

    if cli.stdio {
        tokio::spawn(gateway::serve_stdio(
            Gateway::new(event_tx.clone()),
            event_tx.clone(),
        ));
    }

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(event::DaemonEvent::Shutdown).await;
            }
        });
    }
    drop(event_tx);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %app_dir.display(),
        poll_secs = poll_interval.as_secs(),
        checkpoint_secs = checkpoint_interval.as_secs(),
        "offtime-daemon started"
    );

    engine::run(engine, event_rx, shared_config).await;
    Ok(())
}
