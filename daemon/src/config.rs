use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::event::DaemonEvent;

pub const MIN_POLL_INTERVAL_SECS: u64 = 1;
pub const MAX_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const MIN_CHECKPOINT_INTERVAL_SECS: u64 = 10;
pub const MAX_CHECKPOINT_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_CHECKPOINT_INTERVAL_SECS: u64 = 60;
pub const MIN_PROBE_TIMEOUT_MS: u64 = 100;
pub const MAX_PROBE_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_PROBE_HOST: &str = "www.google.com";
pub const DEFAULT_PROBE_PORT: u16 = 80;

/// Root configuration structure. Deserialized from `<data dir>/config.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub games: Vec<GameConfig>,
}

/// Timing of the status poll and of ledger checkpoints.
#[derive(Debug, Deserialize)]
pub struct TrackingConfig {
    /// Seconds between status polls. Clamped to [1, 60].
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Seconds between ledger checkpoints. Clamped to [10, 3600].
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            checkpoint_interval_secs: DEFAULT_CHECKPOINT_INTERVAL_SECS,
        }
    }
}

impl TrackingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(
            self.poll_interval_secs
                .clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS),
        )
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(
            self.checkpoint_interval_secs
                .clamp(MIN_CHECKPOINT_INTERVAL_SECS, MAX_CHECKPOINT_INTERVAL_SECS),
        )
    }
}

/// Target of the reachability probe.
#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
    #[serde(default = "default_probe_port")]
    pub probe_port: u16,
    /// Connect timeout in milliseconds. Clamped to [100, 5000].
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_host: DEFAULT_PROBE_HOST.to_string(),
            probe_port: DEFAULT_PROBE_PORT,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }
}

impl NetworkConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(
            self.probe_timeout_ms
                .clamp(MIN_PROBE_TIMEOUT_MS, MAX_PROBE_TIMEOUT_MS),
        )
    }
}

/// Maps an executable to the identifier the host uses for that game.
#[derive(Debug, Deserialize, Clone)]
pub struct GameConfig {
    /// Opaque identifier recorded in the ledger (e.g. a store app id).
    pub game_id: String,
    /// Executable filename (e.g. "eldenring.exe") used for process detection.
    pub executable_name: String,
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the config
/// file is created or modified, reloads it and sends a `ConfigReloaded` event.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create config watcher");
            return;
        }
    };

    // Watch the directory so editor-style saves (write-new + rename) are seen.
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            tracing::error!(path = %path.display(), "Config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::error!(error = %e, "Failed to watch config directory");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match load_or_default(&path) {
                Ok(config) => {
                    if tx.send(DaemonEvent::ConfigReloaded(config)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Keeping previous config"),
            }
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_checkpoint_interval() -> u64 {
    DEFAULT_CHECKPOINT_INTERVAL_SECS
}

fn default_probe_host() -> String {
    DEFAULT_PROBE_HOST.to_string()
}

fn default_probe_port() -> u16 {
    DEFAULT_PROBE_PORT
}

fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}
