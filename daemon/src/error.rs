/// Error types for the tracking engine.
///
/// Every variant here is recovered locally: sensor failures make a tick
/// inconclusive, store failures are logged and retried at the next checkpoint,
/// and a corrupt ledger file degrades to an empty ledger. Only the gateway's
/// `success` flag ever reports a failure to the outside.
use std::path::PathBuf;

use thiserror::Error;

use crate::ledger::GameId;

/// A capability read (network reachability or foreground game) failed.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("network probe failed: {0}")]
    Network(String),
    #[error("game detection failed: {0}")]
    Detector(String),
    /// The shared configuration was being replaced while the probe read it.
    #[error("configuration busy")]
    ConfigBusy,
}

/// Reading or writing the ledger or status file failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to encode status: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("failed to replace {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt ledger file {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    /// A session was started while another game's session is still open.
    #[error("already tracking {open}, cannot start {requested}")]
    AlreadyTracking { open: GameId, requested: GameId },
}
