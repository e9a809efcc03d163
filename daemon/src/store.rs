/// Durable storage of the ledger as a JSON document.
///
/// Writes go to a temporary file in the target's directory which is then
/// renamed over the target, so a crash mid-write leaves either the old or the
/// new file on disk, never a truncated one.
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::ledger::Ledger;

pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the ledger, falling back to an empty one when the file is missing
    /// or unusable. Startup never fails because of the ledger file.
    pub fn load(&self) -> Ledger {
        match self.try_load() {
            Ok(ledger) => ledger,
            Err(e) => {
                tracing::error!(error = %e, "Starting with an empty ledger");
                Ledger::new()
            }
        }
    }

    fn try_load(&self) -> Result<Ledger, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No ledger file yet");
                return Ok(Ledger::new());
            }
            Err(e) => {
                return Err(StoreError::Corrupt {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })
            }
        };

        let mut ledger: Ledger =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        for (game, record) in ledger.iter_mut() {
            let dropped = record.normalize();
            if dropped > 0 {
                tracing::warn!(game = %game, dropped, "Dropped invalid sessions");
            }
        }
        tracing::info!(games = ledger.len(), path = %self.path.display(), "Ledger loaded");
        Ok(ledger)
    }

    /// Atomically replaces the ledger file with `ledger`.
    pub fn save(&self, ledger: &Ledger) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(ledger)?;
        write_atomic(&self.path, content.as_bytes())
    }
}

/// Writes `bytes` to `path` through a sibling temp file and a rename.
/// Creates the parent directory if it does not exist.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(io_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| StoreError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}
