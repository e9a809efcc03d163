use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::StoreError;
use crate::store::write_atomic;
use crate::tracker::TrackingState;

/// Current operational state of the daemon.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    /// Tracking is switched off; status changes are ignored.
    Disabled,
    /// Tracking is on but no game is being played offline.
    Idle,
    /// An offline session is open for `active_game`.
    Tracking,
}

impl From<&TrackingState> for DaemonState {
    fn from(state: &TrackingState) -> Self {
        match state {
            TrackingState::Disabled => DaemonState::Disabled,
            TrackingState::Idle => DaemonState::Idle,
            TrackingState::Tracking(_) => DaemonState::Tracking,
        }
    }
}

/// Runtime status written by the daemon to `<data dir>/status.toml`.
/// The UI may read it; the daemon reads back only `tracking_enabled` at startup.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    /// Current operational state.
    pub state: DaemonState,
    /// Persisted enable/disable switch.
    #[serde(default = "default_enabled")]
    pub tracking_enabled: bool,
    /// Game with an open offline session, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_game: Option<String>,
    /// Last conclusive network reading, unknown until the first poll.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    /// RFC 3339 timestamp of the most recent successful checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checkpoint: Option<String>,
    /// Human-readable error message if the daemon encountered a non-fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonStatus {
    /// Constructs the startup status for the persisted enabled flag.
    pub fn new(tracking_enabled: bool) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: if tracking_enabled {
                DaemonState::Idle
            } else {
                DaemonState::Disabled
            },
            tracking_enabled,
            active_game: None,
            online: None,
            last_checkpoint: None,
            error: None,
        }
    }
}

/// Serializes `status` to TOML and atomically replaces the file at `path`.
pub fn write_status(path: &Path, status: &DaemonStatus) -> Result<(), StoreError> {
    let content = toml::to_string_pretty(status)?;
    write_atomic(path, content.as_bytes())
}

/// Reads the persisted enabled flag. A missing or unreadable status file
/// means tracking is enabled.
pub fn load_enabled(path: &Path) -> bool {
    #[derive(Deserialize)]
    struct Persisted {
        #[serde(default = "default_enabled")]
        tracking_enabled: bool,
    }

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read status file; tracking enabled");
            return true;
        }
    };
    match toml::from_str::<Persisted>(&content) {
        Ok(p) => p.tracking_enabled,
        Err(e) => {
            tracing::warn!(error = %e, "Unparsable status file; tracking enabled");
            true
        }
    }
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::GameId;

    // ── DaemonStatus::new ─────────────────────────────────────────────────────

    #[test]
    fn new_follows_enabled_flag() {
        assert_eq!(DaemonStatus::new(true).state, DaemonState::Idle);
        assert_eq!(DaemonStatus::new(false).state, DaemonState::Disabled);
    }

    #[test]
    fn new_has_no_optional_fields() {
        let s = DaemonStatus::new(true);
        assert!(s.active_game.is_none());
        assert!(s.online.is_none());
        assert!(s.last_checkpoint.is_none());
        assert!(s.error.is_none());
    }

    #[test]
    fn new_version_matches_cargo_pkg() {
        assert_eq!(DaemonStatus::new(true).version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn state_maps_from_tracking_state() {
        assert_eq!(DaemonState::from(&TrackingState::Disabled), DaemonState::Disabled);
        assert_eq!(DaemonState::from(&TrackingState::Idle), DaemonState::Idle);
        assert_eq!(
            DaemonState::from(&TrackingState::Tracking(GameId::from("AppA"))),
            DaemonState::Tracking
        );
    }

    // ── write_status ──────────────────────────────────────────────────────────

    #[test]
    fn state_serializes_to_lowercase() {
        let mut s = DaemonStatus::new(true);
        s.state = DaemonState::Tracking;
        let content = toml::to_string_pretty(&s).unwrap();
        assert!(content.contains("state = \"tracking\""));
    }

    #[test]
    fn write_status_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("status.toml");
        write_status(&path, &DaemonStatus::new(true)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn write_status_content_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");

        let mut original = DaemonStatus::new(true);
        original.state = DaemonState::Tracking;
        original.active_game = Some("1245620".to_string());
        original.online = Some(false);
        write_status(&path, &original).unwrap();

        let parsed: DaemonStatus = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.state, DaemonState::Tracking);
        assert_eq!(parsed.active_game.as_deref(), Some("1245620"));
        assert_eq!(parsed.online, Some(false));
    }

    #[test]
    fn write_status_omits_none_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        write_status(&path, &DaemonStatus::new(true)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("active_game"));
        assert!(!content.contains("online"));
        assert!(!content.contains("last_checkpoint"));
        assert!(!content.contains("error"));
    }

    // ── load_enabled ──────────────────────────────────────────────────────────

    #[test]
    fn load_enabled_defaults_to_true_without_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_enabled(&dir.path().join("status.toml")));
    }

    #[test]
    fn load_enabled_reads_persisted_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        write_status(&path, &DaemonStatus::new(false)).unwrap();
        assert!(!load_enabled(&path));
    }

    #[test]
    fn load_enabled_defaults_to_true_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        assert!(load_enabled(&path));
    }

    #[test]
    fn load_enabled_defaults_to_true_when_field_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        std::fs::write(&path, "state = \"idle\"\n").unwrap();
        assert!(load_enabled(&path));
    }
}
