/// Canonical file locations. Everything lives in one data directory:
///   - config.toml                Written by the user/UI, read by the daemon.
///   - offline_time_data.json     The ledger, written by the daemon.
///   - status.toml                Written by the daemon, read by the UI.
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const HOME_OVERRIDE_VAR: &str = "OFFTIME_HOME";
#[cfg(windows)]
const APP_DIR_NAME: &str = "OfflineTime";
#[cfg(not(windows))]
const APP_DIR_NAME: &str = "offline-time";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const LEDGER_FILE_NAME: &str = "offline_time_data.json";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the data directory, honouring `$OFFTIME_HOME` first.
pub fn app_data_dir() -> Result<PathBuf> {
    resolve_app_dir(|key| std::env::var_os(key))
}

fn resolve_app_dir(env: impl Fn(&str) -> Option<OsString>) -> Result<PathBuf> {
    let var = |key: &str| env(key).filter(|v| !v.is_empty());

    if let Some(dir) = var(HOME_OVERRIDE_VAR) {
        return Ok(PathBuf::from(dir));
    }

    #[cfg(windows)]
    {
        let appdata = var("APPDATA").context("APPDATA environment variable not set")?;
        Ok(PathBuf::from(appdata).join(APP_DIR_NAME))
    }

    #[cfg(not(windows))]
    {
        if let Some(xdg) = var("XDG_DATA_HOME") {
            return Ok(PathBuf::from(xdg).join(APP_DIR_NAME));
        }
        let home = var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".local").join("share").join(APP_DIR_NAME))
    }
}

pub fn config_file_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE_NAME)
}

pub fn ledger_file_path(dir: &Path) -> PathBuf {
    dir.join(LEDGER_FILE_NAME)
}

pub fn status_file_path(dir: &Path) -> PathBuf {
    dir.join(STATUS_FILE_NAME)
}
