//! Path resolution for ignition
//!
//! # Environment Variables
//!
//! - `IGNITION_CONFIG_DIR` - Override config directory
//! - `IGNITION_STATE_DIR` - Override state directory (metrics history, run state, logs)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `IGNITION_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/ignition` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\ignition`
//!    - macOS/Linux: `~/.config/ignition`
//!
//! For state_dir():
//! 1. `IGNITION_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/ignition` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\ignition`
//!    - macOS/Linux: `~/.local/state/ignition`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "IGNITION_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "IGNITION_STATE_DIR";

const APP_DIR: &str = "ignition";

/// Get the ignition config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP_DIR);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join(APP_DIR));
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join(APP_DIR))
}

/// Get the ignition state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP_DIR);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            return Ok(local_app_data.join(APP_DIR));
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".local").join("state").join(APP_DIR))
}

/// Main configuration file
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Append-only run history
pub fn metrics_file() -> Result<PathBuf> {
    Ok(state_dir()?.join("metrics.jsonl"))
}

/// Cross-run state (last profile, last network)
pub fn state_file() -> Result<PathBuf> {
    Ok(state_dir()?.join("state.toml"))
}

/// Directory of the `--log-file` logs
pub fn log_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("logs"))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
