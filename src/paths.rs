//! Path resolution for ferry
//!
//! # Environment Variables
//!
//! - `FERRY_CONFIG_DIR` - Override config directory
//! - `FERRY_STATE_DIR` - Override state directory (runs, journals, reports)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `FERRY_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/ferry` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\ferry`
//!    - macOS/Linux: `~/.config/ferry`
//!
//! For state_dir():
//! 1. `FERRY_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/ferry` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\ferry`
//!    - macOS/Linux: `~/.local/state/ferry`

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "FERRY_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "FERRY_STATE_DIR";

const APP: &str = "ferry";

/// Get the ferry config directory path
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
        let path = PathBuf::from(xdg_config).join(APP);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            let path = app_data.join(APP);
            log::debug!("Using Windows config dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the ferry state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join(APP);
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Directory holding one subdirectory per run.
///
/// `override_dir` comes from `[paths] runs_dir` in the config file.
pub fn runs_dir(override_dir: Option<&str>) -> Result<PathBuf> {
    match override_dir {
        Some(dir) => Ok(expand(dir)),
        None => Ok(state_dir()?.join("runs")),
    }
}

/// Expand ~ and environment variables in a path string.
///
/// # Examples
///
/// ```ignore
/// let plans = paths::expand("~/migrations/plans");
/// let runs = paths::expand("$FERRY_STATE_DIR/runs");
/// ```
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
