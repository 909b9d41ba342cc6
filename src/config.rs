//! `config.toml` in the config directory.
//!
//! Every field has a default, so a missing file or a partial one is fine.
//! Command-line flags override what is loaded here.

use crate::paths;
use anyhow::{Context, Result};
use applykit::RetryPolicy;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub apply: ApplySettings,
    /// Retry policy for transient client failures
    pub retry: RetryPolicy,
    pub client: ClientSettings,
    pub paths: PathSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplySettings {
    /// Concurrency limit for `ferry apply`
    pub jobs: usize,
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self { jobs: 4 }
    }
}

/// Platform client selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ClientKind {
    /// Succeed without side effects
    #[default]
    DryRun,
    /// Delegate to an external executable
    Command,
}

impl ClientKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DryRun => "dry-run",
            Self::Command => "command",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub kind: ClientKind,
    /// Executable for the `command` client
    pub command: Option<String>,
    /// Extra arguments placed before `execute`/`rollback`
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Where runs are stored; defaults to `<state dir>/runs`
    pub runs_dir: Option<String>,
}

impl FerryConfig {
    /// Load from the config directory, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = paths::config_dir()?.join(CONFIG_FILE);
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}; using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.apply.jobs == 0 {
            anyhow::bail!("[apply] jobs must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("[retry] max_attempts must be at least 1");
        }
        if self.client.kind == ClientKind::Command && self.client.command.is_none() {
            anyhow::bail!("[client] kind = \"command\" needs a command");
        }
        Ok(())
    }

    pub fn runs_dir(&self) -> Result<PathBuf> {
        paths::runs_dir(self.paths.runs_dir.as_deref())
    }
}

// ============================================================================
// Tests
// ============================================================================
