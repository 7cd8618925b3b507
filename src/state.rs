use crate::paths;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use launchkit::RunRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Facts remembered between runs
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct LauncherState {
    /// Profile used by the most recent run
    pub last_profile: Option<String>,

    /// Network seen at the start of the most recent run
    pub last_network: Option<String>,

    pub last_run: Option<DateTime<Utc>>,

    /// Most recent run in which every required target came up
    pub last_success: Option<DateTime<Utc>>,

    #[serde(default)]
    pub runs: u64,
}

impl LauncherState {
    /// Load state from disk, or return default if file doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::state_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("State file does not exist, using default state");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state = toml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        log::debug!("Loaded state from {}", path.display());
        Ok(state)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&paths::state_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create state directory: {}", dir.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize state")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }

    /// Fold a finished run into the state
    pub fn record_run(&mut self, record: &RunRecord, network: Option<String>) {
        self.last_profile.clone_from(&record.profile);
        self.last_network = network;
        self.last_run = Some(record.finished_at);
        if record.success {
            self.last_success = Some(record.finished_at);
        }
        self.runs += 1;
    }
}
