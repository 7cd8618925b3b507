pub mod config;
pub mod history;
pub mod run;
pub mod secret;

use crate::Context;
use crate::config::Config;
use crate::paths;
use anyhow::{Result, bail};
use std::path::PathBuf;

/// Config file from `--config`, or the default location
pub fn config_path(ctx: &Context) -> Result<PathBuf> {
    match &ctx.config {
        Some(path) => Ok(path.clone()),
        None => paths::config_file(),
    }
}

/// Load the configuration for a command, applying `profile`
pub fn load_config(ctx: &Context, profile: Option<&str>) -> Result<Config> {
    let path = config_path(ctx)?;
    if !path.exists() {
        bail!(
            "No configuration at {}. Run 'ignition config init' to create one.",
            path.display()
        );
    }
    log::debug!("Loading configuration from {}", path.display());
    Config::load_from(&path, profile)
}
