use anyhow::{Context as _, Result, bail};
use std::fs;
use std::path::Path;

use crate::Context;
use crate::cli::ConfigCommand;
use crate::config::{EXAMPLE_CONFIG, RunOverrides};
use crate::paths;
use crate::ui;

pub fn run(ctx: &Context, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Path => show_paths(ctx),
        ConfigCommand::Validate { profile } => validate(ctx, profile.as_deref()),
        ConfigCommand::Init { force } => init(&super::config_path(ctx)?, force),
    }
}

fn show_paths(ctx: &Context) -> Result<()> {
    let config = super::config_path(ctx)?;
    ui::header("Locations");
    ui::kv("Config", &describe(&config));
    let profiles = config
        .parent()
        .map_or_else(|| Path::new("profiles").to_path_buf(), |p| p.join("profiles"));
    ui::kv("Profiles", &describe(&profiles));
    ui::kv("State", &describe(&paths::state_file()?));
    ui::kv("History", &describe(&paths::metrics_file()?));
    ui::kv("Logs", &describe(&paths::log_dir()?));
    Ok(())
}

fn describe(path: &Path) -> String {
    if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (missing)", path.display())
    }
}

fn validate(ctx: &Context, profile: Option<&str>) -> Result<()> {
    let config = super::load_config(ctx, profile)?;
    config.orchestrator_options(&RunOverrides::default())?;
    let plan = config.build_plan(&RunOverrides::default(), profile)?;
    let order = plan
        .validate()
        .context("Configuration is invalid")?;

    ui::success("Configuration is valid");
    ui::kv("Targets", &plan.targets.len().to_string());
    ui::kv("Enabled", &order.len().to_string());
    for phase in &plan.phases {
        ui::kv(
            &format!("Phase {}", phase.name),
            &format!("{} ({} targets)", phase.mode, phase.targets.len()),
        );
    }
    ui::kv("Launch order", &order.join(" → "));
    Ok(())
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    fs::write(path, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    ui::success(&format!("Wrote {}", path.display()));
    ui::dim("Edit it, then check it with 'ignition config validate'");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_then_validate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ignition").join("config.toml");
        init(&path, false).unwrap();
        assert!(init(&path, false).is_err());
        init(&path, true).unwrap();

        let ctx = Context {
            verbose: 0,
            quiet: true,
            config: Some(path),
        };
        validate(&ctx, None).unwrap();
    }

    #[test]
    fn test_validate_reports_cycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[[apps]]
name = "a"
path = "a"
depends_on = ["b"]

[[apps]]
name = "b"
path = "b"
depends_on = ["a"]
"#,
        )
        .unwrap();

        let ctx = Context {
            verbose: 0,
            quiet: true,
            config: Some(path),
        };
        let err = validate(&ctx, None).unwrap_err();
        assert!(format!("{err:#}").contains("cycle"));
    }
}
