//! Configuration loading, profile overlays and target construction
//!
//! The configuration lives in `<config_dir>/config.toml`. A profile named `P`
//! is an overlay in `<config_dir>/profiles/P.toml`; its tables are merged key
//! by key over the base file, and any other value replaces the base value.

use crate::paths;
use anyhow::{Context, Result, bail};
use launchkit::{
    Condition, CredentialHandle, DaySet, ExecutionMode, HealthCheck, HealthMethod,
    LaunchDescriptor, NetworkKind, NetworkSet, OrchestratorOptions, Phase, RetryPolicy, RunPlan,
    Target, TimeRange, WindowGeometry,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const PHASE_SYSTEM: &str = "system";
pub const PHASE_APPS: &str = "apps";
pub const PHASE_BROWSERS: &str = "browsers";

/// Target name of the VPN step
pub const VPN_TARGET: &str = "vpn";

/// Target name of the connectivity check that runs before the VPN
pub const NETWORK_TARGET: &str = "network";

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
    pub vpn: Option<VpnConfig>,
    pub folders: Vec<FolderConfig>,
    pub ides: Vec<AppConfig>,
    pub apps: Vec<AppConfig>,
    pub browsers: BTreeMap<String, BrowserConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Retries for targets without their own health-check setting
    pub max_retries: u32,
    pub retry_delay_secs: f64,
    /// 1.0 keeps the delay fixed; larger values back off exponentially
    pub backoff_factor: f64,
    pub max_delay_secs: f64,
    /// Launch browsers concurrently
    pub parallel_browsers: bool,
    /// Worker threads for concurrent phases
    pub workers: usize,
    /// Health-check timeout when a check does not set one
    pub check_timeout_secs: f64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 5.0,
            backoff_factor: 1.0,
            max_delay_secs: 300.0,
            parallel_browsers: false,
            workers: 4,
            check_timeout_secs: 10.0,
        }
    }
}

/// Internet connectivity check at the start of the system phase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub enabled: bool,
    /// Its host and port must accept a TCP connection
    pub check_url: String,
    pub timeout_seconds: f64,
    pub max_retries: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_url: "https://www.google.com".to_string(),
            timeout_seconds: 10.0,
            max_retries: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VpnConfig {
    pub enabled: bool,
    /// Connection name (rasdial entry, NetworkManager connection, Cisco profile)
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NetworkKind,
    /// Seconds to wait after connecting before verification
    pub wait_after_connect: f64,
    /// Cisco Secure Client CLI
    pub cisco_path: Option<String>,
    /// Cisco head-end host
    pub cisco_host: Option<String>,
    /// Account passed to rasdial or the Cisco CLI together with the password
    pub username: Option<String>,
    /// Service name of the stored VPN password
    pub credential: Option<String>,
    pub required: bool,
    pub conditions: Option<ConditionConfig>,
    pub health_check: Option<HealthCheckConfig>,
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: String::new(),
            kind: NetworkKind::Windows,
            wait_after_connect: 8.0,
            cisco_path: None,
            cisco_host: None,
            username: None,
            credential: None,
            required: true,
            conditions: None,
            health_check: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    /// Target name; derived from the folder name when absent
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Folders are best-effort unless marked required
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub conditions: Option<ConditionConfig>,
}

/// An IDE or any other program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Project to open, appended to the arguments
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub required: bool,
    /// Seconds to wait after launching (IDEs default to 5)
    #[serde(default)]
    pub wait_seconds: Option<f64>,
    #[serde(default)]
    pub conditions: Option<ConditionConfig>,
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub enabled: bool,
    /// chromium, chrome, edge, firefox, brave, or a path to the executable
    pub browser_type: String,
    /// Persistent profile directory
    pub profile_dir: Option<String>,
    pub urls: Vec<String>,
    pub window: WindowGeometry,
    pub depends_on: Vec<String>,
    pub required: bool,
    pub wait_seconds: f64,
    pub conditions: Option<ConditionConfig>,
    pub health_check: Option<HealthCheckConfig>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            browser_type: "chromium".to_string(),
            profile_dir: None,
            urls: Vec::new(),
            window: WindowGeometry::default(),
            depends_on: Vec::new(),
            required: false,
            wait_seconds: 0.0,
            conditions: None,
            health_check: None,
        }
    }
}

/// Eligibility rules as written in the file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionConfig {
    /// "09:00-17:00"
    pub time_range: Option<String>,
    /// "weekdays", "mon-fri", "mon,wed,fri"
    pub days: Option<String>,
    /// SSIDs or CIDR subnets
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// window-match, port-open, process-running or none
    pub method: String,
    /// Window title regex or process name
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_true() -> bool {
    true
}

/// Command-line adjustments applied on top of the file
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOverrides {
    pub skip_vpn: bool,
    pub skip_browsers: bool,
    pub browsers_only: bool,
    pub jobs: Option<usize>,
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load `path`, applying the overlay `profiles/<profile>.toml` next to it
    pub fn load_from(path: &Path, profile: Option<&str>) -> Result<Self> {
        let mut table = read_table(path)?;

        if let Some(profile) = profile {
            let overlay_path = profile_path(path, profile);
            if !overlay_path.exists() {
                bail!(
                    "Profile '{profile}' not found (expected {})",
                    overlay_path.display()
                );
            }
            let overlay = read_table(&overlay_path)?;
            merge_tables(&mut table, overlay);
            log::info!("Applied profile '{profile}' from {}", overlay_path.display());
        }

        toml::Value::Table(table)
            .try_into()
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Retry and worker settings for the orchestrator
    pub fn orchestrator_options(&self, overrides: &RunOverrides) -> Result<OrchestratorOptions> {
        let general = &self.general;
        if !general.backoff_factor.is_finite() || general.backoff_factor < 1.0 {
            bail!(
                "[general] backoff_factor must be a finite number of at least 1 (got {})",
                general.backoff_factor
            );
        }
        Ok(OrchestratorOptions {
            retry: RetryPolicy {
                max_retries: general.max_retries,
                delay: secs("[general] retry_delay_secs", general.retry_delay_secs)?,
                backoff_factor: general.backoff_factor,
                max_delay: secs("[general] max_delay_secs", general.max_delay_secs)?,
            },
            workers: overrides.jobs.unwrap_or(general.workers).max(1),
        })
    }

    /// Build the target set and phases.
    ///
    /// Phases run in the order system (connectivity check, VPN), apps
    /// (folders, IDEs, programs), browsers. Empty phases are left out.
    pub fn build_plan(&self, overrides: &RunOverrides, profile: Option<&str>) -> Result<RunPlan> {
        let mut system = Vec::new();
        let mut apps = Vec::new();
        let mut browsers = Vec::new();

        if self.network.enabled {
            let mut target = self.network_target()?;
            target.enabled &= !overrides.browsers_only;
            system.push(target);
        }

        if let Some(vpn) = &self.vpn {
            let mut target = self.vpn_target(vpn)?;
            target.enabled &= !overrides.skip_vpn && !overrides.browsers_only;
            system.push(target);
        }

        for folder in &self.folders {
            let mut target = self.folder_target(folder)?;
            target.enabled &= !overrides.browsers_only;
            apps.push(target);
        }
        for (app, default_wait) in self
            .ides
            .iter()
            .map(|ide| (ide, 5.0))
            .chain(self.apps.iter().map(|app| (app, 0.0)))
        {
            let mut target = self.app_target(app, default_wait)?;
            target.enabled &= !overrides.browsers_only;
            apps.push(target);
        }

        for (name, browser) in &self.browsers {
            let mut target = self.browser_target(name, browser)?;
            target.enabled &= !overrides.skip_browsers;
            browsers.push(target);
        }

        let browser_mode = if self.general.parallel_browsers {
            ExecutionMode::Concurrent
        } else {
            ExecutionMode::Sequential
        };

        let mut plan = RunPlan {
            profile: profile.map(String::from),
            ..Default::default()
        };
        for (name, mode, targets) in [
            (PHASE_SYSTEM, ExecutionMode::Sequential, system),
            (PHASE_APPS, ExecutionMode::Sequential, apps),
            (PHASE_BROWSERS, browser_mode, browsers),
        ] {
            if targets.is_empty() {
                continue;
            }
            plan.phases.push(Phase::new(
                name,
                mode,
                targets.iter().map(|t| t.name.clone()),
            ));
            plan.targets.extend(targets);
        }
        Ok(plan)
    }

    fn network_target(&self) -> Result<Target> {
        let network = &self.network;
        let (host, port) = check_endpoint(&network.check_url)?;
        let timeout = secs("[network] timeout_seconds", network.timeout_seconds)?;
        if timeout.is_zero() {
            bail!("[network] timeout_seconds must be positive");
        }

        let descriptor = LaunchDescriptor::Connectivity {
            url: network.check_url.clone(),
        };
        Ok(Target::new(NETWORK_TARGET, descriptor).with_health_check(
            HealthCheck::new(HealthMethod::PortOpen { host, port }, network.max_retries)
                .with_timeout(timeout),
        ))
    }

    fn vpn_target(&self, vpn: &VpnConfig) -> Result<Target> {
        if vpn.enabled && vpn.name.trim().is_empty() {
            bail!("[vpn] is enabled but has no name");
        }
        if vpn.kind == NetworkKind::Cisco && vpn.enabled && vpn.cisco_host.is_none() {
            bail!("[vpn] type 'cisco' requires cisco_host");
        }

        let descriptor = LaunchDescriptor::Network {
            connection: vpn.name.clone(),
            kind: vpn.kind,
            host: vpn.cisco_host.clone(),
            username: vpn.username.clone(),
            credential: vpn.credential.as_deref().map(CredentialHandle::new),
        };

        let mut target = Target::new(VPN_TARGET, descriptor)
            .depends_on(self.network.enabled.then_some(NETWORK_TARGET))
            .enabled(vpn.enabled)
            .with_post_launch_wait(secs("[vpn] wait_after_connect", vpn.wait_after_connect)?);
        target.required = vpn.required;
        target.condition = parse_conditions(VPN_TARGET, vpn.conditions.as_ref())?;
        target.health_check = self.health_check(VPN_TARGET, vpn.health_check.as_ref())?;
        Ok(target)
    }

    fn folder_target(&self, folder: &FolderConfig) -> Result<Target> {
        let path = paths::expand(&folder.path);
        let name = folder.name.clone().unwrap_or_else(|| folder_name(&path));

        let mut target = Target::new(&name, LaunchDescriptor::Folder { path })
            .depends_on(folder.depends_on.iter().cloned())
            .enabled(folder.enabled);
        target.required = folder.required;
        target.condition = parse_conditions(&name, folder.conditions.as_ref())?;
        Ok(target)
    }

    fn app_target(&self, app: &AppConfig, default_wait: f64) -> Result<Target> {
        if app.name.trim().is_empty() {
            bail!("Program '{}' has an empty name", app.path);
        }
        if app.path.trim().is_empty() {
            bail!("'{}' has no path", app.name);
        }

        let mut args = app.args.clone();
        if let Some(project) = &app.project {
            args.push(paths::expand(project).display().to_string());
        }
        let descriptor = LaunchDescriptor::Program {
            path: paths::expand(&app.path),
            args,
            working_dir: app.working_dir.as_deref().map(paths::expand),
        };

        let mut target = Target::new(&app.name, descriptor)
            .depends_on(app.depends_on.iter().cloned())
            .enabled(app.enabled)
            .with_post_launch_wait(secs(
                &format!("'{}' wait_seconds", app.name),
                app.wait_seconds.unwrap_or(default_wait),
            )?);
        target.required = app.required;
        target.condition = parse_conditions(&app.name, app.conditions.as_ref())?;
        target.health_check = self.health_check(&app.name, app.health_check.as_ref())?;
        Ok(target)
    }

    fn browser_target(&self, name: &str, browser: &BrowserConfig) -> Result<Target> {
        let descriptor = LaunchDescriptor::Browser {
            browser: browser.browser_type.clone(),
            profile_dir: browser.profile_dir.as_deref().map(paths::expand),
            urls: browser.urls.clone(),
            window: browser.window,
        };

        let mut target = Target::new(name, descriptor)
            .depends_on(browser.depends_on.iter().cloned())
            .enabled(browser.enabled)
            .with_post_launch_wait(secs(
                &format!("'{name}' wait_seconds"),
                browser.wait_seconds,
            )?);
        target.required = browser.required;
        target.condition = parse_conditions(name, browser.conditions.as_ref())?;
        target.health_check = self.health_check(name, browser.health_check.as_ref())?;
        Ok(target)
    }

    fn health_check(
        &self,
        target: &str,
        config: Option<&HealthCheckConfig>,
    ) -> Result<Option<HealthCheck>> {
        let Some(config) = config else {
            return Ok(None);
        };

        let pattern = || {
            config
                .pattern
                .clone()
                .filter(|p| !p.trim().is_empty())
                .with_context(|| {
                    format!(
                        "'{target}': health check '{}' requires a pattern",
                        config.method
                    )
                })
        };

        let method = match config.method.as_str() {
            "window-match" => {
                let pattern = pattern()?;
                regex::Regex::new(&pattern).with_context(|| {
                    format!("'{target}': invalid window pattern '{pattern}'")
                })?;
                HealthMethod::WindowMatch { pattern }
            }
            "process-running" => HealthMethod::ProcessRunning { name: pattern()? },
            "port-open" => HealthMethod::PortOpen {
                host: config
                    .host
                    .clone()
                    .unwrap_or_else(|| "127.0.0.1".to_string()),
                port: config
                    .port
                    .with_context(|| format!("'{target}': health check 'port-open' requires a port"))?,
            },
            "none" => HealthMethod::None,
            other => bail!(
                "'{target}': unknown health check method '{other}' (expected window-match, port-open, process-running or none)"
            ),
        };

        let timeout = secs(
            &format!("'{target}' health check timeout"),
            config
                .timeout_secs
                .unwrap_or(self.general.check_timeout_secs),
        )?;
        if timeout.is_zero() {
            bail!("'{target}': health check timeout must be positive");
        }

        Ok(Some(
            HealthCheck::new(
                method,
                config.max_retries.unwrap_or(self.general.max_retries),
            )
            .with_timeout(timeout),
        ))
    }
}

/// Parse the textual condition fields of one target
fn parse_conditions(target: &str, config: Option<&ConditionConfig>) -> Result<Option<Condition>> {
    let Some(config) = config else {
        return Ok(None);
    };

    let time_range = config
        .time_range
        .as_deref()
        .map(str::parse::<TimeRange>)
        .transpose()
        .with_context(|| format!("'{target}': invalid time_range"))?;
    let days = config
        .days
        .as_deref()
        .map(str::parse::<DaySet>)
        .transpose()
        .with_context(|| format!("'{target}': invalid days"))?;
    let networks = if config.networks.is_empty() {
        None
    } else {
        Some(
            config
                .networks
                .join(",")
                .parse::<NetworkSet>()
                .with_context(|| format!("'{target}': invalid networks"))?,
        )
    };

    let condition = Condition {
        time_range,
        days,
        networks,
    };
    Ok((!condition.is_empty()).then_some(condition))
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid TOML in {}", path.display()))
}

/// `profiles/<name>.toml` next to the base config file
fn profile_path(config_file: &Path, profile: &str) -> PathBuf {
    config_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("profiles")
        .join(format!("{profile}.toml"))
}

/// Merge `overlay` into `base`: tables merge recursively, everything else replaces
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Host and port of a check URL such as `https://example.com` or `example.com:8080`.
/// Without an explicit port, `http` means 80 and everything else 443.
fn check_endpoint(url: &str) -> Result<(String, u16)> {
    let pattern = regex::Regex::new(
        r"^(?:(?P<scheme>[A-Za-z][A-Za-z0-9+.-]*)://)?(?:\[(?P<ipv6>[^\]]+)\]|(?P<host>[^/:?#\[\]]+))(?::(?P<port>\d+))?(?:[/?#].*)?$",
    )?;
    let captures = pattern
        .captures(url.trim())
        .with_context(|| format!("[network] check_url '{url}' has no host"))?;

    let host = captures
        .name("ipv6")
        .or_else(|| captures.name("host"))
        .map(|m| m.as_str().to_string())
        .with_context(|| format!("[network] check_url '{url}' has no host"))?;
    let port = match captures.name("port") {
        Some(port) => port
            .as_str()
            .parse::<u16>()
            .with_context(|| format!("[network] check_url '{url}' has an invalid port"))?,
        None => match captures.name("scheme").map(|s| s.as_str().to_lowercase()) {
            Some(scheme) if scheme == "http" => 80,
            _ => 443,
        },
    };
    Ok((host, port))
}

fn folder_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// Longest wait, delay or timeout a config value may ask for (one day)
const MAX_SECONDS: f64 = 86_400.0;

/// Seconds from the config file as a `Duration`, rejecting NaN, infinities,
/// negative values and anything longer than [`MAX_SECONDS`]
fn secs(field: &str, value: f64) -> Result<Duration> {
    if !value.is_finite() {
        bail!("{field} must be a finite number of seconds (got {value})");
    }
    if value < 0.0 {
        bail!("{field} must not be negative (got {value})");
    }
    if value > MAX_SECONDS {
        bail!("{field} must be at most {MAX_SECONDS} seconds (got {value})");
    }
    Duration::try_from_secs_f64(value).with_context(|| format!("{field} is out of range"))
}

/// Starter configuration written by `ignition config init`
pub const EXAMPLE_CONFIG: &str = r#"# ignition configuration

[general]
max_retries = 3
retry_delay_secs = 5
parallel_browsers = true
workers = 4
check_timeout_secs = 10

[network]
check_url = "https://www.google.com"   # checked before the VPN connects
timeout_seconds = 10
max_retries = 4

[vpn]
enabled = false
name = "Corp VPN"
type = "windows"            # windows, network-manager or cisco
wait_after_connect = 8
credential = "vpn"          # ignition secret set vpn

[[folders]]
path = "~/work"

[[ides]]
name = "code"
path = "code"
project = "~/work/project"
depends_on = ["work"]

[ides.health_check]
method = "process-running"
pattern = "code"
max_retries = 2

[[apps]]
name = "chat"
path = "slack"
required = false

[apps.conditions]
days = "weekdays"
time_range = "08:00-18:00"

[browsers.office]
browser_type = "chromium"
profile_dir = "~/.local/share/ignition/browsers/office"
urls = ["https://mail.example.com", "https://calendar.example.com"]

[browsers.personal]
browser_type = "firefox"
urls = ["https://news.example.com"]

[browsers.personal.conditions]
networks = ["home-wifi", "192.168.1.0/24"]
"#;
