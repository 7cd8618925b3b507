//! Core types for startup orchestration

use crate::condition::Condition;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Health-check timeout used when a check does not configure one.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Targets
// ============================================================================

/// One launchable unit: an application, folder, browser profile or network step.
///
/// Targets are built once from validated configuration and stay immutable for
/// the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Unique, case-sensitive name
    pub name: String,
    /// What to launch; handed unmodified to the [`Launcher`](crate::Launcher)
    pub descriptor: LaunchDescriptor,
    /// Targets that must reach a terminal state before this one starts
    pub depends_on: Vec<String>,
    /// Disabled targets are recorded but never launched
    pub enabled: bool,
    /// Required targets decide the overall success of a run
    pub required: bool,
    /// Optional eligibility condition (time, days, network)
    pub condition: Option<Condition>,
    /// Optional post-launch verification
    pub health_check: Option<HealthCheck>,
    /// Time to wait after launching before verifying
    pub post_launch_wait: Duration,
}

impl Target {
    /// Create an enabled, required target with no dependencies
    pub fn new(name: impl Into<String>, descriptor: LaunchDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
            depends_on: Vec::new(),
            enabled: true,
            required: true,
            condition: None,
            health_check: None,
            post_launch_wait: Duration::ZERO,
        }
    }

    /// Add prerequisites
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(names.into_iter().map(Into::into));
        self
    }

    /// Set the enabled flag
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Mark the target as best-effort (its failure does not fail the run)
    pub fn best_effort(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_health_check(mut self, check: HealthCheck) -> Self {
        self.health_check = Some(check);
        self
    }

    pub fn with_post_launch_wait(mut self, wait: Duration) -> Self {
        self.post_launch_wait = wait;
        self
    }
}

/// What the launch collaborator should start.
///
/// The engine never looks inside a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LaunchDescriptor {
    /// An executable with arguments (IDEs, tools, general apps)
    Program {
        path: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        working_dir: Option<PathBuf>,
    },
    /// A folder opened in the platform file manager
    Folder { path: PathBuf },
    /// A browser with a persistent profile and startup URLs
    Browser {
        browser: String,
        #[serde(default)]
        profile_dir: Option<PathBuf>,
        #[serde(default)]
        urls: Vec<String>,
        #[serde(default)]
        window: WindowGeometry,
    },
    /// A network/VPN connection step
    Network {
        connection: String,
        kind: NetworkKind,
        #[serde(default)]
        host: Option<String>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        credential: Option<CredentialHandle>,
    },
    /// Nothing to start; the target's health check confirms the network is reachable
    Connectivity { url: String },
}

impl LaunchDescriptor {
    /// Short human-readable summary for plans and logs
    pub fn summary(&self) -> String {
        match self {
            Self::Program { path, args, .. } if args.is_empty() => path.display().to_string(),
            Self::Program { path, args, .. } => format!("{} {}", path.display(), args.join(" ")),
            Self::Folder { path } => format!("folder {}", path.display()),
            Self::Browser { browser, urls, .. } => format!("{browser} ({} urls)", urls.len()),
            Self::Network {
                connection, kind, ..
            } => format!("{kind} connection {connection}"),
            Self::Connectivity { url } => format!("connectivity check {url}"),
        }
    }
}

/// Browser window size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowGeometry {
    pub width: u32,
    pub height: u32,
    pub maximized: bool,
}

impl Default for WindowGeometry {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            maximized: true,
        }
    }
}

/// How a network/VPN connection is established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkKind {
    /// Windows built-in VPN (`rasdial`)
    Windows,
    /// NetworkManager connection (`nmcli`)
    NetworkManager,
    /// Cisco AnyConnect / Secure Client CLI
    Cisco,
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Windows => "windows",
            Self::NetworkManager => "network-manager",
            Self::Cisco => "cisco",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Opaque reference to a secret, resolved only by the launch collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialHandle(String);

impl CredentialHandle {
    pub fn new(service: impl Into<String>) -> Self {
        Self(service.into())
    }

    /// Service name the secret is stored under
    pub fn service(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved secret value. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

// ============================================================================
// Health checks and retry
// ============================================================================

/// Post-launch verification for a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub method: HealthMethod,
    /// Hard per-attempt timeout; [`DEFAULT_CHECK_TIMEOUT`] when absent
    pub timeout: Option<Duration>,
    /// Retries after the initial attempt
    pub max_retries: u32,
}

impl HealthCheck {
    pub fn new(method: HealthMethod, max_retries: u32) -> Self {
        Self {
            method,
            timeout: None,
            max_retries,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_CHECK_TIMEOUT)
    }
}

/// The kinds of health check a probe knows how to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum HealthMethod {
    /// A window whose title matches `pattern` (regex) exists
    WindowMatch { pattern: String },
    /// A TCP connection to `host:port` succeeds
    PortOpen { host: String, port: u16 },
    /// A process whose name matches `name` is running
    ProcessRunning { name: String },
    /// No verification; the launch itself counts as success
    None,
}

impl HealthMethod {
    /// Method name as written in configuration
    pub fn name(&self) -> &'static str {
        match self {
            Self::WindowMatch { .. } => "window-match",
            Self::PortOpen { .. } => "port-open",
            Self::ProcessRunning { .. } => "process-running",
            Self::None => "none",
        }
    }
}

impl fmt::Display for HealthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WindowMatch { pattern } => write!(f, "window-match /{pattern}/"),
            Self::PortOpen { host, port } => write!(f, "port-open {host}:{port}"),
            Self::ProcessRunning { name } => write!(f, "process-running {name}"),
            Self::None => f.write_str("none"),
        }
    }
}

/// Delay policy between attempts.
///
/// The default is a linear fixed delay (`backoff_factor == 1.0`). Setting
/// `backoff_factor` above 1.0 turns it into capped exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries for targets without a health check (launch errors only)
    pub max_retries: u32,
    /// Delay before the first retry
    pub delay: Duration,
    /// Multiplier applied per retry
    pub backoff_factor: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(5),
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Linear fixed delay between retries
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            ..Default::default()
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self::fixed(0, Duration::ZERO)
    }

    /// Delay before retry number `retry` (0-indexed)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if self.backoff_factor <= 1.0 {
            return self.delay.min(self.max_delay);
        }
        let delay = self.delay.as_secs_f64() * self.backoff_factor.powi(retry as i32);
        Duration::try_from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
            .unwrap_or(self.max_delay)
    }
}

// ============================================================================
// Phases and outcomes
// ============================================================================

/// How the targets of a phase are driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One at a time, in resolved dependency order
    Sequential,
    /// All eligible targets at once on a bounded worker pool
    Concurrent,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Concurrent => f.write_str("concurrent"),
        }
    }
}

/// A named group of targets executed under one mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub name: String,
    pub mode: ExecutionMode,
    /// Member target names, in declaration order
    pub targets: Vec<String>,
}

impl Phase {
    pub fn new<I, S>(name: impl Into<String>, mode: ExecutionMode, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            mode,
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }
}

/// Terminal outcome of one target in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetOutcome {
    LaunchedHealthy,
    SkippedByCondition,
    SkippedDisabled,
    SkippedDependencyFailed,
    SkippedCancelled,
    FailedAfterRetries,
}

impl TargetOutcome {
    pub fn is_failure(self) -> bool {
        matches!(self, Self::FailedAfterRetries)
    }

    pub fn is_skipped(self) -> bool {
        matches!(
            self,
            Self::SkippedByCondition
                | Self::SkippedDisabled
                | Self::SkippedDependencyFailed
                | Self::SkippedCancelled
        )
    }

    /// Whether a dependent of a target with this outcome must be skipped
    pub fn blocks_dependents(self) -> bool {
        matches!(self, Self::FailedAfterRetries | Self::SkippedDependencyFailed)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::LaunchedHealthy => "launched",
            Self::SkippedByCondition => "skipped (condition)",
            Self::SkippedDisabled => "skipped (disabled)",
            Self::SkippedDependencyFailed => "skipped (dependency failed)",
            Self::SkippedCancelled => "skipped (cancelled)",
            Self::FailedAfterRetries => "failed",
        }
    }
}

impl fmt::Display for TargetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
