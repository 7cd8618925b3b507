//! # Launchkit
//!
//! An engine for bringing up a workstation: applications, folders, browser
//! profiles and network connections, started in dependency order and
//! verified before anything that needs them.
//!
//! ## Core Concepts
//!
//! - **Target**: One launchable unit with prerequisites, an optional
//!   eligibility [`Condition`] and an optional [`HealthCheck`]
//! - **DependencyGraph**: Resolves a deterministic launch order and reports
//!   every member of a cycle
//! - **LaunchMachine**: Per-target state machine (launch, verify, retry)
//! - **Orchestrator**: Runs [`Phase`]s sequentially or on a bounded worker
//!   pool and produces a [`RunRecord`]
//! - **MetricsRecorder**: Appends run records and summarizes history
//!
//! ## Example
//!
//! ```ignore
//! use launchkit::{
//!     CancelToken, ExecutionMode, NoProgress, Orchestrator, Phase, RunPlan, Target,
//!     LaunchDescriptor,
//! };
//!
//! let plan = RunPlan {
//!     targets: vec![
//!         Target::new("vpn", vpn_descriptor),
//!         Target::new("ide", ide_descriptor).depends_on(["vpn"]),
//!     ],
//!     phases: vec![Phase::new("startup", ExecutionMode::Sequential, ["vpn", "ide"])],
//!     profile: None,
//! };
//!
//! let orchestrator = Orchestrator::new(launcher, probe, environment);
//! let record = orchestrator.run(&plan, CancelToken::new(), &mut NoProgress)?;
//! ```
//!
//! ## Provider Traits
//!
//! - [`Launcher`]: Starts a target from its descriptor
//! - [`HealthProbe`]: Answers whether a launched target is healthy
//! - [`EnvironmentProvider`]: Supplies time, weekday and network facts
//! - [`CredentialProvider`]: Resolves credential handles for launchers
//! - [`ProgressCallback`]: Receives progress updates
//!
//! The engine never spawns processes or touches the network itself.

pub mod condition;
pub mod context;
pub mod error;
pub mod graph;
pub mod health;
pub mod metrics;
pub mod scheduler;
pub mod types;

pub use condition::{
    Condition, ConditionKind, ConditionParseError, DaySet, EnvironmentSnapshot, NetworkMatcher,
    NetworkSet, Subnet, TimeRange, is_eligible,
};
pub use context::{
    CancelToken, CredentialProvider, EnvironmentProvider, FixedEnvironment, HealthProbe,
    LaunchHandle, Launcher, NoProgress, ProgressCallback,
};
pub use error::{ConfigError, Error, LaunchError, Result};
pub use graph::{DependencyGraph, resolve};
pub use health::{
    AttemptReport, CheckOutcome, LaunchMachine, LaunchState, LogObserver, StateObserver,
    probe_with_timeout,
};
pub use metrics::{
    JsonlSink, MemorySink, MetricsRecorder, MetricsSink, PhaseRecord, RunRecord, Summary,
    TargetRecord, Trend, summarize,
};
pub use scheduler::{
    Orchestrator, OrchestratorOptions, PlanDecision, PlannedTarget, RunContext, RunPlan,
};
pub use types::{
    CredentialHandle, DEFAULT_CHECK_TIMEOUT, ExecutionMode, HealthCheck, HealthMethod,
    LaunchDescriptor, NetworkKind, Phase, RetryPolicy, Secret, Target, TargetOutcome,
    WindowGeometry,
};
