//! Phase scheduler - gates targets and drives them through their phases

use crate::condition::{ConditionKind, EnvironmentSnapshot};
use crate::context::{CancelToken, EnvironmentProvider, HealthProbe, Launcher, ProgressCallback};
use crate::error::{ConfigError, Error, Result};
use crate::graph::DependencyGraph;
use crate::health::{LaunchMachine, LaunchState, LogObserver};
use crate::metrics::{PhaseRecord, RunRecord, TargetRecord};
use crate::types::{ExecutionMode, Phase, RetryPolicy, Target, TargetOutcome};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Tuning knobs for a run
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorOptions {
    /// Delay policy, and the retry budget of targets without a health check
    pub retry: RetryPolicy,
    /// Worker threads for concurrent phases
    pub workers: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            workers: 4,
        }
    }
}

/// Everything a run needs: the target set and how it is split into phases
#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    pub targets: Vec<Target>,
    /// Executed in order
    pub phases: Vec<Phase>,
    /// Profile name recorded in metrics
    pub profile: Option<String>,
}

impl RunPlan {
    /// Check names, references, cycles and phase layout.
    ///
    /// Returns the resolved launch order of the enabled targets.
    pub fn validate(&self) -> std::result::Result<Vec<String>, ConfigError> {
        validate(self).map(|(_, order)| order)
    }
}

/// What a dry run decided for one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanDecision {
    Launch,
    Disabled,
    /// Would be skipped because this condition dimension is unmet
    Condition(ConditionKind),
}

/// One line of a dry-run plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTarget {
    pub name: String,
    pub phase: String,
    pub mode: ExecutionMode,
    pub decision: PlanDecision,
    /// Enabled prerequisites
    pub depends_on: Vec<String>,
    /// Human-readable description of the launch
    pub summary: String,
}

/// State of one run in progress.
///
/// Created by [`Orchestrator::begin`] after the plan has been validated. The
/// environment snapshot is taken once here so every condition in the run is
/// judged against the same facts.
pub struct RunContext<'p> {
    plan: &'p RunPlan,
    graph: DependencyGraph,
    index: HashMap<&'p str, usize>,
    /// Position of each enabled target in the resolved order
    rank: HashMap<String, usize>,
    snapshot: EnvironmentSnapshot,
    outcomes: HashMap<String, TargetOutcome>,
    phases: Vec<PhaseRecord>,
    cancel: CancelToken,
    started_at: DateTime<Utc>,
}

impl<'p> RunContext<'p> {
    pub fn snapshot(&self) -> &EnvironmentSnapshot {
        &self.snapshot
    }

    /// Outcome of a target that already finished in this run
    pub fn outcome(&self, name: &str) -> Option<TargetOutcome> {
        self.outcomes.get(name).copied()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn target(&self, name: &str) -> Option<&'p Target> {
        self.index.get(name).map(|&i| &self.plan.targets[i])
    }

    /// Close the run and produce its record
    pub fn finish(self) -> RunRecord {
        let cancelled = self.cancel.is_cancelled();
        let success = !cancelled
            && !self
                .phases
                .iter()
                .flat_map(|p| p.targets.iter())
                .any(|t| t.required && t.outcome.is_failure());

        RunRecord {
            started_at: self.started_at,
            finished_at: Utc::now(),
            profile: self.plan.profile.clone(),
            phases: self.phases,
            success,
            cancelled,
        }
    }
}

/// Runs phases of targets through launch, verification and retry
pub struct Orchestrator {
    launcher: Arc<dyn Launcher>,
    probe: Arc<dyn HealthProbe>,
    environment: Arc<dyn EnvironmentProvider>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        launcher: Arc<dyn Launcher>,
        probe: Arc<dyn HealthProbe>,
        environment: Arc<dyn EnvironmentProvider>,
    ) -> Self {
        Self {
            launcher,
            probe,
            environment,
            options: OrchestratorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Validate `plan` and start a run.
    ///
    /// All configuration errors surface here, before anything launches.
    pub fn begin<'p>(&self, plan: &'p RunPlan, cancel: CancelToken) -> Result<RunContext<'p>> {
        let (graph, order) = validate(plan)?;
        let snapshot = self.environment.snapshot();
        log::debug!(
            "Environment: {} {} network {:?}",
            snapshot.weekday,
            snapshot.time.format("%H:%M"),
            snapshot.network_id
        );

        Ok(RunContext {
            plan,
            graph,
            index: plan
                .targets
                .iter()
                .enumerate()
                .map(|(i, t)| (t.name.as_str(), i))
                .collect(),
            rank: order.into_iter().enumerate().map(|(i, n)| (n, i)).collect(),
            snapshot,
            outcomes: HashMap::new(),
            phases: Vec::new(),
            cancel,
            started_at: Utc::now(),
        })
    }

    /// Run every phase of `plan` in order
    pub fn run<P: ProgressCallback>(
        &self,
        plan: &RunPlan,
        cancel: CancelToken,
        progress: &mut P,
    ) -> Result<RunRecord> {
        let mut ctx = self.begin(plan, cancel)?;
        for phase in &plan.phases {
            self.run_phase(&mut ctx, phase, progress)?;
        }
        let record = ctx.finish();
        log::info!(
            "Run finished in {:.1}s (success: {})",
            record.duration_secs(),
            record.success
        );
        Ok(record)
    }

    /// Run one phase and append its record to the run.
    ///
    /// Sequential phases launch members one at a time in resolved dependency
    /// order, disabled members first. Concurrent phases gate every member,
    /// then launch the eligible ones together on the worker pool.
    pub fn run_phase<P: ProgressCallback>(
        &self,
        ctx: &mut RunContext<'_>,
        phase: &Phase,
        progress: &mut P,
    ) -> Result<PhaseRecord> {
        let members = phase_members(ctx, phase)?;
        let started = Instant::now();
        log::info!(
            "Phase '{}' ({}, {} targets)",
            phase.name,
            phase.mode,
            members.len()
        );
        progress.on_phase_start(&phase.name, phase.mode, members.len());

        let targets = match phase.mode {
            ExecutionMode::Sequential => self.run_sequential(ctx, phase, &members, progress),
            ExecutionMode::Concurrent => self.run_concurrent(ctx, phase, &members, progress)?,
        };

        let record = PhaseRecord {
            name: phase.name.clone(),
            mode: phase.mode,
            duration_ms: elapsed_ms(started),
            targets,
        };
        progress.on_phase_complete(&record);
        ctx.phases.push(record.clone());
        Ok(record)
    }

    /// Dry run: the decision each target would get, without launching anything
    pub fn plan(&self, plan: &RunPlan) -> Result<Vec<PlannedTarget>> {
        let ctx = self.begin(plan, CancelToken::new())?;
        let mut planned = Vec::with_capacity(plan.targets.len());

        for phase in &plan.phases {
            for target in phase_members(&ctx, phase)? {
                let decision = if !target.enabled {
                    PlanDecision::Disabled
                } else if let Some(kind) = target
                    .condition
                    .as_ref()
                    .and_then(|c| c.unmet(&ctx.snapshot))
                {
                    PlanDecision::Condition(kind)
                } else {
                    PlanDecision::Launch
                };

                planned.push(PlannedTarget {
                    name: target.name.clone(),
                    phase: phase.name.clone(),
                    mode: phase.mode,
                    decision,
                    depends_on: ctx
                        .graph
                        .prerequisites(&target.name)
                        .into_iter()
                        .map(String::from)
                        .collect(),
                    summary: target.descriptor.summary(),
                });
            }
        }
        Ok(planned)
    }

    fn run_sequential<P: ProgressCallback>(
        &self,
        ctx: &mut RunContext<'_>,
        phase: &Phase,
        members: &[&Target],
        progress: &mut P,
    ) -> Vec<TargetRecord> {
        let mut records = Vec::with_capacity(members.len());

        for target in members {
            let record = match gate(ctx, target) {
                Some(outcome) => skipped(target, phase, outcome),
                None => {
                    progress.on_target_start(&target.name);
                    self.drive(target, &phase.name, &ctx.cancel)
                }
            };
            ctx.outcomes.insert(target.name.clone(), record.outcome);
            progress.on_target_complete(&record);
            records.push(record);
        }
        records
    }

    fn run_concurrent<P: ProgressCallback>(
        &self,
        ctx: &mut RunContext<'_>,
        phase: &Phase,
        members: &[&Target],
        progress: &mut P,
    ) -> Result<Vec<TargetRecord>> {
        let mut slots: Vec<Option<TargetRecord>> = Vec::with_capacity(members.len());
        let mut eligible = Vec::new();

        for (slot, target) in members.iter().enumerate() {
            match gate(ctx, target) {
                Some(outcome) => slots.push(Some(skipped(target, phase, outcome))),
                None => {
                    slots.push(None);
                    eligible.push((slot, *target));
                }
            }
        }

        if !eligible.is_empty() {
            // Progress callbacks are not thread-safe; report around the pool
            for (_, target) in &eligible {
                progress.on_target_start(&target.name);
            }

            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.options.workers.clamp(1, eligible.len()))
                .thread_name(|i| format!("launch-worker-{i}"))
                .build()
                .map_err(|e| Error::WorkerPool(e.to_string()))?;

            let cancel = &ctx.cancel;
            let launched: Vec<(usize, TargetRecord)> = pool.install(|| {
                eligible
                    .par_iter()
                    .map(|(slot, target)| (*slot, self.drive(target, &phase.name, cancel)))
                    .collect()
            });

            for (slot, record) in launched {
                slots[slot] = Some(record);
            }
        }

        let records: Vec<TargetRecord> = slots.into_iter().flatten().collect();
        for record in &records {
            ctx.outcomes.insert(record.name.clone(), record.outcome);
            progress.on_target_complete(record);
        }
        Ok(records)
    }

    /// Run the launch state machine for one eligible target
    fn drive(&self, target: &Target, phase: &str, cancel: &CancelToken) -> TargetRecord {
        let started = Instant::now();
        let machine = LaunchMachine::new(
            target,
            self.launcher.as_ref(),
            Arc::clone(&self.probe),
            &self.options.retry,
            cancel,
        );
        let report = machine.run(&mut LogObserver);

        let outcome = match report.state {
            LaunchState::Healthy => TargetOutcome::LaunchedHealthy,
            LaunchState::Cancelled => TargetOutcome::SkippedCancelled,
            _ => TargetOutcome::FailedAfterRetries,
        };
        match outcome {
            TargetOutcome::LaunchedHealthy => log::info!("{} is up", target.name),
            TargetOutcome::SkippedCancelled => log::info!("{} cancelled", target.name),
            _ => log::error!(
                "{} failed after {} attempt(s): {}",
                target.name,
                report.attempts,
                report.last_error.as_deref().unwrap_or("unknown error")
            ),
        }

        TargetRecord {
            name: target.name.clone(),
            phase: phase.to_string(),
            outcome,
            attempts: report.attempts,
            duration_ms: elapsed_ms(started),
            required: target.required,
            error: if outcome.is_failure() {
                report.last_error
            } else {
                None
            },
        }
    }
}

/// Decide whether `target` is skipped, checked in this order: cancellation,
/// disabled flag, failed prerequisites, condition. `None` means launch.
fn gate(ctx: &RunContext<'_>, target: &Target) -> Option<TargetOutcome> {
    if ctx.cancel.is_cancelled() {
        return Some(TargetOutcome::SkippedCancelled);
    }
    if !target.enabled {
        return Some(TargetOutcome::SkippedDisabled);
    }

    for prerequisite in ctx.graph.prerequisites(&target.name) {
        match ctx.outcomes.get(prerequisite) {
            Some(outcome) if outcome.blocks_dependents() => {
                log::warn!(
                    "Skipping {}: prerequisite {prerequisite} {outcome}",
                    target.name
                );
                return Some(TargetOutcome::SkippedDependencyFailed);
            }
            Some(_) => {}
            None => log::warn!(
                "{}: prerequisite {prerequisite} has not run yet",
                target.name
            ),
        }
    }

    if let Some(kind) = target
        .condition
        .as_ref()
        .and_then(|c| c.unmet(&ctx.snapshot))
    {
        log::info!("Skipping {}: {kind} condition not met", target.name);
        return Some(TargetOutcome::SkippedByCondition);
    }
    None
}

fn skipped(target: &Target, phase: &Phase, outcome: TargetOutcome) -> TargetRecord {
    TargetRecord::skipped(&target.name, &phase.name, outcome, target.required)
}

/// Members of `phase` in execution order
fn phase_members<'p>(ctx: &RunContext<'p>, phase: &Phase) -> Result<Vec<&'p Target>> {
    let mut members = Vec::with_capacity(phase.targets.len());
    for name in &phase.targets {
        let target = ctx
            .target(name)
            .ok_or_else(|| ConfigError::UnknownPhaseMember {
                phase: phase.name.clone(),
                target: name.clone(),
            })?;
        members.push(target);
    }

    if phase.mode == ExecutionMode::Sequential {
        // Stable sort keeps declaration order among disabled members
        members.sort_by_key(|t| ctx.rank.get(&t.name).map_or((0, 0), |&r| (1, r)));
    }
    Ok(members)
}

/// Check the plan as a whole and resolve the launch order
fn validate(plan: &RunPlan) -> std::result::Result<(DependencyGraph, Vec<String>), ConfigError> {
    let graph = DependencyGraph::build(&plan.targets)?;

    let mut phase_of: HashMap<&str, usize> = HashMap::new();
    for (p, phase) in plan.phases.iter().enumerate() {
        for name in &phase.targets {
            if !graph.contains(name) {
                return Err(ConfigError::UnknownPhaseMember {
                    phase: phase.name.clone(),
                    target: name.clone(),
                });
            }
            if let Some(first) = phase_of.insert(name.as_str(), p) {
                return Err(ConfigError::DuplicatePhaseMember {
                    target: name.clone(),
                    first: plan.phases[first].name.clone(),
                    second: phase.name.clone(),
                });
            }
        }
    }

    if let Some(target) = plan
        .targets
        .iter()
        .find(|t| !phase_of.contains_key(t.name.as_str()))
    {
        return Err(ConfigError::UnassignedTarget {
            target: target.name.clone(),
        });
    }

    let order = graph.resolve()?;

    for phase in &plan.phases {
        if phase.mode == ExecutionMode::Concurrent
            && let Some((target, dependency)) = graph.edge_within(&phase.targets)
        {
            return Err(ConfigError::ConcurrentDependency {
                phase: phase.name.clone(),
                target: target.to_string(),
                dependency: dependency.to_string(),
            });
        }
    }

    for target in &plan.targets {
        let own = phase_of[target.name.as_str()];
        for dependency in graph.prerequisites(&target.name) {
            let theirs = phase_of[dependency];
            if theirs > own {
                return Err(ConfigError::PhaseOrder {
                    target: target.name.clone(),
                    phase: plan.phases[own].name.clone(),
                    dependency: dependency.to_string(),
                    dependency_phase: plan.phases[theirs].name.clone(),
                });
            }
        }
    }

    Ok((graph, order))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, DaySet, TimeRange};
    use crate::context::{FixedEnvironment, LaunchHandle, NoProgress};
    use crate::error::LaunchError;
    use crate::types::{HealthCheck, HealthMethod, LaunchDescriptor};
    use chrono::{NaiveTime, Weekday};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Launcher that records every call and fails for listed programs
    #[derive(Default)]
    struct MockLauncher {
        calls: Mutex<Vec<String>>,
        failing: Vec<String>,
        delay: Duration,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MockLauncher {
        fn failing(names: &[&str]) -> Self {
            Self {
                failing: names.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Launcher for MockLauncher {
        fn launch(&self, descriptor: &LaunchDescriptor) -> std::result::Result<LaunchHandle, LaunchError> {
            let LaunchDescriptor::Program { path, .. } = descriptor else {
                return Err(LaunchError::Unsupported("test".into()));
            };
            let name = path.display().to_string();
            self.calls.lock().unwrap().push(name.clone());

            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&name) {
                Err(LaunchError::CommandFailed {
                    message: format!("{name} exited with 1"),
                })
            } else {
                Ok(LaunchHandle::process(42))
            }
        }
    }

    struct AlwaysHealthy;

    impl HealthProbe for AlwaysHealthy {
        fn check(&self, _method: &HealthMethod, _timeout: Duration) -> bool {
            true
        }
    }

    /// Healthy only for process names in the list
    struct HealthyFor(Vec<String>);

    impl HealthProbe for HealthyFor {
        fn check(&self, method: &HealthMethod, _timeout: Duration) -> bool {
            matches!(method, HealthMethod::ProcessRunning { name } if self.0.contains(name))
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Vec<String>,
    }

    impl ProgressCallback for RecordingProgress {
        fn on_phase_start(&mut self, name: &str, mode: ExecutionMode, count: usize) {
            self.events.push(format!("phase-start {name} {mode} {count}"));
        }
        fn on_target_start(&mut self, name: &str) {
            self.events.push(format!("start {name}"));
        }
        fn on_target_complete(&mut self, record: &TargetRecord) {
            self.events.push(format!("done {} {}", record.name, record.outcome));
        }
        fn on_phase_complete(&mut self, record: &PhaseRecord) {
            self.events.push(format!("phase-done {}", record.name));
        }
    }

    fn target(name: &str, deps: &[&str]) -> Target {
        Target::new(
            name,
            LaunchDescriptor::Program {
                path: PathBuf::from(name),
                args: Vec::new(),
                working_dir: None,
            },
        )
        .depends_on(deps.iter().copied())
    }

    fn checked(name: &str, deps: &[&str], max_retries: u32) -> Target {
        target(name, deps).with_health_check(HealthCheck::new(
            HealthMethod::ProcessRunning { name: name.into() },
            max_retries,
        ))
    }

    fn tuesday_at(hour: u32, minute: u32) -> Arc<FixedEnvironment> {
        Arc::new(FixedEnvironment(EnvironmentSnapshot::new(
            NaiveTime::from_hms_opt(hour, minute, 0).unwrap(),
            Weekday::Tue,
            Some("office-wifi".into()),
        )))
    }

    fn orchestrator(launcher: Arc<MockLauncher>, probe: Arc<dyn HealthProbe>) -> Orchestrator {
        Orchestrator::new(launcher, probe, tuesday_at(10, 0)).with_options(OrchestratorOptions {
            retry: RetryPolicy::fixed(0, Duration::ZERO),
            workers: 4,
        })
    }

    fn sequential(targets: Vec<Target>) -> RunPlan {
        let names: Vec<String> = targets.iter().map(|t| t.name.clone()).collect();
        RunPlan {
            targets,
            phases: vec![Phase::new("main", ExecutionMode::Sequential, names)],
            profile: None,
        }
    }

    #[test]
    fn test_failed_prerequisite_skips_dependents() {
        let launcher = Arc::new(MockLauncher::default());
        let probe = Arc::new(HealthyFor(vec!["B".into(), "C".into()]));
        let orch = orchestrator(launcher.clone(), probe);

        let plan = sequential(vec![
            checked("C", &["B"], 0),
            checked("B", &["A"], 0),
            checked("A", &[], 1),
        ]);
        let record = orch
            .run(&plan, CancelToken::new(), &mut NoProgress)
            .unwrap();

        let a = record.target("A").unwrap();
        assert_eq!(a.outcome, TargetOutcome::FailedAfterRetries);
        assert_eq!(a.attempts, 2);
        assert_eq!(
            record.target("B").unwrap().outcome,
            TargetOutcome::SkippedDependencyFailed
        );
        assert_eq!(
            record.target("C").unwrap().outcome,
            TargetOutcome::SkippedDependencyFailed
        );
        assert!(!record.success);
        assert_eq!(launcher.calls(), vec!["A", "A"]);
    }

    #[test]
    fn test_sequential_phase_follows_resolved_order() {
        let launcher = Arc::new(MockLauncher::default());
        let orch = orchestrator(launcher.clone(), Arc::new(AlwaysHealthy));

        let plan = sequential(vec![
            target("ide", &["folders"]),
            target("folders", &[]),
            target("chat", &["ide"]),
        ]);
        let record = orch
            .run(&plan, CancelToken::new(), &mut NoProgress)
            .unwrap();

        assert!(record.success);
        assert_eq!(launcher.calls(), vec!["folders", "ide", "chat"]);
        let names: Vec<_> = record.targets().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["folders", "ide", "chat"]);
    }

    #[test]
    fn test_best_effort_failure_keeps_run_successful() {
        let launcher = Arc::new(MockLauncher::failing(&["chat"]));
        let orch = orchestrator(launcher, Arc::new(AlwaysHealthy));

        let plan = sequential(vec![target("ide", &[]), target("chat", &[]).best_effort()]);
        let record = orch
            .run(&plan, CancelToken::new(), &mut NoProgress)
            .unwrap();

        assert_eq!(
            record.target("chat").unwrap().outcome,
            TargetOutcome::FailedAfterRetries
        );
        assert!(record.target("chat").unwrap().error.is_some());
        assert!(record.success);
    }

    #[test]
    fn test_disabled_and_condition_skips() {
        let launcher = Arc::new(MockLauncher::default());
        let orch = orchestrator(launcher.clone(), Arc::new(AlwaysHealthy));

        let evenings = Condition {
            time_range: Some("18:00-23:00".parse::<TimeRange>().unwrap()),
            ..Default::default()
        };
        let weekdays = Condition {
            days: Some(DaySet::weekdays()),
            ..Default::default()
        };
        let plan = sequential(vec![
            target("vpn", &[]).enabled(false),
            target("mail", &["vpn"]),
            target("games", &[]).with_condition(evenings),
            target("tracker", &["games"]).with_condition(weekdays),
        ]);
        let record = orch
            .run(&plan, CancelToken::new(), &mut NoProgress)
            .unwrap();

        assert_eq!(record.target("vpn").unwrap().outcome, TargetOutcome::SkippedDisabled);
        assert_eq!(record.target("mail").unwrap().outcome, TargetOutcome::LaunchedHealthy);
        assert_eq!(
            record.target("games").unwrap().outcome,
            TargetOutcome::SkippedByCondition
        );
        assert_eq!(
            record.target("tracker").unwrap().outcome,
            TargetOutcome::LaunchedHealthy
        );
        assert_eq!(launcher.calls(), vec!["mail", "tracker"]);
        assert_eq!(record.phases[0].targets[0].name, "vpn");
    }

    #[test]
    fn test_concurrent_phase_runs_in_parallel() {
        let launcher = Arc::new(MockLauncher::slow(Duration::from_millis(150)));
        let orch = orchestrator(launcher.clone(), Arc::new(AlwaysHealthy));

        let plan = RunPlan {
            targets: vec![target("work", &[]), target("personal", &[]), target("dev", &[])],
            phases: vec![Phase::new(
                "browsers",
                ExecutionMode::Concurrent,
                ["work", "personal", "dev"],
            )],
            profile: Some("office".into()),
        };
        let mut progress = RecordingProgress::default();
        let record = orch.run(&plan, CancelToken::new(), &mut progress).unwrap();

        assert!(launcher.peak.load(Ordering::SeqCst) > 1);
        let names: Vec<_> = record.targets().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["work", "personal", "dev"]);
        assert_eq!(record.profile.as_deref(), Some("office"));
        assert_eq!(progress.events[0], "phase-start browsers concurrent 3");
        assert_eq!(progress.events.last().unwrap(), "phase-done browsers");
    }

    #[test]
    fn test_worker_bound_is_respected() {
        let launcher = Arc::new(MockLauncher::slow(Duration::from_millis(50)));
        let orch = Orchestrator::new(launcher.clone(), Arc::new(AlwaysHealthy), tuesday_at(9, 0))
            .with_options(OrchestratorOptions {
                retry: RetryPolicy::no_retry(),
                workers: 1,
            });

        let plan = RunPlan {
            targets: vec![target("a", &[]), target("b", &[]), target("c", &[])],
            phases: vec![Phase::new("all", ExecutionMode::Concurrent, ["a", "b", "c"])],
            profile: None,
        };
        orch.run(&plan, CancelToken::new(), &mut NoProgress).unwrap();
        assert_eq!(launcher.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_phases_see_earlier_failures() {
        let launcher = Arc::new(MockLauncher::failing(&["vpn"]));
        let orch = orchestrator(launcher.clone(), Arc::new(AlwaysHealthy));

        let plan = RunPlan {
            targets: vec![
                target("vpn", &[]),
                target("intranet", &["vpn"]),
                target("news", &[]),
            ],
            phases: vec![
                Phase::new("network", ExecutionMode::Sequential, ["vpn"]),
                Phase::new("browsers", ExecutionMode::Concurrent, ["intranet", "news"]),
            ],
            profile: None,
        };
        let record = orch
            .run(&plan, CancelToken::new(), &mut NoProgress)
            .unwrap();

        assert_eq!(
            record.target("intranet").unwrap().outcome,
            TargetOutcome::SkippedDependencyFailed
        );
        assert_eq!(record.target("news").unwrap().outcome, TargetOutcome::LaunchedHealthy);
        assert_eq!(launcher.calls(), vec!["vpn", "news"]);
    }

    #[test]
    fn test_cancelled_run_skips_remaining_targets() {
        let launcher = Arc::new(MockLauncher::default());
        let orch = orchestrator(launcher.clone(), Arc::new(AlwaysHealthy));
        let cancel = CancelToken::new();
        cancel.cancel();

        let plan = sequential(vec![target("a", &[]), target("b", &[])]);
        let record = orch.run(&plan, cancel, &mut NoProgress).unwrap();

        assert!(record.cancelled);
        assert!(!record.success);
        assert_eq!(record.count(TargetOutcome::SkippedCancelled), 2);
        assert!(launcher.calls().is_empty());
    }

    #[test]
    fn test_cancel_during_post_launch_wait() {
        let launcher = Arc::new(MockLauncher::default());
        let orch = orchestrator(launcher.clone(), Arc::new(AlwaysHealthy));
        let cancel = CancelToken::new();

        let plan = sequential(vec![
            target("slow", &[]).with_post_launch_wait(Duration::from_secs(60)),
            target("next", &[]),
        ]);

        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });
        let record = orch.run(&plan, cancel, &mut NoProgress).unwrap();
        canceller.join().unwrap();

        assert_eq!(record.target("slow").unwrap().outcome, TargetOutcome::SkippedCancelled);
        assert_eq!(record.target("next").unwrap().outcome, TargetOutcome::SkippedCancelled);
        assert!(record.cancelled);
        assert!(!record.success);
        assert_eq!(launcher.calls(), vec!["slow"]);
    }

    #[test]
    fn test_progress_events_for_sequential_phase() {
        let launcher = Arc::new(MockLauncher::default());
        let orch = orchestrator(launcher, Arc::new(AlwaysHealthy));
        let plan = sequential(vec![target("a", &[]), target("b", &[]).enabled(false)]);

        let mut progress = RecordingProgress::default();
        orch.run(&plan, CancelToken::new(), &mut progress).unwrap();

        assert_eq!(
            progress.events,
            vec![
                "phase-start main sequential 2",
                "done b skipped (disabled)",
                "start a",
                "done a launched",
                "phase-done main",
            ]
        );
    }

    #[test]
    fn test_config_errors_stop_before_launch() {
        let launcher = Arc::new(MockLauncher::default());
        let orch = orchestrator(launcher.clone(), Arc::new(AlwaysHealthy));

        let cycle = sequential(vec![target("a", &["b"]), target("b", &["a"]), target("c", &[])]);
        let err = orch
            .run(&cycle, CancelToken::new(), &mut NoProgress)
            .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("a, b"));

        let unassigned = RunPlan {
            targets: vec![target("a", &[]), target("b", &[])],
            phases: vec![Phase::new("main", ExecutionMode::Sequential, ["a"])],
            profile: None,
        };
        assert!(matches!(
            orch.run(&unassigned, CancelToken::new(), &mut NoProgress),
            Err(Error::Config(ConfigError::UnassignedTarget { target })) if target == "b"
        ));
        assert!(launcher.calls().is_empty());
    }

    #[test]
    fn test_phase_layout_validation() {
        let targets = || vec![target("vpn", &[]), target("intranet", &["vpn"])];

        let concurrent = RunPlan {
            targets: targets(),
            phases: vec![Phase::new("all", ExecutionMode::Concurrent, ["vpn", "intranet"])],
            profile: None,
        };
        assert_eq!(
            validate(&concurrent).unwrap_err(),
            ConfigError::ConcurrentDependency {
                phase: "all".into(),
                target: "intranet".into(),
                dependency: "vpn".into(),
            }
        );

        let backwards = RunPlan {
            targets: targets(),
            phases: vec![
                Phase::new("browsers", ExecutionMode::Sequential, ["intranet"]),
                Phase::new("network", ExecutionMode::Sequential, ["vpn"]),
            ],
            profile: None,
        };
        assert!(matches!(
            validate(&backwards).unwrap_err(),
            ConfigError::PhaseOrder { target, dependency_phase, .. }
                if target == "intranet" && dependency_phase == "network"
        ));

        let twice = RunPlan {
            targets: targets(),
            phases: vec![
                Phase::new("one", ExecutionMode::Sequential, ["vpn", "intranet"]),
                Phase::new("two", ExecutionMode::Sequential, ["vpn"]),
            ],
            profile: None,
        };
        assert!(matches!(
            validate(&twice).unwrap_err(),
            ConfigError::DuplicatePhaseMember { first, second, .. } if first == "one" && second == "two"
        ));

        let unknown = RunPlan {
            targets: targets(),
            phases: vec![Phase::new("one", ExecutionMode::Sequential, ["vpn", "intranet", "ghost"])],
            profile: None,
        };
        assert!(matches!(
            validate(&unknown).unwrap_err(),
            ConfigError::UnknownPhaseMember { target, .. } if target == "ghost"
        ));
    }

    #[test]
    fn test_dry_run_plan_launches_nothing() {
        let launcher = Arc::new(MockLauncher::default());
        let orch = orchestrator(launcher.clone(), Arc::new(AlwaysHealthy));

        let weekends = Condition {
            days: Some(DaySet::weekends()),
            ..Default::default()
        };
        let plan = sequential(vec![
            target("b", &["a"]),
            target("a", &[]),
            target("games", &[]).with_condition(weekends),
            target("off", &[]).enabled(false),
        ]);
        let planned = orch.plan(&plan).unwrap();

        let decisions: Vec<_> = planned
            .iter()
            .map(|p| (p.name.as_str(), p.decision))
            .collect();
        assert_eq!(
            decisions,
            vec![
                ("off", PlanDecision::Disabled),
                ("a", PlanDecision::Launch),
                ("b", PlanDecision::Launch),
                ("games", PlanDecision::Condition(ConditionKind::Days)),
            ]
        );
        assert_eq!(planned[2].depends_on, vec!["a"]);
        assert!(launcher.calls().is_empty());
    }

    #[test]
    fn test_run_phase_by_phase() {
        let launcher = Arc::new(MockLauncher::default());
        let orch = orchestrator(launcher, Arc::new(AlwaysHealthy));
        let plan = RunPlan {
            targets: vec![target("a", &[]), target("b", &["a"])],
            phases: vec![
                Phase::new("first", ExecutionMode::Sequential, ["a"]),
                Phase::new("second", ExecutionMode::Concurrent, ["b"]),
            ],
            profile: None,
        };

        let mut ctx = orch.begin(&plan, CancelToken::new()).unwrap();
        let first = orch.run_phase(&mut ctx, &plan.phases[0], &mut NoProgress).unwrap();
        assert!(first.succeeded());
        assert_eq!(ctx.outcome("a"), Some(TargetOutcome::LaunchedHealthy));

        let second = orch.run_phase(&mut ctx, &plan.phases[1], &mut NoProgress).unwrap();
        assert_eq!(second.count(TargetOutcome::LaunchedHealthy), 1);

        let record = ctx.finish();
        assert_eq!(record.phases.len(), 2);
        assert!(record.success);
    }
}
