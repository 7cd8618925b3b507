use anyhow::{Result, bail};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;

use crate::Context;
use crate::cli::{PlanArgs, RunArgs, SelectionArgs};
use crate::config::{Config, RunOverrides};
use crate::environment::SystemEnvironment;
use crate::launcher::SystemLauncher;
use crate::paths;
use crate::probe::SystemProbe;
use crate::progress::TerminalProgress;
use crate::signal;
use crate::state::LauncherState;
use crate::ui;
use crate::vault::KeyringCredentials;
use launchkit::{
    CancelToken, MetricsRecorder, Orchestrator, PlanDecision, PlannedTarget, ProgressCallback,
    RunPlan, RunRecord, TargetOutcome,
};

fn overrides(selection: &SelectionArgs, jobs: Option<usize>) -> RunOverrides {
    RunOverrides {
        skip_vpn: selection.skip_vpn,
        skip_browsers: selection.skip_browsers,
        browsers_only: selection.browsers_only,
        jobs,
    }
}

fn orchestrator(config: &Config, overrides: &RunOverrides) -> Result<Orchestrator> {
    let credentials = Arc::new(KeyringCredentials::new());
    let mut launcher = SystemLauncher::new(credentials);
    if let Some(cli) = config.vpn.as_ref().and_then(|v| v.cisco_path.as_deref()) {
        launcher = launcher.with_cisco_cli(paths::expand(cli));
    }

    let options = config.orchestrator_options(overrides)?;
    Ok(Orchestrator::new(
        Arc::new(launcher),
        Arc::new(SystemProbe),
        Arc::new(SystemEnvironment),
    )
    .with_options(options))
}

/// `ignition run`
pub fn run(ctx: &Context, args: RunArgs) -> Result<()> {
    let profile = args.selection.profile.as_deref();
    let config = super::load_config(ctx, profile)?;
    let overrides = overrides(&args.selection, args.jobs);
    let plan = config.build_plan(&overrides, profile)?;
    let orchestrator = orchestrator(&config, &overrides)?;

    if args.dry_run {
        return show_plan(&orchestrator, &plan);
    }

    if !ctx.quiet {
        ui::header(&match profile {
            Some(p) => format!("Starting workstation (profile: {p})"),
            None => "Starting workstation".to_string(),
        });
    }

    let cancel = CancelToken::new();
    signal::watch(&cancel, args.deadline.map(Duration::from_secs));

    let mut progress = TerminalProgress::new(ctx.quiet);
    let (record, network) = execute(&orchestrator, &plan, cancel, &mut progress)?;

    if !args.no_record {
        persist(&record, network);
    }

    if !ctx.quiet {
        print_report(&record);
    }

    if record.cancelled {
        bail!("Run cancelled");
    }
    if !record.success {
        let failed = record
            .targets()
            .filter(|t| t.required && t.outcome == TargetOutcome::FailedAfterRetries)
            .count();
        bail!("{failed} required target(s) failed");
    }
    Ok(())
}

/// Run every phase, returning the record and the network seen at the start
fn execute<P: ProgressCallback>(
    orchestrator: &Orchestrator,
    plan: &RunPlan,
    cancel: CancelToken,
    progress: &mut P,
) -> Result<(RunRecord, Option<String>)> {
    let mut run = orchestrator.begin(plan, cancel)?;
    let network = run.snapshot().network_id.clone();

    for phase in &plan.phases {
        orchestrator.run_phase(&mut run, phase, progress)?;
    }
    Ok((run.finish(), network))
}

/// Append to the history and update the state file; failures only warn
fn persist(record: &RunRecord, network: Option<String>) {
    match paths::metrics_file() {
        Ok(path) => {
            if let Err(e) = MetricsRecorder::jsonl(path).record(record) {
                ui::warn(&format!("Could not record metrics: {e}"));
            }
        }
        Err(e) => ui::warn(&format!("Could not record metrics: {e}")),
    }

    let result = LauncherState::load().and_then(|mut state| {
        state.record_run(record, network);
        state.save()
    });
    if let Err(e) = result {
        ui::warn(&format!("Could not save state: {e:#}"));
    }
}

fn print_report(record: &RunRecord) {
    ui::section("Summary");
    ui::kv("Duration", &ui::format_duration(record.duration_secs()));
    ui::kv(
        "Launched",
        &record.count(TargetOutcome::LaunchedHealthy).to_string(),
    );

    let skipped = record.targets().filter(|t| t.outcome.is_skipped()).count();
    if skipped > 0 {
        ui::kv("Skipped", &skipped.to_string());
    }

    let failed = record.count(TargetOutcome::FailedAfterRetries);
    if failed > 0 {
        ui::kv("Failed", &failed.to_string().red().to_string());
        for (name, error) in record.errors() {
            ui::dim(&format!("{name}: {error}"));
        }
    }

    println!();
    if record.cancelled {
        ui::warn("Run was cancelled");
    } else if record.success {
        ui::success("Workstation ready");
    } else {
        ui::error("Some required targets did not come up");
    }
}

/// `ignition plan`
pub fn plan(ctx: &Context, args: PlanArgs) -> Result<()> {
    let profile = args.selection.profile.as_deref();
    let config = super::load_config(ctx, profile)?;
    let overrides = overrides(&args.selection, None);
    let plan = config.build_plan(&overrides, profile)?;
    show_plan(&orchestrator(&config, &overrides)?, &plan)
}

fn show_plan(orchestrator: &Orchestrator, plan: &RunPlan) -> Result<()> {
    let planned = orchestrator.plan(plan)?;

    ui::header("Launch plan");
    if let Some(profile) = &plan.profile {
        ui::kv("Profile", profile);
    }

    let mut current_phase: Option<&str> = None;
    for target in &planned {
        if current_phase != Some(target.phase.as_str()) {
            ui::section(&format!("{} ({})", target.phase, target.mode));
            current_phase = Some(target.phase.as_str());
        }
        println!("{}", plan_line(target));
    }

    let launching = planned
        .iter()
        .filter(|t| t.decision == PlanDecision::Launch)
        .count();
    println!();
    ui::info(&format!(
        "{launching} of {} targets would launch",
        planned.len()
    ));
    Ok(())
}

fn plan_line(target: &PlannedTarget) -> String {
    let (marker, note) = match target.decision {
        PlanDecision::Launch => ("→".green().to_string(), String::new()),
        PlanDecision::Disabled => ("-".dimmed().to_string(), "disabled".to_string()),
        PlanDecision::Condition(kind) => ("-".dimmed().to_string(), format!("{kind} not met")),
    };

    let mut line = format!(
        "  {marker} {}  {}",
        target.name.bold(),
        target.summary.dimmed()
    );
    if !target.depends_on.is_empty() {
        line.push_str(&format!(
            "  {}",
            format!("after {}", target.depends_on.join(", ")).dimmed()
        ));
    }
    if !note.is_empty() {
        line.push_str(&format!("  ({})", note.yellow()));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};
    use launchkit::{
        EnvironmentSnapshot, FixedEnvironment, HealthMethod, HealthProbe, LaunchDescriptor,
        LaunchError, LaunchHandle, Launcher, NoProgress,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLauncher {
        launched: Mutex<Vec<String>>,
    }

    impl Launcher for RecordingLauncher {
        fn launch(&self, descriptor: &LaunchDescriptor) -> Result<LaunchHandle, LaunchError> {
            self.launched.lock().unwrap().push(descriptor.summary());
            Ok(LaunchHandle::detached("test"))
        }
    }

    struct Healthy;

    impl HealthProbe for Healthy {
        fn check(&self, _method: &HealthMethod, _timeout: Duration) -> bool {
            true
        }
    }

    /// Every port check fails, as if the machine were offline
    struct Offline;

    impl HealthProbe for Offline {
        fn check(&self, method: &HealthMethod, _timeout: Duration) -> bool {
            !matches!(method, HealthMethod::PortOpen { .. })
        }
    }

    fn test_orchestrator(launcher: Arc<RecordingLauncher>, network: Option<&str>) -> Orchestrator {
        with_probe(launcher, Arc::new(Healthy), network)
    }

    fn with_probe(
        launcher: Arc<RecordingLauncher>,
        probe: Arc<dyn HealthProbe>,
        network: Option<&str>,
    ) -> Orchestrator {
        let snapshot = EnvironmentSnapshot::new(
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            Weekday::Mon,
            network.map(String::from),
        );
        Orchestrator::new(launcher, probe, Arc::new(FixedEnvironment(snapshot)))
    }

    fn config(content: &str) -> Config {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn test_execute_runs_configured_phases() {
        let config = config(
            r#"
[general]
retry_delay_secs = 0

[[apps]]
name = "first"
path = "first-tool"

[[apps]]
name = "second"
path = "second-tool"
depends_on = ["first"]

[browsers.web]
browser_type = "firefox"
urls = ["https://example.com"]

[browsers.web.conditions]
networks = ["office"]
"#,
        );
        let plan = config.build_plan(&RunOverrides::default(), None).unwrap();
        let launcher = Arc::new(RecordingLauncher::default());
        let orchestrator = test_orchestrator(launcher.clone(), Some("home"));

        let (record, network) =
            execute(&orchestrator, &plan, CancelToken::new(), &mut NoProgress).unwrap();

        assert_eq!(network.as_deref(), Some("home"));
        assert!(record.success);
        assert_eq!(
            *launcher.launched.lock().unwrap(),
            vec![
                "connectivity check https://www.google.com",
                "first-tool",
                "second-tool"
            ]
        );
        assert_eq!(
            record.target("web").unwrap().outcome,
            TargetOutcome::SkippedByCondition
        );
    }

    #[test]
    fn test_offline_network_blocks_vpn() {
        let config = config(
            r#"
[network]
check_url = "https://example.com"
max_retries = 0

[vpn]
name = "corp"
type = "network-manager"

[[apps]]
name = "mail"
path = "mail-client"
depends_on = ["vpn"]

[[apps]]
name = "notes"
path = "notes"
"#,
        );
        let plan = config.build_plan(&RunOverrides::default(), None).unwrap();
        let launcher = Arc::new(RecordingLauncher::default());
        let orchestrator = with_probe(launcher.clone(), Arc::new(Offline), None);

        let (record, _) =
            execute(&orchestrator, &plan, CancelToken::new(), &mut NoProgress).unwrap();

        assert_eq!(
            record.target("network").unwrap().outcome,
            TargetOutcome::FailedAfterRetries
        );
        assert_eq!(
            record.target("vpn").unwrap().outcome,
            TargetOutcome::SkippedDependencyFailed
        );
        assert_eq!(
            record.target("mail").unwrap().outcome,
            TargetOutcome::SkippedDependencyFailed
        );
        assert_eq!(
            *launcher.launched.lock().unwrap(),
            vec!["connectivity check https://example.com", "notes"]
        );
        assert!(!record.success);
    }

    #[test]
    fn test_execute_cancelled_run_launches_nothing() {
        let config = config("[[apps]]\nname = \"a\"\npath = \"a\"\n");
        let plan = config.build_plan(&RunOverrides::default(), None).unwrap();
        let launcher = Arc::new(RecordingLauncher::default());
        let orchestrator = test_orchestrator(launcher.clone(), None);

        let cancel = CancelToken::new();
        cancel.cancel();
        let (record, _) = execute(&orchestrator, &plan, cancel, &mut NoProgress).unwrap();

        assert!(record.cancelled);
        assert!(!record.success);
        assert!(launcher.launched.lock().unwrap().is_empty());
        assert_eq!(
            record.target("a").unwrap().outcome,
            TargetOutcome::SkippedCancelled
        );
    }

    #[test]
    fn test_plan_line_mentions_unmet_condition() {
        let planned = PlannedTarget {
            name: "web".into(),
            phase: "browsers".into(),
            mode: launchkit::ExecutionMode::Concurrent,
            decision: PlanDecision::Condition(launchkit::ConditionKind::Networks),
            depends_on: vec!["vpn".into()],
            summary: "firefox (1 urls)".into(),
        };
        let line = plan_line(&planned);
        assert!(line.contains("web"));
        assert!(line.contains("after vpn"));
        assert!(line.contains("not met"));
    }
}
