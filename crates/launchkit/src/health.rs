//! Per-target launch state machine with health verification and retry
//!
//! ```text
//! Pending -> Launching -> Verifying -> Healthy
//!               ^             |
//!               |             v
//!               +-------- Retrying -> Failed
//! ```
//!
//! A launch error or an unhealthy probe counts as a failed attempt. While
//! attempts remain the machine moves to `Retrying`, sleeps the policy delay and
//! launches again; otherwise it ends in `Failed`. Cancellation interrupts any
//! wait and ends in `Cancelled`.

use crate::context::{CancelToken, HealthProbe, Launcher};
use crate::types::{HealthMethod, RetryPolicy, Target};
use std::fmt;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

/// How often a pending probe re-checks the cancel token
const PROBE_POLL_SLICE: Duration = Duration::from_millis(100);

/// Lifecycle state of one target within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchState {
    Pending,
    Launching,
    Verifying,
    Retrying,
    Healthy,
    Failed,
    Cancelled,
}

impl LaunchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Healthy | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Launching => "launching",
            Self::Verifying => "verifying",
            Self::Retrying => "retrying",
            Self::Healthy => "healthy",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Receives every state transition of a [`LaunchMachine`]
pub trait StateObserver {
    fn on_transition(&mut self, target: &str, from: LaunchState, to: LaunchState, attempt: u32);
}

/// Observer that writes transitions to the debug log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl StateObserver for LogObserver {
    fn on_transition(&mut self, target: &str, from: LaunchState, to: LaunchState, attempt: u32) {
        log::debug!("{target}: {from} -> {to} (attempt {attempt})");
    }
}

/// Result of one verification step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Healthy,
    Unhealthy,
    /// No health check configured; the launch itself counts as success
    Skipped,
    /// The probe did not answer in time and was abandoned
    TimedOut,
    Cancelled,
}

/// Final report of a machine that reached a terminal state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub state: LaunchState,
    /// Launch attempts made, including the first
    pub attempts: u32,
    /// Reason for the last failed attempt
    pub last_error: Option<String>,
    /// Outcome of the last verification, if any ran
    pub last_check: Option<CheckOutcome>,
}

/// Drives one target from `Pending` to a terminal state.
///
/// Each call to [`step`](Self::step) performs exactly one transition, which
/// makes intermediate states observable. [`run`](Self::run) steps until
/// the machine is terminal.
pub struct LaunchMachine<'a> {
    target: &'a Target,
    launcher: &'a dyn Launcher,
    probe: Arc<dyn HealthProbe>,
    policy: &'a RetryPolicy,
    cancel: &'a CancelToken,
    state: LaunchState,
    attempts: u32,
    last_error: Option<String>,
    last_check: Option<CheckOutcome>,
}

impl<'a> LaunchMachine<'a> {
    pub fn new(
        target: &'a Target,
        launcher: &'a dyn Launcher,
        probe: Arc<dyn HealthProbe>,
        policy: &'a RetryPolicy,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            target,
            launcher,
            probe,
            policy,
            cancel,
            state: LaunchState::Pending,
            attempts: 0,
            last_error: None,
            last_check: None,
        }
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retries allowed after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.target
            .health_check
            .as_ref()
            .map_or(self.policy.max_retries, |check| check.max_retries)
    }

    /// Perform one transition and return the new state.
    ///
    /// Stepping a terminal machine is a no-op.
    pub fn step(&mut self, observer: &mut dyn StateObserver) -> LaunchState {
        let next = match self.state {
            LaunchState::Pending => self.begin_attempt(),
            LaunchState::Launching => self.launch(),
            LaunchState::Verifying => self.verify(),
            LaunchState::Retrying => self.wait_for_retry(),
            terminal => return terminal,
        };

        observer.on_transition(&self.target.name, self.state, next, self.attempts);
        self.state = next;
        next
    }

    /// Step until terminal and report the result
    pub fn run(mut self, observer: &mut dyn StateObserver) -> AttemptReport {
        while !self.state.is_terminal() {
            self.step(observer);
        }
        AttemptReport {
            state: self.state,
            attempts: self.attempts,
            last_error: self.last_error,
            last_check: self.last_check,
        }
    }

    fn begin_attempt(&mut self) -> LaunchState {
        if self.cancel.is_cancelled() {
            return LaunchState::Cancelled;
        }
        self.attempts += 1;
        LaunchState::Launching
    }

    fn launch(&mut self) -> LaunchState {
        if self.cancel.is_cancelled() {
            return LaunchState::Cancelled;
        }

        log::info!(
            "Launching {} (attempt {}/{})",
            self.target.name,
            self.attempts,
            self.max_retries() + 1
        );

        match self.launcher.launch(&self.target.descriptor) {
            Ok(handle) => {
                if let Some(pid) = handle.pid {
                    log::debug!("{} started with pid {pid}", self.target.name);
                }
                LaunchState::Verifying
            }
            Err(e) => {
                log::warn!("{}: launch failed: {e}", self.target.name);
                self.last_error = Some(e.to_string());
                self.retry_or_fail()
            }
        }
    }

    fn verify(&mut self) -> LaunchState {
        if !self.target.post_launch_wait.is_zero()
            && !self.cancel.wait_for(self.target.post_launch_wait)
        {
            return LaunchState::Cancelled;
        }

        let outcome = match &self.target.health_check {
            Some(check) if check.method != HealthMethod::None => probe_with_timeout(
                &self.probe,
                &check.method,
                check.effective_timeout(),
                self.cancel,
            ),
            _ => CheckOutcome::Skipped,
        };
        self.last_check = Some(outcome);

        match outcome {
            CheckOutcome::Healthy | CheckOutcome::Skipped => {
                self.last_error = None;
                LaunchState::Healthy
            }
            CheckOutcome::Cancelled => LaunchState::Cancelled,
            CheckOutcome::Unhealthy | CheckOutcome::TimedOut => {
                let message = self.check_failure(outcome);
                log::warn!("{}: {message}", self.target.name);
                self.last_error = Some(message);
                self.retry_or_fail()
            }
        }
    }

    fn check_failure(&self, outcome: CheckOutcome) -> String {
        let Some(check) = &self.target.health_check else {
            return "health check failed".to_string();
        };
        if outcome == CheckOutcome::TimedOut {
            format!(
                "health check {} timed out after {}s",
                check.method,
                check.effective_timeout().as_secs_f64()
            )
        } else {
            format!("health check {} failed", check.method)
        }
    }

    fn wait_for_retry(&mut self) -> LaunchState {
        let delay = self.policy.delay_for_retry(self.attempts.saturating_sub(1));
        log::info!(
            "Retrying {} in {:.1}s",
            self.target.name,
            delay.as_secs_f64()
        );
        if !delay.is_zero() && !self.cancel.wait_for(delay) {
            return LaunchState::Cancelled;
        }
        self.begin_attempt()
    }

    fn retry_or_fail(&self) -> LaunchState {
        if self.attempts <= self.max_retries() {
            LaunchState::Retrying
        } else {
            LaunchState::Failed
        }
    }
}

/// Run `probe` on a helper thread and give up after `timeout`.
///
/// The helper thread is detached when abandoned; its answer is discarded.
pub fn probe_with_timeout(
    probe: &Arc<dyn HealthProbe>,
    method: &HealthMethod,
    timeout: Duration,
    cancel: &CancelToken,
) -> CheckOutcome {
    let (tx, rx) = mpsc::channel();
    let worker_probe = Arc::clone(probe);
    let worker_method = method.clone();

    let spawned = thread::Builder::new()
        .name("health-probe".into())
        .spawn(move || {
            let healthy = worker_probe.check(&worker_method, timeout);
            let _ = tx.send(healthy);
        });
    if let Err(e) = spawned {
        log::warn!("Could not start health probe thread: {e}");
        return CheckOutcome::Unhealthy;
    }

    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return CheckOutcome::Cancelled;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return CheckOutcome::TimedOut;
        }
        match rx.recv_timeout(remaining.min(PROBE_POLL_SLICE)) {
            Ok(true) => return CheckOutcome::Healthy,
            Ok(false) => return CheckOutcome::Unhealthy,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => return CheckOutcome::Unhealthy,
        }
    }
}
