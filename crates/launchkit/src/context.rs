//! Collaborator traits and run context
//!
//! These traits let the engine drive launches without depending on how
//! processes are spawned, how health is probed or where the environment
//! facts come from. Implementations live with the caller.

use crate::condition::EnvironmentSnapshot;
use crate::error::LaunchError;
use crate::metrics::{PhaseRecord, TargetRecord};
use crate::types::{CredentialHandle, ExecutionMode, HealthMethod, LaunchDescriptor, Secret};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Handle to something the launcher started
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchHandle {
    /// OS process id, when the launch produced a process
    pub pid: Option<u32>,
    /// Free-form detail for logs
    pub detail: Option<String>,
}

impl LaunchHandle {
    pub fn process(pid: u32) -> Self {
        Self {
            pid: Some(pid),
            detail: None,
        }
    }

    pub fn detached(detail: impl Into<String>) -> Self {
        Self {
            pid: None,
            detail: Some(detail.into()),
        }
    }
}

/// Starts a target from its descriptor
pub trait Launcher: Send + Sync {
    fn launch(&self, descriptor: &LaunchDescriptor) -> Result<LaunchHandle, LaunchError>;
}

/// Verifies that a launched target is healthy.
///
/// Implementations should return within `timeout`; the engine abandons the
/// probe and treats it as unhealthy when they do not.
pub trait HealthProbe: Send + Sync {
    fn check(&self, method: &HealthMethod, timeout: Duration) -> bool;
}

/// Samples the current time, weekday and network
pub trait EnvironmentProvider: Send + Sync {
    fn snapshot(&self) -> EnvironmentSnapshot;
}

/// Resolves credential handles to secrets.
///
/// Only launchers consult this; the engine never sees secret values.
pub trait CredentialProvider: Send + Sync {
    fn resolve(&self, handle: &CredentialHandle) -> Option<Secret>;
}

/// Environment provider that always returns the same snapshot
#[derive(Debug, Clone)]
pub struct FixedEnvironment(pub EnvironmentSnapshot);

impl EnvironmentProvider for FixedEnvironment {
    fn snapshot(&self) -> EnvironmentSnapshot {
        self.0.clone()
    }
}

/// Progress callback for orchestration runs
///
/// Implement this trait to receive progress updates during a run.
pub trait ProgressCallback: Send {
    /// Called when a phase starts
    fn on_phase_start(&mut self, name: &str, mode: ExecutionMode, count: usize);

    /// Called before a target enters `Launching`
    fn on_target_start(&mut self, name: &str);

    /// Called when a target reaches its final outcome
    fn on_target_complete(&mut self, record: &TargetRecord);

    /// Called when a phase completes
    fn on_phase_complete(&mut self, record: &PhaseRecord);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_phase_start(&mut self, _name: &str, _mode: ExecutionMode, _count: usize) {}
    fn on_target_start(&mut self, _name: &str) {}
    fn on_target_complete(&mut self, _record: &TargetRecord) {}
    fn on_phase_complete(&mut self, _record: &PhaseRecord) {}
}

// ============================================================================
// Cancellation
// ============================================================================

/// Run-scoped cancellation signal.
///
/// Clones share the same signal. Waiting through [`CancelToken::wait_for`]
/// wakes up as soon as the token is cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` when the full duration elapsed, `false` on cancellation.
    pub fn wait_for(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut cancelled = lock.lock().unwrap_or_else(PoisonError::into_inner);

        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            cancelled = cvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        false
    }
}
