//! Error types for startup orchestration.
//!
//! Errors are split by how far they propagate:
//! - [`ConfigError`] is fatal and aborts a run before any target launches
//! - [`LaunchError`] is local to one attempt and feeds the retry loop
//! - [`Error`] wraps everything the engine can surface to its caller

use thiserror::Error;

/// Problems with the declared target set or phase layout.
///
/// Every variant names the offending targets so the operator can fix the
/// configuration in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Two targets share a name
    #[error("duplicate target name: {name}")]
    DuplicateTarget {
        /// The name declared more than once
        name: String,
    },

    /// A `depends_on` entry names a target that does not exist
    #[error("target '{target}' depends on unknown target '{dependency}'")]
    UnknownDependency {
        /// Target declaring the dependency
        target: String,
        /// The missing prerequisite name
        dependency: String,
    },

    /// The enabled targets contain at least one dependency cycle
    #[error("dependency cycle detected among targets: {}", .members.join(", "))]
    Cycle {
        /// Every target that could not be ordered, in declaration order
        members: Vec<String>,
    },

    /// A phase lists a target name that was never declared
    #[error("phase '{phase}' references unknown target '{target}'")]
    UnknownPhaseMember {
        /// Phase name
        phase: String,
        /// The undeclared target name
        target: String,
    },

    /// A target is listed in more than one phase (or twice in one phase)
    #[error("target '{target}' is assigned to both phase '{first}' and phase '{second}'")]
    DuplicatePhaseMember {
        /// Target name
        target: String,
        /// Phase where the target was first seen
        first: String,
        /// Phase where it was seen again
        second: String,
    },

    /// A declared target belongs to no phase
    #[error("target '{target}' is not assigned to any phase")]
    UnassignedTarget {
        /// Target name
        target: String,
    },

    /// A concurrent phase contains a dependency edge between its members
    #[error(
        "phase '{phase}' runs concurrently but '{target}' depends on '{dependency}' in the same phase"
    )]
    ConcurrentDependency {
        /// Phase name
        phase: String,
        /// Dependent target
        target: String,
        /// Prerequisite inside the same phase
        dependency: String,
    },

    /// A target depends on a target scheduled in a later phase
    #[error(
        "target '{target}' in phase '{phase}' depends on '{dependency}' which runs later in phase '{dependency_phase}'"
    )]
    PhaseOrder {
        /// Dependent target
        target: String,
        /// Phase of the dependent target
        phase: String,
        /// Prerequisite target
        dependency: String,
        /// Phase of the prerequisite
        dependency_phase: String,
    },
}

/// Failure reported by the launch collaborator for a single attempt.
///
/// All variants are recoverable from the engine's point of view: they count
/// as a failed attempt and consume the target's retry budget.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Executable, folder or other launch subject does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The process could not be spawned
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error message
        message: String,
    },

    /// A launch command ran but reported failure
    #[error("command failed: {message}")]
    CommandFailed {
        /// Summary of what failed, stderr included when available
        message: String,
    },

    /// The descriptor needs a credential that no provider could supply
    #[error("credential '{0}' is not available")]
    MissingCredential(String),

    /// The descriptor cannot be launched on this platform
    #[error("unsupported on this platform: {0}")]
    Unsupported(String),

    /// IO error while preparing the launch
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by the engine to its caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid target set or phase layout
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The bounded worker pool for a concurrent phase could not be built
    #[error("failed to create worker pool: {0}")]
    WorkerPool(String),

    /// IO error (metrics history)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (metrics history)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error was caused by the declared configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
