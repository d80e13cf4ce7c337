//! Scheduler error types and recoverable failure tags.

use burst_core::ConfigError;
use serde::Serialize;
use thiserror::Error;

/// Errors that escape a scheduling cycle.
///
/// Everything recoverable (capacity exhaustion, launch rejection, signal
/// timeouts) is handled inside the cycle and reported as a [`FailureKind`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("insufficient capacity to reach optimum on {target}: {reason}")]
    InsufficientCapacityForOptimum { target: String, reason: String },

    #[error("target probe failed: {0}")]
    Probe(String),

    #[error("no target configured")]
    MissingTarget,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Recoverable failures, recorded in status and handled locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No block could hold any job; retried after a delay.
    CapacityExhausted,
    /// Some jobs could not be allocated; the rest were dispatched.
    PartialAllocation,
    /// A launch was rejected; its capacity was released.
    LaunchFailure,
    /// The terminal completion signal never arrived.
    SignalTimeout,
    /// A computed thread count was clamped up to 1.
    PlanningUnderflow,
    /// Target metrics could not be read.
    ProbeFailure,
    /// Preparation could not make progress.
    InsufficientCapacityForOptimum,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::CapacityExhausted => "capacity exhausted",
            FailureKind::PartialAllocation => "partial allocation",
            FailureKind::LaunchFailure => "launch failure",
            FailureKind::SignalTimeout => "signal timeout",
            FailureKind::PlanningUnderflow => "planning underflow",
            FailureKind::ProbeFailure => "probe failure",
            FailureKind::InsufficientCapacityForOptimum => "insufficient capacity for optimum",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SchedulerError {
    /// Failure tag recorded in status for this error.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            SchedulerError::InsufficientCapacityForOptimum { .. } => {
                Some(FailureKind::InsufficientCapacityForOptimum)
            }
            _ => None,
        }
    }
}
