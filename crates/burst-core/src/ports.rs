//! Collaborator ports consumed by the scheduling core.
//!
//! Node discovery, job launch, target metrics, game formulas, and the
//! completion channel are all external capabilities. They are injected as
//! trait objects so the scheduler can run against a live cluster, the
//! in-memory simulator, or a test double.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::types::{
    CompletionSignal, JobKind, LaunchHandle, LaunchRequest, NodeSnapshot, TargetMetrics,
};

/// Why a launch was rejected by the remote node.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LaunchError {
    #[error("node not found: {0}")]
    UnknownNode(String),

    #[error("insufficient capacity on node {node}: need {needed}, have {available}")]
    InsufficientCapacity {
        node: String,
        needed: f64,
        available: f64,
    },

    #[error("node {0} rejected the launch")]
    Rejected(String),
}

/// Enumerates all reachable nodes.
pub trait NodeInventory: Send + Sync {
    fn enumerate_nodes(&self) -> Vec<NodeSnapshot>;
}

/// Starts a job on a node. Fire-and-forget: the job runs to completion on
/// its own and cannot be recalled.
pub trait Launcher: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchHandle, LaunchError>;
}

/// Reads the live metrics of a target.
pub trait TargetProbe: Send + Sync {
    fn read_target_metrics(&self, target_id: &str) -> Result<TargetMetrics, String>;
}

/// Pure time and effect formulas of the environment.
pub trait Formulas: Send + Sync {
    /// Intrinsic run time of a job of `kind` against `target_id`.
    fn time_for(&self, kind: JobKind, target_id: &str) -> Duration;

    /// Decay magnitude of `threads` threads: induced for `Primary` and
    /// `Secondary`, removed for the corrective kinds.
    fn effect_analyze(&self, kind: JobKind, threads: u32) -> f64;

    /// Fractional thread count needed to reach `desired`.
    ///
    /// `desired` is an absolute value amount for `Primary`, a value
    /// multiplier for `Secondary`, and a decay reduction for correctives.
    fn threads_for(&self, kind: JobKind, target_id: &str, desired: f64) -> f64;

    /// Fraction of the target's value removed by one `Primary` thread.
    fn extraction_per_thread(&self, target_id: &str) -> f64;
}

/// Single-reader, multi-writer FIFO of completion signals.
pub trait SignalChannel: Send + Sync {
    fn write_signal(&self, signal: CompletionSignal);
    fn read_signal(&self) -> Option<CompletionSignal>;
    fn clear(&self);
}

/// Bundle of every collaborator the scheduler needs.
///
/// Channels are keyed by purpose: `completions` carries job completion
/// signals and nothing else.
#[derive(Clone)]
pub struct Environment {
    pub nodes: Arc<dyn NodeInventory>,
    pub launcher: Arc<dyn Launcher>,
    pub probe: Arc<dyn TargetProbe>,
    pub formulas: Arc<dyn Formulas>,
    pub completions: Arc<dyn SignalChannel>,
}

impl Environment {
    /// Build an environment from a single value that implements every port.
    pub fn from_cluster<C>(cluster: Arc<C>, completions: Arc<dyn SignalChannel>) -> Self
    where
        C: NodeInventory + Launcher + TargetProbe + Formulas + 'static,
    {
        Self {
            nodes: cluster.clone(),
            launcher: cluster.clone(),
            probe: cluster.clone(),
            formulas: cluster,
            completions,
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment").finish_non_exhaustive()
    }
}
