//! Scheduler state machine states and the published status snapshot.

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::FailureKind;
use crate::lateness::LatenessStats;

/// Where the scheduler currently is in its cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Planning,
    /// Driving the target back to optimum.
    Preparing,
    Allocating,
    Dispatching,
    AwaitingCompletion,
    Cooldown,
    /// Cycle abandoned; the next cycle starts after the retry delay.
    Aborted(String),
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Idle => f.write_str("idle"),
            SchedulerState::Planning => f.write_str("planning"),
            SchedulerState::Preparing => f.write_str("preparing"),
            SchedulerState::Allocating => f.write_str("allocating"),
            SchedulerState::Dispatching => f.write_str("dispatching"),
            SchedulerState::AwaitingCompletion => f.write_str("awaiting_completion"),
            SchedulerState::Cooldown => f.write_str("cooldown"),
            SchedulerState::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Last recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub reason: String,
    pub batch_sequence: u64,
}

/// Point-in-time view of the scheduler for external monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    /// Batches that dispatched at least one job.
    pub batch_sequence: u64,
    pub last_failure: Option<FailureRecord>,
    pub lateness: LatenessStats,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            batch_sequence: 0,
            last_failure: None,
            lateness: LatenessStats::default(),
        }
    }
}

/// Owns the status and publishes every change to subscribers.
#[derive(Debug)]
pub(crate) struct StatusBoard {
    tx: watch::Sender<SchedulerStatus>,
}

impl StatusBoard {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(SchedulerStatus::default());
        Self { tx }
    }

    pub(crate) fn snapshot(&self) -> SchedulerStatus {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.tx.subscribe()
    }

    pub(crate) fn set_state(&self, state: SchedulerState) {
        self.tx.send_if_modified(|status| {
            if status.state == state {
                return false;
            }
            status.state = state;
            true
        });
    }

    pub(crate) fn set_batch_sequence(&self, batch_sequence: u64) {
        self.tx.send_modify(|status| status.batch_sequence = batch_sequence);
    }

    pub(crate) fn record_failure(&self, kind: FailureKind, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_modify(|status| {
            status.last_failure = Some(FailureRecord {
                kind,
                reason,
                batch_sequence: status.batch_sequence,
            });
        });
    }

    pub(crate) fn set_lateness(&self, lateness: LatenessStats) {
        self.tx.send_if_modified(|status| {
            if status.lateness == lateness {
                return false;
            }
            status.lateness = lateness;
            true
        });
    }
}
