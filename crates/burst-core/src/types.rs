//! Shared types used across burstgrid crates.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Unique identifier for a compute node.
pub type NodeId = String;

/// Unique identifier for a target.
pub type TargetId = String;

// ── Job kinds ──────────────────────────────────────────────────────

/// The four roles a job plays inside a batch.
///
/// Declaration order is the required completion order of their effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Extracts value, raises decay.
    Primary,
    /// Removes the decay raised by `Primary`.
    CorrectiveA,
    /// Restores value, raises decay.
    Secondary,
    /// Removes the decay raised by `Secondary`.
    CorrectiveB,
}

impl JobKind {
    /// All kinds in required completion order.
    pub const BATCH_ORDER: [JobKind; 4] = [
        JobKind::Primary,
        JobKind::CorrectiveA,
        JobKind::Secondary,
        JobKind::CorrectiveB,
    ];

    /// Zero-based position in the completion order.
    pub fn position(self) -> u32 {
        match self {
            JobKind::Primary => 0,
            JobKind::CorrectiveA => 1,
            JobKind::Secondary => 2,
            JobKind::CorrectiveB => 3,
        }
    }

    /// Whether this kind reduces decay.
    pub fn is_corrective(self) -> bool {
        matches!(self, JobKind::CorrectiveA | JobKind::CorrectiveB)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Primary => "primary",
            JobKind::CorrectiveA => "corrective_a",
            JobKind::Secondary => "secondary",
            JobKind::CorrectiveB => "corrective_b",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Nodes and targets ──────────────────────────────────────────────

/// Live capacity snapshot of one node, as reported by node discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub max_capacity: f64,
    pub used_capacity: f64,
    /// Whether the scheduler may launch jobs on this node.
    pub has_access: bool,
}

impl NodeSnapshot {
    pub fn free_capacity(&self) -> f64 {
        (self.max_capacity - self.used_capacity).max(0.0)
    }
}

/// Raw metrics read from a target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetMetrics {
    pub value: f64,
    pub max_value: f64,
    pub decay: f64,
    pub min_decay: f64,
}

// ── Jobs ───────────────────────────────────────────────────────────

/// One unit of dispatchable work inside a batch or a preparation round.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub kind: JobKind,
    pub target_id: TargetId,
    pub thread_count: u32,
    /// Capacity units consumed while running (`threads * per-thread cost`).
    pub cost: f64,
    /// Node the job was allocated to, `None` until allocation succeeds.
    pub node_id: Option<NodeId>,
    /// Instant at which the job's effect must land.
    pub planned_completion: Instant,
    /// Intrinsic run time of the job once started.
    pub expected_duration: Duration,
    pub batch_sequence: u64,
    /// Only jobs with this flag are waited on by the scheduler.
    pub requires_completion_report: bool,
}

impl Job {
    /// Create an unallocated job.
    pub fn new(
        kind: JobKind,
        target_id: impl Into<TargetId>,
        thread_count: u32,
        cost_per_thread: f64,
        batch_sequence: u64,
    ) -> Self {
        Self {
            kind,
            target_id: target_id.into(),
            thread_count,
            cost: f64::from(thread_count) * cost_per_thread,
            node_id: None,
            planned_completion: Instant::now(),
            expected_duration: Duration::ZERO,
            batch_sequence,
            requires_completion_report: false,
        }
    }

    /// Set the landing instant and intrinsic duration.
    pub fn with_timing(mut self, planned_completion: Instant, expected_duration: Duration) -> Self {
        self.planned_completion = planned_completion;
        self.expected_duration = expected_duration;
        self
    }

    pub fn is_allocated(&self) -> bool {
        self.node_id.is_some()
    }

    /// Launch delay needed, from `now`, for the effect to land on time.
    ///
    /// Saturates at zero when the landing instant can no longer be met.
    pub fn launch_delay(&self, now: Instant) -> Duration {
        self.planned_completion
            .saturating_duration_since(now)
            .saturating_sub(self.expected_duration)
    }
}

/// What the launcher needs to start one job on a node.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub kind: JobKind,
    pub target_id: TargetId,
    pub node_id: NodeId,
    pub threads: u32,
    /// Startup delay before the job begins its work.
    pub delay: Duration,
    /// Instant the effect is expected to land (for lateness reporting).
    pub landing_deadline: Instant,
    pub batch_sequence: u64,
    /// Capacity held on the node while the job runs.
    pub cost: f64,
    /// Write a completion signal when the job lands.
    pub report: bool,
}

impl LaunchRequest {
    /// Build a request for an allocated job. Returns `None` if the job has
    /// no node yet.
    pub fn for_job(job: &Job, now: Instant) -> Option<Self> {
        let node_id = job.node_id.clone()?;
        Some(Self {
            kind: job.kind,
            target_id: job.target_id.clone(),
            node_id,
            threads: job.thread_count,
            delay: job.launch_delay(now),
            landing_deadline: job.planned_completion,
            batch_sequence: job.batch_sequence,
            cost: job.cost,
            report: job.requires_completion_report,
        })
    }
}

/// Opaque handle returned by a successful launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaunchHandle(pub u64);

// ── Completion signals ─────────────────────────────────────────────

/// Written to the completion channel by a job when it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSignal {
    pub kind: JobKind,
    pub batch_sequence: u64,
    /// Milliseconds past the requested landing instant; `<= 0` is on time.
    pub lateness_ms: i64,
}

impl CompletionSignal {
    pub fn is_late(&self) -> bool {
        self.lateness_ms > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_order_matches_positions() {
        for (i, kind) in JobKind::BATCH_ORDER.iter().enumerate() {
            assert_eq!(kind.position() as usize, i);
        }
        assert!(JobKind::Primary < JobKind::CorrectiveB);
    }

    #[test]
    fn job_cost_scales_with_threads() {
        let job = Job::new(JobKind::Secondary, "t", 10, 1.75, 0);
        assert!((job.cost - 17.5).abs() < f64::EPSILON);
        assert!(!job.is_allocated());
    }

    #[tokio::test(start_paused = true)]
    async fn launch_delay_backs_out_duration() {
        let now = Instant::now();
        let job = Job::new(JobKind::Primary, "t", 1, 1.7, 0)
            .with_timing(now + Duration::from_millis(4100), Duration::from_millis(1000));
        assert_eq!(job.launch_delay(now), Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn launch_delay_saturates_when_late() {
        let now = Instant::now();
        let job = Job::new(JobKind::CorrectiveA, "t", 1, 1.75, 0)
            .with_timing(now + Duration::from_millis(500), Duration::from_millis(1000));
        assert_eq!(job.launch_delay(now), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_request_requires_allocation() {
        let now = Instant::now();
        let mut job = Job::new(JobKind::Primary, "t", 3, 1.7, 7);
        assert!(LaunchRequest::for_job(&job, now).is_none());

        job.node_id = Some("n1".to_string());
        let req = LaunchRequest::for_job(&job, now).unwrap();
        assert_eq!(req.node_id, "n1");
        assert_eq!(req.threads, 3);
        assert_eq!(req.batch_sequence, 7);
        assert!(!req.report);

        job.requires_completion_report = true;
        assert!(LaunchRequest::for_job(&job, now).unwrap().report);
    }

    #[test]
    fn signal_lateness() {
        let on_time = CompletionSignal { kind: JobKind::CorrectiveB, batch_sequence: 1, lateness_ms: 0 };
        let late = CompletionSignal { lateness_ms: 12, ..on_time };
        assert!(!on_time.is_late());
        assert!(late.is_late());
    }

    #[test]
    fn free_capacity_never_negative() {
        let node = NodeSnapshot {
            node_id: "n".into(),
            max_capacity: 8.0,
            used_capacity: 9.0,
            has_access: true,
        };
        assert_eq!(node.free_capacity(), 0.0);
    }
}
