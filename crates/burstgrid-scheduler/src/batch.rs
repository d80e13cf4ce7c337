//! BatchScheduler — one planning/allocation/dispatch/wait cycle per call.
//!
//! ```text
//! Idle → Planning ─┬─ not at optimum ─→ Preparing ─→ Cooldown
//!                  └─ at optimum ─→ Allocating ─┬─ nothing fits ─→ Aborted(reason) ─(retry delay)─┐
//!                                               └─→ Dispatching → AwaitingCompletion → Cooldown   │
//!        ↑                                                                                        │
//!        └────────────────────────────────────── next cycle ──────────────────────────────────────┘
//! ```

use std::cmp::Reverse;

use burst_core::{BurstConfig, Environment, Job, JobKind, LaunchRequest, TargetId};
use burstgrid_capacity::{CapacityPool, PoolOptions};
use burstgrid_planner::{BatchThreads, PlanIssue, TargetState, ThreadPlanner};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{FailureKind, SchedulerError, SchedulerResult};
use crate::lateness::LatenessTracker;
use crate::prep::{PrepOutcome, PrepReport, PrepScheduler};
use crate::shutdown::ShutdownSignal;
use crate::signals::{CompletionWatcher, WaitOutcome};
use crate::status::{SchedulerState, SchedulerStatus, StatusBoard};
use crate::timing::{LandingSchedule, signal_deadline};

/// Reason recorded when no job of a batch could be allocated.
pub const INSUFFICIENT_CAPACITY: &str = "insufficient capacity";

/// What happened to each job of a dispatched batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub batch_sequence: u64,
    pub threads: BatchThreads,
    pub dispatched: Vec<JobKind>,
    /// Not allocated: no block could hold them.
    pub skipped: Vec<JobKind>,
    /// Allocated but rejected at launch.
    pub failed: Vec<JobKind>,
    /// Kind whose completion ended the wait.
    pub terminal: JobKind,
    pub terminal_lateness_ms: Option<i64>,
    pub timed_out: bool,
}

impl BatchReport {
    pub fn is_degraded(&self) -> bool {
        !self.skipped.is_empty() || !self.failed.is_empty()
    }
}

/// Result of one [`BatchScheduler::run_cycle`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A batch was dispatched (possibly degraded) and awaited.
    Completed(BatchReport),
    /// The target was away from optimum and has been brought back.
    Prepared(PrepReport),
    /// The cycle was abandoned; the retry delay has already elapsed.
    Aborted { kind: FailureKind, reason: String },
    Cancelled,
}

/// Drives batches against one target.
pub struct BatchScheduler {
    env: Environment,
    target_id: TargetId,
    extraction_fraction: f64,
    config: BurstConfig,
    planner: ThreadPlanner,
    schedule: LandingSchedule,
    pool_options: PoolOptions,
    watcher: CompletionWatcher,
    prep: PrepScheduler,
    lateness: LatenessTracker,
    status: StatusBoard,
    shutdown: ShutdownSignal,
    batch_sequence: u64,
}

impl BatchScheduler {
    /// Create a scheduler for `target_id`.
    pub fn new(
        env: Environment,
        config: BurstConfig,
        target_id: impl Into<TargetId>,
    ) -> SchedulerResult<Self> {
        config.validate()?;
        let target_id = target_id.into();
        let watcher = CompletionWatcher::new(env.completions.clone(), config.timing.poll_interval());
        let prep = PrepScheduler::new(env.clone(), &config, target_id.clone());
        Ok(Self {
            extraction_fraction: config.target.extraction_fraction,
            planner: ThreadPlanner::from_config(&config.planner),
            schedule: LandingSchedule::from_config(&config.timing),
            pool_options: PoolOptions::from_config(&config),
            watcher,
            prep,
            lateness: LatenessTracker::new(),
            status: StatusBoard::new(),
            shutdown: ShutdownSignal::never(),
            batch_sequence: 0,
            env,
            target_id,
            config,
        })
    }

    /// Create a scheduler for the target named in `config`.
    pub fn from_config(env: Environment, config: BurstConfig) -> SchedulerResult<Self> {
        let target_id = config.target.id.clone().ok_or(SchedulerError::MissingTarget)?;
        Self::new(env, config, target_id)
    }

    /// Observe `shutdown` at every suspension point.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = ShutdownSignal::new(shutdown);
        self
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn batch_sequence(&self) -> u64 {
        self.batch_sequence
    }

    /// Current status snapshot.
    pub fn status(&self) -> SchedulerStatus {
        self.status.snapshot()
    }

    /// Receive every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.subscribe()
    }

    /// Read the target without changing anything.
    pub fn sample_target(&self) -> Result<TargetState, SchedulerError> {
        self.env
            .probe
            .read_target_metrics(&self.target_id)
            .map(|m| TargetState::from_metrics(self.target_id.clone(), &m, self.extraction_fraction))
            .map_err(SchedulerError::Probe)
    }

    /// Plan a batch for the current target state without dispatching it.
    pub fn preview(&self) -> SchedulerResult<(TargetState, BatchThreads)> {
        let state = self.sample_target()?;
        let plan = self
            .planner
            .plan(&state, self.extraction_fraction, self.env.formulas.as_ref());
        Ok((state, plan))
    }

    /// Run cycles until shutdown, `max_cycles`, or a terminal error.
    pub async fn run(&mut self, max_cycles: Option<u64>) -> SchedulerResult<()> {
        info!(target_id = %self.target_id, ?max_cycles, "batch scheduler started");
        let mut cycles = 0u64;
        while max_cycles.is_none_or(|max| cycles < max) {
            match self.run_cycle().await? {
                CycleOutcome::Completed(report) => info!(
                    batch_sequence = report.batch_sequence,
                    dispatched = report.dispatched.len(),
                    degraded = report.is_degraded(),
                    timed_out = report.timed_out,
                    lateness_ms = ?report.terminal_lateness_ms,
                    "batch completed"
                ),
                CycleOutcome::Prepared(report) => info!(
                    rounds = report.rounds,
                    threads = report.total_threads(),
                    "target prepared"
                ),
                CycleOutcome::Aborted { kind, reason } => {
                    debug!(%kind, %reason, "cycle aborted")
                }
                CycleOutcome::Cancelled => break,
            }
            cycles += 1;
        }
        self.status.set_state(SchedulerState::Idle);
        info!(target_id = %self.target_id, cycles, "batch scheduler stopped");
        Ok(())
    }

    /// Run one full cycle.
    ///
    /// Only [`SchedulerError::InsufficientCapacityForOptimum`] is returned
    /// as an error; every other failure is handled here and reported in
    /// the outcome and in [`status`](Self::status).
    pub async fn run_cycle(&mut self) -> SchedulerResult<CycleOutcome> {
        if self.shutdown.is_triggered() {
            return Ok(CycleOutcome::Cancelled);
        }

        // ── Planning ───────────────────────────────────────────────
        self.status.set_state(SchedulerState::Planning);
        self.watcher.clear();

        let state = match self.sample_target() {
            Ok(state) => state,
            Err(e) => return Ok(self.abort(FailureKind::ProbeFailure, e.to_string()).await),
        };

        if !state.is_at_optimum() {
            return self.prepare(state).await;
        }

        let plan = self
            .planner
            .plan(&state, self.extraction_fraction, self.env.formulas.as_ref());
        for issue in &plan.issues {
            if let PlanIssue::Underflow { .. } = issue {
                self.status.record_failure(FailureKind::PlanningUnderflow, issue.to_string());
            }
        }
        let next_sequence = self.batch_sequence + 1;
        let jobs = self.build_jobs(&plan, next_sequence);

        // ── Allocating ─────────────────────────────────────────────
        self.status.set_state(SchedulerState::Allocating);
        let mut pool = CapacityPool::new(&self.env.nodes.enumerate_nodes(), &self.pool_options);
        let mut allocated = Vec::with_capacity(jobs.len());
        let mut skipped = Vec::new();
        for mut job in jobs {
            if pool.allocate(&mut job) {
                allocated.push(job);
            } else {
                debug!(kind = %job.kind, cost = job.cost, "job does not fit any block");
                skipped.push(job.kind);
            }
        }

        if allocated.is_empty() {
            return Ok(self
                .abort(FailureKind::CapacityExhausted, INSUFFICIENT_CAPACITY)
                .await);
        }
        self.batch_sequence = next_sequence;
        self.status.set_batch_sequence(next_sequence);
        if !skipped.is_empty() {
            warn!(batch_sequence = next_sequence, ?skipped, "dispatching degraded batch");
            self.status.record_failure(
                FailureKind::PartialAllocation,
                format!("{} job(s) did not fit", skipped.len()),
            );
        }

        // ── Dispatching ────────────────────────────────────────────
        self.status.set_state(SchedulerState::Dispatching);
        let dispatched_at = Instant::now();
        self.schedule
            .stamp(&mut allocated, dispatched_at, |j| j.kind.position());

        // Highest position first: a rejected terminal job hands the
        // completion report to the next one down.
        allocated.sort_by_key(|j| Reverse(j.kind.position()));

        let mut dispatched: Vec<Job> = Vec::with_capacity(allocated.len());
        let mut failed = Vec::new();
        let mut cancelled = false;
        let mut reporter_launched = false;
        for mut job in allocated {
            if cancelled || self.shutdown.is_triggered() {
                cancelled = true;
                pool.release(&mut job);
                continue;
            }
            job.requires_completion_report = !reporter_launched;
            let Some(request) = LaunchRequest::for_job(&job, dispatched_at) else {
                continue;
            };
            match self.env.launcher.launch(&request) {
                Ok(handle) => {
                    debug!(
                        kind = %job.kind,
                        node = %request.node_id,
                        threads = job.thread_count,
                        delay_ms = request.delay.as_millis() as u64,
                        report = request.report,
                        handle = handle.0,
                        "job launched"
                    );
                    reporter_launched |= job.requires_completion_report;
                    dispatched.push(job);
                }
                Err(e) => {
                    warn!(kind = %job.kind, node = %request.node_id, error = %e, "launch failed");
                    self.status
                        .record_failure(FailureKind::LaunchFailure, format!("{}: {e}", job.kind));
                    job.requires_completion_report = false;
                    pool.release(&mut job);
                    failed.push(job.kind);
                }
            }
        }
        dispatched.sort_by_key(|j| j.kind.position());
        failed.sort_by_key(|k| k.position());

        if cancelled {
            info!(
                batch_sequence = next_sequence,
                launched = dispatched.len(),
                "cancelled during dispatch"
            );
            return Ok(CycleOutcome::Cancelled);
        }

        let Some(terminal) = dispatched.iter().find(|j| j.requires_completion_report) else {
            return Ok(self
                .abort(FailureKind::LaunchFailure, "every launch was rejected")
                .await);
        };
        let terminal_kind = terminal.kind;
        let deadline = signal_deadline(
            dispatched_at,
            terminal,
            self.config.timing.signal_safety_multiplier,
        );

        // ── AwaitingCompletion ─────────────────────────────────────
        self.status.set_state(SchedulerState::AwaitingCompletion);
        let outcome = self
            .watcher
            .wait_for(
                terminal_kind,
                next_sequence,
                deadline,
                &mut self.lateness,
                &mut self.shutdown,
            )
            .await;
        self.status.set_lateness(self.lateness.stats());

        let (terminal_lateness_ms, timed_out) = match outcome {
            WaitOutcome::Observed(signal) => {
                if signal.is_late() {
                    warn!(
                        batch_sequence = next_sequence,
                        kind = %signal.kind,
                        lateness_ms = signal.lateness_ms,
                        "batch landed late"
                    );
                }
                (Some(signal.lateness_ms), false)
            }
            WaitOutcome::TimedOut => {
                self.status.record_failure(
                    FailureKind::SignalTimeout,
                    format!("no {terminal_kind} completion for batch {next_sequence}"),
                );
                (None, true)
            }
            WaitOutcome::Cancelled => return Ok(CycleOutcome::Cancelled),
        };

        let report = BatchReport {
            batch_sequence: next_sequence,
            threads: plan,
            dispatched: dispatched.iter().map(|j| j.kind).collect(),
            skipped,
            failed,
            terminal: terminal_kind,
            terminal_lateness_ms,
            timed_out,
        };

        // ── Cooldown ───────────────────────────────────────────────
        if !self.cooldown().await {
            return Ok(CycleOutcome::Cancelled);
        }
        Ok(CycleOutcome::Completed(report))
    }

    async fn prepare(&mut self, state: TargetState) -> SchedulerResult<CycleOutcome> {
        self.status.set_state(SchedulerState::Preparing);
        let result = self
            .prep
            .prepare(state, self.batch_sequence, &mut self.lateness, &mut self.shutdown)
            .await;
        self.status.set_lateness(self.lateness.stats());

        match result {
            Ok(PrepOutcome::Reached(report)) => {
                if !self.cooldown().await {
                    return Ok(CycleOutcome::Cancelled);
                }
                Ok(CycleOutcome::Prepared(report))
            }
            Ok(PrepOutcome::Cancelled(_)) => Ok(CycleOutcome::Cancelled),
            Ok(PrepOutcome::ProbeFailed { reason, .. }) => {
                Ok(self.abort(FailureKind::ProbeFailure, reason).await)
            }
            Err(err) => {
                let reason = err.to_string();
                if let Some(kind) = err.kind() {
                    self.status.record_failure(kind, reason.clone());
                }
                self.status.set_state(SchedulerState::Aborted(reason));
                error!(target_id = %self.target_id, error = %err, "preparation failed");
                Err(err)
            }
        }
    }

    fn build_jobs(&self, plan: &BatchThreads, batch_sequence: u64) -> Vec<Job> {
        JobKind::BATCH_ORDER
            .iter()
            .filter(|kind| plan.count(**kind) > 0)
            .map(|&kind| {
                let mut job = Job::new(
                    kind,
                    self.target_id.clone(),
                    plan.count(kind),
                    self.config.costs.per_thread(kind),
                    batch_sequence,
                );
                job.expected_duration = self.env.formulas.time_for(kind, &self.target_id);
                job
            })
            .collect()
    }

    async fn cooldown(&mut self) -> bool {
        self.status.set_state(SchedulerState::Cooldown);
        self.shutdown.sleep(self.config.timing.cooldown()).await
    }

    /// Record the failure, enter `Aborted`, and wait out the retry delay.
    async fn abort(&mut self, kind: FailureKind, reason: impl Into<String>) -> CycleOutcome {
        let reason = reason.into();
        warn!(%kind, %reason, batch_sequence = self.batch_sequence, "cycle aborted");
        self.status.record_failure(kind, reason.clone());
        self.status.set_state(SchedulerState::Aborted(reason.clone()));
        if !self.shutdown.sleep(self.config.timing.retry_delay()).await {
            return CycleOutcome::Cancelled;
        }
        CycleOutcome::Aborted { kind, reason }
    }
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("target_id", &self.target_id)
            .field("batch_sequence", &self.batch_sequence)
            .finish_non_exhaustive()
    }
}
