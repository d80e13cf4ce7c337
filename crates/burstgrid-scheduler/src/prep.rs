//! PrepScheduler — drives a target back to optimum.
//!
//! Each round rebuilds the capacity pool, sizes the corrections with
//! [`plan_prep`], spreads them over the blocks, launches them so the
//! decay correction lands first and the value-decay correction lands last,
//! then sleeps past the last landing and re-samples the target.

use std::time::Duration;

use burst_core::config::CostConfig;
use burst_core::{BurstConfig, Environment, Job, JobKind, LaunchRequest, NodeId, TargetId};
use burstgrid_capacity::{CapacityPool, PoolOptions};
use burstgrid_planner::{PrepMode, PrepNeeds, TargetState, plan_prep, prep_needs};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::lateness::LatenessTracker;
use crate::shutdown::ShutdownSignal;
use crate::signals::CompletionWatcher;
use crate::timing::{LandingSchedule, last_landing};

/// Summary of a finished (or interrupted) preparation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrepReport {
    pub rounds: u32,
    pub modes: Vec<PrepMode>,
    /// Threads launched per round.
    pub round_threads: Vec<u64>,
}

impl PrepReport {
    pub fn total_threads(&self) -> u64 {
        self.round_threads.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrepOutcome {
    /// The target is at optimum.
    Reached(PrepReport),
    Cancelled(PrepReport),
    /// Target metrics could not be re-read.
    ProbeFailed { reason: String, report: PrepReport },
}

pub struct PrepScheduler {
    env: Environment,
    target_id: TargetId,
    extraction_fraction: f64,
    costs: CostConfig,
    pool_options: PoolOptions,
    schedule: LandingSchedule,
    settle_buffer: Duration,
    stall_limit: u32,
    watcher: CompletionWatcher,
}

impl PrepScheduler {
    pub fn new(env: Environment, config: &BurstConfig, target_id: impl Into<TargetId>) -> Self {
        let watcher = CompletionWatcher::new(env.completions.clone(), config.timing.poll_interval());
        Self {
            env,
            target_id: target_id.into(),
            extraction_fraction: config.target.extraction_fraction,
            costs: config.costs.clone(),
            pool_options: PoolOptions::from_config(config),
            schedule: LandingSchedule::from_config(&config.timing),
            settle_buffer: config.prep.settle_buffer(),
            stall_limit: config.prep.stall_limit.max(1),
            watcher,
        }
    }

    /// Run preparation rounds until `state` reaches optimum.
    ///
    /// Fails with [`SchedulerError::InsufficientCapacityForOptimum`] when a
    /// round cannot place a single job, or when `stall_limit` rounds in a
    /// row make no progress.
    pub async fn prepare(
        &self,
        mut state: TargetState,
        batch_sequence: u64,
        lateness: &mut LatenessTracker,
        shutdown: &mut ShutdownSignal,
    ) -> SchedulerResult<PrepOutcome> {
        let formulas = self.env.formulas.as_ref();
        let mut report = PrepReport::default();
        let mut previous = prep_needs(&state, formulas);
        let mut stalled = 0u32;

        while !state.is_at_optimum() {
            if shutdown.is_triggered() {
                return Ok(PrepOutcome::Cancelled(report));
            }

            let mut pool = CapacityPool::new(&self.env.nodes.enumerate_nodes(), &self.pool_options);
            let plan = plan_prep(
                &state,
                formulas,
                pool.total_usable_thread_count(),
                pool.max_block_threads(),
            );
            if plan.round.is_empty() {
                debug!(target_id = %self.target_id, "nothing left to correct");
                break;
            }
            info!(
                target_id = %self.target_id,
                round = report.rounds + 1,
                mode = ?plan.mode,
                rounds_left = plan.rounds,
                decay = plan.round.decay,
                value = plan.round.value,
                value_decay = plan.round.value_decay,
                "preparation round"
            );

            let jobs = self.distribute(&mut pool, &plan.round, batch_sequence);
            if jobs.is_empty() {
                return Err(self.insufficient("no capacity for any preparation job"));
            }

            let Some(dispatched) = self.dispatch(&mut pool, jobs, shutdown) else {
                return Ok(PrepOutcome::Cancelled(report));
            };
            report.rounds += 1;
            report.modes.push(plan.mode);
            report
                .round_threads
                .push(dispatched.iter().map(|j| u64::from(j.thread_count)).sum());

            let settle = last_landing(&dispatched).unwrap_or_else(Instant::now) + self.settle_buffer;
            if !shutdown.sleep_until(settle).await {
                return Ok(PrepOutcome::Cancelled(report));
            }
            self.watcher.drain(lateness);

            state = match self.sample() {
                Ok(state) => state,
                Err(reason) => return Ok(PrepOutcome::ProbeFailed { reason, report }),
            };

            let needs = prep_needs(&state, formulas);
            if needs.decay < previous.decay || needs.value < previous.value || state.is_at_optimum() {
                stalled = 0;
            } else {
                stalled += 1;
                warn!(target_id = %self.target_id, stalled, limit = self.stall_limit, "preparation round made no progress");
                if stalled >= self.stall_limit {
                    return Err(self.insufficient("preparation stopped making progress"));
                }
            }
            previous = needs;
        }

        info!(target_id = %self.target_id, rounds = report.rounds, "target at optimum");
        Ok(PrepOutcome::Reached(report))
    }

    fn sample(&self) -> Result<TargetState, String> {
        self.env
            .probe
            .read_target_metrics(&self.target_id)
            .map(|m| TargetState::from_metrics(self.target_id.clone(), &m, self.extraction_fraction))
    }

    fn insufficient(&self, reason: &str) -> SchedulerError {
        error!(target_id = %self.target_id, reason, "cannot reach optimum");
        SchedulerError::InsufficientCapacityForOptimum {
            target: self.target_id.clone(),
            reason: reason.to_string(),
        }
    }

    fn job(&self, kind: JobKind, threads: u32, batch_sequence: u64) -> Job {
        let mut job = Job::new(
            kind,
            self.target_id.clone(),
            threads,
            self.costs.per_thread(kind),
            batch_sequence,
        );
        job.expected_duration = self.env.formulas.time_for(kind, &self.target_id);
        job
    }

    /// Place this round's jobs on `pool`.
    ///
    /// The value job is atomic and goes first-fit. The two splittable
    /// corrections then walk the blocks in pool order; each block is shared
    /// between them in proportion to what is still outstanding, larger
    /// need first, and any room left over is filled greedily.
    fn distribute(&self, pool: &mut CapacityPool, round: &PrepNeeds, batch_sequence: u64) -> Vec<Job> {
        let mut jobs = Vec::new();

        if round.value > 0 {
            let mut job = self.job(PrepNeeds::VALUE_KIND, round.value, batch_sequence);
            if pool.allocate(&mut job) {
                jobs.push(job);
            } else {
                debug!(threads = round.value, "value job does not fit any block");
            }
        }

        let mut needs = vec![
            (PrepNeeds::DECAY_KIND, round.decay),
            (PrepNeeds::VALUE_DECAY_KIND, round.value_decay),
        ];
        needs.retain(|(_, n)| *n > 0);
        needs.sort_by(|a, b| b.1.cmp(&a.1));

        let node_ids: Vec<NodeId> = pool.blocks().iter().map(|b| b.node_id.clone()).collect();
        for node_id in node_ids {
            let outstanding: u64 = needs.iter().map(|(_, n)| u64::from(*n)).sum();
            if outstanding == 0 {
                break;
            }
            let Some(free) = pool.block(&node_id).map(|b| b.available_units()) else {
                continue;
            };

            for need in needs.iter_mut() {
                let (kind, remaining) = *need;
                if remaining == 0 {
                    continue;
                }
                let share = free * f64::from(remaining) / outstanding as f64;
                let threads = ((share / self.costs.per_thread(kind)).floor() as u32).min(remaining);
                need.1 -= self.place(pool, &node_id, kind, threads, batch_sequence, &mut jobs);
            }

            for need in needs.iter_mut() {
                let (kind, remaining) = *need;
                if remaining == 0 {
                    continue;
                }
                let room = pool
                    .block(&node_id)
                    .map(|b| b.usable_threads(self.costs.per_thread(kind)))
                    .unwrap_or(0);
                need.1 -= self.place(pool, &node_id, kind, room.min(remaining), batch_sequence, &mut jobs);
            }
        }

        for (kind, remaining) in needs {
            if remaining > 0 {
                debug!(%kind, remaining, "preparation need left unplaced");
            }
        }
        jobs
    }

    fn place(
        &self,
        pool: &mut CapacityPool,
        node_id: &str,
        kind: JobKind,
        threads: u32,
        batch_sequence: u64,
        jobs: &mut Vec<Job>,
    ) -> u32 {
        if threads == 0 {
            return 0;
        }
        let mut job = self.job(kind, threads, batch_sequence);
        if !pool.allocate_on(&mut job, node_id) {
            return 0;
        }
        jobs.push(job);
        threads
    }

    /// Launch `jobs`. Returns `None` when cancelled part-way; capacity of
    /// anything not launched is released.
    fn dispatch(
        &self,
        pool: &mut CapacityPool,
        mut jobs: Vec<Job>,
        shutdown: &ShutdownSignal,
    ) -> Option<Vec<Job>> {
        let now = Instant::now();
        self.schedule.stamp(&mut jobs, now, |j| landing_slot(j.kind));
        let last_slot = jobs.iter().map(|j| landing_slot(j.kind)).max().unwrap_or(0);
        for job in jobs.iter_mut() {
            job.requires_completion_report = landing_slot(job.kind) == last_slot;
        }

        let mut dispatched = Vec::with_capacity(jobs.len());
        let mut cancelled = false;
        for mut job in jobs {
            if cancelled || shutdown.is_triggered() {
                cancelled = true;
                pool.release(&mut job);
                continue;
            }
            let Some(request) = LaunchRequest::for_job(&job, now) else {
                continue;
            };
            match self.env.launcher.launch(&request) {
                Ok(handle) => {
                    debug!(
                        kind = %job.kind,
                        node = %request.node_id,
                        threads = job.thread_count,
                        delay_ms = request.delay.as_millis() as u64,
                        handle = handle.0,
                        "preparation job launched"
                    );
                    dispatched.push(job);
                }
                Err(e) => {
                    warn!(kind = %job.kind, node = %request.node_id, error = %e, "preparation launch failed");
                    pool.release(&mut job);
                }
            }
        }

        if cancelled {
            info!(launched = dispatched.len(), "preparation cancelled during dispatch");
            return None;
        }
        Some(dispatched)
    }
}

impl std::fmt::Debug for PrepScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrepScheduler")
            .field("target_id", &self.target_id)
            .field("stall_limit", &self.stall_limit)
            .finish_non_exhaustive()
    }
}

/// Decay correction lands first, the value boost next, and the correction
/// for the boost's decay last.
fn landing_slot(kind: JobKind) -> u32 {
    match kind {
        JobKind::CorrectiveA | JobKind::Primary => 0,
        JobKind::Secondary => 1,
        JobKind::CorrectiveB => 2,
    }
}
