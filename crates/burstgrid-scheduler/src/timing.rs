//! Landing-time computation.
//!
//! Jobs are launched together but must land in a fixed order. Each job
//! gets a landing slot; the slot's instant is
//!
//! ```text
//! landing(slot) = now + anchor + launch_slack + stagger * slot
//! ```
//!
//! where `anchor` is the longest intrinsic duration among the jobs being
//! launched. A job's launch delay is then `landing - now - duration`, which
//! is never negative, so every job can make its slot.

use std::time::Duration;

use burst_core::Job;
use burst_core::config::TimingConfig;
use tokio::time::Instant;

/// Spacing parameters for landing slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LandingSchedule {
    pub stagger: Duration,
    pub launch_slack: Duration,
}

impl LandingSchedule {
    pub fn new(stagger: Duration, launch_slack: Duration) -> Self {
        Self {
            stagger,
            launch_slack,
        }
    }

    pub fn from_config(config: &TimingConfig) -> Self {
        Self::new(config.stagger(), config.launch_slack())
    }

    /// Longest of the given durations.
    pub fn anchor<I>(durations: I) -> Duration
    where
        I: IntoIterator<Item = Duration>,
    {
        durations.into_iter().max().unwrap_or(Duration::ZERO)
    }

    /// Landing instant of `slot` for jobs launched at `now`.
    pub fn landing(&self, now: Instant, anchor: Duration, slot: u32) -> Instant {
        now + anchor + self.launch_slack + self.stagger * slot
    }

    /// Stamp each job with its landing instant. `slot_of` maps a job to
    /// its position in the landing order.
    pub fn stamp<F>(&self, jobs: &mut [Job], now: Instant, slot_of: F)
    where
        F: Fn(&Job) -> u32,
    {
        let anchor = Self::anchor(jobs.iter().map(|j| j.expected_duration));
        for job in jobs.iter_mut() {
            job.planned_completion = self.landing(now, anchor, slot_of(job));
        }
    }
}

/// Latest landing instant among `jobs`.
pub fn last_landing(jobs: &[Job]) -> Option<Instant> {
    jobs.iter().map(|j| j.planned_completion).max()
}

/// Deadline for the terminal completion signal.
pub fn signal_deadline(dispatched_at: Instant, terminal: &Job, safety_multiplier: f64) -> Instant {
    let window = terminal.expected_duration.mul_f64(safety_multiplier.max(1.0));
    dispatched_at + terminal.launch_delay(dispatched_at) + window
}

#[cfg(test)]
mod tests {
    use super::*;
    use burst_core::JobKind;

    fn job(kind: JobKind, millis: u64) -> Job {
        let mut job = Job::new(kind, "t", 1, 1.0, 0);
        job.expected_duration = Duration::from_millis(millis);
        job
    }

    fn batch() -> Vec<Job> {
        vec![
            job(JobKind::Primary, 1000),
            job(JobKind::CorrectiveA, 4000),
            job(JobKind::Secondary, 3200),
            job(JobKind::CorrectiveB, 4000),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn completions_strictly_increase_by_at_least_stagger() {
        let schedule = LandingSchedule::new(Duration::from_millis(5), Duration::from_millis(100));
        let now = Instant::now();
        let mut jobs = batch();
        schedule.stamp(&mut jobs, now, |j| j.kind.position());

        let landings: Vec<Instant> = jobs
            .iter()
            .map(|j| now + j.launch_delay(now) + j.expected_duration)
            .collect();
        for pair in landings.windows(2) {
            assert!(pair[1] > pair[0]);
            assert!(pair[1] - pair[0] >= Duration::from_millis(5));
        }
        // Realized landings equal the planned ones.
        for (j, landed) in jobs.iter().zip(&landings) {
            assert_eq!(j.planned_completion, *landed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delays_back_out_each_duration() {
        let schedule = LandingSchedule::new(Duration::from_millis(5), Duration::from_millis(100));
        let now = Instant::now();
        let mut jobs = batch();
        schedule.stamp(&mut jobs, now, |j| j.kind.position());

        let delays: Vec<u128> = jobs.iter().map(|j| j.launch_delay(now).as_millis()).collect();
        assert_eq!(delays, vec![3100, 105, 910, 115]);
    }

    #[tokio::test(start_paused = true)]
    async fn landing_order_holds_when_fast_job_is_last() {
        let schedule = LandingSchedule::new(Duration::from_millis(20), Duration::ZERO);
        let now = Instant::now();
        let mut jobs = vec![job(JobKind::Primary, 9000), job(JobKind::CorrectiveB, 10)];
        schedule.stamp(&mut jobs, now, |j| j.kind.position());
        assert_eq!(jobs[0].launch_delay(now), Duration::ZERO);
        assert_eq!(jobs[1].planned_completion - jobs[0].planned_completion, Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn signal_deadline_covers_delay_and_padded_duration() {
        let schedule = LandingSchedule::new(Duration::from_millis(5), Duration::from_millis(100));
        let now = Instant::now();
        let mut jobs = batch();
        schedule.stamp(&mut jobs, now, |j| j.kind.position());
        let terminal = &jobs[3];
        let deadline = signal_deadline(now, terminal, 1.5);
        assert_eq!(deadline - now, Duration::from_millis(115 + 6000));
        assert_eq!(last_landing(&jobs), Some(terminal.planned_completion));
    }

    #[test]
    fn anchor_of_nothing_is_zero() {
        assert_eq!(LandingSchedule::anchor(std::iter::empty()), Duration::ZERO);
    }
}
