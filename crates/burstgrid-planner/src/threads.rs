//! Batch thread planning.

use burst_core::config::PlannerConfig;
use burst_core::{Formulas, JobKind};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::target::TargetState;

/// Non-fatal problems found while planning. The plan is still usable.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum PlanIssue {
    #[error("{kind} thread count underflowed ({computed}); clamped to 1")]
    Underflow { kind: JobKind, computed: f64 },

    #[error("{kind} did not reach required reduction {required} after {steps} steps")]
    NotConverged {
        kind: JobKind,
        required: f64,
        steps: u32,
    },
}

/// Result of sizing one corrective job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Convergence {
    pub threads: u32,
    /// Increments taken after the initial estimate.
    pub steps: u32,
    pub converged: bool,
}

/// Thread counts for the four jobs of one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchThreads {
    pub primary: u32,
    pub corrective_a: u32,
    pub secondary: u32,
    pub corrective_b: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<PlanIssue>,
}

impl BatchThreads {
    pub fn count(&self, kind: JobKind) -> u32 {
        match kind {
            JobKind::Primary => self.primary,
            JobKind::CorrectiveA => self.corrective_a,
            JobKind::Secondary => self.secondary,
            JobKind::CorrectiveB => self.corrective_b,
        }
    }

    pub fn total(&self) -> u64 {
        JobKind::BATCH_ORDER
            .iter()
            .map(|k| u64::from(self.count(*k)))
            .sum()
    }
}

/// Computes batch thread counts from a target snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadPlanner {
    margin_for_error: f64,
    corrective_step: u32,
    max_convergence_steps: u32,
}

impl Default for ThreadPlanner {
    fn default() -> Self {
        Self::from_config(&PlannerConfig::default())
    }
}

impl ThreadPlanner {
    pub fn new(margin_for_error: f64, corrective_step: u32, max_convergence_steps: u32) -> Self {
        Self {
            margin_for_error: margin_for_error.max(1.0),
            corrective_step: corrective_step.max(1),
            max_convergence_steps,
        }
    }

    pub fn from_config(config: &PlannerConfig) -> Self {
        Self::new(
            config.margin_for_error,
            config.corrective_step,
            config.max_convergence_steps,
        )
    }

    /// Plan the four thread counts for one batch against `state`.
    ///
    /// Pure: the same snapshot and formulas always yield the same plan.
    pub fn plan(
        &self,
        state: &TargetState,
        extraction_fraction: f64,
        formulas: &dyn Formulas,
    ) -> BatchThreads {
        let target = state.target_id.as_str();
        let mut issues = Vec::new();

        let raw_primary = formulas
            .threads_for(JobKind::Primary, target, state.max_value * extraction_fraction)
            .floor();
        let primary = clamp_at_least_one(JobKind::Primary, raw_primary, &mut issues);

        let extracted_fraction =
            (formulas.extraction_per_thread(target) * f64::from(primary)).clamp(0.0, 1.0);
        let extracted = state.max_value * extracted_fraction;
        let mut remaining = state.max_value - extracted;
        if remaining <= 0.0 {
            remaining = 1.0;
        }
        let raw_secondary = (self.margin_for_error
            * formulas.threads_for(JobKind::Secondary, target, state.max_value / remaining))
        .ceil();
        let secondary = clamp_at_least_one(JobKind::Secondary, raw_secondary, &mut issues);

        let corrective_a = self.corrective_for(
            JobKind::CorrectiveA,
            formulas.effect_analyze(JobKind::Primary, primary),
            formulas,
            &mut issues,
        );
        let corrective_b = self.corrective_for(
            JobKind::CorrectiveB,
            formulas.effect_analyze(JobKind::Secondary, secondary),
            formulas,
            &mut issues,
        );

        let plan = BatchThreads {
            primary,
            corrective_a,
            secondary,
            corrective_b,
            issues,
        };
        debug!(
            target_id = %target,
            primary,
            corrective_a,
            secondary,
            corrective_b,
            issues = plan.issues.len(),
            "batch planned"
        );
        plan
    }

    fn corrective_for(
        &self,
        kind: JobKind,
        induced: f64,
        formulas: &dyn Formulas,
        issues: &mut Vec<PlanIssue>,
    ) -> u32 {
        let convergence = self.converge_corrective(kind, induced, formulas);
        if !convergence.converged {
            warn!(%kind, required = induced, steps = convergence.steps, "corrective did not converge");
            issues.push(PlanIssue::NotConverged {
                kind,
                required: induced,
                steps: convergence.steps,
            });
        }
        scale_threads(convergence.threads, self.margin_for_error)
    }

    /// Smallest thread count (within step granularity) whose corrective
    /// effect covers `required`.
    ///
    /// Starts from the linear estimate and walks up by `corrective_step`.
    /// After `max_convergence_steps` linear steps the count doubles, so the
    /// loop ends within at most 32 further steps even if the effect curve
    /// flattens out.
    pub fn converge_corrective(
        &self,
        kind: JobKind,
        required: f64,
        formulas: &dyn Formulas,
    ) -> Convergence {
        if !(required > 0.0) {
            return Convergence {
                threads: 0,
                steps: 0,
                converged: true,
            };
        }

        let per_thread = formulas.effect_analyze(kind, 1);
        let mut threads = if per_thread > 0.0 {
            to_threads((required / per_thread).ceil()).max(1)
        } else {
            1
        };

        let mut steps = 0u32;
        while formulas.effect_analyze(kind, threads) < required {
            if threads == u32::MAX {
                return Convergence {
                    threads,
                    steps,
                    converged: false,
                };
            }
            threads = if steps < self.max_convergence_steps {
                threads.saturating_add(self.corrective_step)
            } else {
                threads.saturating_mul(2)
            };
            steps = steps.saturating_add(1);
        }

        Convergence {
            threads,
            steps,
            converged: true,
        }
    }
}

fn clamp_at_least_one(kind: JobKind, computed: f64, issues: &mut Vec<PlanIssue>) -> u32 {
    if computed.is_finite() && computed >= 1.0 {
        return to_threads(computed);
    }
    debug!(%kind, computed, "thread count clamped to 1");
    issues.push(PlanIssue::Underflow { kind, computed });
    1
}

fn scale_threads(threads: u32, margin: f64) -> u32 {
    to_threads((f64::from(threads) * margin).ceil())
}

/// Saturating float to thread count conversion.
pub(crate) fn to_threads(value: f64) -> u32 {
    if value.is_nan() || value <= 0.0 {
        0
    } else if value >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        value as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Linear formulas with easy numbers.
    struct Linear;

    impl Formulas for Linear {
        fn time_for(&self, _kind: JobKind, _target: &str) -> Duration {
            Duration::from_secs(1)
        }
        fn effect_analyze(&self, kind: JobKind, threads: u32) -> f64 {
            let t = f64::from(threads);
            match kind {
                JobKind::Primary => 0.002 * t,
                JobKind::Secondary => 0.004 * t,
                JobKind::CorrectiveA | JobKind::CorrectiveB => 0.05 * t,
            }
        }
        fn threads_for(&self, kind: JobKind, _target: &str, desired: f64) -> f64 {
            match kind {
                // 1% of 1000 per thread.
                JobKind::Primary => desired / 10.0,
                JobKind::Secondary => desired.ln() / 1.01f64.ln(),
                _ => desired / 0.05,
            }
        }
        fn extraction_per_thread(&self, _target: &str) -> f64 {
            0.01
        }
    }

    /// Corrective effect grows with the square root of threads.
    struct Sublinear;

    impl Formulas for Sublinear {
        fn time_for(&self, _kind: JobKind, _target: &str) -> Duration {
            Duration::from_secs(1)
        }
        fn effect_analyze(&self, _kind: JobKind, threads: u32) -> f64 {
            f64::from(threads).sqrt()
        }
        fn threads_for(&self, _kind: JobKind, _target: &str, desired: f64) -> f64 {
            desired
        }
        fn extraction_per_thread(&self, _target: &str) -> f64 {
            0.0
        }
    }

    /// Corrective effect that never exceeds 1.0.
    struct Capped;

    impl Formulas for Capped {
        fn time_for(&self, _kind: JobKind, _target: &str) -> Duration {
            Duration::from_secs(1)
        }
        fn effect_analyze(&self, _kind: JobKind, threads: u32) -> f64 {
            (f64::from(threads) * 0.1).min(1.0)
        }
        fn threads_for(&self, _kind: JobKind, _target: &str, _desired: f64) -> f64 {
            0.0
        }
        fn extraction_per_thread(&self, _target: &str) -> f64 {
            0.0
        }
    }

    fn state(value: f64) -> TargetState {
        TargetState {
            target_id: "t".into(),
            max_value: 1000.0,
            current_value: value,
            min_decay: 5.0,
            current_decay: 5.0,
            desired_extraction_fraction: 0.1,
        }
    }

    #[test]
    fn plans_all_four_kinds() {
        let planner = ThreadPlanner::new(1.1, 5, 10_000);
        let plan = planner.plan(&state(1000.0), 0.1, &Linear);
        assert_eq!(plan.primary, 10);
        assert!(plan.corrective_a >= 1);
        assert!(plan.secondary >= 1);
        assert!(plan.corrective_b >= 1);
        assert!(plan.issues.is_empty());
        assert_eq!(plan.total(), u64::from(plan.primary + plan.corrective_a + plan.secondary + plan.corrective_b));
    }

    #[test]
    fn correctives_cover_induced_decay() {
        let planner = ThreadPlanner::new(1.1, 5, 10_000);
        let plan = planner.plan(&state(1000.0), 0.25, &Linear);
        let induced_a = Linear.effect_analyze(JobKind::Primary, plan.primary);
        let induced_b = Linear.effect_analyze(JobKind::Secondary, plan.secondary);
        assert!(Linear.effect_analyze(JobKind::CorrectiveA, plan.corrective_a) >= induced_a);
        assert!(Linear.effect_analyze(JobKind::CorrectiveB, plan.corrective_b) >= induced_b);
    }

    #[test]
    fn secondary_is_at_least_one_for_depleted_targets() {
        let planner = ThreadPlanner::default();
        for value in [0.0, 1.0, 250.0, 999.0] {
            let plan = planner.plan(&state(value), 0.1, &Linear);
            assert!(plan.secondary >= 1, "value {value}");
        }
    }

    #[test]
    fn tiny_fraction_clamps_primary_and_reports_underflow() {
        let planner = ThreadPlanner::default();
        let plan = planner.plan(&state(1000.0), 0.0001, &Linear);
        assert_eq!(plan.primary, 1);
        assert!(plan
            .issues
            .iter()
            .any(|i| matches!(i, PlanIssue::Underflow { kind: JobKind::Primary, .. })));
    }

    #[test]
    fn full_extraction_does_not_divide_by_zero() {
        let planner = ThreadPlanner::default();
        let plan = planner.plan(&state(1000.0), 1.0, &Linear);
        assert_eq!(plan.primary, 100);
        assert!(plan.secondary >= 1);
    }

    #[test]
    fn planning_is_idempotent() {
        let planner = ThreadPlanner::default();
        let s = state(1000.0);
        assert_eq!(planner.plan(&s, 0.1, &Linear), planner.plan(&s, 0.1, &Linear));
    }

    #[test]
    fn margin_scales_corrective_threads() {
        let exact = ThreadPlanner::new(1.0, 1, 100).plan(&state(1000.0), 0.5, &Linear);
        let padded = ThreadPlanner::new(1.5, 1, 100).plan(&state(1000.0), 0.5, &Linear);
        assert!(padded.corrective_a > exact.corrective_a);
    }

    #[test]
    fn convergence_handles_sublinear_effect() {
        let planner = ThreadPlanner::new(1.0, 5, 1_000);
        for required in [0.5, 3.0, 17.0, 250.0] {
            let c = planner.converge_corrective(JobKind::CorrectiveA, required, &Sublinear);
            assert!(c.converged);
            assert!(Sublinear.effect_analyze(JobKind::CorrectiveA, c.threads) >= required);
            assert!(c.steps <= 1_000 + 32);
        }
    }

    #[test]
    fn convergence_switches_to_doubling_after_step_limit() {
        let planner = ThreadPlanner::new(1.0, 1, 3);
        let c = planner.converge_corrective(JobKind::CorrectiveB, 100.0, &Sublinear);
        assert!(c.converged);
        assert!(c.threads >= 10_000);
        assert!(c.steps < 40);
    }

    #[test]
    fn convergence_terminates_when_effect_is_capped() {
        let planner = ThreadPlanner::new(1.0, 5, 100);
        let c = planner.converge_corrective(JobKind::CorrectiveA, 2.0, &Capped);
        assert!(!c.converged);
        assert_eq!(c.threads, u32::MAX);
    }

    #[test]
    fn nothing_required_means_zero_threads() {
        let planner = ThreadPlanner::default();
        let c = planner.converge_corrective(JobKind::CorrectiveA, 0.0, &Linear);
        assert_eq!(c, Convergence { threads: 0, steps: 0, converged: true });
        let nan = planner.converge_corrective(JobKind::CorrectiveA, f64::NAN, &Linear);
        assert_eq!(nan.threads, 0);
    }

    #[test]
    fn issue_messages_name_the_kind() {
        let issue = PlanIssue::Underflow { kind: JobKind::Secondary, computed: 0.0 };
        assert!(issue.to_string().contains("secondary"));
    }
}
