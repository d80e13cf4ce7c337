//! Preparation planning: sizing the corrections that bring a target back
//! to optimum, and splitting them into rounds when capacity is short.

use burst_core::{Formulas, JobKind};
use serde::Serialize;
use tracing::debug;

use crate::target::TargetState;
use crate::threads::to_threads;

/// Which corrections a preparation round performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepMode {
    /// Only reduce decay. Chosen while decay is above minimum and the full
    /// correction does not fit in one round.
    DecayOnly,
    /// Restore value with a matching decay correction, scaled down to
    /// what fits this round.
    ValueOnly,
    /// Everything still needed fits in one round.
    Finalize,
}

/// Thread counts for the three preparation jobs.
///
/// `decay` and `value_decay` may be split across blocks; `value` must run
/// on a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PrepNeeds {
    /// Corrective threads that take decay down to its minimum.
    pub decay: u32,
    /// Secondary threads that take value back up to its maximum.
    pub value: u32,
    /// Corrective threads that cancel the decay raised by `value`.
    pub value_decay: u32,
}

impl PrepNeeds {
    /// Job kinds the three needs are dispatched as.
    pub const DECAY_KIND: JobKind = JobKind::CorrectiveA;
    pub const VALUE_KIND: JobKind = JobKind::Secondary;
    pub const VALUE_DECAY_KIND: JobKind = JobKind::CorrectiveB;

    pub fn total(&self) -> u64 {
        u64::from(self.decay) + u64::from(self.value) + u64::from(self.value_decay)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// One preparation round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PrepPlan {
    pub mode: PrepMode,
    /// What to dispatch this round.
    pub round: PrepNeeds,
    /// Everything still needed to reach optimum.
    pub required: PrepNeeds,
    /// Estimated rounds left including this one. Zero when no capacity
    /// is usable at all.
    pub rounds: u32,
}

impl PrepPlan {
    pub fn is_multi_round(&self) -> bool {
        self.rounds > 1
    }
}

/// Raw thread counts needed to reach optimum from `state`, ignoring
/// capacity.
pub fn prep_needs(state: &TargetState, formulas: &dyn Formulas) -> PrepNeeds {
    let per_corrective = formulas.effect_analyze(JobKind::CorrectiveA, 1);
    let corrective_threads = |decay: f64| -> u32 {
        if decay <= 0.0 || per_corrective <= 0.0 {
            0
        } else {
            to_threads((decay / per_corrective).ceil())
        }
    };

    let decay = corrective_threads(state.decay_excess());
    let value = if state.current_value < state.max_value {
        to_threads(
            formulas
                .threads_for(JobKind::Secondary, &state.target_id, state.value_multiplier())
                .ceil(),
        )
        .max(1)
    } else {
        0
    };
    let value_decay = corrective_threads(formulas.effect_analyze(JobKind::Secondary, value));

    PrepNeeds {
        decay,
        value,
        value_decay,
    }
}

/// Plan the next preparation round against the current capacity.
///
/// `usable_threads` is the pool's total usable thread count and
/// `largest_block_threads` the thread capacity of its largest block.
pub fn plan_prep(
    state: &TargetState,
    formulas: &dyn Formulas,
    usable_threads: u64,
    largest_block_threads: u32,
) -> PrepPlan {
    let required = prep_needs(state, formulas);
    let total = usable_threads;
    let largest = u64::from(largest_block_threads);

    let plan = if required.decay > 0
        && (required.total() > total
            || u64::from(required.decay) > largest
            || u64::from(required.value) > largest)
    {
        decay_only(required, total)
    } else if required.decay == 0
        && (u64::from(required.value) > largest
            || u64::from(required.value) + u64::from(required.value_decay) > total)
    {
        value_only(required, formulas, total, largest)
    } else {
        PrepPlan {
            mode: PrepMode::Finalize,
            round: required,
            required,
            rounds: u32::from(!required.is_empty()),
        }
    };

    debug!(
        target_id = %state.target_id,
        mode = ?plan.mode,
        decay = plan.round.decay,
        value = plan.round.value,
        value_decay = plan.round.value_decay,
        rounds = plan.rounds,
        "preparation round planned"
    );
    plan
}

fn decay_only(required: PrepNeeds, total: u64) -> PrepPlan {
    let rounds = rounds_for(u64::from(required.decay), total);
    let decay = if rounds > 1 {
        required.decay.min(saturate(total))
    } else {
        required.decay
    };
    PrepPlan {
        mode: PrepMode::DecayOnly,
        round: PrepNeeds {
            decay,
            value: 0,
            value_decay: 0,
        },
        required,
        rounds,
    }
}

fn value_only(required: PrepNeeds, formulas: &dyn Formulas, total: u64, largest: u64) -> PrepPlan {
    let per_corrective = formulas.effect_analyze(JobKind::CorrectiveA, 1);
    let per_secondary = formulas.effect_analyze(JobKind::Secondary, 1);
    // Secondary threads one corrective thread can cancel.
    let ratio = if per_secondary > 0.0 {
        per_corrective / per_secondary
    } else {
        f64::from(required.value.max(1))
    };

    let value_decay = ((total as f64 / (ratio + 1.0)).floor() as u64).max(1);
    let value = ((value_decay as f64 * ratio).floor() as u64)
        .min(largest)
        .min(u64::from(required.value))
        .max(1);
    let value = saturate(value);
    let value_decay = if per_corrective > 0.0 {
        to_threads((formulas.effect_analyze(JobKind::Secondary, value) / per_corrective).ceil())
    } else {
        saturate(value_decay)
    };

    PrepPlan {
        mode: PrepMode::ValueOnly,
        round: PrepNeeds {
            decay: 0,
            value,
            value_decay,
        },
        required,
        rounds: rounds_for(u64::from(required.value), u64::from(value)),
    }
}

fn rounds_for(required: u64, per_round: u64) -> u32 {
    if per_round == 0 {
        return 0;
    }
    saturate(required.div_ceil(per_round))
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
