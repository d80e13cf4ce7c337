//! burstgrid-planner — pure thread-count planning.
//!
//! Everything in this crate is a function of an immutable [`TargetState`]
//! snapshot and the injected [`Formulas`](burst_core::Formulas); nothing
//! here launches work or sleeps.
//!
//! # Batch planning
//!
//! ```text
//! primary      = max(1, floor(threads_for(Primary, max_value * fraction)))
//! extracted    = max_value * min(1, extraction_per_thread * primary)
//! corrective_a = ceil(margin * converge(effect(Primary, primary)))
//! secondary    = max(1, ceil(margin * threads_for(Secondary, max / (max - extracted))))
//! corrective_b = ceil(margin * converge(effect(Secondary, secondary)))
//! ```
//!
//! `converge` starts from `ceil(required / effect(Corrective, 1))` and
//! steps upward until `effect(Corrective, threads) >= required`.
//!
//! # Preparation planning
//!
//! When a target is away from optimum, [`plan_prep`] sizes the decay and
//! value corrections and decides whether they fit in one round.

pub mod prep;
pub mod target;
pub mod threads;

pub use prep::{PrepMode, PrepNeeds, PrepPlan, plan_prep, prep_needs};
pub use target::{RankedTarget, TargetProfile, TargetState, rank_targets, score_target};
pub use threads::{BatchThreads, Convergence, PlanIssue, ThreadPlanner};
