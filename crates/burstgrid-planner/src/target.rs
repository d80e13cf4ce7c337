//! Target state snapshot and target ranking.

use std::time::Duration;

use burst_core::{TargetId, TargetMetrics};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of a target, refreshed at the start of every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub target_id: TargetId,
    pub max_value: f64,
    pub current_value: f64,
    pub min_decay: f64,
    pub current_decay: f64,
    pub desired_extraction_fraction: f64,
}

impl TargetState {
    pub fn from_metrics(
        target_id: impl Into<TargetId>,
        metrics: &TargetMetrics,
        desired_extraction_fraction: f64,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            max_value: metrics.max_value,
            current_value: metrics.value,
            min_decay: metrics.min_decay,
            current_decay: metrics.decay,
            desired_extraction_fraction,
        }
    }

    /// Value at maximum and decay at minimum.
    pub fn is_at_optimum(&self) -> bool {
        self.current_value == self.max_value && self.current_decay == self.min_decay
    }

    /// Current value, with non-positive values treated as 1.
    pub fn effective_value(&self) -> f64 {
        if self.current_value <= 0.0 {
            1.0
        } else {
            self.current_value
        }
    }

    /// How far decay sits above its minimum.
    pub fn decay_excess(&self) -> f64 {
        (self.current_decay - self.min_decay).max(0.0)
    }

    /// Multiplier needed to bring value back to its maximum.
    pub fn value_multiplier(&self) -> f64 {
        (self.max_value / self.effective_value()).max(1.0)
    }
}

/// Static facts about a candidate target, used for ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetProfile {
    pub target_id: TargetId,
    pub max_value: f64,
    pub min_decay: f64,
    /// Time a `Primary` job takes against this target.
    pub primary_time: Duration,
    pub has_access: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTarget {
    pub target_id: TargetId,
    /// Higher is better.
    pub score: f64,
}

/// Score a target by value per unit of minimum decay per second of
/// primary time. Returns `None` for targets that cannot be batched.
pub fn score_target(profile: &TargetProfile) -> Option<f64> {
    if !profile.has_access || profile.max_value <= 0.0 || profile.min_decay <= 0.0 {
        return None;
    }
    let secs = profile.primary_time.as_secs_f64();
    if secs <= 0.0 {
        return None;
    }
    Some(profile.max_value / profile.min_decay / secs)
}

/// Rank candidate targets, best first. Unscorable targets are dropped.
pub fn rank_targets(profiles: &[TargetProfile]) -> Vec<RankedTarget> {
    let mut ranked: Vec<RankedTarget> = profiles
        .iter()
        .filter_map(|p| {
            score_target(p).map(|score| RankedTarget {
                target_id: p.target_id.clone(),
                score,
            })
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(value: f64, decay: f64) -> TargetState {
        TargetState {
            target_id: "t".into(),
            max_value: 1000.0,
            current_value: value,
            min_decay: 5.0,
            current_decay: decay,
            desired_extraction_fraction: 0.1,
        }
    }

    fn profile(id: &str, max: f64, min_decay: f64, secs: u64) -> TargetProfile {
        TargetProfile {
            target_id: id.into(),
            max_value: max,
            min_decay,
            primary_time: Duration::from_secs(secs),
            has_access: true,
        }
    }

    #[test]
    fn optimum_requires_both_metrics() {
        assert!(state(1000.0, 5.0).is_at_optimum());
        assert!(!state(999.0, 5.0).is_at_optimum());
        assert!(!state(1000.0, 5.1).is_at_optimum());
    }

    #[test]
    fn non_positive_value_is_treated_as_one() {
        assert_eq!(state(0.0, 5.0).effective_value(), 1.0);
        assert_eq!(state(-3.0, 5.0).effective_value(), 1.0);
        assert_eq!(state(0.0, 5.0).value_multiplier(), 1000.0);
    }

    #[test]
    fn from_metrics_copies_fields() {
        let m = TargetMetrics { value: 50.0, max_value: 100.0, decay: 7.0, min_decay: 3.0 };
        let s = TargetState::from_metrics("x", &m, 0.25);
        assert_eq!(s.current_value, 50.0);
        assert_eq!(s.decay_excess(), 4.0);
        assert_eq!(s.value_multiplier(), 2.0);
        assert_eq!(s.desired_extraction_fraction, 0.25);
    }

    #[test]
    fn ranking_prefers_value_per_decay_per_second() {
        let ranked = rank_targets(&[
            profile("slow", 1000.0, 5.0, 100),
            profile("fast", 1000.0, 5.0, 10),
            profile("rich", 100_000.0, 50.0, 100),
        ]);
        let order: Vec<&str> = ranked.iter().map(|r| r.target_id.as_str()).collect();
        assert_eq!(order, vec!["rich", "fast", "slow"]);
    }

    #[test]
    fn ranking_drops_unusable_targets() {
        let mut locked = profile("locked", 1e9, 1.0, 1);
        locked.has_access = false;
        let ranked = rank_targets(&[locked, profile("empty", 0.0, 1.0, 1), profile("ok", 10.0, 1.0, 1)]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].target_id, "ok");
    }
}
