//! Simulated time and effect formulas.

use std::collections::HashMap;
use std::time::Duration;

use burst_core::{Formulas, JobKind, TargetMetrics};

/// Decay induced per primary thread.
pub const PRIMARY_DECAY: f64 = 0.002;
/// Decay induced per secondary thread.
pub const SECONDARY_DECAY: f64 = 0.004;
/// Decay removed per corrective thread.
pub const CORRECTIVE_DECAY: f64 = 0.05;

/// Per-target constants the formulas need.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetTraits {
    pub extraction_per_thread: f64,
    pub growth_rate: f64,
    pub base_time: Duration,
}

/// Pure formulas over a snapshot of target metrics.
#[derive(Debug, Clone, Default)]
pub struct SimFormulas {
    traits: HashMap<String, TargetTraits>,
    metrics: HashMap<String, TargetMetrics>,
}

impl SimFormulas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, target_id: impl Into<String>, traits: TargetTraits, metrics: TargetMetrics) {
        let id = target_id.into();
        self.traits.insert(id.clone(), traits);
        self.metrics.insert(id, metrics);
    }

    pub fn update_metrics(&mut self, target_id: &str, metrics: TargetMetrics) {
        if let Some(m) = self.metrics.get_mut(target_id) {
            *m = metrics;
        }
    }

    pub fn metrics(&self, target_id: &str) -> Option<TargetMetrics> {
        self.metrics.get(target_id).copied()
    }

    pub fn traits(&self, target_id: &str) -> Option<TargetTraits> {
        self.traits.get(target_id).copied()
    }

    pub fn target_ids(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    fn current_value(&self, target_id: &str) -> f64 {
        self.metrics
            .get(target_id)
            .map(|m| if m.value <= 0.0 { 1.0 } else { m.value })
            .unwrap_or(1.0)
    }
}

/// Run time of `kind` against a target with `decay`.
pub fn time_for(kind: JobKind, traits: &TargetTraits, metrics: &TargetMetrics) -> Duration {
    let scale = if metrics.min_decay > 0.0 {
        (metrics.decay / metrics.min_decay).max(1.0)
    } else {
        1.0
    };
    let corrective = traits.base_time.mul_f64(scale);
    match kind {
        JobKind::Primary => corrective / 4,
        JobKind::Secondary => corrective.mul_f64(0.8),
        JobKind::CorrectiveA | JobKind::CorrectiveB => corrective,
    }
}

/// Apply a landed job's effect to `metrics`.
pub fn apply(kind: JobKind, threads: u32, traits: &TargetTraits, metrics: &mut TargetMetrics) {
    let t = f64::from(threads);
    match kind {
        JobKind::Primary => {
            let fraction = (traits.extraction_per_thread * t).min(1.0);
            metrics.value = (metrics.value - metrics.value * fraction).max(0.0);
            metrics.decay += PRIMARY_DECAY * t;
        }
        JobKind::Secondary => {
            let grown = (metrics.value + t) * (1.0 + traits.growth_rate).powf(t);
            metrics.value = grown.min(metrics.max_value);
            metrics.decay += SECONDARY_DECAY * t;
        }
        JobKind::CorrectiveA | JobKind::CorrectiveB => {
            metrics.decay = (metrics.decay - CORRECTIVE_DECAY * t).max(metrics.min_decay);
        }
    }
}

impl Formulas for SimFormulas {
    fn time_for(&self, kind: JobKind, target_id: &str) -> Duration {
        match (self.traits.get(target_id), self.metrics.get(target_id)) {
            (Some(traits), Some(metrics)) => time_for(kind, traits, metrics),
            _ => Duration::ZERO,
        }
    }

    fn effect_analyze(&self, kind: JobKind, threads: u32) -> f64 {
        let t = f64::from(threads);
        match kind {
            JobKind::Primary => PRIMARY_DECAY * t,
            JobKind::Secondary => SECONDARY_DECAY * t,
            JobKind::CorrectiveA | JobKind::CorrectiveB => CORRECTIVE_DECAY * t,
        }
    }

    fn threads_for(&self, kind: JobKind, target_id: &str, desired: f64) -> f64 {
        match kind {
            JobKind::Primary => {
                let p = self.extraction_per_thread(target_id);
                if p <= 0.0 {
                    return f64::INFINITY;
                }
                desired / (self.current_value(target_id) * p)
            }
            JobKind::Secondary => {
                let g = self.traits(target_id).map(|t| t.growth_rate).unwrap_or(0.0);
                if desired <= 1.0 {
                    return 0.0;
                }
                if g <= 0.0 {
                    return f64::INFINITY;
                }
                desired.ln() / (1.0 + g).ln()
            }
            JobKind::CorrectiveA | JobKind::CorrectiveB => desired / CORRECTIVE_DECAY,
        }
    }

    fn extraction_per_thread(&self, target_id: &str) -> f64 {
        self.traits(target_id)
            .map(|t| t.extraction_per_thread)
            .unwrap_or(0.0)
    }
}
