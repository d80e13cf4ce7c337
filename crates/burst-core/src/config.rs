//! burst.toml configuration parser.
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below. Durations are written as strings (`"5ms"`, `"2s"`,
//! `"1m"`) and parsed on access.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::JobKind;

/// Longest accepted configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Largest accepted `timing.signal_safety_multiplier`.
const MAX_SAFETY_MULTIPLIER: f64 = 100.0;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    pub target: TargetConfig,
    pub capacity: CapacityConfig,
    pub costs: CostConfig,
    pub planner: PlannerConfig,
    pub timing: TimingConfig,
    pub prep: PrepConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Target to batch against. When absent the driver picks one.
    pub id: Option<String>,
    /// Fraction of the target's maximum value extracted per batch.
    pub extraction_fraction: f64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            id: None,
            extraction_fraction: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Control-plane node, always allocated last.
    pub reserved_node: Option<String>,
    /// Units withheld from the reserved node's free capacity.
    pub reserved_units: f64,
    /// Unit cost used to convert capacity into usable thread counts.
    pub base_unit_cost: f64,
    /// Nodes with less free capacity are ignored. Defaults to the cheapest
    /// per-thread cost.
    pub min_usable_units: Option<f64>,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            reserved_node: Some("home".to_string()),
            reserved_units: 0.0,
            base_unit_cost: 1.75,
            min_usable_units: None,
        }
    }
}

/// Per-thread capacity cost of each job kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub primary: f64,
    pub corrective_a: f64,
    pub secondary: f64,
    pub corrective_b: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            primary: 1.7,
            corrective_a: 1.75,
            secondary: 1.75,
            corrective_b: 1.75,
        }
    }
}

impl CostConfig {
    pub fn per_thread(&self, kind: JobKind) -> f64 {
        match kind {
            JobKind::Primary => self.primary,
            JobKind::CorrectiveA => self.corrective_a,
            JobKind::Secondary => self.secondary,
            JobKind::CorrectiveB => self.corrective_b,
        }
    }

    /// Cheapest per-thread cost across all kinds.
    pub fn cheapest(&self) -> f64 {
        JobKind::BATCH_ORDER
            .iter()
            .map(|k| self.per_thread(*k))
            .fold(f64::INFINITY, f64::min)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Multiplier (>= 1.0) applied to derived thread counts.
    pub margin_for_error: f64,
    /// Increment used while converging corrective thread counts.
    pub corrective_step: u32,
    /// Linear convergence steps before switching to doubling.
    pub max_convergence_steps: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            margin_for_error: 1.1,
            corrective_step: 5,
            max_convergence_steps: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Gap between consecutive planned completion instants.
    pub stagger: String,
    /// Extra lead time added to the anchor so launches are never in the past.
    pub launch_slack: String,
    /// Interval between completion-channel polls.
    pub poll_interval: String,
    /// Completion wait is abandoned after the terminal job's expected
    /// duration times this multiplier.
    pub signal_safety_multiplier: f64,
    /// Pause after a batch before re-sampling the target.
    pub cooldown: String,
    /// Pause before retrying an aborted cycle.
    pub retry_delay: String,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            stagger: "5ms".to_string(),
            launch_slack: "100ms".to_string(),
            poll_interval: "200ms".to_string(),
            signal_safety_multiplier: 1.5,
            cooldown: "100ms".to_string(),
            retry_delay: "5s".to_string(),
        }
    }
}

impl TimingConfig {
    pub fn stagger(&self) -> Duration {
        parse_duration(&self.stagger).unwrap_or(Duration::from_millis(5))
    }

    pub fn launch_slack(&self) -> Duration {
        parse_duration(&self.launch_slack).unwrap_or(Duration::from_millis(100))
    }

    pub fn poll_interval(&self) -> Duration {
        parse_duration(&self.poll_interval).unwrap_or(Duration::from_millis(200))
    }

    pub fn cooldown(&self) -> Duration {
        parse_duration(&self.cooldown).unwrap_or(Duration::from_millis(100))
    }

    pub fn retry_delay(&self) -> Duration {
        parse_duration(&self.retry_delay).unwrap_or(Duration::from_secs(5))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    /// Extra wait after a round's last landing before re-sampling.
    pub settle_buffer: String,
    /// Consecutive zero-progress rounds tolerated before giving up.
    pub stall_limit: u32,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            settle_buffer: "100ms".to_string(),
            stall_limit: 1,
        }
    }
}

impl PrepConfig {
    pub fn settle_buffer(&self) -> Duration {
        parse_duration(&self.settle_buffer).unwrap_or(Duration::from_millis(100))
    }
}

impl BurstConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BurstConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Minimum free capacity for a node to be usable.
    pub fn min_usable_units(&self) -> f64 {
        self.capacity
            .min_usable_units
            .unwrap_or_else(|| self.costs.cheapest())
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fraction = self.target.extraction_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(invalid(
                "target.extraction_fraction",
                format!("{fraction} is not within (0, 1)"),
            ));
        }
        if self.planner.margin_for_error < 1.0 {
            return Err(invalid(
                "planner.margin_for_error",
                format!("{} is below 1.0", self.planner.margin_for_error),
            ));
        }
        if self.planner.corrective_step == 0 {
            return Err(invalid("planner.corrective_step", "must be at least 1".into()));
        }
        if self.capacity.base_unit_cost <= 0.0 {
            return Err(invalid("capacity.base_unit_cost", "must be positive".into()));
        }
        if self.capacity.reserved_units < 0.0 {
            return Err(invalid("capacity.reserved_units", "must not be negative".into()));
        }
        for kind in JobKind::BATCH_ORDER {
            if self.costs.per_thread(kind) <= 0.0 {
                return Err(invalid("costs", format!("{kind} cost must be positive")));
            }
        }
        let multiplier = self.timing.signal_safety_multiplier;
        if !(multiplier.is_finite() && (1.0..=MAX_SAFETY_MULTIPLIER).contains(&multiplier)) {
            return Err(invalid(
                "timing.signal_safety_multiplier",
                format!("{multiplier} is not within [1.0, {MAX_SAFETY_MULTIPLIER}]"),
            ));
        }
        for (field, value) in [
            ("timing.stagger", &self.timing.stagger),
            ("timing.launch_slack", &self.timing.launch_slack),
            ("timing.poll_interval", &self.timing.poll_interval),
            ("timing.cooldown", &self.timing.cooldown),
            ("timing.retry_delay", &self.timing.retry_delay),
            ("prep.settle_buffer", &self.prep.settle_buffer),
        ] {
            match parse_duration(value) {
                None => return Err(invalid(field, format!("cannot parse duration {value:?}"))),
                Some(d) if d > MAX_DURATION => {
                    return Err(invalid(field, format!("{value:?} is longer than one day")));
                }
                Some(_) => {}
            }
        }
        if self.timing.stagger().is_zero() {
            return Err(invalid("timing.stagger", "must be non-zero".into()));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

/// Parse a duration string like "250ms", "5s", "2m". A bare number is
/// read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.trim().parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.trim().parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BurstConfig::default();
        config.validate().unwrap();
        assert_eq!(config.timing.stagger(), Duration::from_millis(5));
        assert_eq!(config.capacity.reserved_node.as_deref(), Some("home"));
    }

    #[test]
    fn parse_minimal() {
        let config = BurstConfig::from_toml_str(
            r#"
[target]
id = "n00dles"
"#,
        )
        .unwrap();
        assert_eq!(config.target.id.as_deref(), Some("n00dles"));
        assert_eq!(config.target.extraction_fraction, 0.1);
        assert_eq!(config.planner.corrective_step, 5);
    }

    #[test]
    fn parse_overrides() {
        let config = BurstConfig::from_toml_str(
            r#"
[capacity]
reserved_node = "ctrl"
reserved_units = 32.0

[costs]
primary = 2.0

[timing]
stagger = "20ms"
retry_delay = "1m"
"#,
        )
        .unwrap();
        assert_eq!(config.capacity.reserved_units, 32.0);
        assert_eq!(config.costs.per_thread(JobKind::Primary), 2.0);
        assert_eq!(config.costs.per_thread(JobKind::Secondary), 1.75);
        assert_eq!(config.timing.stagger(), Duration::from_millis(20));
        assert_eq!(config.timing.retry_delay(), Duration::from_secs(60));
    }

    #[test]
    fn rejects_bad_fraction() {
        let err = BurstConfig::from_toml_str("[target]\nextraction_fraction = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "target.extraction_fraction", .. }));
    }

    #[test]
    fn rejects_bad_duration() {
        let err = BurstConfig::from_toml_str("[timing]\ncooldown = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "timing.cooldown", .. }));
    }

    #[test]
    fn rejects_margin_below_one() {
        let err = BurstConfig::from_toml_str("[planner]\nmargin_for_error = 0.9\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn min_usable_defaults_to_cheapest_cost() {
        let config = BurstConfig::default();
        assert_eq!(config.min_usable_units(), 1.7);
    }

    #[test]
    fn toml_round_trip_through_file() {
        let config = BurstConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burst.toml");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = BurstConfig::from_file(&path).unwrap();
        assert_eq!(loaded.timing.stagger, config.timing.stagger);
        assert_eq!(loaded.costs.primary, config.costs.primary);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("abc"), None);
    }

    #[test]
    fn parse_duration_rejects_overflowing_minutes() {
        assert_eq!(parse_duration("1000000000000000000m"), None);
        let err = BurstConfig::from_toml_str("[timing]\ncooldown = \"1000000000000000000m\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "timing.cooldown", .. }));
    }

    #[test]
    fn durations_longer_than_a_day_are_rejected() {
        let err = BurstConfig::from_toml_str("[timing]\nretry_delay = \"18446744073709551615s\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "timing.retry_delay", .. }));
        assert!(BurstConfig::from_toml_str("[timing]\nretry_delay = \"1440m\"\n").is_ok());
        assert!(BurstConfig::from_toml_str("[prep]\nsettle_buffer = \"1441m\"\n").is_err());
    }

    #[test]
    fn safety_multiplier_must_be_bounded() {
        let mut config = BurstConfig::default();
        config.timing.signal_safety_multiplier = f64::INFINITY;
        assert!(config.validate().is_err());
        config.timing.signal_safety_multiplier = f64::NAN;
        assert!(config.validate().is_err());
        config.timing.signal_safety_multiplier = 2.0;
        assert!(config.validate().is_ok());
    }
}
