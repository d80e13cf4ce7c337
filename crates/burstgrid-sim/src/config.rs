//! Simulation configuration (the `[simulation]` table of the daemon config).

use std::time::Duration;

use burst_core::parse_duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Extra startup latency added to every launch, e.g. "20ms".
    pub launch_latency: String,
    /// Completion signals held before the oldest is dropped.
    pub signal_capacity: usize,
    /// Nodes whose launches are always rejected.
    pub failing_nodes: Vec<String>,
    pub nodes: Vec<SimNodeConfig>,
    pub targets: Vec<SimTargetConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            launch_latency: "0ms".to_string(),
            signal_capacity: 1024,
            failing_nodes: Vec::new(),
            nodes: vec![
                SimNodeConfig::new("home", 256.0),
                SimNodeConfig::new("worker-1", 128.0),
                SimNodeConfig::new("worker-2", 128.0),
                SimNodeConfig {
                    has_access: false,
                    ..SimNodeConfig::new("locked-1", 128.0)
                },
            ],
            targets: vec![
                SimTargetConfig::new("n00dles", 70_000.0, 1.0),
                SimTargetConfig {
                    base_time: "10s".to_string(),
                    ..SimTargetConfig::new("joesguns", 2_500_000.0, 5.0)
                },
            ],
        }
    }
}

impl SimulationConfig {
    pub fn launch_latency(&self) -> Duration {
        parse_duration(&self.launch_latency).unwrap_or(Duration::ZERO)
    }

    pub fn target(&self, id: &str) -> Option<&SimTargetConfig> {
        self.targets.iter().find(|t| t.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimNodeConfig {
    pub id: String,
    pub capacity: f64,
    #[serde(default)]
    pub used: f64,
    #[serde(default = "default_true")]
    pub has_access: bool,
}

impl SimNodeConfig {
    pub fn new(id: impl Into<String>, capacity: f64) -> Self {
        Self {
            id: id.into(),
            capacity,
            used: 0.0,
            has_access: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimTargetConfig {
    pub id: String,
    pub max_value: f64,
    /// Starting value; defaults to `max_value`.
    #[serde(default)]
    pub value: Option<f64>,
    pub min_decay: f64,
    /// Starting decay; defaults to `min_decay`.
    #[serde(default)]
    pub decay: Option<f64>,
    /// Fraction of current value one primary thread removes.
    #[serde(default = "default_extraction")]
    pub extraction_per_thread: f64,
    /// Per-thread growth rate of a secondary job.
    #[serde(default = "default_growth")]
    pub growth_rate: f64,
    /// Corrective run time at minimum decay, e.g. "4s".
    #[serde(default = "default_base_time")]
    pub base_time: String,
}

impl SimTargetConfig {
    pub fn new(id: impl Into<String>, max_value: f64, min_decay: f64) -> Self {
        Self {
            id: id.into(),
            max_value,
            value: None,
            min_decay,
            decay: None,
            extraction_per_thread: default_extraction(),
            growth_rate: default_growth(),
            base_time: default_base_time(),
        }
    }

    pub fn base_time(&self) -> Duration {
        parse_duration(&self.base_time).unwrap_or(Duration::from_secs(4))
    }
}

fn default_true() -> bool {
    true
}

fn default_extraction() -> f64 {
    0.002
}

fn default_growth() -> f64 {
    0.0035
}

fn default_base_time() -> String {
    "4s".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_tables() {
        let config: SimulationConfig = toml::from_str(
            r#"
            launch_latency = "20ms"

            [[nodes]]
            id = "home"
            capacity = 32.0

            [[targets]]
            id = "t1"
            max_value = 1000.0
            min_decay = 2.0
            decay = 9.0
            "#,
        )
        .unwrap();
        assert_eq!(config.launch_latency(), Duration::from_millis(20));
        assert_eq!(config.signal_capacity, 1024);
        assert!(config.nodes[0].has_access);
        let target = config.target("t1").unwrap();
        assert_eq!(target.decay, Some(9.0));
        assert_eq!(target.value, None);
        assert_eq!(target.base_time(), Duration::from_secs(4));
    }

    #[test]
    fn default_has_a_locked_node() {
        let config = SimulationConfig::default();
        assert!(config.nodes.iter().any(|n| !n.has_access));
        assert!(config.target("n00dles").is_some());
    }
}
