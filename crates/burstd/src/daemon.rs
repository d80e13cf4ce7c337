//! Daemon mode: wires the batch scheduler to a simulated cluster.
//!
//! In this mode the daemon:
//! 1. Loads `burstd.toml` (scheduler settings plus a `[simulation]` table)
//! 2. Builds the simulated cluster and picks a target if none is set
//! 3. Runs batch cycles until the cycle limit or shutdown
//! 4. Logs every status transition

use std::path::Path;

use anyhow::{Context, bail};
use burst_core::{BurstConfig, Formulas, JobKind, TargetProbe};
use burstgrid_planner::{BatchThreads, RankedTarget, TargetProfile, TargetState, rank_targets};
use burstgrid_scheduler::{BatchScheduler, SchedulerStatus};
use burstgrid_sim::{SimCluster, SimulationConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Everything `burstd` reads from its config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(flatten)]
    pub burst: BurstConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl DaemonConfig {
    /// Load and validate `path`, or fall back to defaults when absent.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            info!("no config file given, using defaults");
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("load config {}", path.display()))?;
        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.burst.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Rank every simulated target by expected yield per second.
pub fn rank_simulated_targets(sim: &SimCluster) -> Vec<RankedTarget> {
    let profiles: Vec<TargetProfile> = sim
        .target_ids()
        .into_iter()
        .filter_map(|id| {
            let metrics = sim.read_target_metrics(&id).ok()?;
            Some(TargetProfile {
                max_value: metrics.max_value,
                min_decay: metrics.min_decay,
                primary_time: sim.time_for(JobKind::Primary, &id),
                has_access: true,
                target_id: id,
            })
        })
        .collect();
    rank_targets(&profiles)
}

/// The configured target, or the best-ranked simulated one.
pub fn select_target(config: &BurstConfig, sim: &SimCluster) -> anyhow::Result<String> {
    if let Some(id) = &config.target.id {
        return Ok(id.clone());
    }
    let ranked = rank_simulated_targets(sim);
    let Some(best) = ranked.first() else {
        bail!("no target configured and none can be ranked");
    };
    info!(target_id = %best.target_id, score = best.score, "target selected");
    Ok(best.target_id.clone())
}

/// One-shot view of what the next batch would look like.
#[derive(Debug, Serialize)]
pub struct PlanSummary {
    pub target: TargetState,
    pub threads: BatchThreads,
    pub ranking: Vec<RankedTarget>,
}

pub fn plan(config: &DaemonConfig) -> anyhow::Result<PlanSummary> {
    let sim = SimCluster::shared(&config.simulation);
    let target_id = select_target(&config.burst, &sim)?;
    let scheduler = BatchScheduler::new(sim.environment(), config.burst.clone(), target_id)?;
    let (target, threads) = scheduler.preview()?;
    Ok(PlanSummary {
        target,
        threads,
        ranking: rank_simulated_targets(&sim),
    })
}

/// Run batch cycles until `cycles` have run or `shutdown` fires.
pub async fn run(
    config: DaemonConfig,
    cycles: Option<u64>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<SchedulerStatus> {
    info!("burstd starting in simulation mode");

    let sim = SimCluster::shared(&config.simulation);
    let target_id = select_target(&config.burst, &sim)?;
    let mut scheduler = BatchScheduler::new(sim.environment(), config.burst, target_id)?
        .with_shutdown(shutdown);
    info!(target_id = %scheduler.target_id(), cycles = ?cycles, "scheduler ready");

    // ── Status logger ──────────────────────────────────────────
    let mut status_rx = scheduler.subscribe_status();
    let status_handle = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            debug!(
                state = %status.state,
                batch_sequence = status.batch_sequence,
                consecutive_late = status.lateness.consecutive_late,
                "status changed"
            );
        }
    });

    let result = scheduler.run(cycles).await;
    let status = scheduler.status();
    drop(scheduler);
    let _ = status_handle.await;

    if let Err(e) = result {
        warn!(error = %e, "scheduler stopped with an error");
        return Err(e.into());
    }
    info!(
        batch_sequence = status.batch_sequence,
        late = status.lateness.late,
        worst_ms = status.lateness.worst_ms,
        "burstd stopped"
    );
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burstgrid_scheduler::SchedulerState;

    const SHIPPED_CONFIG: &str = include_str!("../../../burstd.toml");

    #[test]
    fn shipped_config_parses() {
        let config = DaemonConfig::from_toml_str(SHIPPED_CONFIG).unwrap();
        assert!(!config.simulation.nodes.is_empty());
        assert!(config.burst.target.extraction_fraction > 0.0);
    }

    #[test]
    fn defaults_round_trip_through_toml() {
        let text = DaemonConfig::default().to_toml_string().unwrap();
        let config = DaemonConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.simulation.nodes.len(), 4);
        assert_eq!(config.burst.capacity.reserved_node.as_deref(), Some("home"));
    }

    #[test]
    fn loads_from_file_or_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burstd.toml");
        std::fs::write(&path, "[target]\nid = \"n00dles\"\n\n[simulation]\nlaunch_latency = \"3ms\"\n").unwrap();

        let config = DaemonConfig::load(Some(&path)).unwrap();
        assert_eq!(config.burst.target.id.as_deref(), Some("n00dles"));
        assert_eq!(config.simulation.launch_latency(), std::time::Duration::from_millis(3));
        assert_eq!(config.simulation.targets.len(), 2);

        assert!(DaemonConfig::load(None).unwrap().burst.target.id.is_none());
        assert!(DaemonConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = DaemonConfig::from_toml_str("[target]\nextraction_fraction = 1.5\n");
        assert!(err.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn picks_best_target_when_unset() {
        let sim = SimCluster::shared(&SimulationConfig::default());
        let ranked = rank_simulated_targets(&sim);
        assert_eq!(ranked.len(), 2);
        let chosen = select_target(&BurstConfig::default(), &sim).unwrap();
        assert_eq!(chosen, ranked[0].target_id);
    }

    #[tokio::test(start_paused = true)]
    async fn plan_previews_without_launching() {
        let config = DaemonConfig::default();
        let summary = plan(&config).unwrap();
        assert!(summary.target.is_at_optimum());
        assert!(summary.threads.total() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_the_requested_number_of_cycles() {
        let (_tx, rx) = watch::channel(false);
        let status = run(DaemonConfig::default(), Some(2), rx).await.unwrap();
        assert_eq!(status.batch_sequence, 2);
        assert_eq!(status.state, SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_start_runs_nothing() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let status = run(DaemonConfig::default(), None, rx).await.unwrap();
        assert_eq!(status.batch_sequence, 0);
    }
}
