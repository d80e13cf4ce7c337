//! The simulated cluster.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use burst_core::{
    CompletionSignal, Environment, Formulas, JobKind, LaunchError, LaunchHandle, LaunchRequest,
    Launcher, NodeInventory, NodeSnapshot, SignalChannel, TargetMetrics, TargetProbe,
};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::channel::SignalQueue;
use crate::config::SimulationConfig;
use crate::formulas::{self, SimFormulas, TargetTraits};

/// Landings kept for inspection.
const LANDING_HISTORY: usize = 256;

/// Slack for float comparisons of capacity.
const CAPACITY_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone)]
struct SimNode {
    id: String,
    capacity: f64,
    used: f64,
    has_access: bool,
}

#[derive(Debug)]
struct InFlight {
    order: u64,
    request: LaunchRequest,
    lands_at: Instant,
}

/// A job that has landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Landing {
    pub kind: JobKind,
    pub batch_sequence: u64,
    pub threads: u32,
    pub at: Instant,
}

#[derive(Debug)]
struct SimState {
    nodes: Vec<SimNode>,
    formulas: SimFormulas,
    in_flight: Vec<InFlight>,
    signals: SignalQueue,
    failing: HashSet<String>,
    landings: VecDeque<Landing>,
    next_handle: u64,
}

/// Deterministic in-memory cluster implementing every scheduler port.
#[derive(Debug)]
pub struct SimCluster {
    state: Mutex<SimState>,
    launch_latency: Duration,
}

impl SimCluster {
    pub fn new(config: &SimulationConfig) -> Self {
        let nodes = config
            .nodes
            .iter()
            .map(|n| SimNode {
                id: n.id.clone(),
                capacity: n.capacity,
                used: n.used,
                has_access: n.has_access,
            })
            .collect();

        let mut formulas = SimFormulas::new();
        for t in &config.targets {
            let traits = TargetTraits {
                extraction_per_thread: t.extraction_per_thread,
                growth_rate: t.growth_rate,
                base_time: t.base_time(),
            };
            let metrics = TargetMetrics {
                value: t.value.unwrap_or(t.max_value),
                max_value: t.max_value,
                decay: t.decay.unwrap_or(t.min_decay),
                min_decay: t.min_decay,
            };
            formulas.insert(t.id.clone(), traits, metrics);
        }

        Self {
            state: Mutex::new(SimState {
                nodes,
                formulas,
                in_flight: Vec::new(),
                signals: SignalQueue::with_capacity(config.signal_capacity),
                failing: config.failing_nodes.iter().cloned().collect(),
                landings: VecDeque::with_capacity(LANDING_HISTORY),
                next_handle: 0,
            }),
            launch_latency: config.launch_latency(),
        }
    }

    pub fn shared(config: &SimulationConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// Environment whose every port, completions included, is this cluster.
    pub fn environment(self: &Arc<Self>) -> Environment {
        Environment::from_cluster(self.clone(), self.clone())
    }

    /// Land every job whose instant has passed.
    pub fn settle(&self) {
        let mut state = self.lock();
        settle(&mut state, Instant::now());
    }

    pub fn in_flight(&self) -> usize {
        let mut state = self.lock();
        settle(&mut state, Instant::now());
        state.in_flight.len()
    }

    /// Overwrite a target's metrics, e.g. to simulate outside interference.
    pub fn set_metrics(&self, target_id: &str, metrics: TargetMetrics) {
        self.lock().formulas.update_metrics(target_id, metrics);
    }

    pub fn target_ids(&self) -> Vec<String> {
        let state = self.lock();
        let mut ids: Vec<String> = state.formulas.target_ids().map(str::to_string).collect();
        ids.sort();
        ids
    }

    /// Start or stop rejecting launches on `node_id`.
    pub fn set_node_failing(&self, node_id: &str, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing.insert(node_id.to_string());
        } else {
            state.failing.remove(node_id);
        }
    }

    /// Most recent landings, oldest first.
    pub fn landings(&self) -> Vec<Landing> {
        let mut state = self.lock();
        settle(&mut state, Instant::now());
        state.landings.iter().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn settle(state: &mut SimState, now: Instant) {
    if state.in_flight.is_empty() {
        return;
    }
    let (mut due, pending): (Vec<InFlight>, Vec<InFlight>) = std::mem::take(&mut state.in_flight)
        .into_iter()
        .partition(|job| job.lands_at <= now);
    state.in_flight = pending;
    due.sort_by_key(|job| (job.lands_at, job.order));

    for job in due {
        let req = &job.request;
        if let (Some(traits), Some(mut metrics)) = (
            state.formulas.traits(&req.target_id),
            state.formulas.metrics(&req.target_id),
        ) {
            formulas::apply(req.kind, req.threads, &traits, &mut metrics);
            state.formulas.update_metrics(&req.target_id, metrics);
        }
        if let Some(node) = state.nodes.iter_mut().find(|n| n.id == req.node_id) {
            node.used = (node.used - req.cost).max(0.0);
        }

        let lateness_ms = signed_millis(job.lands_at, req.landing_deadline);
        trace!(
            kind = %req.kind,
            batch_sequence = req.batch_sequence,
            lateness_ms,
            report = req.report,
            "simulated job landed"
        );
        if req.report {
            state.signals.push(CompletionSignal {
                kind: req.kind,
                batch_sequence: req.batch_sequence,
                lateness_ms,
            });
        }
        if state.landings.len() >= LANDING_HISTORY {
            state.landings.pop_front();
        }
        state.landings.push_back(Landing {
            kind: req.kind,
            batch_sequence: req.batch_sequence,
            threads: req.threads,
            at: job.lands_at,
        });
    }
}

/// `actual - expected` in whole milliseconds.
fn signed_millis(actual: Instant, expected: Instant) -> i64 {
    if actual >= expected {
        i64::try_from((actual - expected).as_millis()).unwrap_or(i64::MAX)
    } else {
        -i64::try_from((expected - actual).as_millis()).unwrap_or(i64::MAX)
    }
}

impl NodeInventory for SimCluster {
    fn enumerate_nodes(&self) -> Vec<NodeSnapshot> {
        let mut state = self.lock();
        settle(&mut state, Instant::now());
        state
            .nodes
            .iter()
            .map(|n| NodeSnapshot {
                node_id: n.id.clone(),
                max_capacity: n.capacity,
                used_capacity: n.used,
                has_access: n.has_access,
            })
            .collect()
    }
}

impl Launcher for SimCluster {
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchHandle, LaunchError> {
        let now = Instant::now();
        let mut state = self.lock();
        settle(&mut state, now);

        if state.failing.contains(&request.node_id) {
            return Err(LaunchError::Rejected(request.node_id.clone()));
        }
        let Some(node) = state.nodes.iter_mut().find(|n| n.id == request.node_id) else {
            return Err(LaunchError::UnknownNode(request.node_id.clone()));
        };
        if !node.has_access {
            return Err(LaunchError::Rejected(request.node_id.clone()));
        }
        let available = (node.capacity - node.used).max(0.0);
        if request.cost > available + CAPACITY_EPSILON {
            return Err(LaunchError::InsufficientCapacity {
                node: request.node_id.clone(),
                needed: request.cost,
                available,
            });
        }
        node.used += request.cost;

        let duration = state.formulas.time_for(request.kind, &request.target_id);
        let lands_at = now + request.delay + self.launch_latency + duration;
        state.next_handle += 1;
        let order = state.next_handle;
        state.in_flight.push(InFlight {
            order,
            request: request.clone(),
            lands_at,
        });
        debug!(
            kind = %request.kind,
            node = %request.node_id,
            threads = request.threads,
            handle = order,
            "simulated job started"
        );
        Ok(LaunchHandle(order))
    }
}

impl TargetProbe for SimCluster {
    fn read_target_metrics(&self, target_id: &str) -> Result<TargetMetrics, String> {
        let mut state = self.lock();
        settle(&mut state, Instant::now());
        state
            .formulas
            .metrics(target_id)
            .ok_or_else(|| format!("unknown target {target_id}"))
    }
}

impl Formulas for SimCluster {
    fn time_for(&self, kind: JobKind, target_id: &str) -> Duration {
        let mut state = self.lock();
        settle(&mut state, Instant::now());
        state.formulas.time_for(kind, target_id)
    }

    fn effect_analyze(&self, kind: JobKind, threads: u32) -> f64 {
        self.lock().formulas.effect_analyze(kind, threads)
    }

    fn threads_for(&self, kind: JobKind, target_id: &str, desired: f64) -> f64 {
        let mut state = self.lock();
        settle(&mut state, Instant::now());
        state.formulas.threads_for(kind, target_id, desired)
    }

    fn extraction_per_thread(&self, target_id: &str) -> f64 {
        self.lock().formulas.extraction_per_thread(target_id)
    }
}

impl SignalChannel for SimCluster {
    fn write_signal(&self, signal: CompletionSignal) {
        self.lock().signals.push(signal);
    }

    fn read_signal(&self) -> Option<CompletionSignal> {
        let mut state = self.lock();
        settle(&mut state, Instant::now());
        state.signals.pop()
    }

    fn clear(&self) {
        let mut state = self.lock();
        settle(&mut state, Instant::now());
        state.signals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SimNodeConfig, SimTargetConfig};

    fn config() -> SimulationConfig {
        SimulationConfig {
            launch_latency: "0ms".into(),
            signal_capacity: 64,
            failing_nodes: vec!["flaky".into()],
            nodes: vec![
                SimNodeConfig::new("n1", 20.0),
                SimNodeConfig::new("flaky", 20.0),
                SimNodeConfig {
                    has_access: false,
                    ..SimNodeConfig::new("locked", 20.0)
                },
            ],
            targets: vec![SimTargetConfig::new("t", 1000.0, 2.0)],
        }
    }

    fn request(kind: JobKind, node: &str, threads: u32, delay_ms: u64, deadline: Instant) -> LaunchRequest {
        LaunchRequest {
            kind,
            target_id: "t".into(),
            node_id: node.into(),
            threads,
            delay: Duration::from_millis(delay_ms),
            landing_deadline: deadline,
            batch_sequence: 1,
            cost: f64::from(threads),
            report: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn launch_holds_capacity_until_landing() {
        let sim = SimCluster::new(&config());
        let now = Instant::now();
        // corrective at min decay: 4s
        let deadline = now + Duration::from_millis(4100);
        sim.launch(&request(JobKind::CorrectiveA, "n1", 5, 100, deadline)).unwrap();

        let used = |sim: &SimCluster| sim.enumerate_nodes()[0].used_capacity;
        assert_eq!(used(&sim), 5.0);
        assert_eq!(sim.in_flight(), 1);

        tokio::time::sleep(Duration::from_millis(4100)).await;
        assert_eq!(used(&sim), 0.0);
        let signal = sim.read_signal().unwrap();
        assert_eq!(signal.kind, JobKind::CorrectiveA);
        assert_eq!(signal.lateness_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn landings_apply_effects_in_landing_order() {
        let sim = SimCluster::new(&config());
        let now = Instant::now();
        // Primary takes 1s, corrective 4s; land primary first.
        sim.launch(&request(JobKind::CorrectiveA, "n1", 1, 10, now + Duration::from_millis(4010)))
            .unwrap();
        sim.launch(&request(JobKind::Primary, "n1", 10, 3000, now + Duration::from_millis(4000)))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let order: Vec<JobKind> = sim.landings().iter().map(|l| l.kind).collect();
        assert_eq!(order, vec![JobKind::Primary, JobKind::CorrectiveA]);

        let m = sim.read_target_metrics("t").unwrap();
        assert!(m.value < 1000.0);
        // 10 primary threads add 0.02, one corrective removes up to 0.05.
        assert_eq!(m.decay, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_bad_launches() {
        let sim = SimCluster::new(&config());
        let deadline = Instant::now();
        assert!(matches!(
            sim.launch(&request(JobKind::Primary, "flaky", 1, 0, deadline)),
            Err(LaunchError::Rejected(_))
        ));
        assert!(matches!(
            sim.launch(&request(JobKind::Primary, "locked", 1, 0, deadline)),
            Err(LaunchError::Rejected(_))
        ));
        assert!(matches!(
            sim.launch(&request(JobKind::Primary, "ghost", 1, 0, deadline)),
            Err(LaunchError::UnknownNode(_))
        ));
        assert!(matches!(
            sim.launch(&request(JobKind::Primary, "n1", 21, 0, deadline)),
            Err(LaunchError::InsufficientCapacity { .. })
        ));

        sim.set_node_failing("flaky", false);
        assert!(sim.launch(&request(JobKind::Primary, "flaky", 1, 0, deadline)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn launch_latency_shows_up_as_lateness() {
        let mut cfg = config();
        cfg.launch_latency = "50ms".into();
        let sim = SimCluster::new(&cfg);
        let now = Instant::now();
        sim.launch(&request(JobKind::Primary, "n1", 1, 0, now + Duration::from_secs(1)))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sim.read_signal().unwrap().lateness_ms, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn environment_routes_every_port_to_the_cluster() {
        let sim = SimCluster::shared(&config());
        let env = sim.environment();
        assert_eq!(env.nodes.enumerate_nodes().len(), 3);
        assert!(env.probe.read_target_metrics("t").is_ok());
        assert!(env.probe.read_target_metrics("missing").is_err());
        env.completions.write_signal(CompletionSignal {
            kind: JobKind::Secondary,
            batch_sequence: 9,
            lateness_ms: 0,
        });
        assert_eq!(sim.read_signal().unwrap().batch_sequence, 9);
        assert_eq!(sim.target_ids(), vec!["t".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn only_reporting_jobs_write_signals() {
        let sim = SimCluster::new(&config());
        let now = Instant::now();
        let quiet = LaunchRequest {
            report: false,
            ..request(JobKind::Primary, "n1", 2, 0, now + Duration::from_secs(1))
        };
        sim.launch(&quiet).unwrap();
        sim.launch(&request(JobKind::CorrectiveA, "n1", 1, 0, now + Duration::from_secs(4)))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sim.landings().len(), 2);
        assert_eq!(sim.enumerate_nodes()[0].used_capacity, 0.0);
        assert_eq!(sim.read_signal().map(|s| s.kind), Some(JobKind::CorrectiveA));
        assert!(sim.read_signal().is_none());
    }
}
