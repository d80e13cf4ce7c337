//! burstgrid-sim — an in-memory cluster for running the scheduler without
//! real nodes.
//!
//! [`SimCluster`] implements every collaborator port. Launched jobs are
//! held in flight until their landing instant; any port call first settles
//! the jobs that are due, in landing order: the effect is applied to the
//! target and the node capacity is freed. Only jobs launched with
//! `report` set write a completion signal.
//! Time is `tokio::time`, so a paused test clock makes runs deterministic.

pub mod channel;
pub mod cluster;
pub mod config;
pub mod formulas;

pub use channel::{MemoryChannel, SignalQueue};
pub use cluster::{Landing, SimCluster};
pub use config::{SimNodeConfig, SimTargetConfig, SimulationConfig};
pub use formulas::SimFormulas;
