//! burst-core — shared types, collaborator ports, and configuration for
//! the burstgrid batch scheduler.

pub mod config;
pub mod ports;
pub mod types;

pub use config::{BurstConfig, ConfigError, parse_duration};
pub use ports::{Environment, Formulas, LaunchError, Launcher, NodeInventory, SignalChannel, TargetProbe};
pub use types::*;
