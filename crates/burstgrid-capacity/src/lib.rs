//! burstgrid-capacity — allocatable capacity across many nodes.
//!
//! Free capacity on every usable node is modelled as a [`CapacityBlock`].
//! The [`CapacityPool`] keeps blocks sorted smallest-first with the
//! reserved (control-plane) node forced last, and hands out capacity with
//! a first-fit scan.
//!
//! # Components
//!
//! - **`block`** — a single node's free capacity
//! - **`convert`** — node snapshots to blocks (filtering, reservation)
//! - **`pool`** — allocation, release, and derived accessors

pub mod block;
pub mod convert;
pub mod pool;

pub use block::CapacityBlock;
pub use convert::{PoolOptions, snapshots_to_blocks};
pub use pool::CapacityPool;
