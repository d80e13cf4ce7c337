//! Conversions from node snapshots to capacity blocks.
//!
//! Bridges `burst_core::NodeSnapshot` (what node discovery reports) to the
//! pool's `CapacityBlock`s, applying access filtering, the reserved-node
//! withholding, and the minimum usable size.

use burst_core::{BurstConfig, NodeSnapshot};
use tracing::debug;

use crate::block::CapacityBlock;

/// Construction parameters for a [`CapacityPool`](crate::CapacityPool).
#[derive(Debug, Clone, PartialEq)]
pub struct PoolOptions {
    /// Nodes with less free capacity than this are dropped.
    pub min_usable_units: f64,
    /// Control-plane node, always ordered last.
    pub reserved_node: Option<String>,
    /// Units withheld from the reserved node.
    pub reserved_units: f64,
    /// Unit cost used for usable-thread accounting.
    pub base_unit_cost: f64,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::from_config(&BurstConfig::default())
    }
}

impl PoolOptions {
    pub fn from_config(config: &BurstConfig) -> Self {
        Self {
            min_usable_units: config.min_usable_units(),
            reserved_node: config.capacity.reserved_node.clone(),
            reserved_units: config.capacity.reserved_units,
            base_unit_cost: config.capacity.base_unit_cost,
        }
    }

    pub fn is_reserved(&self, node_id: &str) -> bool {
        self.reserved_node.as_deref() == Some(node_id)
    }
}

/// Convert node snapshots into usable blocks (unsorted).
///
/// Nodes without access are skipped. The reserved node loses
/// `reserved_units` before the minimum-size filter is applied.
pub fn snapshots_to_blocks(snapshots: &[NodeSnapshot], opts: &PoolOptions) -> Vec<CapacityBlock> {
    snapshots
        .iter()
        .filter(|node| node.has_access)
        .filter_map(|node| {
            let mut free = node.free_capacity();
            if opts.is_reserved(&node.node_id) {
                free = (free - opts.reserved_units).max(0.0);
            }
            if free < opts.min_usable_units {
                debug!(node = %node.node_id, free, "node below minimum usable capacity");
                return None;
            }
            Some(CapacityBlock::new(node.node_id.clone(), free))
        })
        .collect()
}
