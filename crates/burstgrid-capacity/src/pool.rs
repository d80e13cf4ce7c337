//! Capacity pool — first-fit allocation over sorted blocks.
//!
//! Blocks are ordered ascending by free capacity with the reserved
//! (control-plane) node forced to the tail, so small nodes are packed
//! first and the control plane is only consumed as a last resort.
//! First-fit on that order approximates best-fit for the common case of
//! many small jobs and a few large ones.

use std::collections::HashMap;

use burst_core::{Job, NodeSnapshot};
use tracing::{debug, trace, warn};

use crate::block::{CapacityBlock, from_milli};
use crate::convert::{PoolOptions, snapshots_to_blocks};

/// Mutable set of capacity blocks owned by one scheduler instance.
///
/// `Clone` is a deep copy, used for speculative planning.
#[derive(Debug, Clone)]
pub struct CapacityPool {
    blocks: Vec<CapacityBlock>,
    /// node_id → index into `blocks`.
    index: HashMap<String, usize>,
    reserved_node: Option<String>,
    base_unit_cost: f64,
}

impl CapacityPool {
    /// Build a pool from a live node snapshot.
    pub fn new(snapshots: &[NodeSnapshot], opts: &PoolOptions) -> Self {
        let blocks = snapshots_to_blocks(snapshots, opts);
        let pool = Self::from_blocks(blocks, opts.reserved_node.clone(), opts.base_unit_cost);
        debug!(
            blocks = pool.len(),
            total = pool.total_available(),
            max_block = pool.max_block_size(),
            reserved = ?pool.reserved_node,
            "capacity pool built"
        );
        pool
    }

    /// Build a pool from pre-made blocks. Sorting is applied here.
    ///
    /// A node id seen more than once keeps only its smallest block, so
    /// every id maps to exactly one block.
    pub fn from_blocks(
        blocks: Vec<CapacityBlock>,
        reserved_node: Option<String>,
        base_unit_cost: f64,
    ) -> Self {
        let mut blocks = dedupe_by_node(blocks);
        let reserved = reserved_node.as_deref();
        blocks.sort_by(|a, b| {
            let a_reserved = Some(a.node_id.as_str()) == reserved;
            let b_reserved = Some(b.node_id.as_str()) == reserved;
            a_reserved
                .cmp(&b_reserved)
                .then_with(|| a.available_milli().cmp(&b.available_milli()))
        });
        let index = blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.node_id.clone(), i))
            .collect();
        Self {
            blocks,
            index,
            reserved_node,
            base_unit_cost,
        }
    }

    /// Assign `job` to the first block that can hold its cost.
    ///
    /// Returns `false` and leaves `job.node_id` untouched when no block fits.
    pub fn allocate(&mut self, job: &mut Job) -> bool {
        let Some(block) = self.blocks.iter_mut().find(|b| b.fits(job.cost)) else {
            trace!(kind = %job.kind, cost = job.cost, "no block fits job");
            return false;
        };
        block.take(job.cost);
        job.node_id = Some(block.node_id.clone());
        trace!(kind = %job.kind, node = %block.node_id, cost = job.cost, "job allocated");
        true
    }

    /// Assign `job` to a specific node if it fits there.
    pub fn allocate_on(&mut self, job: &mut Job, node_id: &str) -> bool {
        let Some(&i) = self.index.get(node_id) else {
            return false;
        };
        let block = &mut self.blocks[i];
        if !block.fits(job.cost) {
            return false;
        }
        block.take(job.cost);
        job.node_id = Some(block.node_id.clone());
        true
    }

    /// Return a job's capacity to its block.
    ///
    /// Clears `job.node_id`, so releasing the same job twice is a no-op.
    /// Returns whether anything was released.
    pub fn release(&mut self, job: &mut Job) -> bool {
        let Some(node_id) = job.node_id.take() else {
            return false;
        };
        match self.index.get(&node_id) {
            Some(&i) => {
                self.blocks[i].give_back(job.cost);
                trace!(kind = %job.kind, node = %node_id, cost = job.cost, "job released");
                true
            }
            None => false,
        }
    }

    /// Blocks in pool order.
    pub fn blocks(&self) -> &[CapacityBlock] {
        &self.blocks
    }

    pub fn block(&self, node_id: &str) -> Option<&CapacityBlock> {
        self.index.get(node_id).map(|&i| &self.blocks[i])
    }

    pub fn reserved_node(&self) -> Option<&str> {
        self.reserved_node.as_deref()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Sum of free units across all blocks.
    pub fn total_available(&self) -> f64 {
        from_milli(self.blocks.iter().map(CapacityBlock::available_milli).sum())
    }

    /// Free units of the largest block.
    pub fn max_block_size(&self) -> f64 {
        from_milli(
            self.blocks
                .iter()
                .map(CapacityBlock::available_milli)
                .max()
                .unwrap_or(0),
        )
    }

    /// Whole base-cost threads that fit in the largest block.
    pub fn max_block_threads(&self) -> u32 {
        self.blocks
            .iter()
            .map(|b| b.usable_threads(self.base_unit_cost))
            .max()
            .unwrap_or(0)
    }

    /// Sum over blocks of whole base-cost threads each can hold.
    pub fn total_usable_thread_count(&self) -> u64 {
        self.blocks
            .iter()
            .map(|b| u64::from(b.usable_threads(self.base_unit_cost)))
            .sum()
    }
}

fn dedupe_by_node(blocks: Vec<CapacityBlock>) -> Vec<CapacityBlock> {
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(blocks.len());
    let mut unique: Vec<CapacityBlock> = Vec::with_capacity(blocks.len());
    for block in blocks {
        match seen.get(&block.node_id) {
            Some(&i) => {
                warn!(node = %block.node_id, "duplicate node in snapshot, keeping the smaller block");
                if block.available_milli() < unique[i].available_milli() {
                    unique[i] = block;
                }
            }
            None => {
                seen.insert(block.node_id.clone(), unique.len());
                unique.push(block);
            }
        }
    }
    unique
}
