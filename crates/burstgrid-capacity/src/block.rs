//! A single node's free capacity.
//!
//! Capacity is tracked internally in thousandths of a unit so that an
//! allocation followed by its release restores the block bit-for-bit.

use burst_core::NodeId;

const MILLI: f64 = 1000.0;

/// Convert fractional units into whole milli-units.
pub(crate) fn to_milli(units: f64) -> u64 {
    if units.is_nan() || units <= 0.0 {
        return 0;
    }
    (units * MILLI).round().min(u64::MAX as f64) as u64
}

pub(crate) fn from_milli(milli: u64) -> f64 {
    milli as f64 / MILLI
}

/// Free allocatable capacity on one node at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityBlock {
    pub node_id: NodeId,
    available_milli: u64,
}

impl CapacityBlock {
    pub fn new(node_id: impl Into<NodeId>, available_units: f64) -> Self {
        Self {
            node_id: node_id.into(),
            available_milli: to_milli(available_units),
        }
    }

    /// Free units, never negative.
    pub fn available_units(&self) -> f64 {
        from_milli(self.available_milli)
    }

    pub(crate) fn available_milli(&self) -> u64 {
        self.available_milli
    }

    /// Whole threads of `unit_cost` that fit in this block.
    pub fn usable_threads(&self, unit_cost: f64) -> u32 {
        let unit = to_milli(unit_cost);
        if unit == 0 {
            return 0;
        }
        (self.available_milli / unit).min(u64::from(u32::MAX)) as u32
    }

    pub fn fits(&self, units: f64) -> bool {
        self.available_milli >= to_milli(units)
    }

    /// Take `units` from the block. Caller checks [`fits`](Self::fits).
    pub(crate) fn take(&mut self, units: f64) {
        self.available_milli = self.available_milli.saturating_sub(to_milli(units));
    }

    pub(crate) fn give_back(&mut self, units: f64) {
        self.available_milli = self.available_milli.saturating_add(to_milli(units));
    }
}
