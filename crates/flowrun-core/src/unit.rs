//! Work units returned by the backing store and the batches built from them.

use serde::{Deserialize, Serialize};

use crate::FlowerId;

/// A flower as reported by the backing store.
///
/// `size` is the amount of sequence the flower contains; it is signed so a
/// malformed report can be rejected instead of wrapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Flower identifier.
    pub id: FlowerId,

    /// Aggregate sequence size.
    pub size: i64,

    /// Secondary count (number of ends).
    pub end_count: u64,
}

impl WorkUnit {
    /// Create a new WorkUnit.
    pub fn new(id: impl Into<FlowerId>, size: i64, end_count: u64) -> Self {
        Self {
            id: id.into(),
            size,
            end_count,
        }
    }
}

/// A group of sibling units handed to one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Units in input order.
    pub units: Vec<FlowerId>,

    /// Sum of the floored unit sizes (the raw size for an oversized unit).
    pub aggregate_size: u64,

    /// True when the batch holds a single unit at or above the size ceiling.
    pub oversized: bool,
}

impl Batch {
    /// A batch of accumulated units.
    pub fn new(units: Vec<FlowerId>, aggregate_size: u64) -> Self {
        Self {
            units,
            aggregate_size,
            oversized: false,
        }
    }

    /// A unit that is scheduled alone because it exceeds the ceiling.
    pub fn oversized(unit: FlowerId, size: u64) -> Self {
        Self {
            units: vec![unit],
            aggregate_size: size,
            oversized: true,
        }
    }

    /// Number of units in the batch.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns true if the batch holds no units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
