//! Greedy batch partitioner.
//!
//! Groups sibling work units into batches whose floored aggregate size
//! reaches the configured ceiling. Units at or above the ceiling are always
//! scheduled alone. Input order is preserved; nothing is sorted.
//!
//! `max_batch_count` is a soft bound: it only derives the per-slot size floor
//! (`max_aggregate_size / max_batch_count`, not rounded), so an input made of
//! many units just above that floor can still yield more batches than
//! requested.
//!
//! The floor is usually fractional. Totals are kept scaled by
//! `max_batch_count` so the comparison against the ceiling stays exact.

use crate::{Batch, PartitionError, WorkUnit};

/// Ceiling and filter used when partitioning one level of the flower tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionBounds {
    /// A batch is closed once its floored total reaches this size.
    pub max_aggregate_size: u64,

    /// Desired number of batches; only used to derive the slot floor.
    pub max_batch_count: u64,

    /// Units smaller than this are skipped, not batched. Zero disables the
    /// filter.
    pub ignore_smaller_than: i64,
}

impl PartitionBounds {
    /// Create bounds with no size filter.
    pub fn new(max_aggregate_size: u64, max_batch_count: u64) -> Self {
        Self {
            max_aggregate_size,
            max_batch_count,
            ignore_smaller_than: 0,
        }
    }

    /// Builder method to skip units below `size`.
    pub fn ignoring_smaller_than(mut self, size: i64) -> Self {
        self.ignore_smaller_than = size;
        self
    }

    /// Minimum size charged to each unit in a batch.
    pub fn min_slot_size(&self) -> f64 {
        (self.max_aggregate_size as f64 / self.max_batch_count.max(1) as f64).max(1.0)
    }

    /// Slot floor multiplied by `max_batch_count`.
    fn scaled_min_slot(&self) -> u128 {
        u128::from(self.max_aggregate_size).max(u128::from(self.max_batch_count))
    }

    fn scaled(&self, size: u64) -> u128 {
        u128::from(size) * u128::from(self.max_batch_count)
    }

    fn filters_out(&self, unit: &WorkUnit) -> bool {
        self.ignore_smaller_than > 0 && unit.size < self.ignore_smaller_than
    }

    fn validate(&self) -> Result<(), PartitionError> {
        if self.max_aggregate_size == 0 || self.max_batch_count == 0 {
            return Err(PartitionError::InvalidBounds {
                max_aggregate_size: self.max_aggregate_size,
                max_batch_count: self.max_batch_count,
            });
        }
        Ok(())
    }
}

/// Partition `units` into batches.
///
/// Every unit that passes the size filter lands in exactly one batch. A unit
/// that passes the filter with a non-positive size is an error; without a
/// filter every non-positive size is.
pub fn partition(units: &[WorkUnit], bounds: &PartitionBounds) -> Result<Vec<Batch>, PartitionError> {
    bounds.validate()?;

    let min_slot = bounds.scaled_min_slot();
    let ceiling = bounds.scaled(bounds.max_aggregate_size);
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut total = 0u128;

    for unit in units {
        if bounds.filters_out(unit) {
            continue;
        }
        if unit.size <= 0 {
            return Err(PartitionError::NonPositiveSize {
                id: unit.id.clone(),
                size: unit.size,
            });
        }

        let size = unit.size as u64;
        if size >= bounds.max_aggregate_size {
            batches.push(Batch::oversized(unit.id.clone(), size));
            continue;
        }

        total += bounds.scaled(size).max(min_slot);
        current.push(unit.id.clone());
        if total >= ceiling {
            batches.push(Batch::new(std::mem::take(&mut current), unscale(total, bounds)));
            total = 0;
        }
    }

    if !current.is_empty() {
        batches.push(Batch::new(current, unscale(total, bounds)));
    }

    Ok(batches)
}

/// Floored aggregate size of a batch, rounded down to whole units.
fn unscale(total: u128, bounds: &PartitionBounds) -> u64 {
    let size = total / u128::from(bounds.max_batch_count);
    u64::try_from(size).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlowerId;
    use std::collections::HashSet;

    fn ids(batch: &Batch) -> Vec<&str> {
        batch.units.iter().map(FlowerId::as_str).collect()
    }

    #[test]
    fn test_oversized_unit_isolated() {
        let units = vec![
            WorkUnit::new("A", 600_000, 5),
            WorkUnit::new("B", 300_000, 3),
            WorkUnit::new("C", 1_200_000, 9),
        ];
        let batches = partition(&units, &PartitionBounds::new(1_000_000, 1000)).unwrap();

        // C is emitted first because oversized units are flushed immediately,
        // while A and B wait in the trailing batch.
        assert_eq!(batches.len(), 2);
        assert_eq!(ids(&batches[0]), vec!["C"]);
        assert!(batches[0].oversized);
        assert_eq!(ids(&batches[1]), vec!["A", "B"]);
        assert_eq!(batches[1].aggregate_size, 900_000);
    }

    #[test]
    fn test_batch_closes_when_total_reaches_ceiling() {
        let units = vec![
            WorkUnit::new("a", 400, 1),
            WorkUnit::new("b", 600, 1),
            WorkUnit::new("c", 10, 1),
        ];
        let batches = partition(&units, &PartitionBounds::new(1000, 10)).unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(ids(&batches[0]), vec!["a", "b"]);
        assert_eq!(batches[0].aggregate_size, 1000);
        // c is charged the slot floor of 100
        assert_eq!(ids(&batches[1]), vec!["c"]);
        assert_eq!(batches[1].aggregate_size, 100);
    }

    #[test]
    fn test_tiny_units_charged_slot_floor() {
        let units: Vec<_> = (0..25).map(|i| WorkUnit::new(format!("u{i}"), 1, 0)).collect();
        let bounds = PartitionBounds::new(1000, 10);
        assert_eq!(bounds.min_slot_size(), 100.0);

        let batches = partition(&units, &bounds).unwrap();
        let sizes: Vec<_> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[test]
    fn test_slot_floor_at_least_one() {
        let bounds = PartitionBounds::new(10, 1000);
        assert_eq!(bounds.min_slot_size(), 1.0);
    }

    #[test]
    fn test_small_units_filtered() {
        let units = vec![
            WorkUnit::new("small", 5, 1),
            WorkUnit::new("empty", 0, 0),
            WorkUnit::new("ok", 50, 2),
        ];
        let bounds = PartitionBounds::new(1000, 10).ignoring_smaller_than(10);
        let batches = partition(&units, &bounds).unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(ids(&batches[0]), vec!["ok"]);
    }

    #[test]
    fn test_zero_size_rejected() {
        let units = vec![WorkUnit::new("a", 10, 1), WorkUnit::new("z", 0, 0)];
        let err = partition(&units, &PartitionBounds::new(1000, 10)).unwrap_err();
        match err {
            PartitionError::NonPositiveSize { id, size } => {
                assert_eq!(id.as_str(), "z");
                assert_eq!(size, 0);
            }
            other => panic!("Expected NonPositiveSize, got {other:?}"),
        }
    }

    #[test]
    fn test_negative_size_rejected() {
        let units = vec![WorkUnit::new("a", 10, 1), WorkUnit::new("n", -3, 0)];
        match partition(&units, &PartitionBounds::new(1000, 10)).unwrap_err() {
            PartitionError::NonPositiveSize { id, size } => {
                assert_eq!(id.as_str(), "n");
                assert_eq!(size, -3);
            }
            other => panic!("Expected NonPositiveSize, got {other:?}"),
        }
    }

    #[test]
    fn test_negative_size_skipped_by_explicit_filter() {
        let units = vec![WorkUnit::new("n", -3, 0), WorkUnit::new("ok", 50, 2)];
        let bounds = PartitionBounds::new(1000, 10).ignoring_smaller_than(1);
        let batches = partition(&units, &bounds).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(ids(&batches[0]), vec!["ok"]);
    }

    #[test]
    fn test_fractional_slot_floor() {
        // 10 / 4 = 2.5: four unit-sized flowers are charged 10 and close a batch
        let units: Vec<_> = (0..5).map(|i| WorkUnit::new(format!("u{i}"), 1, 0)).collect();
        let bounds = PartitionBounds::new(10, 4);
        assert_eq!(bounds.min_slot_size(), 2.5);

        let batches = partition(&units, &bounds).unwrap();
        let sizes: Vec<_> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![4, 1]);
        assert_eq!(batches[0].aggregate_size, 10);
        assert_eq!(batches[1].aggregate_size, 2);
    }

    #[test]
    fn test_fractional_floor_only_charged_to_small_units() {
        // floor is 1000 / 3: both 300s are charged 333.3, c tips the total over
        let units = vec![
            WorkUnit::new("a", 300, 1),
            WorkUnit::new("b", 300, 1),
            WorkUnit::new("c", 400, 1),
        ];
        let batches = partition(&units, &PartitionBounds::new(1000, 3)).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(ids(&batches[0]), vec!["a", "b", "c"]);
        assert_eq!(batches[0].aggregate_size, 1066);
    }

    #[test]
    fn test_invalid_bounds() {
        let units = vec![WorkUnit::new("a", 1, 0)];
        assert!(matches!(
            partition(&units, &PartitionBounds::new(0, 10)),
            Err(PartitionError::InvalidBounds { .. })
        ));
        assert!(matches!(
            partition(&units, &PartitionBounds::new(10, 0)),
            Err(PartitionError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn test_empty_input() {
        let batches = partition(&[], &PartitionBounds::new(1000, 10)).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn test_batch_count_is_soft_bound() {
        // Every unit is just under the ceiling: two units close a batch.
        let units: Vec<_> = (0..20).map(|i| WorkUnit::new(format!("u{i}"), 999, 0)).collect();
        let batches = partition(&units, &PartitionBounds::new(1000, 4)).unwrap();
        assert_eq!(batches.len(), 10);
        assert!(batches.len() > 4);
    }

    #[test]
    fn test_every_unit_placed_exactly_once() {
        // Deterministic pseudo-random sizes, some oversized, some filtered.
        let mut seed = 0x2545_f491_u64;
        let units: Vec<_> = (0..500)
            .map(|i| {
                seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                let size = (seed >> 33) % 3000 + 1;
                WorkUnit::new(format!("f{i}"), size as i64, 0)
            })
            .collect();
        let bounds = PartitionBounds::new(2000, 50).ignoring_smaller_than(20);
        let batches = partition(&units, &bounds).unwrap();

        let expected: Vec<_> = units
            .iter()
            .filter(|u| u.size >= 20)
            .map(|u| u.id.clone())
            .collect();
        let mut seen = HashSet::new();
        for batch in &batches {
            assert!(!batch.is_empty());
            for id in &batch.units {
                assert!(seen.insert(id.clone()), "duplicate unit {id}");
            }
        }
        assert_eq!(seen.len(), expected.len());
        assert!(expected.iter().all(|id| seen.contains(id)));

        let sizes: std::collections::HashMap<_, _> =
            units.iter().map(|u| (u.id.clone(), u.size as u64)).collect();
        // 2000 / 50 is a whole floor, so plain integers suffice here
        assert_eq!(bounds.min_slot_size(), 40.0);
        let min_slot = 40u64;
        for (i, batch) in batches.iter().enumerate() {
            if batch.oversized {
                assert_eq!(batch.len(), 1);
                assert!(sizes[&batch.units[0]] >= 2000);
                continue;
            }
            assert!(batch.units.iter().all(|id| sizes[id] < 2000));
            let floored: u64 = batch.units.iter().map(|id| sizes[id].max(min_slot)).sum();
            assert_eq!(floored, batch.aggregate_size);
            // Without its last unit, a closed batch was still under the ceiling.
            let last = batch.units.last().unwrap();
            assert!(floored - sizes[last].max(min_slot) < 2000);
            assert!(floored >= min_slot);
            // Only the trailing batch may stay under the ceiling.
            if floored < 2000 {
                assert_eq!(i, batches.len() - 1);
            }
        }
    }
}
