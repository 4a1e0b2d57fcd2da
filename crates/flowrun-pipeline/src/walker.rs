//! Recursive down-pass walker.
//!
//! A down task asks the flower source for the children of its flowers,
//! partitions them and creates one child task per batch. The child task is
//! usually of the same class, so every level of the tree is handled the same
//! way. A leaf (no children) yields no tasks.

use std::path::Path;

use flowrun_core::{partition, FlowerId, PartitionBounds, WorkUnit};
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::source::FlowerSource;
use crate::task::{Task, TaskKind};

/// Query the children of `flowers` and turn them into one task per batch.
pub async fn descend<F>(
    source: &dyn FlowerSource,
    flowers: &[FlowerId],
    scratch: &Path,
    bounds: &PartitionBounds,
    make_task: F,
) -> Result<Vec<Task>, PipelineError>
where
    F: Fn(Vec<FlowerId>) -> TaskKind,
{
    let children = source.children(flowers, scratch).await?;
    if children.is_empty() {
        debug!(parents = flowers.len(), "No children, nothing to descend into");
        return Ok(Vec::new());
    }
    batch_tasks(&children, bounds, make_task)
}

/// Partition `units` and create one task per batch.
pub fn batch_tasks<F>(
    units: &[WorkUnit],
    bounds: &PartitionBounds,
    make_task: F,
) -> Result<Vec<Task>, PipelineError>
where
    F: Fn(Vec<FlowerId>) -> TaskKind,
{
    let batches = partition(units, bounds)?;
    let tasks: Vec<Task> = batches
        .into_iter()
        .map(|batch| {
            if let (true, Some(flower)) = (batch.oversized, batch.units.first()) {
                info!(
                    flower = %flower,
                    size = batch.aggregate_size,
                    "Adding an oversize flower on its own"
                );
            }
            Task::new(make_task(batch.units))
        })
        .collect();

    if let Some(first) = tasks.first() {
        info!(
            task = first.name(),
            units = units.len(),
            batches = tasks.len(),
            "Scheduling batches"
        );
    }
    Ok(tasks)
}
