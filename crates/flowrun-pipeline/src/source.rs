//! Work-source client: flower queries against the backing store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use flowrun_core::{FlowerId, WorkUnit};
use tracing::debug;

use crate::error::{PipelineError, ProgramError};
use crate::programs::Invocation;
use crate::runner::ProgramRunner;

/// Size bounds of an extension query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendBounds {
    /// Units smaller than this are not extended into.
    pub min_size: i64,

    /// Units larger than this are left out. Unbounded when `None`.
    pub max_size: Option<i64>,
}

impl ExtendBounds {
    /// Bounds with only a minimum size.
    pub fn at_least(min_size: i64) -> Self {
        Self {
            min_size,
            max_size: None,
        }
    }

    /// Bounds with a minimum and an optional maximum size.
    pub fn between(min_size: i64, max_size: Option<i64>) -> Self {
        Self { min_size, max_size }
    }
}

/// Queries the flower tree.
///
/// Results reflect the store at query time; an upstream phase may have
/// changed the children of a flower since the last query.
#[async_trait]
pub trait FlowerSource: Send + Sync {
    /// Children of every flower in `parents`, as one flat list.
    async fn children(
        &self,
        parents: &[FlowerId],
        scratch: &Path,
    ) -> Result<Vec<WorkUnit>, PipelineError>;

    /// Units to align below `parents`: the parents extended down to the
    /// sequence level, restricted to `bounds`.
    async fn extend(
        &self,
        parents: &[FlowerId],
        scratch: &Path,
        bounds: ExtendBounds,
    ) -> Result<Vec<WorkUnit>, PipelineError>;
}

/// [`FlowerSource`] backed by the store's flower-listing programs.
pub struct StoreFlowerSource {
    store: String,
    runner: Arc<dyn ProgramRunner>,
}

impl StoreFlowerSource {
    /// Create a new StoreFlowerSource.
    pub fn new(store: impl Into<String>, runner: Arc<dyn ProgramRunner>) -> Self {
        Self {
            store: store.into(),
            runner,
        }
    }

    async fn query(&self, invocation: Invocation, scratch: &Path) -> Result<Vec<WorkUnit>, PipelineError> {
        tokio::fs::create_dir_all(scratch)
            .await
            .map_err(|e| PipelineError::io(scratch, e))?;
        let output = self.runner.run(&invocation).await?;
        let units = parse_flower_listing(&invocation.program, &output)?;
        debug!(program = %invocation.program, units = units.len(), "Flower query returned");
        Ok(units)
    }
}

#[async_trait]
impl FlowerSource for StoreFlowerSource {
    async fn children(
        &self,
        parents: &[FlowerId],
        scratch: &Path,
    ) -> Result<Vec<WorkUnit>, PipelineError> {
        self.query(Invocation::get_flowers(&self.store, parents, scratch), scratch)
            .await
    }

    async fn extend(
        &self,
        parents: &[FlowerId],
        scratch: &Path,
        bounds: ExtendBounds,
    ) -> Result<Vec<WorkUnit>, PipelineError> {
        self.query(
            Invocation::extend_flowers(&self.store, parents, scratch, &bounds),
            scratch,
        )
        .await
    }
}

/// Parse `<id> <size> <ends>` lines. Blank lines are ignored.
pub fn parse_flower_listing(program: &str, output: &str) -> Result<Vec<WorkUnit>, ProgramError> {
    let invalid = |line_no: usize, reason: String| ProgramError::InvalidOutput {
        program: program.to_string(),
        reason: format!("line {}: {reason}", line_no + 1),
    };

    let mut units = Vec::new();
    for (line_no, line) in output.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [] => continue,
            [id, size, ends] => {
                let size = size
                    .parse::<i64>()
                    .map_err(|e| invalid(line_no, format!("size '{size}': {e}")))?;
                let ends = ends
                    .parse::<u64>()
                    .map_err(|e| invalid(line_no, format!("end count '{ends}': {e}")))?;
                units.push(WorkUnit::new(*id, size, ends));
            }
            _ => {
                return Err(invalid(
                    line_no,
                    format!("expected 3 fields, got {}", fields.len()),
                ))
            }
        }
    }
    Ok(units)
}
