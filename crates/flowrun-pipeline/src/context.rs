//! Shared, read-only state of a pipeline run.

use std::path::PathBuf;
use std::sync::Arc;

use flowrun_core::{
    EffectiveConfig, IterationDescriptor, PartitionBounds, PhaseContext, TaskId, WorkflowConfig,
};
use tracing::debug;

use crate::error::PipelineError;
use crate::programs::Invocation;
use crate::runner::ProgramRunner;
use crate::source::FlowerSource;

/// Everything a task body may read. Built once, never mutated.
pub struct PipelineContext {
    /// Run-wide phase state.
    pub phase: PhaseContext,

    /// Configuration after the identity derivation.
    pub config: EffectiveConfig,

    /// Flower queries.
    pub source: Arc<dyn FlowerSource>,

    /// External programs.
    pub runner: Arc<dyn ProgramRunner>,

    /// Root of scratch, staging and alignment files.
    pub work_dir: PathBuf,
}

impl PipelineContext {
    /// Backing-store connection string.
    pub fn store(&self) -> &str {
        &self.phase.store
    }

    /// Effective workflow configuration.
    pub fn workflow(&self) -> &WorkflowConfig {
        self.config.workflow()
    }

    /// Alignment iteration at `index`.
    pub fn iteration(&self, index: usize) -> Result<&IterationDescriptor, PipelineError> {
        self.config.iterations().get(index).ok_or_else(|| {
            PipelineError::Config(flowrun_core::ConfigError::InvalidParameter {
                group: "alignment".to_string(),
                key: "iterations".to_string(),
                reason: format!("no iteration at index {index}"),
            })
        })
    }

    /// Bounds of an ordinary down-pass.
    pub fn down_pass_bounds(&self) -> PartitionBounds {
        let scheduling = &self.workflow().scheduling;
        PartitionBounds::new(scheduling.max_sequence_size, scheduling.max_job_number)
    }

    /// Bounds of the base-level aligner batches.
    pub fn base_level_bounds(&self) -> PartitionBounds {
        let scheduling = &self.workflow().scheduling;
        PartitionBounds::new(
            scheduling.base_level_max_sequence_size,
            scheduling.max_job_number,
        )
    }

    /// Private scratch directory of a task.
    pub fn scratch_dir(&self, task: &TaskId) -> PathBuf {
        self.work_dir.join("tasks").join(task.as_str())
    }

    /// Alignment file written by the search of a coarse-align task.
    pub fn alignment_file(&self, task: &TaskId) -> PathBuf {
        self.work_dir
            .join("alignments")
            .join(format!("{}.cigar", task.as_str()))
    }

    /// Directory holding preprocessed sequences.
    pub fn staging_dir(&self) -> PathBuf {
        self.work_dir.join("sequences")
    }

    /// Run an external program, discarding its output.
    pub async fn run_program(&self, invocation: Invocation) -> Result<(), PipelineError> {
        self.runner.run(&invocation).await?;
        Ok(())
    }

    /// Remove a task's scratch directory, if it was created.
    pub async fn release_scratch(&self, task: &TaskId) -> Result<(), PipelineError> {
        let dir = self.scratch_dir(task);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(task_id = %task, "Removed scratch directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::io(dir, e)),
        }
    }
}
