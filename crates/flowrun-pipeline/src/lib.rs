//! flowrun Pipeline
//!
//! This crate turns the flower tree into a task graph and runs it:
//! the phase chain, the alignment iteration selector, the recursive
//! down-pass walker, the external program runner and an in-process
//! scheduler honouring the child/follow-on contract.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use flowrun_core::{Experiment, PhaseFlags, StartPhase, WorkflowConfig};
//! use flowrun_pipeline::{Pipeline, ProcessRunner};
//!
//! async fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let experiment = Experiment::from_file(Path::new("experiment.json"))?;
//!     let config = WorkflowConfig::from_file(Path::new("workflow.json"))?;
//!
//!     let pipeline = Pipeline::new(
//!         &experiment,
//!         &config,
//!         PhaseFlags::default(),
//!         Arc::new(ProcessRunner::new()),
//!         "work",
//!     )?;
//!
//!     let report = pipeline.run(StartPhase::Setup, 4).await?;
//!     println!("{} tasks", report.records.len());
//!     Ok(())
//! }
//! ```

mod alignment;
mod context;
mod error;
mod phases;
mod pipeline;
mod programs;
mod runner;
mod scheduler;
mod source;
mod task;
mod walker;

#[cfg(test)]
mod testing;

// Re-export main types
pub use alignment::SelectorState;
pub use context::PipelineContext;
pub use error::{PipelineError, ProgramError};
pub use phases::run_task;
pub use pipeline::Pipeline;
pub use programs::Invocation;
pub use runner::{ProcessRunner, ProgramRunner};
pub use scheduler::{LocalScheduler, Relation, RunReport, TaskRecord};
pub use source::{parse_flower_listing, ExtendBounds, FlowerSource, StoreFlowerSource};
pub use task::{ResourceRequest, Scheduled, Task, TaskKind, MERGE_MEMORY_BYTES};
pub use walker::{batch_tasks, descend};
