//! Pipeline construction.

use std::path::PathBuf;
use std::sync::Arc;

use flowrun_core::{EffectiveConfig, Experiment, PhaseContext, PhaseFlags, StartPhase, WorkflowConfig};
use tracing::info;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::runner::ProgramRunner;
use crate::scheduler::{LocalScheduler, RunReport};
use crate::source::{FlowerSource, StoreFlowerSource};
use crate::task::{Task, TaskKind};

/// A configured reconstruction run.
///
/// Construction validates the configuration and derives the effective
/// configuration, so every configuration error surfaces before any task runs.
pub struct Pipeline {
    ctx: Arc<PipelineContext>,
}

impl Pipeline {
    /// Create a pipeline whose flower queries go through the store programs.
    pub fn new(
        experiment: &Experiment,
        config: &WorkflowConfig,
        flags: PhaseFlags,
        runner: Arc<dyn ProgramRunner>,
        work_dir: impl Into<PathBuf>,
    ) -> Result<Self, PipelineError> {
        let source = Arc::new(StoreFlowerSource::new(
            experiment.store.clone(),
            Arc::clone(&runner),
        ));
        Self::with_source(experiment, config, flags, source, runner, work_dir)
    }

    /// Create a pipeline with a custom flower source.
    pub fn with_source(
        experiment: &Experiment,
        config: &WorkflowConfig,
        flags: PhaseFlags,
        source: Arc<dyn FlowerSource>,
        runner: Arc<dyn ProgramRunner>,
        work_dir: impl Into<PathBuf>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let effective = EffectiveConfig::derive(config, &experiment.species_tree)?;
        if let Some(threshold) = effective.identity_threshold() {
            info!(identity = threshold, "Derived identity threshold");
        }

        Ok(Self {
            ctx: Arc::new(PipelineContext {
                phase: PhaseContext::from_experiment(experiment, flags),
                config: effective,
                source,
                runner,
                work_dir: work_dir.into(),
            }),
        })
    }

    /// Shared context of the run.
    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// First task of a run starting at `start`.
    pub fn root_task(start: StartPhase) -> Task {
        Task::new(match start {
            StartPhase::Setup => TaskKind::SetupPhase,
            StartPhase::Phylogeny => TaskKind::PhylogenyPhase,
            StartPhase::Reference => TaskKind::ReferencePhase,
            StartPhase::Faces => TaskKind::FacesPhase,
        })
    }

    /// Scheduler for this pipeline with a budget of `max_cpus`.
    pub fn scheduler(&self, max_cpus: u32) -> Arc<LocalScheduler> {
        LocalScheduler::new(Arc::clone(&self.ctx), max_cpus)
    }

    /// Run from `start` to the end of the chain.
    pub async fn run(&self, start: StartPhase, max_cpus: u32) -> Result<RunReport, PipelineError> {
        self.scheduler(max_cpus).run(Self::root_task(start)).await
    }
}
