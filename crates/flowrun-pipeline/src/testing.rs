//! In-memory collaborators for tests.

use std::collections::HashMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flowrun_core::{
    EffectiveConfig, Experiment, FlowerId, PhaseContext, PhaseFlags, WorkUnit, WorkflowConfig,
};
use tempfile::TempDir;

use crate::context::PipelineContext;
use crate::error::{PipelineError, ProgramError};
use crate::programs::Invocation;
use crate::runner::ProgramRunner;
use crate::source::{ExtendBounds, FlowerSource};

const EXPERIMENT: &str = include_str!("../../../config/experiment.example.json");

/// Size reported for flowers that were never listed as a child.
const DEFAULT_FLOWER_SIZE: i64 = 1_000;

/// A fixed flower tree. Flowers without children are leaves; extending a
/// leaf yields the leaf itself.
#[derive(Debug, Default)]
pub struct MemoryFlowerSource {
    children: HashMap<FlowerId, Vec<WorkUnit>>,
    sizes: HashMap<FlowerId, i64>,
}

impl MemoryFlowerSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to add the children of `parent`.
    pub fn with_children(mut self, parent: &str, children: &[(&str, i64)]) -> Self {
        let units: Vec<WorkUnit> = children
            .iter()
            .map(|(id, size)| WorkUnit::new(*id, *size, 2))
            .collect();
        for unit in &units {
            self.sizes.insert(unit.id.clone(), unit.size);
        }
        self.children.insert(FlowerId::new(parent), units);
        self
    }

    fn size_of(&self, flower: &FlowerId) -> i64 {
        self.sizes.get(flower).copied().unwrap_or(DEFAULT_FLOWER_SIZE)
    }
}

#[async_trait]
impl FlowerSource for MemoryFlowerSource {
    async fn children(
        &self,
        parents: &[FlowerId],
        scratch: &Path,
    ) -> Result<Vec<WorkUnit>, PipelineError> {
        tokio::fs::create_dir_all(scratch)
            .await
            .map_err(|e| PipelineError::io(scratch, e))?;
        Ok(parents
            .iter()
            .filter_map(|parent| self.children.get(parent))
            .flatten()
            .cloned()
            .collect())
    }

    async fn extend(
        &self,
        parents: &[FlowerId],
        scratch: &Path,
        bounds: ExtendBounds,
    ) -> Result<Vec<WorkUnit>, PipelineError> {
        tokio::fs::create_dir_all(scratch)
            .await
            .map_err(|e| PipelineError::io(scratch, e))?;
        Ok(parents
            .iter()
            .filter(|parent| !self.children.contains_key(*parent))
            .map(|parent| WorkUnit::new(parent.clone(), self.size_of(parent), 2))
            .filter(|unit| unit.size >= bounds.min_size)
            .filter(|unit| bounds.max_size.map_or(true, |max| unit.size <= max))
            .collect())
    }
}

/// Records every invocation instead of running it.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Invocation>>,
    outputs: HashMap<String, String>,
    failing: Option<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the stdout of a program.
    pub fn with_output(mut self, program: &str, output: &str) -> Self {
        self.outputs.insert(program.to_string(), output.to_string());
        self
    }

    /// Builder method to make a program exit with an error.
    pub fn failing(mut self, program: &str) -> Self {
        self.failing = Some(program.to_string());
        self
    }

    /// Invocations so far, in call order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Program names so far, in call order.
    pub fn programs(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.program).collect()
    }
}

#[async_trait]
impl ProgramRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> Result<String, ProgramError> {
        self.calls.lock().unwrap().push(invocation.clone());
        if self.failing.as_deref() == Some(invocation.program.as_str()) {
            return Err(ProgramError::Failed {
                program: invocation.program.clone(),
                code: 1,
                stderr: "injected failure".to_string(),
            });
        }
        Ok(self
            .outputs
            .get(&invocation.program)
            .cloned()
            .unwrap_or_default())
    }
}

/// The example experiment.
pub fn experiment() -> Experiment {
    Experiment::from_json_str(EXPERIMENT).unwrap()
}

/// A pipeline context whose work directory is removed on drop.
pub struct TestContext {
    ctx: Arc<PipelineContext>,
    _work_dir: TempDir,
}

impl TestContext {
    /// Wrap a context built over `work_dir`.
    pub fn new(work_dir: TempDir, build: impl FnOnce(&Path) -> PipelineContext) -> Self {
        Self {
            ctx: Arc::new(build(work_dir.path())),
            _work_dir: work_dir,
        }
    }

    /// The context, for handing to a scheduler.
    pub fn shared(&self) -> Arc<PipelineContext> {
        Arc::clone(&self.ctx)
    }
}

impl Deref for TestContext {
    type Target = PipelineContext;

    fn deref(&self) -> &PipelineContext {
        &self.ctx
    }
}

/// Context over the example experiment with no optional phases enabled.
pub fn test_context(
    config: WorkflowConfig,
    source: MemoryFlowerSource,
    runner: impl Into<Arc<RecordingRunner>>,
) -> TestContext {
    test_context_with_flags(config, PhaseFlags::default(), source, runner)
}

/// Context over the example experiment with the given phase flags.
pub fn test_context_with_flags(
    config: WorkflowConfig,
    flags: PhaseFlags,
    source: MemoryFlowerSource,
    runner: impl Into<Arc<RecordingRunner>>,
) -> TestContext {
    let experiment = experiment();
    let config = EffectiveConfig::derive(&config, &experiment.species_tree).unwrap();
    let runner: Arc<RecordingRunner> = runner.into();
    TestContext::new(tempfile::tempdir().unwrap(), |work_dir| PipelineContext {
        phase: PhaseContext::from_experiment(&experiment, flags),
        config,
        source: Arc::new(source),
        runner,
        work_dir: work_dir.to_path_buf(),
    })
}
