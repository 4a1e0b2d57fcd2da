//! Local task-graph scheduler.
//!
//! Runs a task graph in-process. The contract is the one the pipeline is
//! written against:
//!
//! - children of a task run concurrently, in no particular order;
//! - the follow-on starts only after every child and everything those
//!   children scheduled has finished;
//! - the first failing task aborts the run.
//!
//! A semaphore sized to the CPU budget bounds how many task bodies run at
//! once. A task holds its CPUs only while its own body runs, never while it
//! waits for its children.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowrun_core::{TaskId, TaskStatus};
use futures_util::future::{try_join_all, BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::phases::run_task;
use crate::task::{Scheduled, Task};

/// How a task came to be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Root,
    Child,
    FollowOn,
}

/// Journal entry of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    /// Start order within the run.
    pub sequence: usize,
    pub task_id: TaskId,
    /// Task that scheduled this one.
    pub parent: Option<TaskId>,
    pub relation: Relation,
    /// Task class name.
    pub task: &'static str,
    /// Number of flowers the task covers. The ids themselves are not kept.
    pub flowers: usize,
    pub cpu: u32,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Journal of a finished (or aborted) run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Records in start order.
    pub records: Vec<TaskRecord>,
}

impl RunReport {
    /// Number of tasks of class `task`.
    pub fn count(&self, task: &str) -> usize {
        self.records.iter().filter(|r| r.task == task).count()
    }

    /// Task class names in start order.
    pub fn task_names(&self) -> Vec<&'static str> {
        self.records.iter().map(|r| r.task).collect()
    }

    /// Start positions of every task of class `task`.
    pub fn sequences_of(&self, task: &str) -> Vec<usize> {
        self.records
            .iter()
            .filter(|r| r.task == task)
            .map(|r| r.sequence)
            .collect()
    }

    /// Number of tasks per class.
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.task).or_insert(0) += 1;
        }
        counts
    }

    /// The failed task, if any.
    pub fn failure(&self) -> Option<&TaskRecord> {
        self.records.iter().find(|r| r.status == TaskStatus::Failed)
    }

    /// Returns true if every recorded task completed.
    pub fn is_success(&self) -> bool {
        self.records.iter().all(|r| r.status == TaskStatus::Completed)
    }

    /// Serialize the report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// In-process scheduler for one pipeline run.
pub struct LocalScheduler {
    ctx: Arc<PipelineContext>,
    cpus: Arc<Semaphore>,
    max_cpus: u32,
    journal: Mutex<Vec<TaskRecord>>,
}

impl LocalScheduler {
    /// Create a new LocalScheduler with a budget of `max_cpus` (at least 1).
    pub fn new(ctx: Arc<PipelineContext>, max_cpus: u32) -> Arc<Self> {
        let max_cpus = max_cpus.max(1);
        Arc::new(Self {
            ctx,
            cpus: Arc::new(Semaphore::new(max_cpus as usize)),
            max_cpus,
            journal: Mutex::new(Vec::new()),
        })
    }

    /// Run `root` and everything it schedules.
    ///
    /// On failure the journal is still available through [`Self::report`].
    pub async fn run(self: &Arc<Self>, root: Task) -> Result<RunReport, PipelineError> {
        info!(task = root.name(), max_cpus = self.max_cpus, "Starting run");
        Arc::clone(self).execute(root, None, Relation::Root).await?;

        let report = self.report().await;
        info!(tasks = report.records.len(), "Run completed");
        Ok(report)
    }

    /// Snapshot of the journal.
    pub async fn report(&self) -> RunReport {
        RunReport {
            records: self.journal.lock().await.clone(),
        }
    }

    fn execute(
        self: Arc<Self>,
        task: Task,
        parent: Option<TaskId>,
        relation: Relation,
    ) -> BoxFuture<'static, Result<(), PipelineError>> {
        async move {
            let sequence = self.record_start(&task, parent, relation).await;

            let Scheduled {
                children,
                follow_on,
            } = match self.run_body(&task).await {
                Ok(scheduled) => {
                    self.record_finish(sequence, TaskStatus::Completed, None).await;
                    scheduled
                }
                Err(e) => {
                    error!(task = task.name(), task_id = %task.id, error = %e, "Task failed");
                    self.record_finish(sequence, TaskStatus::Failed, Some(e.to_string()))
                        .await;
                    return Err(PipelineError::TaskFailed {
                        task: task.name(),
                        task_id: task.id.clone(),
                        source: Box::new(e),
                    });
                }
            };

            if !children.is_empty() {
                let runs = children.into_iter().map(|child| {
                    Arc::clone(&self).execute(child, Some(task.id.clone()), Relation::Child)
                });
                try_join_all(runs).await?;
            }

            if let Some(next) = follow_on {
                Arc::clone(&self)
                    .execute(next, Some(task.id.clone()), Relation::FollowOn)
                    .await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn run_body(&self, task: &Task) -> Result<Scheduled, PipelineError> {
        let requested = task.resources.cpu.max(1);
        let cpu = if requested > self.max_cpus {
            warn!(
                task = task.name(),
                requested,
                max_cpus = self.max_cpus,
                "Task requests more CPUs than available, capping"
            );
            self.max_cpus
        } else {
            requested
        };

        let _permits = Arc::clone(&self.cpus)
            .acquire_many_owned(cpu)
            .await
            .map_err(|_| PipelineError::SchedulerClosed)?;

        run_task(&self.ctx, task).await
    }

    async fn record_start(&self, task: &Task, parent: Option<TaskId>, relation: Relation) -> usize {
        let mut journal = self.journal.lock().await;
        let sequence = journal.len();
        journal.push(TaskRecord {
            sequence,
            task_id: task.id.clone(),
            parent,
            relation,
            task: task.name(),
            flowers: task.kind.flowers().len(),
            cpu: task.resources.cpu,
            status: TaskStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        });
        sequence
    }

    async fn record_finish(&self, sequence: usize, status: TaskStatus, error: Option<String>) {
        let mut journal = self.journal.lock().await;
        if let Some(record) = journal.get_mut(sequence) {
            record.status = status;
            record.finished_at = Some(Utc::now());
            record.error = error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProgramError;
    use crate::programs::Invocation;
    use crate::runner::ProgramRunner;
    use crate::task::TaskKind;
    use crate::testing::{
        experiment, test_context, test_context_with_flags, MemoryFlowerSource, RecordingRunner,
        TestContext,
    };
    use async_trait::async_trait;
    use flowrun_core::{EffectiveConfig, FlowerId, PhaseContext, PhaseFlags, WorkflowConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const EXAMPLE: &str = include_str!("../../../config/workflow.example.json");

    fn config() -> WorkflowConfig {
        WorkflowConfig::from_json_str(EXAMPLE).unwrap()
    }

    fn tree() -> MemoryFlowerSource {
        MemoryFlowerSource::new()
            .with_children("0", &[("1", 40_000), ("2", 30_000)])
            .with_children("1", &[("3", 20_000), ("4", 15_000)])
    }

    async fn run(ctx: TestContext, root: TaskKind) -> (Result<RunReport, PipelineError>, RunReport) {
        let scheduler = LocalScheduler::new(ctx.shared(), 4);
        let result = scheduler.run(Task::new(root)).await;
        let report = scheduler.report().await;
        (result, report)
    }

    #[tokio::test]
    async fn test_full_run_phase_order() {
        let runner = Arc::new(RecordingRunner::new());
        let ctx = test_context(config(), tree(), runner.clone());

        let (result, report) = run(ctx, TaskKind::SetupPhase).await;
        let report_ok = result.unwrap();
        assert!(report_ok.is_success());
        assert_eq!(report.records.len(), report_ok.records.len());

        let programs = runner.programs();
        assert_eq!(programs.first().map(String::as_str), Some("cactus_setup"));
        assert_eq!(programs.last().map(String::as_str), Some("cactus_check"));

        // Three iterations plus the final selector step
        assert_eq!(report.count("alignment_phase"), 4);
        assert_eq!(report.count("normal_phase"), 2);
        assert_eq!(report.count("phylogeny_down"), 0);
        assert_eq!(report.count("reference_coordinates"), 0);

        let last_alignment = *report.sequences_of("alignment_phase").last().unwrap();
        let first_normal = report.sequences_of("normal_phase")[0];
        assert!(last_alignment < first_normal);
        for name in ["coarse_down", "base_down", "merge_alignment", "base_align"] {
            assert!(
                report.sequences_of(name).iter().all(|s| *s < first_normal),
                "{name} ran after normalization started"
            );
        }
    }

    #[tokio::test]
    async fn test_normalization_rounds_run_before_phylogeny() {
        let mut config = config();
        config.normal.rounds = 3;
        let ctx = test_context(config, tree(), RecordingRunner::new());

        let (result, report) = run(ctx, TaskKind::NormalPhase { rounds_remaining: 3 }).await;
        result.unwrap();

        let rounds = report.sequences_of("normal_phase");
        assert_eq!(rounds.len(), 3);
        assert_eq!(report.count("normalize"), 3 * 3);
        let phylogeny = report.sequences_of("phylogeny_phase")[0];
        assert!(report.sequences_of("normalize").iter().all(|s| *s < phylogeny));
    }

    #[tokio::test]
    async fn test_follow_on_waits_for_descendants() {
        let ctx = test_context(config(), tree(), RecordingRunner::new());
        let (result, report) = run(
            ctx,
            TaskKind::NormalDown {
                flowers: vec![FlowerId::root()],
            },
        )
        .await;
        result.unwrap();

        let root = &report.records[0];
        assert_eq!(root.relation, Relation::Root);
        let root_normalize = report
            .records
            .iter()
            .find(|r| r.task == "normalize" && r.parent.as_ref() == Some(&root.task_id))
            .unwrap();
        assert_eq!(root_normalize.flowers, 1);
        for record in &report.records {
            if record.task == "normal_down" {
                assert!(record.sequence < root_normalize.sequence);
                assert!(record.finished_at.unwrap() <= root_normalize.started_at);
            }
        }
        assert_eq!(root_normalize.relation, Relation::FollowOn);
    }

    #[tokio::test]
    async fn test_failure_aborts_run() {
        let runner = RecordingRunner::new().failing("cactus_normalisation");
        let ctx = test_context(config(), tree(), runner);

        let (result, report) = run(ctx, TaskKind::NormalPhase { rounds_remaining: 2 }).await;
        match result.unwrap_err() {
            PipelineError::TaskFailed { task, source, .. } => {
                assert_eq!(task, "normalize");
                assert!(matches!(*source, PipelineError::Program(ProgramError::Failed { .. })));
            }
            other => panic!("Expected TaskFailed, got {other:?}"),
        }
        assert!(!report.is_success());
        assert_eq!(report.failure().map(|r| r.task), Some("normalize"));
        assert_eq!(report.count("phylogeny_phase"), 0);
        assert_eq!(report.count("normal_phase"), 1);
    }

    #[tokio::test]
    async fn test_skip_check_ends_run_at_check_phase() {
        let flags = PhaseFlags {
            build_faces: true,
            skip_check: true,
            ..PhaseFlags::default()
        };
        let runner = Arc::new(RecordingRunner::new());
        let ctx = test_context_with_flags(config(), flags, tree(), runner.clone());

        let (result, report) = run(ctx, TaskKind::FacesPhase).await;
        result.unwrap();
        assert_eq!(report.count("faces_down"), 3);
        assert_eq!(report.count("check_down"), 0);
        assert_eq!(report.task_names().last(), Some(&"check_phase"));
        assert!(runner.programs().iter().all(|p| p == "cactus_fillAdjacencies"));
    }

    /// Tracks how many programs run at the same time.
    #[derive(Default)]
    struct ConcurrencyTracker {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ProgramRunner for ConcurrencyTracker {
        async fn run(&self, _invocation: &Invocation) -> Result<String, ProgramError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_cpu_budget_bounds_concurrency() {
        let children: Vec<(String, i64)> = (1..=8).map(|i| (i.to_string(), 2_000_000)).collect();
        let children: Vec<(&str, i64)> = children.iter().map(|(id, size)| (id.as_str(), *size)).collect();
        let source = MemoryFlowerSource::new().with_children("0", &children);

        let tracker = Arc::new(ConcurrencyTracker::default());
        let experiment = experiment();
        let runner = tracker.clone();
        let ctx = TestContext::new(tempfile::tempdir().unwrap(), |work_dir| PipelineContext {
            phase: PhaseContext::from_experiment(&experiment, PhaseFlags::default()),
            config: EffectiveConfig::unfiltered(config()),
            source: Arc::new(source),
            runner,
            work_dir: work_dir.to_path_buf(),
        });

        let scheduler = LocalScheduler::new(ctx.shared(), 2);
        let report = scheduler.run(Task::new(TaskKind::CheckPhase)).await.unwrap();

        // Every child is oversized, so each gets its own task
        assert_eq!(report.count("check_down"), 9);
        assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_oversized_cpu_request_is_capped() {
        let runner = Arc::new(RecordingRunner::new());
        let ctx = test_context(config(), MemoryFlowerSource::new(), runner.clone());
        let scheduler = LocalScheduler::new(ctx.shared(), 2);

        let task = Task::new(TaskKind::BaseAlign {
            iteration: 2,
            flowers: vec![FlowerId::new("5")],
            threads: 16,
        });
        let report = scheduler.run(task).await.unwrap();
        assert_eq!(report.records[0].cpu, 16);
        assert_eq!(report.records[0].flowers, 1);
        assert_eq!(runner.programs(), vec!["cactus_baseAligner".to_string()]);
    }

    #[test]
    fn test_report_json() {
        let report = RunReport::default();
        assert_eq!(report.to_json().unwrap(), "{\n  \"records\": []\n}");
        assert!(report.counts().is_empty());
    }
}
