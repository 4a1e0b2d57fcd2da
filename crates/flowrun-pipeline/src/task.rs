//! Task graph model.
//!
//! A [`Task`] is created during its parent's execution, handed to the
//! scheduler exactly once and never mutated. Running its body yields a
//! [`Scheduled`] value: children that may run concurrently, and at most one
//! follow-on that starts only after every child and all of their
//! descendants have finished.

use std::path::PathBuf;

use flowrun_core::{FlowerId, TaskId};

/// Static resource request of a task class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceRequest {
    /// CPUs held while the task body runs.
    pub cpu: u32,

    /// Memory ceiling in bytes, if the task needs more than the default.
    pub memory_bytes: Option<u64>,

    /// Relative running time hint for an external scheduler.
    pub time_hint: f64,
}

impl ResourceRequest {
    /// One CPU, default memory.
    pub const fn light(time_hint: f64) -> Self {
        Self {
            cpu: 1,
            memory_bytes: None,
            time_hint,
        }
    }
}

/// Memory requested by the merge step (2^32 - 1 bytes).
pub const MERGE_MEMORY_BYTES: u64 = 4_294_967_295;

/// Every task class of the pipeline.
///
/// Phase tasks (`*Phase`) work on the root flower; down tasks carry the
/// flowers of one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    SetupPhase,
    PreprocessorPhase,
    Preprocess {
        input: PathBuf,
        output: PathBuf,
    },
    SetupLoad {
        sequences: Vec<PathBuf>,
    },
    AlignmentPhase {
        iteration: usize,
    },
    CoarseDown {
        iteration: usize,
        flowers: Vec<FlowerId>,
    },
    CoarseAlign {
        iteration: usize,
        flower: FlowerId,
    },
    SimilaritySearch {
        iteration: usize,
        flower: FlowerId,
        alignment_file: PathBuf,
    },
    MergeAlignment {
        iteration: usize,
        flower: FlowerId,
        alignment_file: PathBuf,
    },
    BaseDown {
        iteration: usize,
        flowers: Vec<FlowerId>,
    },
    BaseAlign {
        iteration: usize,
        flowers: Vec<FlowerId>,
        threads: u32,
    },
    NormalPhase {
        rounds_remaining: u32,
    },
    NormalDown {
        flowers: Vec<FlowerId>,
    },
    Normalize {
        flowers: Vec<FlowerId>,
    },
    PhylogenyPhase,
    PhylogenyDown {
        flowers: Vec<FlowerId>,
    },
    ReferencePhase,
    ReferenceDown {
        flowers: Vec<FlowerId>,
    },
    ReferenceCoordinates,
    FacesPhase,
    FacesDown {
        flowers: Vec<FlowerId>,
    },
    CheckPhase,
    CheckDown {
        flowers: Vec<FlowerId>,
    },
}

impl TaskKind {
    /// Task class name, used in logs and the run journal.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetupPhase => "setup_phase",
            Self::PreprocessorPhase => "preprocessor_phase",
            Self::Preprocess { .. } => "preprocess",
            Self::SetupLoad { .. } => "setup_load",
            Self::AlignmentPhase { .. } => "alignment_phase",
            Self::CoarseDown { .. } => "coarse_down",
            Self::CoarseAlign { .. } => "coarse_align",
            Self::SimilaritySearch { .. } => "similarity_search",
            Self::MergeAlignment { .. } => "merge_alignment",
            Self::BaseDown { .. } => "base_down",
            Self::BaseAlign { .. } => "base_align",
            Self::NormalPhase { .. } => "normal_phase",
            Self::NormalDown { .. } => "normal_down",
            Self::Normalize { .. } => "normalize",
            Self::PhylogenyPhase => "phylogeny_phase",
            Self::PhylogenyDown { .. } => "phylogeny_down",
            Self::ReferencePhase => "reference_phase",
            Self::ReferenceDown { .. } => "reference_down",
            Self::ReferenceCoordinates => "reference_coordinates",
            Self::FacesPhase => "faces_phase",
            Self::FacesDown { .. } => "faces_down",
            Self::CheckPhase => "check_phase",
            Self::CheckDown { .. } => "check_down",
        }
    }

    /// Flowers this task works on directly.
    pub fn flowers(&self) -> &[FlowerId] {
        match self {
            Self::CoarseDown { flowers, .. }
            | Self::BaseDown { flowers, .. }
            | Self::BaseAlign { flowers, .. }
            | Self::NormalDown { flowers }
            | Self::Normalize { flowers }
            | Self::PhylogenyDown { flowers }
            | Self::ReferenceDown { flowers }
            | Self::FacesDown { flowers }
            | Self::CheckDown { flowers } => flowers,
            Self::CoarseAlign { flower, .. }
            | Self::SimilaritySearch { flower, .. }
            | Self::MergeAlignment { flower, .. } => std::slice::from_ref(flower),
            _ => &[],
        }
    }

    /// Static resource request of this task class.
    pub fn resources(&self) -> ResourceRequest {
        match self {
            Self::SetupLoad { .. } | Self::BaseDown { .. } => ResourceRequest::light(1.0),
            Self::CoarseDown { .. } => ResourceRequest::light(0.2),
            Self::CoarseAlign { .. } | Self::SimilaritySearch { .. } => ResourceRequest::light(0.01),
            Self::MergeAlignment { .. } => ResourceRequest {
                cpu: 1,
                memory_bytes: Some(MERGE_MEMORY_BYTES),
                time_hint: 100.0,
            },
            Self::BaseAlign { threads, .. } => ResourceRequest {
                cpu: *threads,
                memory_bytes: None,
                time_hint: 30.0,
            },
            Self::NormalDown { .. } | Self::ReferenceDown { .. } => ResourceRequest::light(2.0),
            Self::Normalize { .. } => ResourceRequest::light(3.0),
            Self::PhylogenyDown { .. } | Self::CheckDown { .. } => ResourceRequest::light(5.0),
            Self::ReferenceCoordinates => ResourceRequest::light(100.0),
            Self::Preprocess { .. } => ResourceRequest::light(1.0),
            Self::FacesDown { .. } => ResourceRequest::light(0.0),
            Self::SetupPhase
            | Self::PreprocessorPhase
            | Self::AlignmentPhase { .. }
            | Self::NormalPhase { .. }
            | Self::PhylogenyPhase
            | Self::ReferencePhase
            | Self::FacesPhase
            | Self::CheckPhase => ResourceRequest::light(0.0002),
        }
    }
}

/// A schedulable unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// What the task does.
    pub kind: TaskKind,

    /// Resources fixed at construction.
    pub resources: ResourceRequest,
}

impl Task {
    /// Create a new Task with its class's resource request.
    pub fn new(kind: TaskKind) -> Self {
        let resources = kind.resources();
        Self {
            id: TaskId::generate(),
            kind,
            resources,
        }
    }

    /// Task class name.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// What a task body hands back to the scheduler.
#[derive(Debug, Default)]
pub struct Scheduled {
    /// Tasks that run before the follow-on, in any order.
    pub children: Vec<Task>,

    /// Task that runs after all children and their descendants.
    pub follow_on: Option<Task>,
}

impl Scheduled {
    /// Nothing further to run.
    pub fn done() -> Self {
        Self::default()
    }

    /// Builder method to add a child.
    pub fn with_child(mut self, kind: TaskKind) -> Self {
        self.children.push(Task::new(kind));
        self
    }

    /// Builder method to add already constructed children.
    pub fn with_children(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        self.children.extend(tasks);
        self
    }

    /// Builder method to set the follow-on.
    pub fn then(mut self, kind: TaskKind) -> Self {
        self.follow_on = Some(Task::new(kind));
        self
    }

    /// Class names of the children, in order.
    pub fn child_names(&self) -> Vec<&'static str> {
        self.children.iter().map(Task::name).collect()
    }

    /// Class name of the follow-on, if any.
    pub fn follow_on_name(&self) -> Option<&'static str> {
        self.follow_on.as_ref().map(Task::name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resources_fixed_at_construction() {
        let task = Task::new(TaskKind::BaseAlign {
            iteration: 2,
            flowers: vec![FlowerId::new("7")],
            threads: 8,
        });
        assert_eq!(task.resources.cpu, 8);
        assert_eq!(task.name(), "base_align");

        let merge = Task::new(TaskKind::MergeAlignment {
            iteration: 0,
            flower: FlowerId::root(),
            alignment_file: PathBuf::from("a.cigar"),
        });
        assert_eq!(merge.resources.memory_bytes, Some(MERGE_MEMORY_BYTES));
        assert_eq!(merge.kind.flowers(), &[FlowerId::root()]);
    }

    #[test]
    fn test_scheduled_builder() {
        let scheduled = Scheduled::done()
            .with_child(TaskKind::CheckDown {
                flowers: vec![FlowerId::root()],
            })
            .then(TaskKind::FacesPhase);
        assert_eq!(scheduled.child_names(), vec!["check_down"]);
        assert_eq!(scheduled.follow_on_name(), Some("faces_phase"));
        assert!(Scheduled::done().children.is_empty());
    }
}
