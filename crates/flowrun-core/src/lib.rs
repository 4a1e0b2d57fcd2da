//! flowrun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Subprocesses or the backing store
//! - The async runtime
//! - Scheduling
//!
//! It holds the work-unit model, the batch partitioner, the workflow
//! configuration and the one-time identity-threshold derivation.

pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod ids;
pub mod iteration;
pub mod partition;
pub mod status;
pub mod topology;
pub mod unit;

// Re-export commonly used types
pub use config::{
    AlignmentConfig, BlastMisc, Experiment, NormalConfig, PreprocessorConfig, ReferenceConfig,
    RequiredSpecies, SchedulingConfig, WorkflowConfig,
};
pub use context::{PhaseContext, PhaseFlags, StartPhase};
pub use error::{ConfigError, PartitionError};
pub use identity::{inverse_jukes_cantor, EffectiveConfig, IDENTITY_PLACEHOLDER};
pub use ids::{FlowerId, TaskId};
pub use iteration::{
    BaseAlignParams, CoarseSearchParams, CoreParams, IterationDescriptor, IterationKind,
    IterationStrategy, Parameters,
};
pub use partition::{partition, PartitionBounds};
pub use status::TaskStatus;
pub use topology::SpeciesTree;
pub use unit::{Batch, WorkUnit};
