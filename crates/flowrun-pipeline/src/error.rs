//! Pipeline errors.

use std::path::PathBuf;

use flowrun_core::{ConfigError, PartitionError, TaskId};
use thiserror::Error;

/// Errors raised by external program invocations.
#[derive(Debug, Error)]
pub enum ProgramError {
    /// Program executable not found.
    #[error("Program '{0}' not found. Ensure it is on PATH or pass --bin-dir.")]
    NotFound(String),

    /// Failed to spawn the program.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Program exited with a non-zero status.
    #[error("'{program}' exited with code {code}: {stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },

    /// Program output could not be interpreted.
    #[error("Malformed output from '{program}': {reason}")]
    InvalidOutput { program: String, reason: String },
}

/// Errors that abort a task and, through it, the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Program(#[from] ProgramError),

    /// Scratch or staging directory error.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A task body failed. Wraps the first error of the run.
    #[error("Task {task} ({task_id}) failed: {source}")]
    TaskFailed {
        task: &'static str,
        task_id: TaskId,
        #[source]
        source: Box<PipelineError>,
    },

    /// The scheduler's CPU semaphore was closed.
    #[error("Scheduler closed")]
    SchedulerClosed,
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
