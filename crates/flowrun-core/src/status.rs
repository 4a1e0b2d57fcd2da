//! Status of scheduled tasks.

use serde::{Deserialize, Serialize};

/// Status of a Task in the local scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Task body is executing.
    Running,
    /// Task body finished; its children and follow-on were handed on.
    Completed,
    /// Task body failed; its branch of the graph is aborted.
    Failed,
}
