//! Core domain errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::FlowerId;

/// Configuration errors. Always fatal and surfaced before any task runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required parameter is absent.
    #[error("Missing parameter '{key}' in {group}")]
    MissingParameter { group: String, key: String },

    /// A parameter is present but has the wrong type or an out-of-range value.
    #[error("Invalid value for parameter '{key}' in {group}: {reason}")]
    InvalidParameter {
        group: String,
        key: String,
        reason: String,
    },

    /// Iteration type tag is neither coarse-search nor base-level.
    #[error("Unknown iteration type '{0}' (expected 'blast' or 'base')")]
    UnknownIterationType(String),

    /// A command template lacks the identity placeholder it must carry.
    #[error("Iteration {iteration}: '{key}' does not contain the {placeholder} placeholder")]
    MissingPlaceholder {
        iteration: usize,
        key: String,
        placeholder: &'static str,
    },

    /// The species tree could not be parsed.
    #[error("Invalid species tree at offset {offset}: {reason}")]
    InvalidTopology { offset: usize, reason: String },

    /// Configuration file could not be read.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid JSON for the expected schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Partitioning errors.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// A unit survived the size filter with a zero or negative size.
    #[error("Work unit {id} has non-positive size {size}")]
    NonPositiveSize { id: FlowerId, size: i64 },

    /// Batch bounds must both be positive.
    #[error("Invalid partition bounds: max aggregate size {max_aggregate_size}, max batch count {max_batch_count}")]
    InvalidBounds {
        max_aggregate_size: u64,
        max_batch_count: u64,
    },
}
