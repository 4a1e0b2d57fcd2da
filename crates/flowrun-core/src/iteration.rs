//! Alignment iteration descriptors.
//!
//! Each iteration carries a closed type tag and a bag of named parameters that
//! are only consumed by the external programs. Typed views over the bag are
//! built once, when the configuration is validated.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ConfigError;

/// Strategy tag of an alignment iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum IterationKind {
    /// Coarse similarity search followed by a merge into the structure.
    Blast,
    /// Fine base-level alignment.
    Base,
}

impl TryFrom<String> for IterationKind {
    type Error = ConfigError;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        match tag.as_str() {
            "blast" => Ok(Self::Blast),
            "base" => Ok(Self::Base),
            _ => Err(ConfigError::UnknownIterationType(tag)),
        }
    }
}

impl fmt::Display for IterationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blast => write!(f, "blast"),
            Self::Base => write!(f, "base"),
        }
    }
}

/// Named parameters of an iteration.
///
/// Values may be given as JSON numbers/booleans or as strings holding them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, Value>);

impl Parameters {
    /// Builder method to set a parameter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get a raw parameter value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Replace a string parameter.
    pub fn set_str(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), Value::String(value));
    }

    /// Get a required string parameter.
    pub fn str(&self, group: &str, key: &str) -> Result<&str, ConfigError> {
        self.opt_str(group, key)?
            .ok_or_else(|| missing(group, key))
    }

    /// Get an optional string parameter.
    pub fn opt_str(&self, group: &str, key: &str) -> Result<Option<&str>, ConfigError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(invalid(group, key, format!("expected a string, got {other}"))),
        }
    }

    /// Get a required floating point parameter.
    pub fn f64(&self, group: &str, key: &str) -> Result<f64, ConfigError> {
        self.opt_f64(group, key)?.ok_or_else(|| missing(group, key))
    }

    /// Get an optional floating point parameter.
    pub fn opt_f64(&self, group: &str, key: &str) -> Result<Option<f64>, ConfigError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| invalid(group, key, format!("{n} is not representable"))),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| invalid(group, key, format!("'{s}' is not a number"))),
            Some(other) => Err(invalid(group, key, format!("expected a number, got {other}"))),
        }
    }

    /// Get a required integer parameter.
    pub fn i64(&self, group: &str, key: &str) -> Result<i64, ConfigError> {
        self.opt_i64(group, key)?.ok_or_else(|| missing(group, key))
    }

    /// Get an optional integer parameter.
    pub fn opt_i64(&self, group: &str, key: &str) -> Result<Option<i64>, ConfigError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| invalid(group, key, format!("{n} is not an integer"))),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| invalid(group, key, format!("'{s}' is not an integer"))),
            Some(other) => Err(invalid(group, key, format!("expected an integer, got {other}"))),
        }
    }

    /// Get a required boolean parameter. Accepts `true`/`false` and `0`/`1`.
    pub fn bool(&self, group: &str, key: &str) -> Result<bool, ConfigError> {
        self.opt_bool(group, key)?.ok_or_else(|| missing(group, key))
    }

    /// Get an optional boolean parameter.
    pub fn opt_bool(&self, group: &str, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(0) => Ok(Some(false)),
                Some(1) => Ok(Some(true)),
                _ => Err(invalid(group, key, format!("{n} is not 0 or 1"))),
            },
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "0" | "false" => Ok(Some(false)),
                "1" | "true" => Ok(Some(true)),
                _ => Err(invalid(group, key, format!("'{s}' is not a boolean"))),
            },
            Some(other) => Err(invalid(group, key, format!("expected a boolean, got {other}"))),
        }
    }

    /// Get a required list of integers, given either as a JSON array or as a
    /// whitespace separated string (`"2 3 4 8"`).
    pub fn i64_list(&self, group: &str, key: &str) -> Result<Vec<i64>, ConfigError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Err(missing(group, key)),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_i64()
                        .ok_or_else(|| invalid(group, key, format!("{item} is not an integer")))
                })
                .collect(),
            Some(Value::String(s)) => s
                .split_whitespace()
                .map(|part| {
                    part.parse()
                        .map_err(|_| invalid(group, key, format!("'{part}' is not an integer")))
                })
                .collect(),
            Some(other) => Err(invalid(group, key, format!("expected a list, got {other}"))),
        }
    }
}

fn missing(group: &str, key: &str) -> ConfigError {
    ConfigError::MissingParameter {
        group: group.to_string(),
        key: key.to_string(),
    }
}

fn invalid(group: &str, key: &str, reason: String) -> ConfigError {
    ConfigError::InvalidParameter {
        group: group.to_string(),
        key: key.to_string(),
        reason,
    }
}

/// One configured step of the alignment phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationDescriptor {
    /// Position in the configured list; assigned when the config is loaded.
    #[serde(skip)]
    pub index: usize,

    /// Strategy tag.
    #[serde(rename = "type")]
    pub kind: IterationKind,

    /// Parameters consumed by the external programs.
    #[serde(default)]
    pub params: Parameters,
}

impl IterationDescriptor {
    /// Create a new descriptor.
    pub fn new(index: usize, kind: IterationKind, params: Parameters) -> Self {
        Self {
            index,
            kind,
            params,
        }
    }

    fn group(&self) -> String {
        format!("alignment iteration {} ({})", self.index, self.kind)
    }

    /// Build the typed view matching this iteration's tag.
    pub fn strategy(&self) -> Result<IterationStrategy, ConfigError> {
        match self.kind {
            IterationKind::Blast => Ok(IterationStrategy::CoarseSearch(
                CoarseSearchParams::from_descriptor(self)?,
            )),
            IterationKind::Base => Ok(IterationStrategy::BaseLevel(
                BaseAlignParams::from_descriptor(self)?,
            )),
        }
    }
}

/// Typed parameters of an iteration, one variant per strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationStrategy {
    CoarseSearch(CoarseSearchParams),
    BaseLevel(BaseAlignParams),
}

/// Parameters of a coarse similarity-search iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct CoarseSearchParams {
    /// Flowers smaller than this are neither recursed into nor searched.
    pub min_sequence_size: i64,

    /// Flowers larger than this are not searched at this iteration.
    pub max_sequence_size: Option<i64>,

    /// Sequence chunk size handed to the search.
    pub chunk_size: u64,

    /// Pairwise comparison command template.
    pub blast_string: String,

    /// Self comparison command template.
    pub self_blast_string: String,

    /// Parameters of the merge step.
    pub core: CoreParams,
}

impl CoarseSearchParams {
    fn from_descriptor(descriptor: &IterationDescriptor) -> Result<Self, ConfigError> {
        let group = descriptor.group();
        let p = &descriptor.params;

        // A negative ceiling means unbounded.
        let max_sequence_size = p.opt_i64(&group, "max_sequence_size")?.filter(|max| *max >= 0);
        let chunk_size = p.i64(&group, "chunk_size")?;
        if chunk_size <= 0 {
            return Err(invalid(&group, "chunk_size", "must be positive".to_string()));
        }

        Ok(Self {
            min_sequence_size: p.i64(&group, "min_sequence_size")?,
            max_sequence_size,
            chunk_size: chunk_size as u64,
            blast_string: p.str(&group, "blast_string")?.to_string(),
            self_blast_string: p.str(&group, "self_blast_string")?.to_string(),
            core: CoreParams::from_params(&group, p)?,
        })
    }
}

/// Parameters of the merge (annealing) step of a coarse-search iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreParams {
    pub annealing_rounds: Vec<i64>,
    pub deannealing_rounds: Vec<i64>,
    pub align_repeats_at_round: f64,
    pub trim: Vec<i64>,
    pub minimum_tree_coverage: f64,
    pub block_trim: f64,
    pub minimum_block_degree: i64,
}

impl CoreParams {
    fn from_params(group: &str, p: &Parameters) -> Result<Self, ConfigError> {
        Ok(Self {
            annealing_rounds: p.i64_list(group, "annealing_rounds")?,
            deannealing_rounds: p.i64_list(group, "deannealing_rounds")?,
            align_repeats_at_round: p.f64(group, "align_repeats_at_round")?,
            trim: p.i64_list(group, "trim")?,
            minimum_tree_coverage: p.f64(group, "minimum_tree_coverage")?,
            block_trim: p.f64(group, "block_trim")?,
            minimum_block_degree: p.i64(group, "minimum_block_degree")?,
        })
    }
}

/// Parameters of a base-level alignment iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseAlignParams {
    pub banding_limit: f64,
    pub spanning_trees: f64,
    pub gap_gamma: f64,
    pub use_banding: bool,
    pub max_banding_size: i64,
    pub min_banding_size: i64,
    pub min_banding_constraint_distance: i64,
    pub min_trace_back_diag: i64,
    pub min_trace_gap_diags: i64,
    pub constraint_diagonal_trim: i64,
    pub minimum_block_degree: i64,
    pub align_ambiguity_characters: bool,
    pub prune_out_stub_alignments: bool,

    /// Threads requested by each aligner task.
    pub num_threads: u32,
}

impl BaseAlignParams {
    fn from_descriptor(descriptor: &IterationDescriptor) -> Result<Self, ConfigError> {
        let group = descriptor.group();
        let p = &descriptor.params;

        let num_threads = p.opt_i64(&group, "num_threads")?.unwrap_or(1);
        let num_threads = u32::try_from(num_threads)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| invalid(&group, "num_threads", format!("{num_threads} is not a thread count")))?;

        Ok(Self {
            banding_limit: p.f64(&group, "banding_limit")?,
            spanning_trees: p.f64(&group, "spanning_trees")?,
            gap_gamma: p.f64(&group, "gap_gamma")?,
            use_banding: p.bool(&group, "use_banding")?,
            max_banding_size: p.i64(&group, "max_banding_size")?,
            min_banding_size: p.i64(&group, "min_banding_size")?,
            min_banding_constraint_distance: p.i64(&group, "min_banding_constraint_distance")?,
            min_trace_back_diag: p.i64(&group, "min_trace_back_diag")?,
            min_trace_gap_diags: p.i64(&group, "min_trace_gap_diags")?,
            constraint_diagonal_trim: p.i64(&group, "constraint_diagonal_trim")?,
            minimum_block_degree: p.i64(&group, "minimum_block_degree")?,
            align_ambiguity_characters: p.bool(&group, "align_ambiguity_characters")?,
            prune_out_stub_alignments: p
                .opt_bool(&group, "prune_out_stub_alignments")?
                .unwrap_or(false),
            num_threads,
        })
    }
}
