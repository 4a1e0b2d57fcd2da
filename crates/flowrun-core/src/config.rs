//! Workflow and experiment configuration.
//!
//! Both documents are JSON, read once at pipeline construction and never
//! re-read. The only derived rewrite (the identity threshold) produces a
//! separate [`EffectiveConfig`](crate::EffectiveConfig).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ConfigError, IterationDescriptor};

/// Program parameters for every phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Alignment phase.
    pub alignment: AlignmentConfig,

    /// Normalization phase.
    pub normal: NormalConfig,

    /// Reference phase.
    #[serde(default)]
    pub reference: ReferenceConfig,

    /// Optional input preprocessing.
    #[serde(default)]
    pub preprocessor: Option<PreprocessorConfig>,

    /// Partitioning bounds.
    #[serde(default)]
    pub scheduling: SchedulingConfig,
}

impl WorkflowConfig {
    /// Parse a workflow configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(json)?;
        for (index, iteration) in config.alignment.iterations.iter_mut().enumerate() {
            iteration.index = index;
        }
        Ok(config)
    }

    /// Read a workflow configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_json_str(&read(path)?)
    }

    /// Check every value that is only consumed later by a task, so that
    /// configuration errors surface before the pipeline starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for iteration in &self.alignment.iterations {
            iteration.strategy()?;
        }
        if self.normal.rounds == 0 {
            return Err(ConfigError::InvalidParameter {
                group: "normal".to_string(),
                key: "rounds".to_string(),
                reason: "at least one round is required".to_string(),
            });
        }
        self.scheduling.validate()
    }
}

/// Alignment phase configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// Settings shared by all coarse-search iterations.
    pub blast_misc: BlastMisc,

    /// Iterations, run in order.
    #[serde(default)]
    pub iterations: Vec<IterationDescriptor>,
}

/// Settings shared by all coarse-search iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastMisc {
    /// Substitute a derived identity threshold into the command templates.
    #[serde(default)]
    pub filter_by_identity: bool,

    #[serde(default)]
    pub identity_ratio: f64,

    #[serde(default)]
    pub minimum_distance: f64,

    pub overlap_size: u64,

    pub chunks_per_job: u64,

    #[serde(default)]
    pub compress_files: bool,

    #[serde(default)]
    pub minimum_sequence_length: u64,
}

/// Normalization phase configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalConfig {
    /// Number of full down-pass rounds.
    pub rounds: u32,

    /// Bound on the chains kept per flower.
    pub max_number_of_chains: u64,
}

/// Reference phase configuration. Unset values are left to the program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    pub matching_algorithm: Option<String>,
    pub permutations: Option<u32>,
    /// Name of the reference event.
    pub reference: Option<String>,
    pub use_simulated_annealing: Option<bool>,
    pub theta: Option<f64>,
    pub max_number_of_chains_before_switching_to_fast: Option<u64>,
}

/// External program run over every input sequence before loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessorConfig {
    /// Program name or path.
    pub program: String,

    /// Arguments placed before the input and output paths.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Partitioning bounds used by the down-passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Batch ceiling for ordinary down-passes.
    pub max_sequence_size: u64,

    /// Desired number of batches per level.
    pub max_job_number: u64,

    /// Batch ceiling for base-level aligner tasks.
    pub base_level_max_sequence_size: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            max_sequence_size: 1_000_000,
            max_job_number: 1000,
            base_level_max_sequence_size: 10_000,
        }
    }
}

impl SchedulingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("max_sequence_size", self.max_sequence_size),
            ("max_job_number", self.max_job_number),
            ("base_level_max_sequence_size", self.base_level_max_sequence_size),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidParameter {
                    group: "scheduling".to_string(),
                    key: key.to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Description of one reconstruction problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    /// Backing-store connection string.
    pub store: String,

    /// Species tree in Newick format.
    pub species_tree: String,

    /// Input sequence files.
    #[serde(default)]
    pub sequences: Vec<PathBuf>,

    /// Species that must be present in every block.
    #[serde(default)]
    pub required_species: Vec<RequiredSpecies>,

    pub single_copy_species: Option<String>,

    pub outgroup_event: Option<String>,
}

impl Experiment {
    /// Parse an experiment from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read an experiment file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_json_str(&read(path)?)
    }

    /// Render the required-species groups as the nested string the programs
    /// expect, e.g. `((2,human,chimp),(1,mouse));`.
    pub fn required_species_tree(&self) -> Option<String> {
        if self.required_species.is_empty() {
            return None;
        }
        let groups: Vec<String> = self
            .required_species
            .iter()
            .map(|group| format!("({},{})", group.coverage, group.species.join(",")))
            .collect();
        Some(format!("({});", groups.join(",")))
    }
}

/// A group of species of which at least `coverage` must be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredSpecies {
    pub coverage: u32,
    pub species: Vec<String>,
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IterationKind;

    const EXAMPLE: &str = include_str!("../../../config/workflow.example.json");

    #[test]
    fn test_example_config_loads() {
        let config = WorkflowConfig::from_json_str(EXAMPLE).unwrap();
        config.validate().unwrap();

        let kinds: Vec<_> = config.alignment.iterations.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![IterationKind::Blast, IterationKind::Blast, IterationKind::Base]
        );
        let indexes: Vec<_> = config.alignment.iterations.iter().map(|i| i.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(config.scheduling, SchedulingConfig::default());
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let mut config = WorkflowConfig::from_json_str(EXAMPLE).unwrap();
        config.normal.rounds = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { key, .. }) if key == "rounds"
        ));
    }

    #[test]
    fn test_unknown_iteration_type_fails_load() {
        let json = r#"{
            "alignment": {
                "blast_misc": { "overlap_size": 10000, "chunks_per_job": 1 },
                "iterations": [ { "type": "psl", "params": {} } ]
            },
            "normal": { "rounds": 2, "max_number_of_chains": 30 }
        }"#;
        let err = WorkflowConfig::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("Unknown iteration type 'psl'"), "{err}");
    }

    #[test]
    fn test_missing_file() {
        let err = WorkflowConfig::from_file(Path::new("/nonexistent/flowrun.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_required_species_tree() {
        let experiment = Experiment::from_json_str(
            r#"{
                "store": "<st_kv_database_conf type=\"redis\"/>",
                "species_tree": "(a:0.1,b:0.2);",
                "required_species": [
                    { "coverage": 2, "species": ["human", "chimp"] },
                    { "coverage": 1, "species": ["mouse"] }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            experiment.required_species_tree().as_deref(),
            Some("((2,human,chimp),(1,mouse));")
        );
        assert!(experiment.single_copy_species.is_none());
    }
}
