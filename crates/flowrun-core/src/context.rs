//! Run-wide state threaded through every phase.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Experiment;

/// Per-run switches for the optional phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFlags {
    pub build_trees: bool,
    pub build_reference: bool,
    pub build_faces: bool,
    pub skip_check: bool,
}

/// Phase the job graph starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartPhase {
    /// Full pipeline: setup, alignment and everything after.
    Setup,
    /// Start at tree building on an existing structure.
    Phylogeny,
    /// Start at reference building.
    Reference,
    /// Start at adjacency face building.
    Faces,
}

impl StartPhase {
    /// Pick the start phase from the command line switches, in priority
    /// order. Returns `None` when there is nothing to do.
    pub fn select(setup_and_build_alignments: bool, flags: &PhaseFlags) -> Option<Self> {
        if setup_and_build_alignments {
            Some(Self::Setup)
        } else if flags.build_trees {
            Some(Self::Phylogeny)
        } else if flags.build_reference {
            Some(Self::Reference)
        } else if flags.build_faces {
            Some(Self::Faces)
        } else {
            None
        }
    }
}

/// Immutable state shared by every phase of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseContext {
    /// Backing-store connection string.
    pub store: String,

    /// Species tree in Newick format.
    pub species_tree: String,

    /// Input sequence files.
    pub sequences: Vec<PathBuf>,

    /// Optional phase switches.
    pub flags: PhaseFlags,

    /// Rendered required-species groups.
    pub required_species: Option<String>,

    pub single_copy_species: Option<String>,

    pub outgroup_event: Option<String>,
}

impl PhaseContext {
    /// Build the context for an experiment.
    pub fn from_experiment(experiment: &Experiment, flags: PhaseFlags) -> Self {
        Self {
            store: experiment.store.clone(),
            species_tree: experiment.species_tree.clone(),
            sequences: experiment.sequences.clone(),
            flags,
            required_species: experiment.required_species_tree(),
            single_copy_species: experiment.single_copy_species.clone(),
            outgroup_event: experiment.outgroup_event.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_phase_priority() {
        let all = PhaseFlags {
            build_trees: true,
            build_reference: true,
            build_faces: true,
            skip_check: false,
        };
        assert_eq!(StartPhase::select(true, &all), Some(StartPhase::Setup));
        assert_eq!(StartPhase::select(false, &all), Some(StartPhase::Phylogeny));

        let reference_only = PhaseFlags {
            build_reference: true,
            build_faces: true,
            ..PhaseFlags::default()
        };
        assert_eq!(StartPhase::select(false, &reference_only), Some(StartPhase::Reference));

        let faces_only = PhaseFlags {
            build_faces: true,
            ..PhaseFlags::default()
        };
        assert_eq!(StartPhase::select(false, &faces_only), Some(StartPhase::Faces));
        assert_eq!(StartPhase::select(false, &PhaseFlags::default()), None);
    }
}
