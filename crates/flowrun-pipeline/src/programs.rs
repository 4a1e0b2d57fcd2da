//! Command lines of the external programs.
//!
//! Each constructor maps one external operation onto a program name and its
//! arguments. Running them is the [`ProgramRunner`](crate::ProgramRunner)'s job.

use std::fmt;
use std::path::Path;

use flowrun_core::{
    BaseAlignParams, BlastMisc, CoarseSearchParams, CoreParams, FlowerId, PreprocessorConfig,
    ReferenceConfig,
};

use crate::source::ExtendBounds;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name, resolved by the runner.
    pub program: String,

    /// Arguments, in order.
    pub args: Vec<String>,
}

impl Invocation {
    /// Create an invocation with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append a bare argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append `--name value`.
    pub fn opt(self, name: &str, value: impl ToString) -> Self {
        self.arg(format!("--{name}")).arg(value.to_string())
    }

    /// Append `--name value` when the value is present.
    pub fn opt_if<T: ToString>(self, name: &str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.opt(name, value),
            None => self,
        }
    }

    /// Append `--name` when `enabled`.
    pub fn flag(self, name: &str, enabled: bool) -> Self {
        if enabled {
            self.arg(format!("--{name}"))
        } else {
            self
        }
    }

    /// Append the flower names as trailing arguments.
    pub fn flowers(mut self, flowers: &[FlowerId]) -> Self {
        self.args.extend(flowers.iter().map(|f| f.as_str().to_string()));
        self
    }

    /// Value following `--name`, if present.
    pub fn value_of(&self, name: &str) -> Option<&str> {
        let key = format!("--{name}");
        self.args
            .iter()
            .position(|arg| *arg == key)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// List the children of `parents` as `<id> <size> <ends>` lines.
    pub fn get_flowers(store: &str, parents: &[FlowerId], scratch: &Path) -> Self {
        Self::new("cactus_workflow_getFlowers")
            .opt("cactusDisk", store)
            .opt("tempDir", scratch.display())
            .flowers(parents)
    }

    /// List the units to align below `parents`, bounded by size.
    pub fn extend_flowers(
        store: &str,
        parents: &[FlowerId],
        scratch: &Path,
        bounds: &ExtendBounds,
    ) -> Self {
        Self::new("cactus_workflow_extendFlowers")
            .opt("cactusDisk", store)
            .opt("tempDir", scratch.display())
            .opt("minSizeToExtend", bounds.min_size)
            .opt_if("maxSizeToExtend", bounds.max_size)
            .flowers(parents)
    }

    /// Load the sequences and species tree, creating the root flower.
    pub fn setup(store: &str, sequences: &[impl AsRef<Path>], species_tree: &str) -> Self {
        let mut invocation = Self::new("cactus_setup")
            .opt("cactusDisk", store)
            .opt("speciesTree", species_tree);
        for sequence in sequences {
            invocation = invocation.arg(sequence.as_ref().display().to_string());
        }
        invocation
    }

    /// Preprocess one input sequence into `output`.
    pub fn preprocess(config: &PreprocessorConfig, input: &Path, output: &Path) -> Self {
        let mut invocation = Self::new(config.program.clone());
        invocation.args.extend(config.args.iter().cloned());
        invocation
            .arg(input.display().to_string())
            .arg(output.display().to_string())
    }

    /// Run the similarity search for one flower, writing `alignment_file`.
    pub fn similarity_search(
        store: &str,
        flower: &FlowerId,
        alignment_file: &Path,
        search: &CoarseSearchParams,
        misc: &BlastMisc,
    ) -> Self {
        Self::new("cactus_blast")
            .opt("cactusDisk", store)
            .opt("flowerName", flower)
            .opt("alignments", alignment_file.display())
            .opt("blastString", &search.blast_string)
            .opt("selfBlastString", &search.self_blast_string)
            .opt("chunkSize", search.chunk_size)
            .opt("overlapSize", misc.overlap_size)
            .opt("chunksPerJob", misc.chunks_per_job)
            .opt("minimumSequenceLength", misc.minimum_sequence_length)
            .flag("compressFiles", misc.compress_files)
    }

    /// Merge an alignment file into the structure.
    pub fn core(
        store: &str,
        flower: &FlowerId,
        alignment_file: &Path,
        core: &CoreParams,
        required_species: Option<&str>,
        single_copy_species: Option<&str>,
    ) -> Self {
        Self::new("cactus_core")
            .opt("cactusDisk", store)
            .opt("flowerName", flower)
            .opt("alignments", alignment_file.display())
            .opt("annealingRounds", join(&core.annealing_rounds))
            .opt("deannealingRounds", join(&core.deannealing_rounds))
            .opt("alignRepeatsAtRound", core.align_repeats_at_round)
            .opt("trim", join(&core.trim))
            .opt("minimumTreeCoverage", core.minimum_tree_coverage)
            .opt("blockTrim", core.block_trim)
            .opt("minimumDegree", core.minimum_block_degree)
            .opt_if("requiredSpecies", required_species)
            .opt_if("singleCopySpecies", single_copy_species)
    }

    /// Base-level alignment of a batch of flowers.
    pub fn base_aligner(
        store: &str,
        flowers: &[FlowerId],
        params: &BaseAlignParams,
        required_species: Option<&str>,
    ) -> Self {
        Self::new("cactus_baseAligner")
            .opt("cactusDisk", store)
            .opt("maximumLength", params.banding_limit)
            .opt("spanningTrees", params.spanning_trees)
            .opt("gapGamma", params.gap_gamma)
            .flag("useBanding", params.use_banding)
            .opt("maxBandingSize", params.max_banding_size)
            .opt("minBandingSize", params.min_banding_size)
            .opt("minBandingConstraintDistance", params.min_banding_constraint_distance)
            .opt("minTraceBackDiag", params.min_trace_back_diag)
            .opt("minTraceGapDiags", params.min_trace_gap_diags)
            .opt("constraintDiagonalTrim", params.constraint_diagonal_trim)
            .opt("minimumDegree", params.minimum_block_degree)
            .flag("alignAmbiguityCharacters", params.align_ambiguity_characters)
            .flag("pruneOutStubAlignments", params.prune_out_stub_alignments)
            .opt("numThreads", params.num_threads)
            .opt_if("requiredSpecies", required_species)
            .flowers(flowers)
    }

    /// Normalize a batch of flowers.
    pub fn normalisation(store: &str, flowers: &[FlowerId], max_number_of_chains: u64) -> Self {
        Self::new("cactus_normalisation")
            .opt("cactusDisk", store)
            .opt("maxNumberOfChains", max_number_of_chains)
            .flowers(flowers)
    }

    /// Build trees for a batch of flowers.
    pub fn phylogeny(store: &str, flowers: &[FlowerId]) -> Self {
        Self::new("cactus_phylogeny")
            .opt("cactusDisk", store)
            .flowers(flowers)
    }

    /// Build the reference ordering for a batch of flowers.
    pub fn reference(store: &str, flowers: &[FlowerId], config: &ReferenceConfig) -> Self {
        Self::new("cactus_reference")
            .opt("cactusDisk", store)
            .opt_if("matchingAlgorithm", config.matching_algorithm.as_deref())
            .opt_if("permutations", config.permutations)
            .opt_if("referenceEventString", config.reference.as_deref())
            .opt_if(
                "useSimulatedAnnealing",
                config.use_simulated_annealing.map(u8::from),
            )
            .opt_if("theta", config.theta)
            .opt_if(
                "maxNumberOfChainsBeforeSwitchingToFast",
                config.max_number_of_chains_before_switching_to_fast,
            )
            .flowers(flowers)
    }

    /// Fill in reference coordinates over the whole structure.
    pub fn add_reference_coordinates(
        store: &str,
        reference_event: Option<&str>,
        outgroup_event: Option<&str>,
    ) -> Self {
        Self::new("cactus_addReferenceCoordinates")
            .opt("cactusDisk", store)
            .opt_if("referenceEventString", reference_event)
            .opt_if("outgroupEventString", outgroup_event)
    }

    /// Build adjacency faces for a batch of flowers.
    pub fn adjacencies(store: &str, flowers: &[FlowerId]) -> Self {
        Self::new("cactus_fillAdjacencies")
            .opt("cactusDisk", store)
            .flowers(flowers)
    }

    /// Verify the structure of a batch of flowers.
    pub fn check(store: &str, flowers: &[FlowerId]) -> Self {
        Self::new("cactus_check")
            .opt("cactusDisk", store)
            .flowers(flowers)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

fn join(values: &[i64]) -> String {
    values
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
