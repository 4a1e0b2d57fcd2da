//! Identity-threshold derivation for the coarse-search iterations.
//!
//! The threshold is derived from the species tree once, before alignment,
//! and substituted into every coarse-search command template. The result is
//! a separate [`EffectiveConfig`]; the loaded [`WorkflowConfig`] is left as is.

use crate::{ConfigError, IterationDescriptor, IterationKind, SpeciesTree, WorkflowConfig};

/// Placeholder replaced by the identity threshold in command templates.
pub const IDENTITY_PLACEHOLDER: &str = "IDENTITY";

/// Template keys of a coarse-search iteration that carry the placeholder.
const TEMPLATE_KEYS: [&str; 2] = ["blast_string", "self_blast_string"];

/// Expected fraction of differing sites for a substitution distance `d`
/// under the Jukes-Cantor model.
///
/// `p = 3/4 * (1 - exp(-4/3 * d))`; 0 at `d = 0`, approaching 0.75.
pub fn inverse_jukes_cantor(d: f64) -> f64 {
    0.75 * (1.0 - (-d * 4.0 / 3.0).exp())
}

/// Minimum percent identity for a tree whose longest root-to-leaf path is
/// `longest_path`.
pub fn identity_threshold(longest_path: f64, ratio: f64, minimum_distance: f64) -> Result<u32, ConfigError> {
    let adjusted = ratio * longest_path + minimum_distance;
    if !adjusted.is_finite() || adjusted < 0.0 {
        return Err(ConfigError::InvalidParameter {
            group: "alignment.blast_misc".to_string(),
            key: "identity_ratio".to_string(),
            reason: format!("adjusted distance {adjusted} must be a non-negative number"),
        });
    }
    let differing = (100.0 * inverse_jukes_cantor(adjusted)).round() as u32;
    Ok(100 - differing)
}

/// The configuration the pipeline actually runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    workflow: WorkflowConfig,
    identity_threshold: Option<u32>,
}

impl EffectiveConfig {
    /// Derive the effective configuration from the loaded one and the
    /// experiment's species tree.
    ///
    /// With identity filtering disabled the templates are copied untouched
    /// and the tree is not inspected.
    pub fn derive(config: &WorkflowConfig, species_tree: &str) -> Result<Self, ConfigError> {
        let misc = &config.alignment.blast_misc;
        if !misc.filter_by_identity {
            return Ok(Self {
                workflow: config.clone(),
                identity_threshold: None,
            });
        }

        let longest_path = SpeciesTree::parse(species_tree)?.longest_path();
        let threshold =
            identity_threshold(longest_path, misc.identity_ratio, misc.minimum_distance)?;

        let mut workflow = config.clone();
        for iteration in &mut workflow.alignment.iterations {
            substitute_identity(iteration, threshold)?;
        }

        Ok(Self {
            workflow,
            identity_threshold: Some(threshold),
        })
    }

    /// Wrap a configuration that needs no derivation.
    pub fn unfiltered(config: WorkflowConfig) -> Self {
        Self {
            workflow: config,
            identity_threshold: None,
        }
    }

    /// The effective workflow configuration.
    pub fn workflow(&self) -> &WorkflowConfig {
        &self.workflow
    }

    /// Threshold substituted into the templates, if filtering is enabled.
    pub fn identity_threshold(&self) -> Option<u32> {
        self.identity_threshold
    }

    /// Configured alignment iterations.
    pub fn iterations(&self) -> &[IterationDescriptor] {
        &self.workflow.alignment.iterations
    }
}

fn substitute_identity(iteration: &mut IterationDescriptor, threshold: u32) -> Result<(), ConfigError> {
    match iteration.kind {
        IterationKind::Base => Ok(()),
        IterationKind::Blast => {
            let group = format!("alignment iteration {}", iteration.index);
            for key in TEMPLATE_KEYS {
                let template = iteration.params.str(&group, key)?;
                if !template.contains(IDENTITY_PLACEHOLDER) {
                    return Err(ConfigError::MissingPlaceholder {
                        iteration: iteration.index,
                        key: key.to_string(),
                        placeholder: IDENTITY_PLACEHOLDER,
                    });
                }
                let substituted = template.replace(IDENTITY_PLACEHOLDER, &threshold.to_string());
                iteration.params.set_str(key, substituted);
            }
            Ok(())
        }
    }
}
