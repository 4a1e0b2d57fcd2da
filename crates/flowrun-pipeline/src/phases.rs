//! The phase chain.
//!
//! Setup → Preprocessor → Setup-Load, then Alignment (one task per
//! iteration), Normalization (one task per round), Phylogeny, Reference,
//! Faces and Check. Every phase task schedules its work as a child and the
//! next phase as its follow-on, or only the follow-on when its work is
//! disabled. The chain is therefore linear even though each phase fans out.

use std::path::PathBuf;

use flowrun_core::{ConfigError, FlowerId};
use tracing::{info, warn};

use crate::alignment;
use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::programs::Invocation;
use crate::task::{Scheduled, Task, TaskKind};
use crate::walker::descend;

/// Run one task body and return what it schedules next.
///
/// The task's scratch directory is removed afterwards.
pub async fn run_task(ctx: &PipelineContext, task: &Task) -> Result<Scheduled, PipelineError> {
    let result = dispatch(ctx, task).await;
    let cleanup = ctx.release_scratch(&task.id).await;
    let scheduled = result?;
    cleanup?;
    Ok(scheduled)
}

async fn dispatch(ctx: &PipelineContext, task: &Task) -> Result<Scheduled, PipelineError> {
    match &task.kind {
        TaskKind::SetupPhase => Ok(setup_phase(ctx)),
        TaskKind::PreprocessorPhase => Ok(preprocessor_phase(ctx)),
        TaskKind::Preprocess { input, output } => preprocess(ctx, input, output).await,
        TaskKind::SetupLoad { sequences } => {
            info!(sequences = sequences.len(), "Starting setup load");
            ctx.run_program(Invocation::setup(
                ctx.store(),
                sequences,
                &ctx.phase.species_tree,
            ))
            .await?;
            Ok(Scheduled::done())
        }

        TaskKind::AlignmentPhase { iteration } => alignment::select_iteration(ctx, *iteration),
        TaskKind::CoarseDown { iteration, flowers } => {
            alignment::coarse_down(ctx, task, *iteration, flowers).await
        }
        TaskKind::CoarseAlign { iteration, flower } => {
            alignment::coarse_align(ctx, task, *iteration, flower).await
        }
        TaskKind::SimilaritySearch {
            iteration,
            flower,
            alignment_file,
        } => alignment::similarity_search(ctx, *iteration, flower, alignment_file).await,
        TaskKind::MergeAlignment {
            iteration,
            flower,
            alignment_file,
        } => alignment::merge_alignment(ctx, *iteration, flower, alignment_file).await,
        TaskKind::BaseDown { iteration, flowers } => {
            alignment::base_down(ctx, task, *iteration, flowers).await
        }
        TaskKind::BaseAlign {
            iteration, flowers, ..
        } => alignment::base_align(ctx, *iteration, flowers).await,

        TaskKind::NormalPhase { rounds_remaining } => normal_phase(*rounds_remaining),
        TaskKind::NormalDown { flowers } => {
            let children = descend_same(ctx, task, flowers, |flowers| TaskKind::NormalDown {
                flowers,
            })
            .await?;
            Ok(Scheduled::done()
                .with_children(children)
                .then(TaskKind::Normalize {
                    flowers: flowers.clone(),
                }))
        }
        TaskKind::Normalize { flowers } => {
            ctx.run_program(Invocation::normalisation(
                ctx.store(),
                flowers,
                ctx.workflow().normal.max_number_of_chains,
            ))
            .await?;
            Ok(Scheduled::done())
        }

        TaskKind::PhylogenyPhase => {
            info!(enabled = ctx.phase.flags.build_trees, "Starting the phylogeny phase");
            Ok(optional_root_pass(
                ctx.phase.flags.build_trees,
                |flowers| TaskKind::PhylogenyDown { flowers },
            )
            .then(TaskKind::ReferencePhase))
        }
        TaskKind::PhylogenyDown { flowers } => {
            ctx.run_program(Invocation::phylogeny(ctx.store(), flowers)).await?;
            let children = descend_same(ctx, task, flowers, |flowers| TaskKind::PhylogenyDown {
                flowers,
            })
            .await?;
            Ok(Scheduled::done().with_children(children))
        }

        TaskKind::ReferencePhase => Ok(reference_phase(ctx)),
        TaskKind::ReferenceDown { flowers } => {
            ctx.run_program(Invocation::reference(
                ctx.store(),
                flowers,
                &ctx.workflow().reference,
            ))
            .await?;
            let children = descend_same(ctx, task, flowers, |flowers| TaskKind::ReferenceDown {
                flowers,
            })
            .await?;
            Ok(Scheduled::done().with_children(children))
        }
        TaskKind::ReferenceCoordinates => {
            ctx.run_program(Invocation::add_reference_coordinates(
                ctx.store(),
                ctx.workflow().reference.reference.as_deref(),
                ctx.phase.outgroup_event.as_deref(),
            ))
            .await?;
            Ok(Scheduled::done().then(TaskKind::FacesPhase))
        }

        TaskKind::FacesPhase => {
            info!(enabled = ctx.phase.flags.build_faces, "Starting the faces phase");
            Ok(optional_root_pass(ctx.phase.flags.build_faces, |flowers| {
                TaskKind::FacesDown { flowers }
            })
            .then(TaskKind::CheckPhase))
        }
        TaskKind::FacesDown { flowers } => {
            ctx.run_program(Invocation::adjacencies(ctx.store(), flowers)).await?;
            let children = descend_same(ctx, task, flowers, |flowers| TaskKind::FacesDown {
                flowers,
            })
            .await?;
            Ok(Scheduled::done().with_children(children))
        }

        TaskKind::CheckPhase => {
            info!(enabled = !ctx.phase.flags.skip_check, "Starting the check phase");
            Ok(optional_root_pass(!ctx.phase.flags.skip_check, |flowers| {
                TaskKind::CheckDown { flowers }
            }))
        }
        TaskKind::CheckDown { flowers } => {
            ctx.run_program(Invocation::check(ctx.store(), flowers)).await?;
            let children = descend_same(ctx, task, flowers, |flowers| TaskKind::CheckDown {
                flowers,
            })
            .await?;
            Ok(Scheduled::done().with_children(children))
        }
    }
}

fn setup_phase(ctx: &PipelineContext) -> Scheduled {
    match ctx.config.identity_threshold() {
        Some(threshold) => info!(
            identity = threshold,
            "The similarity search will filter by identity"
        ),
        None => info!("Identity filtering disabled"),
    }
    Scheduled::done()
        .with_child(TaskKind::PreprocessorPhase)
        .then(TaskKind::AlignmentPhase { iteration: 0 })
}

fn preprocessor_phase(ctx: &PipelineContext) -> Scheduled {
    let sequences = &ctx.phase.sequences;
    if ctx.workflow().preprocessor.is_none() {
        return Scheduled::done().then(TaskKind::SetupLoad {
            sequences: sequences.clone(),
        });
    }

    let staging = ctx.staging_dir();
    let mut staged = Vec::with_capacity(sequences.len());
    let mut scheduled = Scheduled::done();
    for (index, input) in sequences.iter().enumerate() {
        let output = staged_path(&staging, index, input);
        scheduled = scheduled.with_child(TaskKind::Preprocess {
            input: input.clone(),
            output: output.clone(),
        });
        staged.push(output);
    }
    info!(sequences = staged.len(), "Adding preprocessor tasks");
    scheduled.then(TaskKind::SetupLoad { sequences: staged })
}

/// Staged copy of an input. The index keeps equal file names apart.
fn staged_path(staging: &std::path::Path, index: usize, input: &std::path::Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sequence".to_string());
    staging.join(format!("{index}_{name}"))
}

async fn preprocess(
    ctx: &PipelineContext,
    input: &std::path::Path,
    output: &std::path::Path,
) -> Result<Scheduled, PipelineError> {
    let Some(config) = &ctx.workflow().preprocessor else {
        warn!(input = %input.display(), "Preprocess task without a configured preprocessor");
        return Ok(Scheduled::done());
    };
    if let Some(dir) = output.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PipelineError::io(dir, e))?;
    }
    ctx.run_program(Invocation::preprocess(config, input, output))
        .await?;
    Ok(Scheduled::done())
}

fn normal_phase(rounds_remaining: u32) -> Result<Scheduled, PipelineError> {
    if rounds_remaining == 0 {
        return Err(ConfigError::InvalidParameter {
            group: "normal".to_string(),
            key: "rounds".to_string(),
            reason: "at least one round is required".to_string(),
        }
        .into());
    }
    info!(rounds_remaining, "Starting a normalization round");

    let scheduled = Scheduled::done().with_child(TaskKind::NormalDown {
        flowers: vec![FlowerId::root()],
    });
    Ok(if rounds_remaining > 1 {
        scheduled.then(TaskKind::NormalPhase {
            rounds_remaining: rounds_remaining - 1,
        })
    } else {
        scheduled.then(TaskKind::PhylogenyPhase)
    })
}

fn reference_phase(ctx: &PipelineContext) -> Scheduled {
    info!(
        enabled = ctx.phase.flags.build_reference,
        "Starting the reference phase"
    );
    if ctx.phase.flags.build_reference {
        Scheduled::done()
            .with_child(TaskKind::ReferenceDown {
                flowers: vec![FlowerId::root()],
            })
            .then(TaskKind::ReferenceCoordinates)
    } else {
        Scheduled::done().then(TaskKind::FacesPhase)
    }
}

/// A down-pass over the root flower when `enabled`, nothing otherwise.
fn optional_root_pass(enabled: bool, make_task: impl Fn(Vec<FlowerId>) -> TaskKind) -> Scheduled {
    if enabled {
        Scheduled::done().with_child(make_task(vec![FlowerId::root()]))
    } else {
        Scheduled::done()
    }
}

/// One level of an ordinary down-pass below `flowers`.
async fn descend_same<F>(
    ctx: &PipelineContext,
    task: &Task,
    flowers: &[FlowerId],
    make_task: F,
) -> Result<Vec<Task>, PipelineError>
where
    F: Fn(Vec<FlowerId>) -> TaskKind,
{
    descend(
        ctx.source.as_ref(),
        flowers,
        &ctx.scratch_dir(&task.id),
        &ctx.down_pass_bounds(),
        make_task,
    )
    .await
}
