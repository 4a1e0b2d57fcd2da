//! Alignment phase: the iteration selector and the two alignment strategies.
//!
//! The phase task for iteration `i` schedules that iteration's down-pass as
//! its child and the phase task for `i + 1` as its follow-on, so iterations
//! run strictly one after another. Past the last iteration the chain moves
//! on to normalization.

use flowrun_core::{
    BaseAlignParams, CoarseSearchParams, ConfigError, FlowerId, IterationKind, IterationStrategy,
};
use tracing::info;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::programs::Invocation;
use crate::source::ExtendBounds;
use crate::task::{Scheduled, Task, TaskKind};
use crate::walker::{batch_tasks, descend};

/// State of the iteration selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    /// Iteration `i` is next.
    AwaitingIteration(usize),
    /// Every configured iteration has run.
    Done,
}

impl SelectorState {
    /// State reached at position `iteration` of a list of `configured` iterations.
    pub fn at(iteration: usize, configured: usize) -> Self {
        if iteration < configured {
            Self::AwaitingIteration(iteration)
        } else {
            Self::Done
        }
    }
}

/// Body of the alignment phase task for `iteration`.
pub(crate) fn select_iteration(
    ctx: &PipelineContext,
    iteration: usize,
) -> Result<Scheduled, PipelineError> {
    info!(iteration, "Starting the alignment phase");

    match SelectorState::at(iteration, ctx.config.iterations().len()) {
        SelectorState::Done => Ok(Scheduled::done().then(TaskKind::NormalPhase {
            rounds_remaining: ctx.workflow().normal.rounds,
        })),
        SelectorState::AwaitingIteration(i) => {
            let flowers = vec![FlowerId::root()];
            let down = match ctx.iteration(i)?.kind {
                IterationKind::Blast => TaskKind::CoarseDown {
                    iteration: i,
                    flowers,
                },
                IterationKind::Base => TaskKind::BaseDown {
                    iteration: i,
                    flowers,
                },
            };
            Ok(Scheduled::done()
                .with_child(down)
                .then(TaskKind::AlignmentPhase { iteration: i + 1 }))
        }
    }
}

fn coarse_params(ctx: &PipelineContext, iteration: usize) -> Result<CoarseSearchParams, PipelineError> {
    match ctx.iteration(iteration)?.strategy()? {
        IterationStrategy::CoarseSearch(params) => Ok(params),
        IterationStrategy::BaseLevel(_) => Err(strategy_mismatch(iteration, IterationKind::Blast)),
    }
}

fn base_params(ctx: &PipelineContext, iteration: usize) -> Result<BaseAlignParams, PipelineError> {
    match ctx.iteration(iteration)?.strategy()? {
        IterationStrategy::BaseLevel(params) => Ok(params),
        IterationStrategy::CoarseSearch(_) => Err(strategy_mismatch(iteration, IterationKind::Base)),
    }
}

fn strategy_mismatch(iteration: usize, expected: IterationKind) -> PipelineError {
    PipelineError::Config(ConfigError::InvalidParameter {
        group: format!("alignment iteration {iteration}"),
        key: "type".to_string(),
        reason: format!("expected a '{expected}' iteration"),
    })
}

/// Coarse-search down task: recurse into the children large enough to
/// search, then create one align task per extended unit of its own flowers.
pub(crate) async fn coarse_down(
    ctx: &PipelineContext,
    task: &Task,
    iteration: usize,
    flowers: &[FlowerId],
) -> Result<Scheduled, PipelineError> {
    let params = coarse_params(ctx, iteration)?;
    let scratch = ctx.scratch_dir(&task.id);

    let bounds = ctx
        .down_pass_bounds()
        .ignoring_smaller_than(params.min_sequence_size);
    let children = descend(ctx.source.as_ref(), flowers, &scratch, &bounds, |flowers| {
        TaskKind::CoarseDown { iteration, flowers }
    })
    .await?;

    let extended = ctx
        .source
        .extend(
            flowers,
            &scratch,
            ExtendBounds::between(params.min_sequence_size, params.max_sequence_size),
        )
        .await?;
    let aligns = extended.into_iter().map(|unit| {
        Task::new(TaskKind::CoarseAlign {
            iteration,
            flower: unit.id,
        })
    });

    Ok(Scheduled::done().with_children(children).with_children(aligns))
}

/// Coarse-align task: search first, then merge the result.
pub(crate) async fn coarse_align(
    ctx: &PipelineContext,
    task: &Task,
    iteration: usize,
    flower: &FlowerId,
) -> Result<Scheduled, PipelineError> {
    let alignment_file = ctx.alignment_file(&task.id);
    if let Some(dir) = alignment_file.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PipelineError::io(dir, e))?;
    }

    Ok(Scheduled::done()
        .with_child(TaskKind::SimilaritySearch {
            iteration,
            flower: flower.clone(),
            alignment_file: alignment_file.clone(),
        })
        .then(TaskKind::MergeAlignment {
            iteration,
            flower: flower.clone(),
            alignment_file,
        }))
}

pub(crate) async fn similarity_search(
    ctx: &PipelineContext,
    iteration: usize,
    flower: &FlowerId,
    alignment_file: &std::path::Path,
) -> Result<Scheduled, PipelineError> {
    let params = coarse_params(ctx, iteration)?;
    ctx.run_program(Invocation::similarity_search(
        ctx.store(),
        flower,
        alignment_file,
        &params,
        &ctx.workflow().alignment.blast_misc,
    ))
    .await?;
    Ok(Scheduled::done())
}

/// Merge task: run the core program, then drop the alignment file.
pub(crate) async fn merge_alignment(
    ctx: &PipelineContext,
    iteration: usize,
    flower: &FlowerId,
    alignment_file: &std::path::Path,
) -> Result<Scheduled, PipelineError> {
    let params = coarse_params(ctx, iteration)?;
    ctx.run_program(Invocation::core(
        ctx.store(),
        flower,
        alignment_file,
        &params.core,
        ctx.phase.required_species.as_deref(),
        ctx.phase.single_copy_species.as_deref(),
    ))
    .await?;

    match tokio::fs::remove_file(alignment_file).await {
        Ok(()) => Ok(Scheduled::done()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Scheduled::done()),
        Err(e) => Err(PipelineError::io(alignment_file, e)),
    }
}

/// Base-level down task: recurse into every child, then batch the extended
/// units of its own flowers into aligner tasks.
pub(crate) async fn base_down(
    ctx: &PipelineContext,
    task: &Task,
    iteration: usize,
    flowers: &[FlowerId],
) -> Result<Scheduled, PipelineError> {
    let params = base_params(ctx, iteration)?;
    let scratch = ctx.scratch_dir(&task.id);

    let children = descend(
        ctx.source.as_ref(),
        flowers,
        &scratch,
        &ctx.down_pass_bounds(),
        |flowers| TaskKind::BaseDown { iteration, flowers },
    )
    .await?;

    let extended = ctx
        .source
        .extend(flowers, &scratch, ExtendBounds::at_least(1))
        .await?;
    let threads = params.num_threads;
    let aligners = batch_tasks(&extended, &ctx.base_level_bounds(), |flowers| {
        TaskKind::BaseAlign {
            iteration,
            flowers,
            threads,
        }
    })?;

    Ok(Scheduled::done().with_children(children).with_children(aligners))
}

pub(crate) async fn base_align(
    ctx: &PipelineContext,
    iteration: usize,
    flowers: &[FlowerId],
) -> Result<Scheduled, PipelineError> {
    let params = base_params(ctx, iteration)?;
    ctx.run_program(Invocation::base_aligner(
        ctx.store(),
        flowers,
        &params,
        ctx.phase.required_species.as_deref(),
    ))
    .await?;
    Ok(Scheduled::done())
}
