//! flowrun CLI - runs the reconstruction pipeline on the local machine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use flowrun_core::{Experiment, PhaseFlags, StartPhase, WorkflowConfig};
use flowrun_pipeline::{Pipeline, ProcessRunner, RunReport};

/// flowrun - reconstruction pipeline driver
#[derive(Parser, Debug)]
#[command(name = "flowrun")]
#[command(about = "Run the reconstruction pipeline as a local task graph", long_about = None)]
struct Cli {
    /// Experiment file (JSON)
    #[arg(long)]
    experiment: PathBuf,

    /// Workflow configuration file (JSON)
    #[arg(long)]
    config: PathBuf,

    /// Directory for scratch, staging and alignment files
    #[arg(long, default_value = "flowrun-work")]
    work_dir: PathBuf,

    /// Directory holding the pipeline programs (PATH lookup when unset)
    #[arg(long)]
    bin_dir: Option<PathBuf>,

    /// CPUs shared by concurrently running tasks
    #[arg(long, default_value_t = 4)]
    max_cpus: u32,

    /// Run the whole pipeline, starting with setup and alignment
    #[arg(long)]
    setup_and_build_alignments: bool,

    /// Build trees
    #[arg(long)]
    build_trees: bool,

    /// Build the reference
    #[arg(long)]
    build_reference: bool,

    /// Build adjacency faces
    #[arg(long)]
    build_faces: bool,

    /// Skip the structure check
    #[arg(long)]
    skip_check: bool,

    /// Write the run journal to this file (JSON)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn flags(&self) -> PhaseFlags {
        PhaseFlags {
            build_trees: self.build_trees,
            build_reference: self.build_reference,
            build_faces: self.build_faces,
            skip_check: self.skip_check,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let flags = cli.flags();
    let Some(start) = StartPhase::select(cli.setup_and_build_alignments, &flags) else {
        info!("Nothing to do!");
        return Ok(());
    };

    let experiment = Experiment::from_file(&cli.experiment)?;
    let config = WorkflowConfig::from_file(&cli.config)?;

    let mut runner = ProcessRunner::new();
    if let Some(dir) = &cli.bin_dir {
        runner = runner.with_bin_dir(dir);
    }

    let pipeline = Pipeline::new(&experiment, &config, flags, Arc::new(runner), &cli.work_dir)?;

    info!(
        start = ?start,
        store = %experiment.store,
        work_dir = %cli.work_dir.display(),
        max_cpus = cli.max_cpus,
        "Starting flowrun"
    );

    let scheduler = pipeline.scheduler(cli.max_cpus);
    let result = scheduler.run(Pipeline::root_task(start)).await;

    if let Some(path) = &cli.report {
        write_report(path, &scheduler.report().await).await?;
    }

    match result {
        Ok(report) => {
            for (task, count) in report.counts() {
                info!(task, count, "Tasks run");
            }
            info!(tasks = report.records.len(), "Pipeline finished");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Pipeline failed");
            Err(e.into())
        }
    }
}

async fn write_report(path: &Path, report: &RunReport) -> Result<(), Box<dyn std::error::Error>> {
    tokio::fs::write(path, report.to_json()?).await?;
    info!(path = %path.display(), "Wrote run report");
    Ok(())
}
