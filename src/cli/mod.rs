//! Command-line interface for stagehand.
//!
//! Provides commands for running a pipeline for an experiment, listing the
//! known pipeline definitions, and showing a pipeline's stage graph.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use crate::adapters::ShellRunner;
use crate::core::{
    resolve_levels, ExecutionRecorder, Orchestrator, PipelineConfig, PipelineStore, RunOptions,
};
use crate::domain::{ExecutionStatus, PipelineExecution};
use crate::error::EngineError;

/// stagehand - declarative stage pipeline orchestration
#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline for an experiment
    Run {
        /// Experiment the run belongs to
        experiment_id: String,

        /// Pipeline id (exact or substring match against definition files)
        pipeline_id: String,

        /// Report synthetic success without spawning any commands
        #[arg(long)]
        dry_run: bool,

        /// Stream live stage output
        #[arg(short, long)]
        verbose: bool,

        /// Tolerate every stage failure instead of aborting
        #[arg(long)]
        continue_on_error: bool,
    },

    /// List known pipelines
    List,

    /// Show a pipeline's stage graph grouped by level
    Show {
        /// Pipeline id
        pipeline_id: String,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                experiment_id,
                pipeline_id,
                dry_run,
                verbose,
                continue_on_error,
            } => {
                run_pipeline(
                    &experiment_id,
                    &pipeline_id,
                    dry_run,
                    verbose,
                    continue_on_error,
                )
                .await
            }
            Commands::List => list_pipelines().await,
            Commands::Show { pipeline_id } => show_pipeline(&pipeline_id).await,
        }
    }
}

/// Resolve a pipeline id, exiting with status 1 when nothing matches.
async fn load_or_exit(store: &PipelineStore, pipeline_id: &str) -> PipelineConfig {
    match store.load(pipeline_id).await {
        Ok(config) => config,
        Err(EngineError::ConfigNotFound(id)) => {
            eprintln!("Pipeline '{}' not found in {}", id, store.dir().display());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to load pipeline '{}': {}", pipeline_id, e);
            std::process::exit(1);
        }
    }
}

/// Run a pipeline for an experiment
async fn run_pipeline(
    experiment_id: &str,
    pipeline_id: &str,
    dry_run: bool,
    verbose: bool,
    continue_on_error: bool,
) -> Result<()> {
    let store = PipelineStore::open_default()?;
    store.seed_defaults().await?;
    let config = load_or_exit(&store, pipeline_id).await;

    // Verbose mode attaches the live output observer; forwarding is
    // best-effort and a slow terminal never blocks a stage.
    let (observer, printer) = if verbose {
        let (tx, mut rx) = mpsc::unbounded_channel::<crate::adapters::OutputChunk>();
        let printer = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if chunk.is_stderr {
                    eprintln!("[{}] {}", chunk.stage_id, chunk.line);
                } else {
                    println!("[{}] {}", chunk.stage_id, chunk.line);
                }
            }
        });
        (Some(tx), Some(printer))
    } else {
        (None, None)
    };

    let orchestrator = Orchestrator::new(
        Arc::new(ShellRunner::new()),
        ExecutionRecorder::open_default()?,
        RunOptions {
            dry_run,
            continue_on_error,
            observer,
        },
    );

    let execution = orchestrator.run(experiment_id, &config).await?;

    // Drop the orchestrator's observer handle so the printer drains and ends.
    drop(orchestrator);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    print_summary(&execution);

    match execution.status {
        ExecutionStatus::Completed => Ok(()),
        _ => {
            if let Some(failed) = execution.results.iter().find(|r| !r.success) {
                eprintln!(
                    "\nAborted by stage '{}': {}",
                    failed.stage_id,
                    failed.error.as_deref().unwrap_or("unknown error")
                );
            }
            std::process::exit(1);
        }
    }
}

fn print_summary(execution: &PipelineExecution) {
    println!();
    for result in &execution.results {
        let marker = if !result.success {
            "FAIL"
        } else if result.is_skipped() {
            "SKIP"
        } else {
            " OK "
        };
        println!(
            "[{}] {:<20} {}ms",
            marker, result.stage_id, result.duration
        );
    }

    let status = match execution.status {
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Cancelled => "cancelled",
    };
    println!(
        "\nExecution {} {}: {} succeeded, {} failed in {}ms",
        execution.id,
        status,
        execution.success_count(),
        execution.failure_count(),
        execution.total_duration
    );
}

/// List known pipelines
async fn list_pipelines() -> Result<()> {
    let store = PipelineStore::open_default()?;
    store.seed_defaults().await?;

    let configs = store.list().await?;
    if configs.is_empty() {
        println!("No pipelines found in {}", store.dir().display());
        return Ok(());
    }

    println!("{:<20} {:<8} {}", "ID", "STAGES", "DESCRIPTION");
    println!("{}", "-".repeat(70));
    for config in configs {
        println!(
            "{:<20} {:<8} {}",
            config.id,
            config.stages.len(),
            config.description
        );
    }

    Ok(())
}

/// Show a pipeline's stage graph grouped by level
async fn show_pipeline(pipeline_id: &str) -> Result<()> {
    let store = PipelineStore::open_default()?;
    store.seed_defaults().await?;
    let config = load_or_exit(&store, pipeline_id).await;

    let levels = resolve_levels(&config.stages)?;

    println!("Pipeline: {} - {}", config.id, config.name);
    if !config.description.is_empty() {
        println!("{}", config.description);
    }
    println!();

    for (depth, level) in levels.iter().enumerate() {
        println!("Level {}:", depth);
        for stage in level {
            let deps = if stage.depends_on.is_empty() {
                String::new()
            } else {
                format!("  (after: {})", stage.depends_on.join(", "))
            };
            println!("  {:<20} {}{}", stage.id, stage.command, deps);
        }
    }

    Ok(())
}
