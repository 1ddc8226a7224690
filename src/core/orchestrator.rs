//! Level-by-level pipeline execution.
//!
//! Drives one run: resolves dependency levels up front, launches each
//! level's stage tasks concurrently, waits for every sibling to settle,
//! applies the failure policy, and finalizes and persists the execution
//! record exactly once.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{CommandRunner, OutputSender};
use crate::core::executor::StageExecutor;
use crate::core::pipeline::{FailurePolicy, PipelineConfig};
use crate::core::recorder::ExecutionRecorder;
use crate::core::resolver;
use crate::domain::{ExecutionStatus, PipelineExecution, PipelineResult};
use crate::error::EngineError;

/// Caller options for one run.
#[derive(Default)]
pub struct RunOptions {
    /// Report synthetic success without spawning anything
    pub dry_run: bool,

    /// Tolerate every stage failure, overriding per-stage policy
    pub continue_on_error: bool,

    /// Live output observer, forwarded to every stage attempt
    pub observer: Option<OutputSender>,
}

/// Per-run orchestrator with injected collaborators.
pub struct Orchestrator {
    runner: Arc<dyn CommandRunner>,
    recorder: ExecutionRecorder,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        recorder: ExecutionRecorder,
        options: RunOptions,
    ) -> Self {
        Self {
            runner,
            recorder,
            options,
        }
    }

    /// Execute a pipeline for an experiment.
    ///
    /// Returns the finalized, persisted execution record. `ConfigNotFound`,
    /// `CycleDetected`, and recorder I/O failures surface as errors; a
    /// stage-level abort finalizes the record as `Failed` and returns it
    /// normally so callers can inspect the settled results.
    #[instrument(skip(self, config), fields(pipeline = %config.id))]
    pub async fn run(
        &self,
        experiment_id: &str,
        config: &PipelineConfig,
    ) -> Result<PipelineExecution, EngineError> {
        config.validate()?;
        let levels = resolver::resolve_levels(&config.stages)?;

        let mut execution = PipelineExecution::new(experiment_id, &config.id);
        info!(
            execution = %execution.id,
            stages = config.stages.len(),
            levels = levels.len(),
            dry_run = self.options.dry_run,
            "starting pipeline execution"
        );

        let executor = Arc::new(StageExecutor::new(
            self.runner.clone(),
            self.options.observer.clone(),
            self.options.dry_run,
            self.options.continue_on_error,
        ));
        let config = Arc::new(config.clone());

        for (depth, level) in levels.into_iter().enumerate() {
            debug!(level = depth, stages = level.len(), "starting level");

            // Launch every stage task in the level; all siblings settle
            // before the level is judged. One stage's failure never cancels
            // its siblings.
            let mut handles = Vec::with_capacity(level.len());
            for stage in level {
                let executor = Arc::clone(&executor);
                let config = Arc::clone(&config);
                let experiment = experiment_id.to_string();
                handles.push(tokio::spawn(async move {
                    executor.execute(&config, &experiment, &stage).await
                }));
            }

            // Appends to the single mutable results aggregator happen here,
            // on the orchestrator task, after each stage task settles.
            let mut abort: Option<EngineError> = None;
            for handle in handles {
                match handle.await {
                    Ok(outcome) => {
                        info!(
                            stage = %outcome.result.stage_id,
                            success = outcome.result.success,
                            duration_ms = outcome.result.duration,
                            "stage settled"
                        );
                        if abort.is_none() {
                            abort = outcome.abort;
                        }
                        execution.record(outcome.result);
                    }
                    Err(join_err) => {
                        // A panicked stage task still yields a result and
                        // aborts the run.
                        error!(error = %join_err, "stage task failed to settle");
                        let stage_id = format!("level-{}", depth);
                        execution.record(PipelineResult::failed(
                            &stage_id,
                            0,
                            format!("stage task panicked: {}", join_err),
                            None,
                            None,
                        ));
                        if abort.is_none() {
                            abort = Some(EngineError::RunAborted {
                                stage: stage_id,
                                attempts: 1,
                                cause: join_err.to_string(),
                            });
                        }
                    }
                }
            }

            if let Some(cause) = abort {
                if self.should_stop(&config) {
                    error!(error = %cause, "aborting pipeline execution");
                    execution.finalize(ExecutionStatus::Failed);
                    self.recorder.persist(&execution).await?;
                    return Ok(execution);
                }
                warn!(error = %cause, "stage failure recorded, continuing per failure policy");
            }
        }

        execution.finalize(ExecutionStatus::Completed);
        info!(
            execution = %execution.id,
            succeeded = execution.success_count(),
            failed = execution.failure_count(),
            total_ms = execution.total_duration,
            "pipeline execution completed"
        );
        self.recorder.persist(&execution).await?;
        Ok(execution)
    }

    fn should_stop(&self, config: &PipelineConfig) -> bool {
        if self.options.continue_on_error {
            return false;
        }
        match config.on_failure {
            FailurePolicy::Stop => true,
            FailurePolicy::Continue => false,
            FailurePolicy::Retry => {
                // Whole-level retry semantics are declared in the data model
                // but unspecified; behave as stop.
                warn!("onFailure=retry is not implemented; treating as stop");
                true
            }
        }
    }
}
