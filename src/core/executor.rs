//! Per-stage execution: condition gate, dry-run short-circuit, and the
//! timeout/retry/backoff attempt loop.
//!
//! Timeout and exit-code failures are caught here and converted into
//! non-throwing results; only a failure that no continue-on-error policy
//! tolerates is flagged as a run abort for the level aggregator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use crate::adapters::{CommandOutput, CommandRequest, CommandRunner, OutputSender};
use crate::core::condition;
use crate::core::pipeline::{PipelineConfig, PipelineStage};
use crate::domain::PipelineResult;
use crate::error::EngineError;

/// Linear backoff unit between unsuccessful attempts.
const BACKOFF_UNIT: Duration = Duration::from_millis(1000);

/// The settled outcome of one stage task.
pub struct StageOutcome {
    /// The result to append to the execution record
    pub result: PipelineResult,

    /// Present when the failure must abort the run
    pub abort: Option<EngineError>,
}

/// Executes a single stage according to its policies.
pub struct StageExecutor {
    runner: Arc<dyn CommandRunner>,
    observer: Option<OutputSender>,
    dry_run: bool,
    continue_on_error: bool,
}

impl StageExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        observer: Option<OutputSender>,
        dry_run: bool,
        continue_on_error: bool,
    ) -> Self {
        Self {
            runner,
            observer,
            dry_run,
            continue_on_error,
        }
    }

    /// Run one stage to a settled result.
    ///
    /// Condition evaluation and the dry-run short-circuit happen before any
    /// process is spawned. Each attempt gets a fresh timeout window; between
    /// unsuccessful attempts the executor waits `1000ms * attempt_number`.
    #[instrument(skip(self, pipeline, stage), fields(stage = %stage.id))]
    pub async fn execute(
        &self,
        pipeline: &PipelineConfig,
        experiment_id: &str,
        stage: &PipelineStage,
    ) -> StageOutcome {
        if let Some(expr) = &stage.condition {
            let context = condition_context(pipeline, stage, experiment_id);
            if !condition::evaluate(expr, &context) {
                info!("condition not met, skipping stage");
                return StageOutcome {
                    result: PipelineResult::skipped(&stage.id),
                    abort: None,
                };
            }
        }

        if self.dry_run {
            info!(command = %stage.command, "dry run");
            return StageOutcome {
                result: PipelineResult::dry_run(&stage.id, &stage.command),
                abort: None,
            };
        }

        let max_retries = stage.effective_retries(pipeline);
        let timeout = stage.effective_timeout(pipeline);
        let env = merged_env(pipeline, stage);
        let started = Instant::now();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let request = CommandRequest {
                stage_id: stage.id.clone(),
                command: stage.command.clone(),
                working_dir: stage.working_dir.as_ref().map(Into::into),
                env: env.clone(),
                timeout,
                observer: self.observer.clone(),
            };

            let attempt_outcome = self.runner.run(request).await;
            if let Ok(output) = &attempt_outcome {
                if output.success() {
                    info!(
                        attempt,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "stage succeeded"
                    );
                    return StageOutcome {
                        result: PipelineResult::succeeded(
                            &stage.id,
                            started.elapsed().as_millis() as u64,
                            output.stdout.clone(),
                            output.exit_code,
                        ),
                        abort: None,
                    };
                }
            }

            let failure = classify_failure(stage, timeout, &attempt_outcome);

            if attempt <= max_retries {
                let delay = BACKOFF_UNIT * attempt;
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure.error,
                    "stage attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let tolerated = stage.continue_on_error || self.continue_on_error;
            let duration_ms = started.elapsed().as_millis() as u64;
            let result = PipelineResult::failed(
                &stage.id,
                duration_ms,
                failure.error.to_string(),
                failure.output,
                failure.exit_code,
            );

            if tolerated {
                warn!(
                    attempts = attempt,
                    error = %failure.error,
                    "stage failed, tolerated by continue-on-error"
                );
                return StageOutcome {
                    result,
                    abort: None,
                };
            }

            error!(attempts = attempt, error = %failure.error, "stage failed permanently");
            return StageOutcome {
                result,
                abort: Some(EngineError::RunAborted {
                    stage: stage.id.clone(),
                    attempts: attempt,
                    cause: failure.error.to_string(),
                }),
            };
        }
    }
}

struct ClassifiedFailure {
    error: EngineError,
    output: Option<String>,
    exit_code: Option<i32>,
}

/// Convert a failed attempt into its error class: a timeout is distinct from
/// a nonzero exit, and a runner transport error maps to the spawn-failure
/// shape (exit code 1 with the error message).
fn classify_failure(
    stage: &PipelineStage,
    timeout: Duration,
    outcome: &anyhow::Result<CommandOutput>,
) -> ClassifiedFailure {
    match outcome {
        Ok(output) if output.timed_out => ClassifiedFailure {
            error: EngineError::StageTimeout {
                stage: stage.id.clone(),
                timeout_ms: timeout.as_millis() as u64,
            },
            output: Some(output.stdout.clone()),
            exit_code: None,
        },
        Ok(output) => ClassifiedFailure {
            error: EngineError::StageExecutionFailure {
                stage: stage.id.clone(),
                exit_code: output.exit_code,
                detail: output.stderr.trim().to_string(),
            },
            output: Some(output.stdout.clone()),
            exit_code: Some(output.exit_code),
        },
        Err(e) => ClassifiedFailure {
            error: EngineError::StageExecutionFailure {
                stage: stage.id.clone(),
                exit_code: 1,
                detail: e.to_string(),
            },
            output: None,
            exit_code: Some(1),
        },
    }
}

/// Process environment layers for a stage: the OS environment is inherited
/// by the spawned process; these entries override it, with stage entries
/// overriding pipeline entries.
fn merged_env(pipeline: &PipelineConfig, stage: &PipelineStage) -> HashMap<String, String> {
    let mut env = pipeline.environment.clone();
    env.extend(stage.environment.clone());
    env
}

/// Key/value context a stage condition is evaluated against.
fn condition_context(
    pipeline: &PipelineConfig,
    stage: &PipelineStage,
    experiment_id: &str,
) -> HashMap<String, String> {
    let mut context = merged_env(pipeline, stage);
    context.insert("experimentId".to_string(), experiment_id.to_string());
    context.insert("pipelineId".to_string(), pipeline.id.clone());
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Runner that returns a fixed output and counts invocations.
    struct FixedRunner {
        output: CommandOutput,
        calls: AtomicU32,
    }

    impl FixedRunner {
        fn new(output: CommandOutput) -> Self {
            Self {
                output,
                calls: AtomicU32::new(0),
            }
        }

        fn failing(exit_code: i32) -> Self {
            Self::new(CommandOutput {
                stdout: String::new(),
                stderr: "boom".to_string(),
                exit_code,
                duration: Duration::from_millis(5),
                timed_out: false,
            })
        }

        fn timing_out() -> Self {
            Self::new(CommandOutput {
                stdout: "partial".to_string(),
                stderr: String::new(),
                exit_code: -1,
                duration: Duration::from_millis(5),
                timed_out: true,
            })
        }

        fn succeeding() -> Self {
            Self::new(CommandOutput {
                stdout: "done\n".to_string(),
                stderr: String::new(),
                exit_code: 0,
                duration: Duration::from_millis(5),
                timed_out: false,
            })
        }
    }

    #[async_trait]
    impl CommandRunner for FixedRunner {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn run(&self, _request: CommandRequest) -> Result<CommandOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }
    }

    fn pipeline_with(stage: PipelineStage) -> PipelineConfig {
        PipelineConfig {
            id: "test-pipeline".to_string(),
            name: "Test".to_string(),
            description: String::new(),
            stages: vec![stage],
            environment: HashMap::new(),
            timeout: 60_000,
            retries: 0,
            on_failure: crate::core::pipeline::FailurePolicy::Stop,
        }
    }

    fn basic_stage() -> PipelineStage {
        PipelineStage {
            id: "build".to_string(),
            name: "Build".to_string(),
            command: "make".to_string(),
            working_dir: None,
            environment: HashMap::new(),
            condition: None,
            timeout: None,
            retries: None,
            continue_on_error: false,
            depends_on: Vec::new(),
        }
    }

    fn executor(runner: Arc<FixedRunner>) -> StageExecutor {
        StageExecutor::new(runner, None, false, false)
    }

    #[tokio::test]
    async fn test_success_produces_successful_result() {
        let runner = Arc::new(FixedRunner::succeeding());
        let stage = basic_stage();
        let pipeline = pipeline_with(stage.clone());

        let outcome = executor(runner.clone())
            .execute(&pipeline, "exp-1", &stage)
            .await;

        assert!(outcome.result.success);
        assert!(outcome.abort.is_none());
        assert_eq!(outcome.result.exit_code, Some(0));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_two_means_three_attempts() {
        let runner = Arc::new(FixedRunner::failing(2));
        let mut stage = basic_stage();
        stage.retries = Some(2);
        let pipeline = pipeline_with(stage.clone());

        let outcome = executor(runner.clone())
            .execute(&pipeline, "exp-1", &stage)
            .await;

        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
        assert!(!outcome.result.success);
        assert!(outcome.abort.is_some());
    }

    #[tokio::test]
    async fn test_tolerated_failure_has_no_abort() {
        let runner = Arc::new(FixedRunner::failing(1));
        let mut stage = basic_stage();
        stage.continue_on_error = true;
        let pipeline = pipeline_with(stage.clone());

        let outcome = executor(runner).execute(&pipeline, "exp-1", &stage).await;

        assert!(!outcome.result.success);
        assert!(outcome.abort.is_none());
        assert_eq!(outcome.result.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_global_continue_on_error_tolerates_failure() {
        let runner = Arc::new(FixedRunner::failing(1));
        let stage = basic_stage();
        let pipeline = pipeline_with(stage.clone());

        let executor = StageExecutor::new(runner, None, false, true);
        let outcome = executor.execute(&pipeline, "exp-1", &stage).await;

        assert!(!outcome.result.success);
        assert!(outcome.abort.is_none());
    }

    #[tokio::test]
    async fn test_timeout_error_is_distinct_from_exit_failure() {
        let runner = Arc::new(FixedRunner::timing_out());
        let stage = basic_stage();
        let pipeline = pipeline_with(stage.clone());

        let outcome = executor(runner).execute(&pipeline, "exp-1", &stage).await;

        let error = outcome.result.error.unwrap();
        assert!(error.contains("timed out"), "got: {}", error);
        assert!(outcome.result.exit_code.is_none());
        assert!(matches!(
            outcome.abort,
            Some(EngineError::RunAborted { .. })
        ));
    }

    #[tokio::test]
    async fn test_false_condition_skips_without_spawning() {
        let runner = Arc::new(FixedRunner::succeeding());
        let mut stage = basic_stage();
        stage.condition = Some("ENV === 'production'".to_string());
        let pipeline = pipeline_with(stage.clone());

        let outcome = executor(runner.clone())
            .execute(&pipeline, "exp-1", &stage)
            .await;

        assert!(outcome.result.success);
        assert!(outcome.result.is_skipped());
        assert_eq!(outcome.result.duration, 0);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dry_run_spawns_nothing_but_honors_conditions() {
        let runner = Arc::new(FixedRunner::failing(1));
        let stage = basic_stage();
        let pipeline = pipeline_with(stage.clone());

        let executor = StageExecutor::new(runner.clone(), None, true, false);
        let outcome = executor.execute(&pipeline, "exp-1", &stage).await;

        assert!(outcome.result.success);
        assert_eq!(outcome.result.duration, 0);
        assert!(outcome.result.output.unwrap().starts_with("[DRY RUN]"));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);

        // A false condition still wins over dry-run.
        let mut gated = basic_stage();
        gated.condition = Some("pipelineId === 'other'".to_string());
        let pipeline = pipeline_with(gated.clone());
        let outcome = executor.execute(&pipeline, "exp-1", &gated).await;
        assert!(outcome.result.is_skipped());
    }

    #[test]
    fn test_env_layering_stage_overrides_pipeline() {
        let mut stage = basic_stage();
        stage
            .environment
            .insert("SHARED".to_string(), "stage".to_string());
        stage
            .environment
            .insert("ONLY_STAGE".to_string(), "yes".to_string());
        let mut pipeline = pipeline_with(stage.clone());
        pipeline
            .environment
            .insert("SHARED".to_string(), "pipeline".to_string());
        pipeline
            .environment
            .insert("ONLY_PIPELINE".to_string(), "yes".to_string());

        let env = merged_env(&pipeline, &stage);
        assert_eq!(env.get("SHARED").map(String::as_str), Some("stage"));
        assert_eq!(env.get("ONLY_PIPELINE").map(String::as_str), Some("yes"));
        assert_eq!(env.get("ONLY_STAGE").map(String::as_str), Some("yes"));
    }

    #[test]
    fn test_condition_context_includes_identity_keys() {
        let stage = basic_stage();
        let pipeline = pipeline_with(stage.clone());
        let context = condition_context(&pipeline, &stage, "exp-42");

        assert_eq!(
            context.get("experimentId").map(String::as_str),
            Some("exp-42")
        );
        assert_eq!(
            context.get("pipelineId").map(String::as_str),
            Some("test-pipeline")
        );
    }
}
