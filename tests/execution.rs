//! Execution Integration Tests
//!
//! End-to-end orchestration scenarios over a scripted command runner:
//! level ordering, dry-run, tolerated failures, and the stop policy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use stagehand::adapters::{CommandOutput, CommandRequest, CommandRunner};
use stagehand::core::{resolve_levels, ExecutionRecorder, FailurePolicy, Orchestrator, RunOptions};
use stagehand::{ExecutionStatus, PipelineConfig, PipelineExecution, PipelineStage};

/// Runner that fails any command containing "fail", succeeds otherwise,
/// and counts attempts per command.
struct ScriptedRunner {
    calls: AtomicU32,
}

impl ScriptedRunner {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, request: CommandRequest) -> Result<CommandOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = request.command.contains("fail");
        Ok(CommandOutput {
            stdout: format!("{}\n", request.command),
            stderr: if failing {
                "scripted failure".to_string()
            } else {
                String::new()
            },
            exit_code: if failing { 1 } else { 0 },
            duration: Duration::from_millis(1),
            timed_out: false,
        })
    }
}

fn stage(id: &str, command: &str, depends_on: &[&str]) -> PipelineStage {
    PipelineStage {
        id: id.to_string(),
        name: id.to_string(),
        command: command.to_string(),
        working_dir: None,
        environment: HashMap::new(),
        condition: None,
        timeout: None,
        retries: None,
        continue_on_error: false,
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
    }
}

fn pipeline(id: &str, stages: Vec<PipelineStage>) -> PipelineConfig {
    PipelineConfig {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        stages,
        environment: HashMap::new(),
        timeout: 60_000,
        retries: 0,
        on_failure: FailurePolicy::Stop,
    }
}

async fn run(
    config: &PipelineConfig,
    options: RunOptions,
) -> (PipelineExecution, Arc<ScriptedRunner>, TempDir) {
    let temp = TempDir::new().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = Orchestrator::new(
        runner.clone(),
        ExecutionRecorder::new(temp.path()),
        options,
    );
    let execution = orchestrator.run("exp-1", config).await.unwrap();
    (execution, runner, temp)
}

#[tokio::test]
async fn scenario_a_chain_levels_and_dry_run() {
    let config = pipeline(
        "build-chain",
        vec![
            stage("install", "npm install", &[]),
            stage("typecheck", "npm run typecheck", &["install"]),
            stage("build", "npm run build", &["typecheck"]),
        ],
    );

    let levels = resolve_levels(&config.stages).unwrap();
    let level_ids: Vec<Vec<&str>> = levels
        .iter()
        .map(|l| l.iter().map(|s| s.id.as_str()).collect())
        .collect();
    assert_eq!(
        level_ids,
        vec![vec!["install"], vec!["typecheck"], vec!["build"]]
    );

    let (execution, runner, _temp) = run(
        &config,
        RunOptions {
            dry_run: true,
            ..Default::default()
        },
    )
    .await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.results.len(), 3);
    for result in &execution.results {
        assert!(result.success);
        assert_eq!(result.duration, 0);
        assert!(result.output.as_deref().unwrap().starts_with("[DRY RUN]"));
    }
    // Nothing was spawned.
    assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scenario_b_independent_stages_settle_exactly_once() {
    let config = pipeline(
        "parallel",
        vec![stage("a", "echo a", &[]), stage("b", "echo b", &[])],
    );

    let levels = resolve_levels(&config.stages).unwrap();
    assert_eq!(levels.len(), 1);
    assert_eq!(levels[0].len(), 2);

    let (execution, _runner, _temp) = run(&config, RunOptions::default()).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.results.len(), 2);
    for id in ["a", "b"] {
        let count = execution
            .results
            .iter()
            .filter(|r| r.stage_id == id)
            .count();
        assert_eq!(count, 1, "stage '{}' should settle exactly once", id);
    }
}

#[tokio::test]
async fn scenario_c_tolerated_failure_still_completes() {
    let mut lint = stage("lint", "fail lint", &[]);
    lint.continue_on_error = true;
    let config = pipeline(
        "tolerant",
        vec![lint, stage("build", "echo build", &["lint"])],
    );

    let (execution, _runner, _temp) = run(&config, RunOptions::default()).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let lint_result = execution.result_for("lint").unwrap();
    assert!(!lint_result.success);
    assert_eq!(lint_result.exit_code, Some(1));
    assert!(execution.result_for("build").unwrap().success);
}

#[tokio::test]
async fn scenario_d_stop_policy_aborts_remaining_levels() {
    let config = pipeline(
        "strict",
        vec![
            stage("test", "fail test", &[]),
            stage("deploy", "echo deploy", &["test"]),
        ],
    );

    let (execution, _runner, temp) = run(&config, RunOptions::default()).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.result_for("test").is_some());
    assert!(
        execution.result_for("deploy").is_none(),
        "no later-level stage may appear in results"
    );

    // The failed record was still persisted exactly once.
    let records: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn global_continue_on_error_overrides_stop_policy() {
    let config = pipeline(
        "strict",
        vec![
            stage("test", "fail test", &[]),
            stage("report", "echo report", &["test"]),
        ],
    );

    let (execution, _runner, _temp) = run(
        &config,
        RunOptions {
            continue_on_error: true,
            ..Default::default()
        },
    )
    .await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.result_for("report").is_some());
}

#[tokio::test(start_paused = true)]
async fn failing_stage_with_retries_two_attempts_three_times() {
    let mut flaky = stage("flaky", "fail always", &[]);
    flaky.retries = Some(2);
    flaky.continue_on_error = true;
    let config = pipeline("retrying", vec![flaky]);

    let (execution, runner, _temp) = run(&config, RunOptions::default()).await;

    assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
    assert!(!execution.result_for("flaky").unwrap().success);
    assert_eq!(execution.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn persisted_record_round_trips() {
    let config = pipeline("roundtrip", vec![stage("a", "echo a", &[])]);
    let (execution, _runner, temp) = run(&config, RunOptions::default()).await;

    let path = temp.path().join(format!(
        "{}-{}-{}.json",
        execution.experiment_id, execution.pipeline_id, execution.id
    ));
    let content = std::fs::read_to_string(path).unwrap();
    let loaded: PipelineExecution = serde_json::from_str(&content).unwrap();

    assert_eq!(loaded.id, execution.id);
    assert_eq!(loaded.status, ExecutionStatus::Completed);
    assert_eq!(loaded.results.len(), 1);
    assert!(loaded.end_time.is_some());
}

#[tokio::test]
async fn condition_gated_stage_is_skipped_but_recorded() {
    let mut gated = stage("deploy", "echo deploy", &[]);
    gated.condition = Some("TARGET === 'production'".to_string());
    let mut config = pipeline("conditional", vec![gated]);
    config
        .environment
        .insert("TARGET".to_string(), "staging".to_string());

    let (execution, runner, _temp) = run(&config, RunOptions::default()).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let result = execution.result_for("deploy").unwrap();
    assert!(result.success);
    assert_eq!(result.duration, 0);
    assert!(result.output.as_deref().unwrap().contains("SKIPPED"));
    assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
}
