//! Execution state for a single pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::PipelineResult;

/// The auditable record of one pipeline run.
///
/// Created with `status = Running` before the first level starts, mutated by
/// appending results as stages settle, finalized exactly once, and then
/// persisted immutably. The orchestrator is the only writer; after hand-off
/// to the recorder the record is read-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineExecution {
    /// Unique identifier for this run
    pub id: Uuid,

    /// The experiment this run belongs to
    pub experiment_id: String,

    /// Id of the pipeline definition that was executed
    pub pipeline_id: String,

    /// When the run started
    pub start_time: DateTime<Utc>,

    /// When the run was finalized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Current state of the run
    pub status: ExecutionStatus,

    /// One settled result per stage, in settling order
    pub results: Vec<PipelineResult>,

    /// Milliseconds from start to finalization
    pub total_duration: u64,
}

impl PipelineExecution {
    /// Start a new execution record in the `Running` state.
    pub fn new(experiment_id: &str, pipeline_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            experiment_id: experiment_id.to_string(),
            pipeline_id: pipeline_id.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: ExecutionStatus::Running,
            results: Vec::new(),
            total_duration: 0,
        }
    }

    /// Append a settled stage result.
    pub fn record(&mut self, result: PipelineResult) {
        self.results.push(result);
    }

    /// Finalize the run. Sets the end time and total duration once; a record
    /// that is no longer running is left untouched.
    pub fn finalize(&mut self, status: ExecutionStatus) {
        if !self.is_running() {
            return;
        }
        let end = Utc::now();
        self.total_duration = (end - self.start_time).num_milliseconds().max(0) as u64;
        self.end_time = Some(end);
        self.status = status;
    }

    /// Whether the run has not yet been finalized.
    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    /// Number of results that settled successfully (including skips).
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// Number of results that settled as failures.
    pub fn failure_count(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    /// The result for a specific stage, if it has settled.
    pub fn result_for(&self, stage_id: &str) -> Option<&PipelineResult> {
        self.results.iter().find(|r| r.stage_id == stage_id)
    }
}

/// State of a pipeline execution.
///
/// `Cancelled` is reserved in the model for callers that persist externally
/// interrupted runs; the orchestrator itself never produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Currently executing
    Running,

    /// All levels completed without a disqualifying failure
    Completed,

    /// Aborted by a non-tolerated stage failure
    Failed,

    /// Externally interrupted (reserved)
    Cancelled,
}
