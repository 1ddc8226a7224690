//! Error taxonomy for the pipeline engine.
//!
//! Stage-level failures (`StageTimeout`, `StageExecutionFailure`) are caught
//! at the per-stage boundary and converted into non-throwing results; they
//! escalate to `RunAborted` only when retries are exhausted and no
//! continue-on-error policy applies. `ConfigNotFound` and `CycleDetected`
//! are always fatal with no retry path.

use thiserror::Error;

/// Errors produced by the orchestration engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No pipeline definition matched the requested id.
    #[error("pipeline '{0}' not found")]
    ConfigNotFound(String),

    /// The dependency graph contains a cycle through the named stage.
    #[error("dependency cycle detected at stage '{0}'")]
    CycleDetected(String),

    /// A `dependsOn` entry references a stage id that does not exist.
    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    /// The pipeline definition violates a structural invariant.
    #[error("invalid pipeline definition: {0}")]
    InvalidPipeline(String),

    /// A stage attempt exceeded its timeout window and was killed.
    #[error("stage '{stage}' timed out after {timeout_ms}ms")]
    StageTimeout { stage: String, timeout_ms: u64 },

    /// A stage command finished with a nonzero exit code.
    #[error("stage '{stage}' failed with exit code {exit_code}: {detail}")]
    StageExecutionFailure {
        stage: String,
        exit_code: i32,
        detail: String,
    },

    /// A stage failure that no continue-on-error policy tolerates.
    #[error("run aborted: stage '{stage}' failed after {attempts} attempt(s): {cause}")]
    RunAborted {
        stage: String,
        attempts: u32,
        cause: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether this error aborts the whole run rather than a single stage.
    pub fn is_run_level(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_)
                | Self::CycleDetected(_)
                | Self::UnknownDependency { .. }
                | Self::InvalidPipeline(_)
                | Self::RunAborted { .. }
        )
    }
}
