//! Per-stage outcome records.

use serde::{Deserialize, Serialize};

/// The settled outcome of one stage within one execution.
///
/// Exactly one of these is produced per stage per execution, whether the
/// stage ran, was skipped by its condition, or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    /// Id of the stage this result belongs to
    pub stage_id: String,

    /// Whether the stage settled successfully (skipped stages count as success)
    pub success: bool,

    /// Wall-clock duration in milliseconds, from first attempt to settling
    pub duration: u64,

    /// Captured stdout (or a synthetic marker for skipped/dry-run stages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Error description when the stage failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Exit code of the final attempt, when a process actually ran to exit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl PipelineResult {
    /// Result for a stage whose condition evaluated false.
    pub fn skipped(stage_id: &str) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            success: true,
            duration: 0,
            output: Some("[SKIPPED] condition not met".to_string()),
            error: None,
            exit_code: None,
        }
    }

    /// Synthetic success for dry-run mode; nothing was spawned.
    pub fn dry_run(stage_id: &str, command: &str) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            success: true,
            duration: 0,
            output: Some(format!("[DRY RUN] {}", command)),
            error: None,
            exit_code: None,
        }
    }

    /// Result for a stage that ran to a successful exit.
    pub fn succeeded(stage_id: &str, duration_ms: u64, output: String, exit_code: i32) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            success: true,
            duration: duration_ms,
            output: if output.is_empty() { None } else { Some(output) },
            error: None,
            exit_code: Some(exit_code),
        }
    }

    /// Result for a stage that exhausted its attempts.
    pub fn failed(
        stage_id: &str,
        duration_ms: u64,
        error: String,
        output: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            success: false,
            duration: duration_ms,
            output: output.filter(|o| !o.is_empty()),
            error: Some(error),
            exit_code,
        }
    }

    /// Whether this result is a skip marker rather than a real run.
    pub fn is_skipped(&self) -> bool {
        self.output
            .as_deref()
            .map(|o| o.starts_with("[SKIPPED]"))
            .unwrap_or(false)
    }
}
