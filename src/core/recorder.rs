//! Durable execution records: one JSON document per run, written once.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::info;

use crate::domain::PipelineExecution;
use crate::error::EngineError;

/// Serializes finalized execution records to the executions directory.
///
/// Records are append-only history: each run writes exactly one file, named
/// `{experimentId}-{pipelineId}-{executionId}.json`, and never updates it.
pub struct ExecutionRecorder {
    dir: PathBuf,
}

impl ExecutionRecorder {
    /// Create a recorder over an executions directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Open the recorder at the configured executions directory.
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::new(crate::config::executions_dir()?))
    }

    /// The directory records are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file a given execution is recorded at.
    pub fn record_path(&self, execution: &PipelineExecution) -> PathBuf {
        self.dir.join(format!(
            "{}-{}-{}.json",
            execution.experiment_id, execution.pipeline_id, execution.id
        ))
    }

    /// Write the finalized execution record.
    pub async fn persist(&self, execution: &PipelineExecution) -> Result<(), EngineError> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.record_path(execution);
        let json = serde_json::to_string_pretty(execution)?;
        fs::write(&path, json).await?;

        info!(path = %path.display(), "execution record written");
        Ok(())
    }
}
