//! Adapter interfaces for external collaborators.
//!
//! The engine talks to the operating system through the `CommandRunner`
//! trait so that orchestration logic can be exercised with fakes in tests.

pub mod shell;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

// Re-export the shell runner
pub use shell::ShellRunner;

/// One line of live stage output, forwarded best-effort to an observer.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    /// Stage the line came from
    pub stage_id: String,

    /// The line, without trailing newline
    pub line: String,

    /// Whether the line came from stderr
    pub is_stderr: bool,
}

/// Channel end held by runners to stream output as it arrives.
///
/// Sends are non-blocking and never required for correctness; a closed or
/// absent observer is ignored.
pub type OutputSender = mpsc::UnboundedSender<OutputChunk>;

/// A request to run one stage command attempt.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Stage id, used to tag streamed output
    pub stage_id: String,

    /// Shell command line to execute
    pub command: String,

    /// Working directory for the process, if overridden
    pub working_dir: Option<PathBuf>,

    /// Extra environment entries layered over the inherited OS environment
    pub env: HashMap<String, String>,

    /// Timeout window for this attempt
    pub timeout: Duration,

    /// Optional live output observer
    pub observer: Option<OutputSender>,
}

/// The settled output of one command attempt.
///
/// Spawn failures are folded in as `exit_code = 1` with the error message in
/// `stderr`; a timeout is reported distinctly via `timed_out` rather than as
/// a synthetic exit code.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Whether the attempt completed with a zero exit and no timeout.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Trait for spawning stage commands as OS subprocesses.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Human-readable runner name
    fn name(&self) -> &str;

    /// Run one attempt of a stage command to completion or timeout.
    async fn run(&self, request: CommandRequest) -> Result<CommandOutput>;
}
