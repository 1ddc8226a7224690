//! Shell runner spawning stage commands as real OS subprocesses.
//!
//! Commands run through the platform shell (`sh -c` on unix, `cmd /C` on
//! windows) with piped stdio. Output is collected line by line and forwarded
//! to the observer channel as it arrives. Each attempt races process
//! completion against its timeout window; on expiry the child is killed.

use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{CommandOutput, CommandRequest, CommandRunner, OutputChunk, OutputSender};

/// Runs stage commands through the platform shell.
#[derive(Debug, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    fn base_command(command_line: &str) -> Command {
        #[cfg(unix)]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command_line);
            cmd
        }
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command_line);
            cmd
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    fn name(&self) -> &str {
        "shell"
    }

    async fn run(&self, request: CommandRequest) -> Result<CommandOutput> {
        let started = Instant::now();

        let mut cmd = Self::base_command(&request.command);
        cmd.envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                // Spawn failures are reported as an exit-code-1 attempt, not
                // a thrown error, so retry and continue-on-error policies
                // apply uniformly.
                return Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: format!("failed to spawn '{}': {}", request.command, e),
                    exit_code: 1,
                    duration: started.elapsed(),
                    timed_out: false,
                });
            }
        };

        let stdout = child
            .stdout
            .take()
            .context("child process stdout was not piped")?;
        let stderr = child
            .stderr
            .take()
            .context("child process stderr was not piped")?;

        let stdout_task = tokio::spawn(drain(
            stdout,
            request.stage_id.clone(),
            false,
            request.observer.clone(),
        ));
        let stderr_task = tokio::spawn(drain(
            stderr,
            request.stage_id.clone(),
            true,
            request.observer.clone(),
        ));

        match timeout(request.timeout, child.wait()).await {
            Ok(status) => {
                let status = status
                    .with_context(|| format!("failed to wait for '{}'", request.command))?;
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                let exit_code = status.code().unwrap_or(-1);
                debug!(
                    stage = %request.stage_id,
                    exit_code,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "command finished"
                );
                Ok(CommandOutput {
                    stdout,
                    stderr,
                    exit_code,
                    duration: started.elapsed(),
                    timed_out: false,
                })
            }
            Err(_) => {
                // Timeout expiry: kill only this stage's process. Siblings in
                // the same level are unaffected.
                let _ = child.start_kill();
                let _ = child.wait().await;
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                debug!(
                    stage = %request.stage_id,
                    timeout_ms = request.timeout.as_millis() as u64,
                    "command timed out, process killed"
                );
                Ok(CommandOutput {
                    stdout,
                    stderr,
                    exit_code: -1,
                    duration: started.elapsed(),
                    timed_out: true,
                })
            }
        }
    }
}

/// Collect a stdio pipe line by line, forwarding each line to the observer.
async fn drain<R>(
    reader: R,
    stage_id: String,
    is_stderr: bool,
    observer: Option<OutputSender>,
) -> String
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut collected = String::new();

    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(tx) = &observer {
            let _ = tx.send(OutputChunk {
                stage_id: stage_id.clone(),
                line: line.clone(),
                is_stderr,
            });
        }
        collected.push_str(&line);
        collected.push('\n');
    }

    collected
}
