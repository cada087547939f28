//! Host process step execution.

use crate::runner::{StepContext, StepResult, StepRunner};
use async_trait::async_trait;
use chrono::Utc;
use gantry_core::ids::StepId;
use gantry_core::run::{LogStream, OutputLine};
use gantry_core::{Error, Result};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Runs steps as child processes of the host.
///
/// `command` steps exec the program directly with `args`; `run` steps go
/// through `<shell> -c`.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn build_command(ctx: &StepContext) -> Result<(String, Command)> {
        let step = &ctx.step;
        let (program, mut command) = match (&step.command, &step.run) {
            (Some(program), _) => {
                let mut command = Command::new(program);
                command.args(&step.args);
                (program.clone(), command)
            }
            (None, Some(script)) => {
                let mut command = Command::new(&step.shell);
                command.arg("-c").arg(script);
                (step.shell.clone(), command)
            }
            (None, None) => {
                return Err(Error::Configuration(format!(
                    "step `{}` has nothing to execute",
                    step.name
                )));
            }
        };

        command
            .current_dir(&ctx.working_dir)
            .envs(&ctx.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok((program, command))
    }
}

#[async_trait]
impl StepRunner for ProcessRunner {
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult> {
        let start = Instant::now();
        let (program, mut command) = Self::build_command(ctx)?;

        info!(step = %ctx.id, program = %program, dir = %ctx.working_dir.display(), "Executing step");

        let mut child = command.spawn().map_err(|e| Error::Spawn {
            program: program.clone(),
            message: e.to_string(),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr was not captured".to_string()))?;

        let stdout_handle = stream_lines(stdout, LogStream::Stdout, ctx.id.clone(), output_tx.clone());
        let stderr_handle = stream_lines(stderr, LogStream::Stderr, ctx.id.clone(), output_tx);

        let wait_result = match ctx.timeout {
            Some(limit) => {
                let waited = timeout(limit, child.wait()).await;
                match waited {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(step = %ctx.id, seconds = limit.as_secs(), "Step timed out, killing process");
                        let _ = child.kill().await;
                        // Grandchildren may still hold the pipes open
                        stdout_handle.abort();
                        stderr_handle.abort();
                        return Err(Error::StepTimeout {
                            step: ctx.id.to_string(),
                            seconds: limit.as_secs(),
                        });
                    }
                }
            }
            None => child.wait().await,
        };

        // Wait for output streaming to complete
        let _ = stdout_handle.await;
        let _ = stderr_handle.await;

        let status = wait_result?;
        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(step = %ctx.id, exit_code, duration_ms, "Step process exited");

        Ok(StepResult {
            exit_code,
            success: status.success(),
            duration_ms,
        })
    }
}

fn stream_lines<R>(
    reader: R,
    stream: LogStream,
    step: StepId,
    tx: mpsc::Sender<OutputLine>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut line_number = 0u32;

        while let Ok(Some(content)) = lines.next_line().await {
            line_number += 1;
            let line = OutputLine {
                step: step.clone(),
                stream,
                line_number,
                content,
                timestamp: Utc::now(),
            };
            if tx.send(line).await.is_err() {
                break;
            }
        }
    })
}
