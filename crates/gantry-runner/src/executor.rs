//! Instance execution: runs the steps of one job instance in order.

use crate::runner::{RunnerConfig, StepContext, StepRunner};
use async_trait::async_trait;
use gantry_core::ids::{RunId, StepId};
use gantry_core::instance::JobInstance;
use gantry_core::interpolation::InterpolationContext;
use gantry_core::ports::InstanceExecutor;
use gantry_core::run::{ExecutionOutcome, LogStream, OutputLine, StepReport, StepStatus};
use gantry_core::workflow::StepDefinition;
use gantry_core::{Error, Result};
use indexmap::IndexMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Executes job instances on top of a [`StepRunner`].
pub struct InstanceRunner {
    runner: Arc<dyn StepRunner>,
    config: RunnerConfig,
}

impl InstanceRunner {
    pub fn new(runner: Arc<dyn StepRunner>, config: RunnerConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Environment shared by every step of the instance.
    fn instance_env(&self, run_id: RunId, instance: &JobInstance, scratch: &Path) -> IndexMap<String, String> {
        let mut env = instance.env.clone();
        env.extend(instance.parameter_env());
        env.insert("GANTRY_RUN_ID".to_string(), run_id.to_string());
        env.insert("GANTRY_JOB".to_string(), instance.job.clone());
        env.insert("GANTRY_INSTANCE".to_string(), instance.id.to_string());
        env.insert("GANTRY_SCRATCH".to_string(), scratch.display().to_string());
        env
    }

    /// Resolve `${{ ... }}` references and the working directory of a step.
    fn prepare_step(
        &self,
        step: &StepDefinition,
        base_env: &IndexMap<String, String>,
        interpolation: &InterpolationContext,
    ) -> StepContext {
        let mut env = base_env.clone();
        env.extend(interpolation.interpolate_map(&step.env));

        let mut resolved = step.clone();
        resolved.command = step.command.as_deref().map(|c| interpolation.interpolate(c));
        resolved.args = step.args.iter().map(|a| interpolation.interpolate(a)).collect();
        resolved.run = step.run.as_deref().map(|r| interpolation.interpolate(r));
        resolved.working_directory = step
            .working_directory
            .as_deref()
            .map(|d| interpolation.interpolate(d));

        let working_dir = match &resolved.working_directory {
            Some(dir) => self.config.workspace.join(dir),
            None => self.config.workspace.clone(),
        };

        StepContext {
            id: StepId::new(step.name.clone()),
            working_dir,
            env,
            timeout: step
                .timeout_minutes
                .map(|m| Duration::from_secs(u64::from(m) * 60))
                .or(self.config.step_timeout),
            step: resolved,
        }
    }

    async fn run_step(&self, ctx: &StepContext, output: &mut Vec<OutputLine>) -> StepReport {
        let (tx, rx) = mpsc::channel(self.config.output_buffer.max(1));
        let (result, lines) = tokio::join!(self.runner.execute(ctx, tx), collect_output(rx));
        output.extend(lines);

        match result {
            Ok(result) if result.success => StepReport {
                id: ctx.id.clone(),
                status: StepStatus::Succeeded,
                exit_code: Some(result.exit_code),
                duration_ms: result.duration_ms,
                error: None,
            },
            Ok(result) => StepReport {
                id: ctx.id.clone(),
                status: StepStatus::Failed,
                exit_code: Some(result.exit_code),
                duration_ms: result.duration_ms,
                error: Some(
                    Error::StepFailed {
                        step: ctx.id.to_string(),
                        exit_code: result.exit_code,
                    }
                    .to_string(),
                ),
            },
            Err(e) => StepReport {
                id: ctx.id.clone(),
                status: StepStatus::Failed,
                exit_code: None,
                duration_ms: 0,
                error: Some(e.to_string()),
            },
        }
    }

    async fn execute_steps(&self, run_id: RunId, instance: &JobInstance) -> Result<ExecutionOutcome> {
        let start = Instant::now();

        // Private scratch space, removed when dropped
        let scratch = TempDir::with_prefix(format!("gantry-{}-", instance.id.slug()))?;
        let base_env = self.instance_env(run_id, instance, scratch.path());
        let interpolation = InterpolationContext::new()
            .with_variables(base_env.clone())
            .with_matrix(instance.parameter_strings());

        let mut steps = Vec::with_capacity(instance.steps.len());
        let mut output = Vec::new();
        let mut failure: Option<String> = None;

        for step in &instance.steps {
            if failure.is_some() {
                steps.push(StepReport {
                    id: StepId::new(step.name.clone()),
                    status: StepStatus::NotRun,
                    exit_code: None,
                    duration_ms: 0,
                    error: None,
                });
                continue;
            }

            let ctx = self.prepare_step(step, &base_env, &interpolation);
            let report = self.run_step(&ctx, &mut output).await;

            if report.status == StepStatus::Failed {
                let message = report.error.clone().unwrap_or_default();
                if step.continue_on_error {
                    warn!(step = %report.id, error = %message, "Step failed, continuing");
                } else {
                    error!(step = %report.id, error = %message, "Step failed");
                    failure = Some(message);
                }
            } else {
                info!(step = %report.id, duration_ms = report.duration_ms, "Step completed");
            }
            steps.push(report);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        Ok(ExecutionOutcome {
            success: failure.is_none(),
            steps,
            output,
            duration_ms,
            error: failure,
        })
    }
}

#[async_trait]
impl InstanceExecutor for InstanceRunner {
    async fn execute(&self, run_id: RunId, instance: &JobInstance) -> ExecutionOutcome {
        let start = Instant::now();
        info!(instance = %instance.id, steps = instance.steps.len(), "Starting instance execution");

        match self.execute_steps(run_id, instance).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(instance = %instance.id, error = %e, "Instance setup failed");
                ExecutionOutcome::failed(e.to_string(), start.elapsed().as_millis() as u64)
            }
        }
    }
}

async fn collect_output(mut rx: mpsc::Receiver<OutputLine>) -> Vec<OutputLine> {
    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        match line.stream {
            LogStream::Stdout => debug!(target: "gantry::output", step = %line.step, "{}", line.content),
            LogStream::Stderr => debug!(target: "gantry::output", step = %line.step, stream = "stderr", "{}", line.content),
        }
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessRunner;
    use gantry_core::ids::InstanceId;
    use serde_json::json;

    fn step(name: &str, run: &str) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            command: None,
            args: vec![],
            run: Some(run.to_string()),
            shell: "sh".to_string(),
            env: IndexMap::new(),
            working_directory: None,
            timeout_minutes: None,
            continue_on_error: false,
        }
    }

    fn instance(steps: Vec<StepDefinition>) -> JobInstance {
        JobInstance {
            id: InstanceId::for_cell("build", 2),
            job: "build".to_string(),
            index: Some(2),
            display_name: "build (linux)".to_string(),
            parameters: IndexMap::from([("os".to_string(), json!("linux"))]),
            allow_failure: false,
            env: IndexMap::from([("LEVEL".to_string(), "job".to_string())]),
            timeout_minutes: None,
            steps,
        }
    }

    fn runner() -> InstanceRunner {
        let config = RunnerConfig {
            workspace: std::env::temp_dir(),
            ..Default::default()
        };
        InstanceRunner::new(Arc::new(ProcessRunner::new()), config)
    }

    fn stdout(outcome: &ExecutionOutcome) -> Vec<String> {
        outcome
            .output
            .iter()
            .filter(|l| l.stream == LogStream::Stdout)
            .map(|l| l.content.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_environment_layers_and_interpolation() {
        let mut second = step("second", "echo \"$LEVEL ${{ matrix.os }} $MATRIX_OS $GANTRY_INSTANCE\"");
        second.env = IndexMap::from([("LEVEL".to_string(), "step".to_string())]);
        let inst = instance(vec![step("first", "echo $LEVEL"), second]);

        let outcome = runner().execute(RunId::new(), &inst).await;
        assert!(outcome.success);
        assert_eq!(
            stdout(&outcome),
            vec!["job".to_string(), "step linux linux build[2]".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_step_stops_instance() {
        let inst = instance(vec![
            step("ok", "true"),
            step("broken", "exit 4"),
            step("after", "echo unreachable"),
        ]);

        let outcome = runner().execute(RunId::new(), &inst).await;
        assert!(!outcome.success);
        let statuses: Vec<StepStatus> = outcome.steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::NotRun]
        );
        assert_eq!(outcome.steps[1].exit_code, Some(4));
        assert!(outcome.error.unwrap().contains("broken"));
    }

    #[tokio::test]
    async fn test_continue_on_error() {
        let mut flaky = step("flaky", "exit 1");
        flaky.continue_on_error = true;
        let inst = instance(vec![flaky, step("after", "echo reached")]);

        let outcome = runner().execute(RunId::new(), &inst).await;
        assert!(outcome.success);
        assert_eq!(outcome.steps[0].status, StepStatus::Failed);
        assert_eq!(stdout(&outcome), vec!["reached".to_string()]);
    }

    #[tokio::test]
    async fn test_scratch_dir_is_private_and_removed() {
        let inst = instance(vec![step("scratch", "test -d \"$GANTRY_SCRATCH\" && echo $GANTRY_SCRATCH")]);

        let outcome = runner().execute(RunId::new(), &inst).await;
        assert!(outcome.success);
        let path = stdout(&outcome).pop().unwrap();
        assert!(!std::path::Path::new(&path).exists());
    }
}
