//! Command handlers.

use crate::config::{CliConfig, OutputFormat};
use crate::render;
use crate::workflow::{find_workflow_file, load_workflow};
use console::style;
use gantry_core::ids::Trigger;
use gantry_core::workflow::WorkflowDefinition;
use gantry_runner::{InstanceRunner, ProcessRunner, RunnerConfig};
use gantry_scheduler::{DagBuilder, ExecutionPlan, Scheduler, SchedulerConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

type HandlerResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Options of `gantry run` after merging flags over the configuration file.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub file: Option<PathBuf>,
    pub trigger: String,
    pub max_parallel: usize,
    pub instance_timeout_minutes: u32,
    pub format: OutputFormat,
    pub report: Option<PathBuf>,
    pub strict: bool,
}

impl RunOptions {
    #[allow(clippy::too_many_arguments)]
    pub fn resolve(
        config: &CliConfig,
        file: Option<PathBuf>,
        trigger: String,
        max_parallel: Option<usize>,
        timeout: Option<u32>,
        format: Option<OutputFormat>,
        report: Option<PathBuf>,
        strict: bool,
    ) -> Self {
        Self {
            file,
            trigger,
            max_parallel: max_parallel.unwrap_or(config.max_parallel).max(1),
            instance_timeout_minutes: timeout.unwrap_or(config.instance_timeout_minutes),
            format: format.unwrap_or(config.output_format),
            report,
            strict: strict || config.strict_matrix,
        }
    }

    /// Wall-clock limit per instance; `0` minutes disables it.
    pub fn instance_timeout(&self) -> Option<Duration> {
        match self.instance_timeout_minutes {
            0 => None,
            minutes => Some(Duration::from_secs(u64::from(minutes) * 60)),
        }
    }
}

fn load_plan(
    file: Option<&Path>,
    strict: bool,
) -> HandlerResult<(PathBuf, WorkflowDefinition, ExecutionPlan)> {
    let path = find_workflow_file(file, Path::new("."))?;
    let workflow = load_workflow(&path)?;
    let plan = DagBuilder::new().strict_matrix(strict).build(&workflow)?;
    Ok((path, workflow, plan))
}

/// Validate a workflow without executing it.
pub fn validate(config: &CliConfig, file: Option<&Path>, strict: bool) -> HandlerResult<ExitCode> {
    let (path, workflow, plan) = load_plan(file, strict || config.strict_matrix)?;

    println!(
        "{} Workflow \"{}\" is valid ({})",
        style("✓").green(),
        workflow.name,
        style(path.display()).dim()
    );
    println!("  Jobs: {}", workflow.jobs.len());
    for job in &workflow.jobs {
        let count = plan.job_instances(&job.name).len();
        let needs = if job.needs.is_empty() {
            String::new()
        } else {
            format!(" needs {}", job.needs.join(", "))
        };
        println!(
            "    - {} ({} instance{}){}",
            job.name,
            count,
            if count == 1 { "" } else { "s" },
            style(needs).dim()
        );
    }
    for warning in plan.warnings() {
        println!("{} {}", style("⚠").yellow(), warning);
    }

    Ok(ExitCode::SUCCESS)
}

/// Print the expanded plan.
pub fn plan(config: &CliConfig, file: Option<&Path>, strict: bool) -> HandlerResult<ExitCode> {
    let (_, _, plan) = load_plan(file, strict || config.strict_matrix)?;
    print!("{}", render::render_plan(&plan)?);
    Ok(ExitCode::SUCCESS)
}

/// Execute a workflow and report the result through the exit code.
pub async fn run(config: &CliConfig, options: RunOptions) -> HandlerResult<ExitCode> {
    let (path, workflow, plan) = load_plan(options.file.as_deref(), options.strict)?;

    if !workflow.accepts_trigger(&options.trigger) {
        warn!(
            trigger = %options.trigger,
            "Trigger matches none of the workflow's declared triggers; running anyway"
        );
    }
    info!(workflow = %workflow.name, path = %path.display(), "Loaded workflow");

    let runner = InstanceRunner::new(
        Arc::new(ProcessRunner::new()),
        RunnerConfig {
            workspace: config.workspace.clone(),
            ..Default::default()
        },
    );
    let scheduler = Scheduler::new(
        Arc::new(runner),
        SchedulerConfig {
            max_parallel: options.max_parallel,
            instance_timeout: options.instance_timeout(),
        },
    );

    let report = scheduler.run(&plan, Trigger::new(options.trigger)).await?;

    match options.format {
        OutputFormat::Table => print!("{}", render::render_report(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if let Some(report_path) = &options.report {
        std::fs::write(report_path, serde_json::to_string_pretty(&report)?)?;
        info!(path = %report_path.display(), "Wrote run report");
    }

    if let Some(log_dir) = &config.log_dir {
        let written = render::write_instance_logs(log_dir, &report)?;
        info!(dir = %log_dir.display(), files = written.len(), "Wrote instance logs");
    }

    Ok(ExitCode::from(report.exit_code() as u8))
}

/// Print the JSON schema of the workflow document.
pub fn schema() -> HandlerResult<ExitCode> {
    let schema = schemars::schema_for!(WorkflowDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(ExitCode::SUCCESS)
}

/// Show configuration.
pub fn show_config(config: &CliConfig, path: Option<&Path>) -> HandlerResult<ExitCode> {
    println!("Current configuration:");
    println!("  max_parallel: {}", config.max_parallel);
    println!("  instance_timeout_minutes: {}", config.instance_timeout_minutes);
    println!("  workspace: {}", config.workspace.display());
    println!(
        "  log_dir: {}",
        config
            .log_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not set)".to_string())
    );
    println!("  strict_matrix: {}", config.strict_matrix);
    println!("  output_format: {:?}", config.output_format);

    let file = match path {
        Some(p) => Some(p.to_path_buf()),
        None => CliConfig::config_path().ok(),
    };
    if let Some(file) = file {
        println!("\nConfig file: {}", file.display());
    }

    Ok(ExitCode::SUCCESS)
}

/// Set configuration.
pub fn set_config(path: Option<&Path>, key: &str, value: &str) -> HandlerResult<ExitCode> {
    let mut config = CliConfig::load(path)?;
    config.set(key, value)?;
    config.save(path)?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(ExitCode::SUCCESS)
}
