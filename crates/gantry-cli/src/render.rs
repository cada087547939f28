//! Terminal rendering of plans and run reports.

use console::style;
use gantry_core::run::{InstanceReport, LogStream, RunReport, RunStatus, StepStatus};
use gantry_scheduler::ExecutionPlan;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

fn status_marker(instance: &InstanceReport) -> String {
    match instance.status {
        RunStatus::Succeeded => style("✓").green().to_string(),
        RunStatus::Failed if instance.allow_failure => style("!").yellow().to_string(),
        RunStatus::Failed => style("✗").red().to_string(),
        RunStatus::Skipped => style("-").dim().to_string(),
        _ => style("?").dim().to_string(),
    }
}

/// Expanded instances grouped by dependency wave.
pub fn render_plan(plan: &ExecutionPlan) -> Result<String, gantry_core::Error> {
    let mut out = String::new();
    let waves = plan.waves().map_err(gantry_core::Error::from)?;

    let _ = writeln!(
        out,
        "{} {} ({} instances)",
        style("▶").cyan().bold(),
        style(plan.workflow()).bold(),
        plan.len()
    );
    for (i, wave) in waves.iter().enumerate() {
        let _ = writeln!(out, "  {} {}", style("wave").dim(), i + 1);
        for instance in wave {
            let marker = if instance.allow_failure {
                format!(" {}", style("(allow failure)").yellow())
            } else {
                String::new()
            };
            let _ = writeln!(out, "    - {} [{}]{}", instance.display_name, instance.id, marker);
        }
    }
    for warning in plan.warnings() {
        let _ = writeln!(out, "{} {}", style("⚠").yellow(), warning);
    }
    Ok(out)
}

/// Human-readable run summary.
pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{} {} ({}, trigger {})",
        style("▶").cyan().bold(),
        style(&report.workflow).bold(),
        style(report.run_id).dim(),
        report.trigger
    );

    for instance in &report.instances {
        let duration = instance
            .duration_ms
            .map(|ms| format!(" {}", style(format!("{}ms", ms)).dim()))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "  {} {} {}{}",
            status_marker(instance),
            instance.display_name,
            style(instance.status).dim(),
            duration
        );

        for step in &instance.steps {
            if step.status == StepStatus::Failed {
                let _ = writeln!(
                    out,
                    "      {} {}",
                    style("✗").red(),
                    step.error.as_deref().unwrap_or(step.id.as_str())
                );
            }
        }
        if instance.steps.is_empty()
            && let Some(error) = &instance.error
        {
            let _ = writeln!(out, "      {}", style(error).dim());
        }
    }

    for warning in &report.warnings {
        let _ = writeln!(out, "{} {}", style("⚠").yellow(), warning);
    }

    let counts = report.counts();
    let headline = if report.status.is_success() {
        style("✓ Run succeeded").green().bold()
    } else {
        style("✗ Run failed").red().bold()
    };
    let _ = writeln!(
        out,
        "\n{} in {}ms: {} succeeded, {} failed, {} allowed failures, {} skipped",
        headline,
        report.duration_ms,
        counts.succeeded,
        counts.failed,
        counts.allowed_failures,
        counts.skipped
    );
    out
}

/// Write one log file per executed instance under `<dir>/<run id>/`.
pub fn write_instance_logs(dir: &Path, report: &RunReport) -> std::io::Result<Vec<PathBuf>> {
    let run_dir = dir.join(report.run_id.to_string());
    std::fs::create_dir_all(&run_dir)?;

    let mut written = Vec::new();
    for instance in &report.instances {
        if instance.status == RunStatus::Skipped {
            continue;
        }

        let mut content = String::new();
        let _ = writeln!(content, "# {} ({})", instance.display_name, instance.status);
        for line in &instance.output {
            let stream = match line.stream {
                LogStream::Stdout => "out",
                LogStream::Stderr => "err",
            };
            let _ = writeln!(
                content,
                "{} [{}] {}: {}",
                line.timestamp.to_rfc3339(),
                line.step,
                stream,
                line.content
            );
        }

        let path = run_dir.join(format!("{}.log", instance.id.slug()));
        std::fs::write(&path, content)?;
        written.push(path);
    }
    Ok(written)
}
