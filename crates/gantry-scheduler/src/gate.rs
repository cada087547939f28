//! Result aggregation and the overall run gate.

use crate::dag::ExecutionPlan;
use crate::state::RunState;
use chrono::{DateTime, Utc};
use gantry_core::ids::{InstanceId, RunId, Trigger};
use gantry_core::run::{InstanceReport, OverallStatus, RunReport, RunStatus};
use gantry_core::{Error, Result};

/// Identity and timing of the run being aggregated.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub run_id: RunId,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
}

/// Computes the overall status once every instance is terminal.
pub struct Gate;

impl Gate {
    /// `Failed` if any instance without allow-failure failed, otherwise
    /// `Succeeded`.
    pub fn overall_status<'a>(instances: impl IntoIterator<Item = &'a InstanceReport>) -> OverallStatus {
        if instances.into_iter().any(InstanceReport::is_blocking_failure) {
            OverallStatus::Failed
        } else {
            OverallStatus::Succeeded
        }
    }

    /// Build the run report. An instance left non-terminal is a scheduler
    /// defect and is reported as [`Error::Aggregation`].
    pub fn evaluate(plan: &ExecutionPlan, state: &RunState, meta: RunMetadata) -> Result<RunReport> {
        let unresolved = state.unresolved();
        if !unresolved.is_empty() {
            let listed: Vec<String> = unresolved
                .iter()
                .map(|(id, status)| format!("{} ({})", id, status))
                .collect();
            return Err(Error::Aggregation(format!(
                "instances never reached a terminal state: {}",
                listed.join(", ")
            )));
        }

        let mut instances = Vec::with_capacity(plan.len());
        for instance in plan.instances() {
            let record = state.record(&instance.id).ok_or_else(|| {
                Error::Aggregation(format!("no status recorded for `{}`", instance.id))
            })?;

            let (steps, output, duration_ms, mut error) = match &record.outcome {
                Some(outcome) => (
                    outcome.steps.clone(),
                    outcome.output.clone(),
                    Some(outcome.duration_ms),
                    outcome.error.clone(),
                ),
                None => (Vec::new(), Vec::new(), None, None),
            };
            if record.status == RunStatus::Skipped {
                let mut causes = state.blocking_prerequisites(plan, &instance.id);
                if causes.is_empty() {
                    causes.extend(record.skipped_because.clone());
                }
                error = skip_reason(&causes).or(error);
            }

            instances.push(InstanceReport {
                id: instance.id.clone(),
                job: instance.job.clone(),
                display_name: instance.display_name.clone(),
                parameters: instance.parameters.clone(),
                allow_failure: instance.allow_failure,
                status: record.status,
                steps,
                error,
                duration_ms,
                output,
            });
        }

        let status = Self::overall_status(&instances);
        let completed_at = Utc::now();
        let duration_ms = (completed_at - meta.started_at).num_milliseconds().max(0) as u64;

        Ok(RunReport {
            run_id: meta.run_id,
            workflow: plan.workflow().to_string(),
            trigger: meta.trigger,
            status,
            instances,
            warnings: plan.warnings().iter().map(|w| w.to_string()).collect(),
            started_at: meta.started_at,
            completed_at,
            duration_ms,
        })
    }
}

fn skip_reason(causes: &[InstanceId]) -> Option<String> {
    let listed: Vec<String> = causes.iter().map(|id| format!("`{}`", id)).collect();
    match listed.len() {
        0 => None,
        1 => Some(format!("skipped: required prerequisite {} did not pass", listed[0])),
        _ => Some(format!(
            "skipped: required prerequisites {} did not pass",
            listed.join(", ")
        )),
    }
}
