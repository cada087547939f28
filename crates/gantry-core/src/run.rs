//! Run, outcome and report types.

use crate::ids::{InstanceId, RunId, StepId, Trigger};
use crate::workflow::MatrixCell;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Blocked,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Skipped
        )
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Blocked)
                | (RunStatus::Blocked, RunStatus::Running)
                | (RunStatus::Blocked, RunStatus::Skipped)
                | (RunStatus::Running, RunStatus::Succeeded)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Blocked => "blocked",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Overall result of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Succeeded,
    Failed,
}

impl OverallStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, OverallStatus::Succeeded)
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Succeeded => f.write_str("succeeded"),
            OverallStatus::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One line of streamed process output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputLine {
    pub step: StepId,
    pub stream: LogStream,
    pub line_number: u32,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    NotRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub id: StepId,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What the executor hands back for one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub steps: Vec<StepReport>,
    pub output: Vec<OutputLine>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(steps: Vec<StepReport>, output: Vec<OutputLine>, duration_ms: u64) -> Self {
        Self {
            success: true,
            steps,
            output,
            duration_ms,
            error: None,
        }
    }

    /// An outcome for an instance that failed without producing step results,
    /// e.g. a timeout or an executor panic.
    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            steps: Vec::new(),
            output: Vec::new(),
            duration_ms,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceReport {
    pub id: InstanceId,
    pub job: String,
    pub display_name: String,
    pub parameters: MatrixCell,
    pub allow_failure: bool,
    pub status: RunStatus,
    pub steps: Vec<StepReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<OutputLine>,
}

impl InstanceReport {
    /// Failed, but the failure does not count against the run.
    pub fn is_allowed_failure(&self) -> bool {
        self.status == RunStatus::Failed && self.allow_failure
    }

    /// Failed and the failure gates the run.
    pub fn is_blocking_failure(&self) -> bool {
        self.status == RunStatus::Failed && !self.allow_failure
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub allowed_failures: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub workflow: String,
    pub trigger: Trigger,
    pub status: OverallStatus,
    pub instances: Vec<InstanceReport>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Process exit code for this report: 0 on overall success.
    pub fn exit_code(&self) -> i32 {
        if self.status.is_success() { 0 } else { 1 }
    }

    pub fn instance(&self, id: &InstanceId) -> Option<&InstanceReport> {
        self.instances.iter().find(|i| &i.id == id)
    }

    /// All instances expanded from the named job.
    pub fn job_instances<'a>(&'a self, job: &'a str) -> impl Iterator<Item = &'a InstanceReport> {
        self.instances.iter().filter(move |i| i.job == job)
    }

    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts::default();
        for instance in &self.instances {
            match instance.status {
                RunStatus::Succeeded => counts.succeeded += 1,
                RunStatus::Failed if instance.allow_failure => counts.allowed_failures += 1,
                RunStatus::Failed => counts.failed += 1,
                RunStatus::Skipped => counts.skipped += 1,
                _ => {}
            }
        }
        counts
    }
}
