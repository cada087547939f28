//! Workflow definition types.
//!
//! These types represent the user-authored workflow YAML document: triggers,
//! jobs with their `needs`, matrices and ordered steps.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    pub jobs: Vec<JobDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Push,
    PullRequest,
    Schedule,
    Manual,
    Api,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Push => "push",
            TriggerType::PullRequest => "pull_request",
            TriggerType::Schedule => "schedule",
            TriggerType::Manual => "manual",
            TriggerType::Api => "api",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
    #[serde(default)]
    pub allow_failure: bool,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepDefinition {
    pub name: String,
    /// Program to invoke directly with `args`.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Script handed to `shell -c`.
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub continue_on_error: bool,
}

fn default_shell() -> String {
    "sh".to_string()
}

/// A matrix value: strings, numbers and booleans are all accepted.
pub type MatrixValue = serde_json::Value;

/// One cell's worth of field values, in axis order.
pub type MatrixCell = IndexMap<String, MatrixValue>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MatrixConfig {
    #[serde(default)]
    pub axes: IndexMap<String, Vec<MatrixValue>>,
    #[serde(default)]
    pub include: Vec<MatrixInclude>,
    #[serde(default)]
    pub exclude: Vec<MatrixCell>,
    #[serde(default)]
    pub max_parallel: Option<u32>,
}

/// An extra cell, or auxiliary fields attached to existing cells.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MatrixInclude {
    /// Overrides the job-level `allow_failure` for the cells this entry
    /// produces or matches.
    #[serde(default)]
    pub allow_failure: Option<bool>,
    #[serde(flatten)]
    pub values: MatrixCell,
}

impl StepDefinition {
    fn validate(&self, job: &str) -> Result<()> {
        let malformed = |reason: &str| Error::MalformedStep {
            job: job.to_string(),
            step: self.name.clone(),
            reason: reason.to_string(),
        };

        match (&self.command, &self.run) {
            (Some(_), Some(_)) => Err(malformed("`command` and `run` are mutually exclusive")),
            (None, None) => Err(malformed("one of `command` or `run` is required")),
            (Some(command), None) if command.trim().is_empty() => {
                Err(malformed("`command` is empty"))
            }
            (None, Some(script)) if script.trim().is_empty() => Err(malformed("`run` is empty")),
            (None, Some(_)) if !self.args.is_empty() => {
                Err(malformed("`args` can only be used with `command`"))
            }
            (None, Some(_)) if self.shell.trim().is_empty() => Err(malformed("`shell` is empty")),
            _ => Ok(()),
        }
    }
}

impl WorkflowDefinition {
    /// Look up a job by name.
    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|job| job.name == name)
    }

    /// Structural validation performed before expansion.
    ///
    /// Cycles are detected later by the graph builder; everything else that
    /// can be checked from the document alone is checked here.
    pub fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            return Err(Error::Configuration("workflow has no jobs".to_string()));
        }

        let mut names = HashSet::new();
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                return Err(Error::Configuration("job name must not be empty".to_string()));
            }
            if !is_valid_job_name(&job.name) {
                return Err(Error::Configuration(format!(
                    "job name `{}` may only contain ASCII letters, digits, `-` and `_`",
                    job.name
                )));
            }
            if !names.insert(job.name.as_str()) {
                return Err(Error::DuplicateJob(job.name.clone()));
            }
        }

        for job in &self.jobs {
            for needed in &job.needs {
                if !names.contains(needed.as_str()) {
                    return Err(Error::UnknownJob {
                        job: job.name.clone(),
                        needed: needed.clone(),
                    });
                }
            }

            if job.timeout_minutes == Some(0)
                || job.steps.iter().any(|step| step.timeout_minutes == Some(0))
            {
                return Err(Error::Configuration(format!(
                    "job `{}` sets a timeout of 0 minutes",
                    job.name
                )));
            }

            if job.steps.is_empty() {
                return Err(Error::Configuration(format!("job `{}` has no steps", job.name)));
            }

            let mut step_names = HashSet::new();
            for step in &job.steps {
                if step.name.trim().is_empty() {
                    return Err(Error::Configuration(format!(
                        "job `{}` has a step without a name",
                        job.name
                    )));
                }
                if !step_names.insert(step.name.as_str()) {
                    return Err(Error::Configuration(format!(
                        "job `{}` has more than one step named `{}`",
                        job.name, step.name
                    )));
                }
                step.validate(&job.name)?;
            }

            if let Some(matrix) = &job.matrix
                && matrix.max_parallel == Some(0)
            {
                return Err(Error::Configuration(format!(
                    "job `{}` sets matrix.max_parallel to 0",
                    job.name
                )));
            }
        }

        Ok(())
    }

    /// Whether an opaque trigger identifier names one of the declared
    /// trigger types. Workflows without triggers accept anything.
    pub fn accepts_trigger(&self, trigger: &str) -> bool {
        self.triggers.is_empty()
            || self
                .triggers
                .iter()
                .any(|t| t.trigger_type.as_str() == trigger)
    }
}

/// Job names become instance ids (`build[3]`) and log file names, so they
/// are restricted to characters that survive both unchanged.
fn is_valid_job_name(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn step(name: &str) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            command: Some("cargo".to_string()),
            args: vec!["build".to_string()],
            run: None,
            shell: default_shell(),
            env: IndexMap::new(),
            working_directory: None,
            timeout_minutes: None,
            continue_on_error: false,
        }
    }

    fn job(name: &str, needs: &[&str]) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            display_name: None,
            needs: needs.iter().map(|s| s.to_string()).collect(),
            matrix: None,
            allow_failure: false,
            env: IndexMap::new(),
            timeout_minutes: None,
            steps: vec![step("build")],
        }
    }

    fn workflow(jobs: Vec<JobDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "ci".to_string(),
            description: None,
            triggers: vec![],
            env: IndexMap::new(),
            jobs,
        }
    }

    #[test]
    fn test_valid_workflow() {
        let wf = workflow(vec![job("style", &[]), job("build", &["style"])]);
        assert!(wf.validate().is_ok());
        assert_eq!(wf.job("build").map(|j| j.needs.clone()), Some(vec!["style".to_string()]));
    }

    #[test]
    fn test_duplicate_job_rejected() {
        let wf = workflow(vec![job("build", &[]), job("build", &[])]);
        assert!(matches!(wf.validate(), Err(Error::DuplicateJob(name)) if name == "build"));
    }

    #[test]
    fn test_job_name_charset() {
        let wf = workflow(vec![job("build", &[]), job("build[0]", &[])]);
        assert!(matches!(wf.validate(), Err(Error::Configuration(msg)) if msg.contains("build[0]")));

        let wf = workflow(vec![job("a.b", &[])]);
        assert!(matches!(wf.validate(), Err(Error::Configuration(_))));

        let wf = workflow(vec![job("test-unit", &[]), job("test_integration", &[])]);
        assert!(wf.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut bad = job("build", &[]);
        bad.timeout_minutes = Some(0);
        assert!(matches!(workflow(vec![bad]).validate(), Err(Error::Configuration(_))));

        let mut bad = job("build", &[]);
        bad.steps[0].timeout_minutes = Some(0);
        assert!(matches!(workflow(vec![bad]).validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_unknown_needs_rejected() {
        let wf = workflow(vec![job("build", &["lint"])]);
        match wf.validate() {
            Err(Error::UnknownJob { job, needed }) => {
                assert_eq!(job, "build");
                assert_eq!(needed, "lint");
            }
            other => panic!("expected UnknownJob, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_step_rejected() {
        let mut bad = job("build", &[]);
        bad.steps[0].run = Some("make".to_string());
        let wf = workflow(vec![bad]);
        assert!(matches!(wf.validate(), Err(Error::MalformedStep { .. })));

        let mut empty = job("build", &[]);
        empty.steps[0].command = None;
        let wf = workflow(vec![empty]);
        assert!(matches!(wf.validate(), Err(Error::MalformedStep { .. })));
    }

    #[test]
    fn test_empty_workflow_rejected() {
        let wf = workflow(vec![]);
        assert!(matches!(wf.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_accepts_trigger() {
        let mut wf = workflow(vec![job("build", &[])]);
        assert!(wf.accepts_trigger("anything"));

        wf.triggers.push(TriggerConfig {
            trigger_type: TriggerType::PullRequest,
            branches: vec![],
        });
        assert!(wf.accepts_trigger("pull_request"));
        assert!(!wf.accepts_trigger("push"));
    }
}
