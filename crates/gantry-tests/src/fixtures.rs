//! Test fixtures for creating sample workflows.

use gantry_core::workflow::{
    JobDefinition, MatrixConfig, MatrixInclude, StepDefinition, TriggerConfig, TriggerType,
    WorkflowDefinition,
};
use indexmap::IndexMap;
use serde_json::json;

/// Factory for creating test workflows.
pub struct WorkflowFixture;

impl WorkflowFixture {
    /// A workflow around the given jobs, with a push trigger.
    pub fn with_jobs(name: &str, jobs: Vec<JobDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: name.to_string(),
            description: None,
            triggers: vec![TriggerConfig {
                trigger_type: TriggerType::Push,
                branches: vec!["main".to_string()],
            }],
            env: IndexMap::new(),
            jobs,
        }
    }

    /// The canonical CI shape: a style gate in front of a 7-cell build
    /// matrix, a best-effort nightly build and a minimum-version check.
    ///
    /// Instances: `style`, `build[0]..build[6]`, `nightly`, `minversion`.
    pub fn rust_ci() -> WorkflowDefinition {
        let mut build = Self::job("build", &["style"]);
        build.matrix = Some(MatrixConfig {
            axes: IndexMap::from([
                (
                    "os".to_string(),
                    vec![json!("ubuntu-latest"), json!("macos-latest"), json!("windows-latest")],
                ),
                ("rust".to_string(), vec![json!("stable"), json!("beta")]),
            ]),
            include: vec![MatrixInclude {
                allow_failure: None,
                values: IndexMap::from([
                    ("os".to_string(), json!("ubuntu-latest")),
                    ("rust".to_string(), json!("1.70")),
                ]),
            }],
            exclude: vec![],
            max_parallel: None,
        });

        let mut nightly = Self::job("nightly", &["style"]);
        nightly.allow_failure = true;

        Self::with_jobs(
            "rust-ci",
            vec![
                Self::job("style", &[]),
                build,
                nightly,
                Self::job("minversion", &["style"]),
            ],
        )
    }

    /// `rust_ci` with nightly folded into the build matrix as a cell with
    /// its own allow-failure override, plus a `package` job after `build`.
    ///
    /// The nightly cell is `build[7]`.
    pub fn rust_ci_inline_nightly() -> WorkflowDefinition {
        let mut workflow = Self::rust_ci();
        workflow.jobs.retain(|job| job.name != "nightly");

        if let Some(build) = workflow.jobs.iter_mut().find(|job| job.name == "build")
            && let Some(matrix) = build.matrix.as_mut()
        {
            matrix.include.push(MatrixInclude {
                allow_failure: Some(true),
                values: IndexMap::from([
                    ("os".to_string(), json!("ubuntu-latest")),
                    ("rust".to_string(), json!("nightly")),
                ]),
            });
        }

        workflow.jobs.push(Self::job("package", &["build"]));
        workflow
    }

    /// `n` jobs, each needing the previous one.
    pub fn linear(n: usize) -> WorkflowDefinition {
        let jobs = (0..n)
            .map(|i| {
                let name = format!("job{}", i);
                if i == 0 {
                    Self::job(&name, &[])
                } else {
                    let prev = format!("job{}", i - 1);
                    Self::job(&name, &[prev.as_str()])
                }
            })
            .collect();
        Self::with_jobs("linear", jobs)
    }

    /// A single job whose matrix has `n` independent cells.
    pub fn wide(n: usize) -> WorkflowDefinition {
        let mut job = Self::job("wide", &[]);
        job.matrix = Some(MatrixConfig {
            axes: IndexMap::from([("shard".to_string(), (0..n).map(|i| json!(i)).collect())]),
            ..Default::default()
        });
        Self::with_jobs("wide", vec![job])
    }

    /// A job with a single `true` step.
    pub fn job(name: &str, needs: &[&str]) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            display_name: None,
            needs: needs.iter().map(|s| s.to_string()).collect(),
            matrix: None,
            allow_failure: false,
            env: IndexMap::new(),
            timeout_minutes: None,
            steps: vec![Self::script_step("run", "true")],
        }
    }

    /// A shell step.
    pub fn script_step(name: &str, run: &str) -> StepDefinition {
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
}
