//! Parsing tests for the workflow document and report serialization.

use chrono::Utc;
use gantry_core::ids::{InstanceId, RunId, Trigger};
use gantry_core::run::{OverallStatus, RunReport, RunStatus, InstanceReport};
use gantry_core::workflow::{TriggerType, WorkflowDefinition};
use gantry_core::Error;
use pretty_assertions::assert_eq;
use serde_json::json;

const RUST_CI: &str = r#"
name: rust-ci
triggers:
  - type: pull_request
  - type: push
    branches: [main]
env:
  CARGO_TERM_COLOR: always
jobs:
  - name: style
    steps:
      - name: fmt
        command: cargo
        args: [fmt, --all, --, --check]
  - name: build
    needs: [style]
    matrix:
      axes:
        os: [ubuntu-latest, macos-latest, windows-latest]
        rust: [stable, beta]
      include:
        - os: ubuntu-latest
          rust: stable
          target: i686-unknown-linux-gnu
        - os: ubuntu-latest
          rust: nightly
          allow_failure: true
      max_parallel: 4
    steps:
      - name: toolchain
        run: rustup default ${{ matrix.rust }}
      - name: test
        command: cargo
        args: [test]
        continue_on_error: false
  - name: minversion
    needs: [style]
    timeout_minutes: 20
    steps:
      - name: check
        command: cargo
        args: [check]
"#;

#[test]
fn test_parse_rust_ci_document() {
    let wf: WorkflowDefinition = serde_yaml::from_str(RUST_CI).expect("parse");
    wf.validate().expect("valid");

    assert_eq!(wf.name, "rust-ci");
    assert_eq!(wf.triggers.len(), 2);
    assert_eq!(wf.triggers[0].trigger_type, TriggerType::PullRequest);
    assert_eq!(wf.triggers[1].branches, vec!["main".to_string()]);
    assert_eq!(wf.env.get("CARGO_TERM_COLOR").map(String::as_str), Some("always"));

    let build = wf.job("build").expect("build job");
    assert_eq!(build.needs, vec!["style".to_string()]);
    assert!(!build.allow_failure);

    let matrix = build.matrix.as_ref().expect("matrix");
    let axes: Vec<&str> = matrix.axes.keys().map(String::as_str).collect();
    assert_eq!(axes, vec!["os", "rust"]);
    assert_eq!(matrix.axes["os"].len(), 3);
    assert_eq!(matrix.max_parallel, Some(4));

    assert_eq!(matrix.include.len(), 2);
    assert_eq!(matrix.include[0].allow_failure, None);
    assert_eq!(matrix.include[0].values.get("target"), Some(&json!("i686-unknown-linux-gnu")));
    assert_eq!(matrix.include[1].allow_failure, Some(true));
    assert!(!matrix.include[1].values.contains_key("allow_failure"));

    assert_eq!(build.steps[0].shell, "sh");
    assert_eq!(build.steps[1].command.as_deref(), Some("cargo"));
    assert_eq!(wf.job("minversion").and_then(|j| j.timeout_minutes), Some(20));
}

#[test]
fn test_parse_rejects_step_with_both_forms() {
    let doc = r#"
name: bad
jobs:
  - name: build
    steps:
      - name: both
        command: cargo
        run: cargo build
"#;
    let wf: WorkflowDefinition = serde_yaml::from_str(doc).expect("parse");
    assert!(matches!(wf.validate(), Err(Error::MalformedStep { .. })));
}

#[test]
fn test_parse_rejects_unknown_trigger_type() {
    let doc = r#"
name: bad
triggers:
  - type: carrier_pigeon
jobs: []
"#;
    assert!(serde_yaml::from_str::<WorkflowDefinition>(doc).is_err());
}

#[test]
fn test_report_json_shape() {
    let now = Utc::now();
    let report = RunReport {
        run_id: RunId::new(),
        workflow: "rust-ci".to_string(),
        trigger: Trigger::from("push"),
        status: OverallStatus::Succeeded,
        instances: vec![InstanceReport {
            id: InstanceId::for_job("nightly"),
            job: "nightly".to_string(),
            display_name: "nightly".to_string(),
            parameters: Default::default(),
            allow_failure: true,
            status: RunStatus::Failed,
            steps: vec![],
            error: Some("step `test` failed with exit code 101".to_string()),
            duration_ms: Some(1200),
            output: vec![],
        }],
        warnings: vec![],
        started_at: now,
        completed_at: now,
        duration_ms: 1200,
    };

    let value = serde_json::to_value(&report).expect("serialize");
    assert_eq!(value["status"], json!("succeeded"));
    assert_eq!(value["trigger"], json!("push"));
    assert_eq!(value["instances"][0]["status"], json!("failed"));
    assert!(value["instances"][0].get("output").is_none());

    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.counts().allowed_failures, 1);
}
