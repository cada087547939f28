//! Concrete, runnable expansions of jobs.

use crate::ids::InstanceId;
use crate::workflow::{MatrixCell, StepDefinition};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One job crossed with one matrix cell (or the job itself when it has no
/// matrix). Instances are immutable once expanded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: InstanceId,
    pub job: String,
    /// Position of the cell in the job's expansion; `None` for non-matrix jobs.
    pub index: Option<usize>,
    pub display_name: String,
    /// Axis values followed by auxiliary fields attached to this cell.
    pub parameters: MatrixCell,
    /// Effective allow-failure flag: the cell override when present,
    /// otherwise the job-level flag.
    pub allow_failure: bool,
    /// Workflow and job environment, job entries winning.
    pub env: IndexMap<String, String>,
    pub timeout_minutes: Option<u32>,
    pub steps: Vec<StepDefinition>,
}

impl JobInstance {
    /// Matrix parameters rendered as strings, keyed by field name.
    pub fn parameter_strings(&self) -> IndexMap<String, String> {
        self.parameters
            .iter()
            .map(|(k, v)| (k.clone(), value_to_string(v)))
            .collect()
    }

    /// Matrix parameters as environment variables (`MATRIX_<FIELD>`).
    pub fn parameter_env(&self) -> IndexMap<String, String> {
        self.parameters
            .iter()
            .map(|(k, v)| (format!("MATRIX_{}", env_key(k)), value_to_string(v)))
            .collect()
    }
}

/// Render a matrix value without JSON quoting for strings.
pub fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn env_key(field: &str) -> String {
    field
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance(parameters: MatrixCell) -> JobInstance {
        JobInstance {
            id: InstanceId::for_cell("build", 0),
            job: "build".to_string(),
            index: Some(0),
            display_name: "build".to_string(),
            parameters,
            allow_failure: false,
            env: IndexMap::new(),
            timeout_minutes: None,
            steps: vec![],
        }
    }

    #[test]
    fn test_parameter_env() {
        let mut params = MatrixCell::new();
        params.insert("os".to_string(), json!("ubuntu-latest"));
        params.insert("rust-version".to_string(), json!("1.70"));
        params.insert("features".to_string(), json!(true));

        let env = instance(params).parameter_env();
        assert_eq!(env.get("MATRIX_OS").map(String::as_str), Some("ubuntu-latest"));
        assert_eq!(env.get("MATRIX_RUST_VERSION").map(String::as_str), Some("1.70"));
        assert_eq!(env.get("MATRIX_FEATURES").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!("stable")), "stable");
        assert_eq!(value_to_string(&json!(3)), "3");
        assert_eq!(value_to_string(&json!(null)), "");
    }
}
