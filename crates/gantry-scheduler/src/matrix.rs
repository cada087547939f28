//! Matrix expansion of jobs into concrete instances.

use gantry_core::Error;
use gantry_core::ids::InstanceId;
use gantry_core::instance::{JobInstance, value_to_string};
use gantry_core::workflow::{JobDefinition, MatrixCell, MatrixConfig, WorkflowDefinition};
use indexmap::IndexMap;
use std::fmt;

/// Non-fatal findings produced while expanding a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpansionWarning {
    /// An axis with no values; the job yields zero instances.
    EmptyAxis { job: String, axis: String },
}

impl ExpansionWarning {
    /// Escalate the warning into a configuration error (strict mode).
    pub fn into_error(self) -> Error {
        match self {
            ExpansionWarning::EmptyAxis { job, axis } => Error::EmptyMatrixAxis { job, axis },
        }
    }
}

impl fmt::Display for ExpansionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpansionWarning::EmptyAxis { job, axis } => write!(
                f,
                "matrix axis `{}` of job `{}` has no values; the job will not run",
                axis, job
            ),
        }
    }
}

/// Result of expanding a single job.
#[derive(Debug, Clone)]
pub struct JobExpansion {
    pub job: String,
    pub instances: Vec<JobInstance>,
    pub warnings: Vec<ExpansionWarning>,
    pub max_parallel: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
struct Cell {
    values: MatrixCell,
    allow_failure: Option<bool>,
}

/// Expander for matrix configurations.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand every job of a workflow, in declaration order.
    pub fn expand_all(&self, workflow: &WorkflowDefinition) -> Vec<JobExpansion> {
        workflow
            .jobs
            .iter()
            .map(|job| self.expand(workflow, job))
            .collect()
    }

    /// Expand one job into its instances.
    pub fn expand(&self, workflow: &WorkflowDefinition, job: &JobDefinition) -> JobExpansion {
        let mut env = workflow.env.clone();
        env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let Some(matrix) = &job.matrix else {
            let instance = JobInstance {
                id: InstanceId::for_job(&job.name),
                job: job.name.clone(),
                index: None,
                display_name: self.label(job),
                parameters: MatrixCell::new(),
                allow_failure: job.allow_failure,
                env,
                timeout_minutes: job.timeout_minutes,
                steps: job.steps.clone(),
            };
            return JobExpansion {
                job: job.name.clone(),
                instances: vec![instance],
                warnings: vec![],
                max_parallel: None,
            };
        };

        let warnings: Vec<ExpansionWarning> = matrix
            .axes
            .iter()
            .filter(|(_, values)| values.is_empty())
            .map(|(axis, _)| ExpansionWarning::EmptyAxis {
                job: job.name.clone(),
                axis: axis.clone(),
            })
            .collect();

        let cells = if warnings.is_empty() {
            self.cells(matrix)
        } else {
            Vec::new()
        };

        let instances = cells
            .into_iter()
            .enumerate()
            .map(|(idx, cell)| JobInstance {
                id: InstanceId::for_cell(&job.name, idx),
                job: job.name.clone(),
                index: Some(idx),
                display_name: self.format_display_name(job, matrix, &cell.values),
                allow_failure: cell.allow_failure.unwrap_or(job.allow_failure),
                parameters: cell.values,
                env: env.clone(),
                timeout_minutes: job.timeout_minutes,
                steps: job.steps.clone(),
            })
            .collect();

        JobExpansion {
            job: job.name.clone(),
            instances,
            warnings,
            max_parallel: matrix.max_parallel,
        }
    }

    fn cells(&self, matrix: &MatrixConfig) -> Vec<Cell> {
        let mut cells: Vec<Cell> = if matrix.axes.is_empty() {
            Vec::new()
        } else {
            self.generate_combinations(&matrix.axes)
                .into_iter()
                .map(|values| Cell {
                    values,
                    allow_failure: None,
                })
                .collect()
        };

        // Apply excludes
        cells.retain(|cell| {
            !matrix
                .exclude
                .iter()
                .any(|exclude| self.matches_exclude(&cell.values, exclude))
        });

        let generated = cells.len();

        // Apply includes: attach to matching generated cells, otherwise append
        for include in &matrix.include {
            let axis_fields: Vec<(&String, &serde_json::Value)> = include
                .values
                .iter()
                .filter(|(k, _)| matrix.axes.contains_key(*k))
                .collect();

            // an entry without axis fields matches every generated cell
            let mut matched = false;
            for cell in cells.iter_mut().take(generated) {
                let matches = axis_fields
                    .iter()
                    .all(|(k, v)| cell.values.get(*k) == Some(*v));
                if !matches {
                    continue;
                }
                matched = true;
                for (k, v) in &include.values {
                    if !matrix.axes.contains_key(k) {
                        cell.values.insert(k.clone(), v.clone());
                    }
                }
                if include.allow_failure.is_some() {
                    cell.allow_failure = include.allow_failure;
                }
            }

            if !matched {
                let cell = Cell {
                    values: self.order_fields(&matrix.axes, &include.values),
                    allow_failure: include.allow_failure,
                };
                if !cells.contains(&cell) {
                    cells.push(cell);
                }
            }
        }

        if cells.is_empty() && matrix.axes.is_empty() && matrix.include.is_empty() {
            cells.push(Cell {
                values: MatrixCell::new(),
                allow_failure: None,
            });
        }

        cells
    }

    fn generate_combinations(&self, axes: &IndexMap<String, Vec<serde_json::Value>>) -> Vec<MatrixCell> {
        let mut result = vec![MatrixCell::new()];

        for (axis, values) in axes {
            let mut new_result = Vec::with_capacity(result.len() * values.len());

            for combo in &result {
                for value in values {
                    let mut new_combo = combo.clone();
                    new_combo.insert(axis.clone(), value.clone());
                    new_result.push(new_combo);
                }
            }

            result = new_result;
        }

        result
    }

    fn matches_exclude(&self, cell: &MatrixCell, exclude: &MatrixCell) -> bool {
        !exclude.is_empty()
            && exclude
                .iter()
                .all(|(key, value)| cell.get(key) == Some(value))
    }

    /// Axis fields first in axis order, then auxiliary fields as written.
    fn order_fields(&self, axes: &IndexMap<String, Vec<serde_json::Value>>, values: &MatrixCell) -> MatrixCell {
        let mut ordered = MatrixCell::new();
        for axis in axes.keys() {
            if let Some(v) = values.get(axis) {
                ordered.insert(axis.clone(), v.clone());
            }
        }
        for (k, v) in values {
            if !ordered.contains_key(k) {
                ordered.insert(k.clone(), v.clone());
            }
        }
        ordered
    }

    fn label(&self, job: &JobDefinition) -> String {
        job.display_name.clone().unwrap_or_else(|| job.name.clone())
    }

    fn format_display_name(&self, job: &JobDefinition, matrix: &MatrixConfig, values: &MatrixCell) -> String {
        let label = self.label(job);

        let mut parts: Vec<String> = matrix
            .axes
            .keys()
            .filter_map(|axis| values.get(axis))
            .map(value_to_string)
            .collect();
        if parts.is_empty() {
            parts = values.values().map(value_to_string).collect();
        }

        if parts.is_empty() {
            label
        } else {
            format!("{} ({})", label, parts.join(", "))
        }
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::workflow::{MatrixInclude, StepDefinition};
    use serde_json::json;

    fn make_job(name: &str, matrix: Option<MatrixConfig>) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            display_name: None,
            needs: vec![],
            matrix,
            allow_failure: false,
            env: IndexMap::new(),
            timeout_minutes: None,
            steps: vec![StepDefinition {
                name: "test".to_string(),
                command: Some("cargo".to_string()),
                args: vec!["test".to_string()],
                run: None,
                shell: "sh".to_string(),
                env: IndexMap::new(),
                working_directory: None,
                timeout_minutes: None,
                continue_on_error: false,
            }],
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

    fn axes(pairs: &[(&str, serde_json::Value)]) -> IndexMap<String, Vec<serde_json::Value>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_array().cloned().unwrap_or_default()))
            .collect()
    }

    fn cell(pairs: &[(&str, serde_json::Value)]) -> MatrixCell {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn expand(job: JobDefinition) -> JobExpansion {
        let wf = workflow(vec![job]);
        MatrixExpander::new().expand(&wf, &wf.jobs[0])
    }

    #[test]
    fn test_job_without_matrix_is_one_instance() {
        let expansion = expand(make_job("style", None));

        assert_eq!(expansion.instances.len(), 1);
        let instance = &expansion.instances[0];
        assert_eq!(instance.id, InstanceId::for_job("style"));
        assert_eq!(instance.index, None);
        assert_eq!(instance.display_name, "style");
        assert!(instance.parameters.is_empty());
    }

    #[test]
    fn test_matrix_expansion_is_cartesian_product() {
        let matrix = MatrixConfig {
            axes: axes(&[
                ("os", json!(["linux", "macos"])),
                ("version", json!(["18", "20", "22"])),
            ]),
            max_parallel: Some(4),
            ..Default::default()
        };

        let expansion = expand(make_job("test", Some(matrix)));

        assert_eq!(expansion.instances.len(), 6); // 2 OS × 3 versions
        assert_eq!(expansion.max_parallel, Some(4));
        assert!(expansion.warnings.is_empty());

        let names: Vec<&str> = expansion
            .instances
            .iter()
            .map(|i| i.display_name.as_str())
            .collect();
        assert_eq!(names[0], "test (linux, 18)");
        assert_eq!(names[5], "test (macos, 22)");
        assert_eq!(expansion.instances[5].id.as_str(), "test[5]");
    }

    #[test]
    fn test_matrix_with_exclude() {
        let matrix = MatrixConfig {
            axes: axes(&[
                ("os", json!(["linux", "macos"])),
                ("arch", json!(["amd64", "arm64"])),
            ]),
            exclude: vec![cell(&[("os", json!("macos")), ("arch", json!("amd64"))])],
            ..Default::default()
        };

        let expansion = expand(make_job("build", Some(matrix)));

        // 2x2 = 4, minus 1 excluded = 3
        assert_eq!(expansion.instances.len(), 3);
        assert!(
            expansion
                .instances
                .iter()
                .all(|i| !(i.parameters["os"] == json!("macos") && i.parameters["arch"] == json!("amd64")))
        );
    }

    #[test]
    fn test_include_attaches_auxiliary_fields() {
        let matrix = MatrixConfig {
            axes: axes(&[
                ("os", json!(["ubuntu-latest", "windows-latest"])),
                ("rust", json!(["stable", "beta"])),
            ]),
            include: vec![MatrixInclude {
                allow_failure: None,
                values: cell(&[
                    ("os", json!("ubuntu-latest")),
                    ("rust", json!("stable")),
                    ("target", json!("i686-unknown-linux-gnu")),
                ]),
            }],
            ..Default::default()
        };

        let expansion = expand(make_job("build", Some(matrix)));

        assert_eq!(expansion.instances.len(), 4);
        let with_target: Vec<&JobInstance> = expansion
            .instances
            .iter()
            .filter(|i| i.parameters.contains_key("target"))
            .collect();
        assert_eq!(with_target.len(), 1);
        assert_eq!(with_target[0].display_name, "build (ubuntu-latest, stable)");
        assert_eq!(
            with_target[0].parameters.get("target"),
            Some(&json!("i686-unknown-linux-gnu"))
        );
    }

    #[test]
    fn test_include_without_axis_fields_attaches_to_every_cell() {
        let matrix = MatrixConfig {
            axes: axes(&[("os", json!(["linux", "mac"]))]),
            include: vec![MatrixInclude {
                allow_failure: None,
                values: cell(&[("features", json!("full"))]),
            }],
            ..Default::default()
        };

        let expansion = expand(make_job("build", Some(matrix)));

        assert_eq!(expansion.instances.len(), 2);
        for instance in &expansion.instances {
            assert_eq!(instance.parameters.get("features"), Some(&json!("full")));
        }
        assert_eq!(expansion.instances[1].display_name, "build (mac)");
    }

    #[test]
    fn test_include_appends_new_cell_with_allow_failure_override() {
        let matrix = MatrixConfig {
            axes: axes(&[("rust", json!(["stable", "beta"]))]),
            include: vec![MatrixInclude {
                allow_failure: Some(true),
                values: cell(&[("rust", json!("nightly"))]),
            }],
            ..Default::default()
        };

        let expansion = expand(make_job("build", Some(matrix)));

        assert_eq!(expansion.instances.len(), 3);
        let nightly = &expansion.instances[2];
        assert_eq!(nightly.display_name, "build (nightly)");
        assert!(nightly.allow_failure);
        assert!(!expansion.instances[0].allow_failure);
        assert!(!expansion.instances[1].allow_failure);
    }

    #[test]
    fn test_include_override_on_existing_cell() {
        let matrix = MatrixConfig {
            axes: axes(&[("rust", json!(["stable", "nightly"]))]),
            include: vec![MatrixInclude {
                allow_failure: Some(true),
                values: cell(&[("rust", json!("nightly"))]),
            }],
            ..Default::default()
        };

        let expansion = expand(make_job("build", Some(matrix)));

        assert_eq!(expansion.instances.len(), 2);
        assert!(!expansion.instances[0].allow_failure);
        assert!(expansion.instances[1].allow_failure);
    }

    #[test]
    fn test_empty_axis_yields_zero_instances_with_warning() {
        let matrix = MatrixConfig {
            axes: axes(&[("os", json!(["linux"])), ("rust", json!([]))]),
            ..Default::default()
        };

        let expansion = expand(make_job("build", Some(matrix)));

        assert!(expansion.instances.is_empty());
        assert_eq!(
            expansion.warnings,
            vec![ExpansionWarning::EmptyAxis {
                job: "build".to_string(),
                axis: "rust".to_string(),
            }]
        );
        assert!(expansion.warnings[0].clone().into_error().is_configuration());
    }

    #[test]
    fn test_env_is_merged_job_over_workflow() {
        let mut job = make_job("build", None);
        job.env.insert("RUSTFLAGS".to_string(), "-Dwarnings".to_string());
        let mut wf = workflow(vec![job]);
        wf.env.insert("RUSTFLAGS".to_string(), "".to_string());
        wf.env.insert("CARGO_TERM_COLOR".to_string(), "always".to_string());

        let expansion = MatrixExpander::new().expand(&wf, &wf.jobs[0]);
        let env = &expansion.instances[0].env;
        assert_eq!(env.get("RUSTFLAGS").map(String::as_str), Some("-Dwarnings"));
        assert_eq!(env.get("CARGO_TERM_COLOR").map(String::as_str), Some("always"));
    }
}
