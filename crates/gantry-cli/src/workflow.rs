//! Workflow file discovery and loading.

use gantry_core::Error;
use gantry_core::workflow::WorkflowDefinition;
use std::path::{Path, PathBuf};

/// Locations searched, in order, when no file is given.
const CANDIDATES: [&str; 4] = [
    "gantry.yaml",
    "gantry.yml",
    ".gantry/workflow.yaml",
    ".gantry/workflow.yml",
];

/// Find the workflow file: the explicit path if given, otherwise the first
/// standard location that exists under `base`.
pub fn find_workflow_file(path: Option<&Path>, base: &Path) -> Result<PathBuf, Error> {
    if let Some(p) = path {
        if p.exists() {
            return Ok(p.to_path_buf());
        }
        return Err(Error::Configuration(format!(
            "workflow file {} does not exist",
            p.display()
        )));
    }

    CANDIDATES
        .iter()
        .map(|candidate| base.join(candidate))
        .find(|p| p.exists())
        .ok_or_else(|| {
            Error::Configuration(format!(
                "no workflow file found (looked for {})",
                CANDIDATES.join(", ")
            ))
        })
}

/// Load, parse and validate a workflow file.
pub fn load_workflow(path: &Path) -> Result<WorkflowDefinition, Error> {
    let content = std::fs::read_to_string(path)?;
    let definition: WorkflowDefinition = serde_yaml::from_str(&content)
        .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))?;
    definition.validate()?;
    Ok(definition)
}
