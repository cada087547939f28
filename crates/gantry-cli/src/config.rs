//! CLI configuration management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Maximum number of instances running at once.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Per-instance timeout when the job sets none; `0` disables it.
    #[serde(default = "default_instance_timeout")]
    pub instance_timeout_minutes: u32,
    /// Directory steps run in.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
    /// Where per-instance logs are written after a run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Escalate empty matrix axes to errors.
    #[serde(default)]
    pub strict_matrix: bool,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
}

fn default_max_parallel() -> usize {
    4
}

fn default_instance_timeout() -> u32 {
    60
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            instance_timeout_minutes: default_instance_timeout(),
            workspace: default_workspace(),
            log_dir: None,
            strict_matrix: false,
            output_format: OutputFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl CliConfig {
    /// Load configuration from `path`, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to `path`, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dirs = directories::ProjectDirs::from("dev", "gantry", "gantry")
            .ok_or("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "max_parallel" => {
                self.max_parallel = match value.parse() {
                    Ok(n) if n > 0 => n,
                    _ => return Err(format!("Invalid max_parallel: {}", value)),
                };
            }
            "instance_timeout_minutes" => {
                self.instance_timeout_minutes = value
                    .parse()
                    .map_err(|_| format!("Invalid instance_timeout_minutes: {}", value))?;
            }
            "workspace" => self.workspace = PathBuf::from(value),
            "log_dir" => {
                self.log_dir = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "strict_matrix" => {
                self.strict_matrix = value
                    .parse()
                    .map_err(|_| format!("Invalid strict_matrix: {}", value))?;
            }
            "output_format" => {
                self.output_format = match value {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    _ => return Err(format!("Invalid output format: {}", value)),
                };
            }
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: CliConfig = serde_yaml::from_str("max_parallel: 2\n").unwrap();
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.instance_timeout_minutes, 60);
        assert_eq!(config.workspace, PathBuf::from("."));
        assert_eq!(config.output_format, OutputFormat::Table);
        assert!(!config.strict_matrix);
    }

    #[test]
    fn test_set_values() {
        let mut config = CliConfig::default();
        config.set("max_parallel", "8").unwrap();
        config.set("output_format", "json").unwrap();
        config.set("strict_matrix", "true").unwrap();
        config.set("log_dir", "/tmp/gantry-logs").unwrap();

        assert_eq!(config.max_parallel, 8);
        assert_eq!(config.output_format, OutputFormat::Json);
        assert!(config.strict_matrix);
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/gantry-logs")));

        assert!(config.set("max_parallel", "0").is_err());
        config.set("instance_timeout_minutes", "0").unwrap();
        assert_eq!(config.instance_timeout_minutes, 0);
        assert!(config.set("output_format", "yaml").is_err());
        assert!(config.set("api_url", "x").is_err());
    }

    #[test]
    fn test_save_and_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = CliConfig::default();
        config.set("max_parallel", "3").unwrap();
        config.save(Some(&path)).unwrap();

        let loaded = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.max_parallel, 3);
    }
}
