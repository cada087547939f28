//! CLI command definitions.

use crate::config::OutputFormat;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow: parse, expand matrices and build the graph
    Validate {
        /// Path to workflow file (discovered when omitted)
        file: Option<PathBuf>,

        /// Treat empty matrix axes as errors
        #[arg(long)]
        strict: bool,
    },

    /// Show the expanded job instances grouped by dependency wave
    Plan {
        /// Path to workflow file (discovered when omitted)
        file: Option<PathBuf>,

        /// Treat empty matrix axes as errors
        #[arg(long)]
        strict: bool,
    },

    /// Execute a workflow locally
    Run {
        /// Path to workflow file (discovered when omitted)
        file: Option<PathBuf>,

        /// Trigger identifier recorded in the report
        #[arg(short, long, default_value = "manual")]
        trigger: String,

        /// Maximum number of instances running at once
        #[arg(short = 'j', long)]
        max_parallel: Option<usize>,

        /// Per-instance timeout in minutes (0 disables)
        #[arg(long)]
        timeout: Option<u32>,

        /// Output format for the run report
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Also write the JSON report to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Treat empty matrix axes as errors
        #[arg(long)]
        strict: bool,
    },

    /// Print the JSON schema of the workflow document
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
