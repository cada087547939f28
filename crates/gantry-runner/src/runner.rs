//! Core runner trait and types.

use async_trait::async_trait;
use gantry_core::Result;
use gantry_core::ids::StepId;
use gantry_core::run::OutputLine;
use gantry_core::workflow::StepDefinition;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Result of step execution.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
}

/// Context for step execution.
///
/// The step is already interpolated and `env` holds the complete environment
/// overlay for the process, applied on top of the host environment.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub id: StepId,
    pub working_dir: PathBuf,
    pub env: IndexMap<String, String>,
    pub step: StepDefinition,
    pub timeout: Option<Duration>,
}

/// Trait for step execution.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Execute a step, streaming output to the provided channel.
    ///
    /// A non-zero exit is an `Ok` result with `success == false`; `Err` is
    /// reserved for steps that could not run to completion (spawn failure,
    /// timeout).
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult>;
}

/// Configuration for instance execution.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory steps run in; `working_directory` is resolved against it.
    pub workspace: PathBuf,
    /// Step timeout when the step sets none.
    pub step_timeout: Option<Duration>,
    /// Capacity of the per-step output channel.
    pub output_buffer: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            step_timeout: None,
            output_buffer: 256,
        }
    }
}
