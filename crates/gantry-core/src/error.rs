//! Error types for gantry.

use crate::run::RunStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Invalid workflow definition: {0}")]
    Configuration(String),

    #[error("Duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("Job `{job}` needs unknown job `{needed}`")]
    UnknownJob { job: String, needed: String },

    #[error("Matrix axis `{axis}` of job `{job}` has no values")]
    EmptyMatrixAxis { job: String, axis: String },

    #[error("Malformed step `{step}` in job `{job}`: {reason}")]
    MalformedStep {
        job: String,
        step: String,
        reason: String,
    },

    // Graph errors
    #[error("Cyclic dependency between jobs: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    // Execution errors
    #[error("Step `{step}` failed with exit code {exit_code}")]
    StepFailed { step: String, exit_code: i32 },

    #[error("Step `{step}` timed out after {seconds}s")]
    StepTimeout { step: String, seconds: u64 },

    #[error("Instance `{instance}` timed out after {seconds}s")]
    InstanceTimeout { instance: String, seconds: u64 },

    #[error("Failed to spawn `{program}`: {message}")]
    Spawn { program: String, message: String },

    // Internal invariant violations
    #[error("Invalid status transition for `{instance}`: {from} -> {to}")]
    InvalidTransition {
        instance: String,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Aggregation invariant violated: {0}")]
    Aggregation(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors that stop a run before any instance executes because the
    /// workflow document itself is wrong.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::DuplicateJob(_)
                | Error::UnknownJob { .. }
                | Error::EmptyMatrixAxis { .. }
                | Error::MalformedStep { .. }
        )
    }

    /// Errors raised while building the dependency graph or validating the
    /// document. The run never starts when one of these is returned.
    pub fn is_fatal_before_run(&self) -> bool {
        self.is_configuration() || matches!(self, Error::CyclicDependency(_))
    }

    /// Errors that are contained to a single job instance.
    pub fn is_execution(&self) -> bool {
        matches!(
            self,
            Error::StepFailed { .. }
                | Error::StepTimeout { .. }
                | Error::InstanceTimeout { .. }
                | Error::Spawn { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
