//! Step and instance execution for Gantry.

pub mod executor;
pub mod process;
pub mod runner;

pub use executor::InstanceRunner;
pub use process::ProcessRunner;
pub use runner::{RunnerConfig, StepContext, StepResult, StepRunner};
