//! Matrix expansion, dependency planning and run scheduling for Gantry.
//!
//! A workflow flows through [`DagBuilder`] into an [`ExecutionPlan`] of job
//! instances, which the [`Scheduler`] drives to completion through an
//! [`InstanceExecutor`](gantry_core::ports::InstanceExecutor) before the
//! [`Gate`] folds the results into a run report.

pub mod dag;
pub mod gate;
pub mod matrix;
pub mod queue;
pub mod scheduler;
pub mod state;

pub use dag::{DagBuilder, DagError, ExecutionPlan, FanOutPolicy};
pub use gate::{Gate, RunMetadata};
pub use matrix::{ExpansionWarning, JobExpansion, MatrixExpander};
pub use scheduler::{Scheduler, SchedulerConfig};
