//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the orchestration core and
//! the adapters that actually run work.

use crate::ids::RunId;
use crate::instance::JobInstance;
use crate::run::ExecutionOutcome;
use async_trait::async_trait;

/// Runs the steps of one job instance to completion.
///
/// Implementations must not panic on step failure; a failing command is
/// reported through [`ExecutionOutcome::success`]. Each call gets an isolated
/// environment, so implementations share no mutable state between instances.
#[async_trait]
pub trait InstanceExecutor: Send + Sync {
    async fn execute(&self, run_id: RunId, instance: &JobInstance) -> ExecutionOutcome;
}
