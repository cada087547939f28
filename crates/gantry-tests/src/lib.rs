//! Shared test infrastructure for Gantry.
//!
//! Fixtures build representative workflows; helpers provide a scripted
//! [`InstanceExecutor`](gantry_core::ports::InstanceExecutor) that records
//! dispatch order and concurrency, so scheduling behavior can be checked
//! without spawning processes.
//!
//! # Usage
//!
//! ```ignore
//! use gantry_tests::{ScriptedExecutor, WorkflowFixture, run_workflow};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let executor = Arc::new(ScriptedExecutor::new().fail_job("style"));
//!     let report = run_workflow(&WorkflowFixture::rust_ci(), executor, 4).await?;
//! }
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,gantry_scheduler=debug")),
        )
        .with_test_writer()
        .try_init();
}
