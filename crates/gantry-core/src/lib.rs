//! Gantry Core
//!
//! Core domain types, traits, and error handling for the gantry workflow
//! engine. This crate has minimal dependencies and defines the shared
//! vocabulary used across all other crates: the workflow document model,
//! expanded job instances, run statuses and reports.

pub mod error;
pub mod ids;
pub mod instance;
pub mod interpolation;
pub mod ports;
pub mod run;
pub mod workflow;

pub use error::{Error, Result};
pub use ids::*;
