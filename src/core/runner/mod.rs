//! Runner for the `latest` command.
//!
//! # Architecture
//!
//! - `traits.rs` - Runner configuration and the run result
//! - `latest.rs` - Pipeline driver that renders progress and the summary

pub mod latest;
pub mod traits;

pub use latest::LatestRunner;
pub use traits::{LatestRunnerConfig, RunResult};

// Re-export OutputFormat from models for convenience
pub use crate::models::OutputFormat;
