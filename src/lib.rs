//! # kira
//!
//! Work item workflow tooling built around `kira latest`, which brings every
//! repository of a workspace up to date with its trunk branch.
//!
//! A workspace is either a single repository (standalone or monorepo) or a
//! set of repositories listed in `kira.toml` (polyrepo). For each repository
//! the run stashes uncommitted work, fetches the trunk, fast-forwards or
//! rebases, and restores the stash. Repositories with conflicts or an
//! operation in progress stop the run before anything changes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kira::core::runner::{LatestRunner, LatestRunnerConfig, OutputFormat};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = LatestRunnerConfig {
//!     workspace_root: "/path/to/workspace".into(),
//!     abort_on_conflict: true,
//!     no_pop_stash: false,
//!     output_format: OutputFormat::Text,
//!     quiet: false,
//! };
//!
//! let result = LatestRunner::new(config).run().await;
//! println!("exit code: {}", result.exit_code.code());
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod git;
pub mod git_config;
pub mod logging;
pub mod models;
pub mod parsed_property;
pub mod work_item;

// Re-export commonly used types for convenience
pub use config::Config;
pub use models::Args;

/// Core result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
