//! Configuration and result types for the `latest` runner.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::find_workspace_root;
use crate::core::ExitCode;
use crate::models::{LatestArgs, OutputFormat, RepositoryOperationResult};

/// Configuration for a `latest` run.
#[derive(Debug, Clone)]
pub struct LatestRunnerConfig {
    /// Directory holding `kira.toml`, or the directory the run started in.
    pub workspace_root: PathBuf,
    /// Abort conflicting rebases and restore the stash.
    pub abort_on_conflict: bool,
    /// Leave stashes in place after a successful update.
    pub no_pop_stash: bool,
    /// Output format (text, json, ndjson).
    pub output_format: OutputFormat,
    /// Whether to suppress progress output.
    pub quiet: bool,
}

impl LatestRunnerConfig {
    /// Builds the runner configuration from CLI arguments.
    ///
    /// Without `--workspace` the root is the nearest ancestor of the current
    /// directory holding `kira.toml`, falling back to the current directory.
    pub fn from_args(args: &LatestArgs) -> Result<Self> {
        let workspace_root = match &args.workspace {
            Some(path) => path.clone(),
            None => {
                let cwd = env::current_dir().context("Failed to determine current directory")?;
                find_workspace_root(&cwd).unwrap_or(cwd)
            }
        };

        Ok(Self {
            workspace_root,
            abort_on_conflict: args.abort_on_conflict,
            no_pop_stash: args.no_pop_stash,
            output_format: args.output,
            quiet: args.quiet,
        })
    }
}

/// Result of a `latest` run.
#[derive(Debug)]
pub struct RunResult {
    /// Exit code for the operation.
    pub exit_code: ExitCode,
    /// Optional message to display.
    pub message: Option<String>,
    /// One entry per repository that went through the update phase.
    pub results: Vec<RepositoryOperationResult>,
}

impl RunResult {
    /// Creates a successful result.
    pub fn success() -> Self {
        Self {
            exit_code: ExitCode::Success,
            message: None,
            results: Vec::new(),
        }
    }

    /// Creates an error result.
    pub fn error(code: ExitCode, message: impl Into<String>) -> Self {
        Self {
            exit_code: code,
            message: Some(message.into()),
            results: Vec::new(),
        }
    }

    /// Attaches the per-repository results.
    pub fn with_results(mut self, results: Vec<RepositoryOperationResult>) -> Self {
        self.results = results;
        self
    }

    /// Returns true if the operation was successful.
    pub fn is_success(&self) -> bool {
        matches!(self.exit_code, ExitCode::Success)
    }
}
