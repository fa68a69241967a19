//! Unified error handling for kira.
//!
//! This module provides the error hierarchy used by the workspace
//! synchronization engine, built on `thiserror`.
//!
//! ## Error Categories
//!
//! - [`GitError`]: Failures of a single git invocation (spawn, timeout, exit status)
//! - [`LatestError`]: Failures of the `latest` pipeline, one variant per failure class
//! - [`ConfigError`]: Errors from configuration loading and validation
//!
//! ## Example
//!
//! ```rust,no_run
//! use kira::error::{KiraError, LatestError};
//!
//! fn example() -> Result<(), KiraError> {
//!     Err(LatestError::Validation {
//!         failures: vec!["api: path does not exist".to_string()],
//!     })?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the kira library.
#[derive(Error, Debug)]
pub enum KiraError {
    /// An error occurred during a git operation.
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    /// The `latest` pipeline failed.
    #[error(transparent)]
    Latest(#[from] LatestError),

    /// An error occurred while loading or validating configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A generic error for cases not covered by specific error types.
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Errors produced by a single git invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GitError {
    /// The git executable could not be started.
    #[error("Failed to run git {command}: {message}")]
    Spawn {
        /// The git command line (without the `git` prefix).
        command: String,
        /// I/O error reported by the OS.
        message: String,
    },

    /// The command did not finish within its time budget.
    #[error("git {command} timed out after {seconds}s")]
    Timeout {
        /// The git command line.
        command: String,
        /// Timeout that was exceeded.
        seconds: u64,
    },

    /// A git command execution failed.
    #[error("Git command failed: {command} - {message}")]
    CommandFailed {
        /// The git command that failed.
        command: String,
        /// Error message from git.
        message: String,
        /// Process exit code, if the process exited normally.
        exit_code: Option<i32>,
    },

    /// The remote could not be reached (DNS, connection, authentication).
    #[error("network error talking to remote '{remote}': {message}")]
    Network {
        /// Remote name.
        remote: String,
        /// Error message from git.
        message: String,
    },

    /// The configured remote does not exist in the repository.
    #[error("remote '{remote}' does not exist: {message}")]
    RemoteNotFound {
        /// Remote name.
        remote: String,
        /// Error message from git.
        message: String,
    },

    /// The remote exists but does not have the requested branch.
    #[error("remote '{remote}' has no branch '{branch}'")]
    RemoteRefNotFound {
        /// Remote name.
        remote: String,
        /// Branch that was requested.
        branch: String,
    },

    /// The specified path is not a valid git repository.
    #[error("Not a valid git repository: {path}")]
    NotARepository {
        /// Path that was expected to be a repository.
        path: PathBuf,
    },

    /// The repository path does not exist.
    #[error("Repository path does not exist: {path}")]
    PathNotFound {
        /// Path that was not found.
        path: PathBuf,
    },
}

/// Failure classes of the `latest` synchronization pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LatestError {
    /// One or more repositories failed path validation.
    #[error("repository validation failed:\n{}", format_bullets(.failures))]
    Validation {
        /// One entry per invalid repository.
        failures: Vec<String>,
    },

    /// The pre-flight gate refused to start any mutation.
    #[error("{message}")]
    PreflightBlocked {
        /// Repositories with unresolved merge conflicts.
        conflicting: Vec<String>,
        /// Repositories with a rebase or merge in progress.
        in_operation: Vec<String>,
        /// Repositories whose state could not be determined.
        errors: Vec<String>,
        /// Rendered message with recovery instructions.
        message: String,
    },

    /// Fetching the trunk branch failed.
    #[error("fetch failed: {source}")]
    FetchFailed {
        /// Repository name.
        repo: String,
        /// Underlying git failure.
        source: GitError,
    },

    /// Rebasing onto the trunk stopped on conflicts.
    #[error(
        "rebase onto {onto} stopped with conflicts in {} file(s){}",
        .files.len(),
        aborted_suffix(.aborted)
    )]
    RebaseConflict {
        /// Repository name.
        repo: String,
        /// Ref the branch was being rebased onto.
        onto: String,
        /// Files git reported as unmerged.
        files: Vec<String>,
        /// Whether the rebase was aborted afterwards.
        aborted: bool,
    },

    /// The rebase failed for a reason other than conflicts.
    #[error("rebase onto {onto} failed: {source}")]
    RebaseFailed {
        /// Repository name.
        repo: String,
        /// Ref the branch was being rebased onto.
        onto: String,
        /// Underlying git failure.
        source: GitError,
    },

    /// Creating or restoring the stash failed.
    #[error("git stash {operation} failed: {source}")]
    Stash {
        /// Repository name.
        repo: String,
        /// `push` or `pop`.
        operation: String,
        /// Underlying git failure.
        source: GitError,
    },

    /// Inspecting the repository failed.
    #[error("failed to check git status: {source}")]
    Classifier {
        /// Repository name.
        repo: String,
        /// Underlying git failure.
        source: GitError,
    },

    /// Fast-forwarding the local trunk failed (usually diverged history).
    #[error("fast-forward of {branch} failed: {source}")]
    TrunkUpdate {
        /// Repository name.
        repo: String,
        /// Local trunk branch.
        branch: String,
        /// Underlying git failure.
        source: GitError,
    },

    /// A rebase was requested while the trunk itself is checked out.
    #[error("refusing to rebase trunk branch '{branch}' onto itself in {repo}")]
    RebaseOnTrunk {
        /// Repository name.
        repo: String,
        /// Trunk branch.
        branch: String,
    },

    /// HEAD does not point at a branch.
    #[error("HEAD is detached in {repo}; check out a branch first")]
    DetachedHead {
        /// Repository name.
        repo: String,
    },

    /// A git query needed by the pipeline failed.
    #[error("{step} failed in {repo}: {source}")]
    Git {
        /// Repository name.
        repo: String,
        /// Step label.
        step: String,
        /// Underlying git failure.
        source: GitError,
    },

    /// The run was cancelled before this repository was started.
    #[error("skipped: run was cancelled")]
    Cancelled {
        /// Repository name.
        repo: String,
    },
}

impl LatestError {
    /// Returns true for conflicts that were left in place for the user.
    pub fn is_unresolved_conflict(&self) -> bool {
        matches!(self, LatestError::RebaseConflict { aborted: false, .. })
    }
}

fn aborted_suffix(aborted: &bool) -> &'static str {
    if *aborted { " (rebase aborted)" } else { "" }
}

fn format_bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("  - {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Errors that can occur during configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file at {path}: {message}")]
    FileReadError {
        /// Path to the config file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Failed to parse the configuration file.
    #[error("Failed to parse config file at {path}: {message}")]
    ParseError {
        /// Path to the config file.
        path: PathBuf,
        /// Parse error message.
        message: String,
    },

    /// An invalid value was provided for a configuration field.
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        /// Name of the field with invalid value.
        field: String,
        /// Description of why the value is invalid.
        message: String,
    },
}

/// Type alias for Results using KiraError.
///
/// Note: This is not re-exported from the crate root to avoid shadowing `anyhow::Result`.
pub type KiraResult<T> = std::result::Result<T, KiraError>;
