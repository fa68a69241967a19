use crate::{error::LatestError, parsed_property::ParsedProperty};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Command-line arguments
// ============================================================================

/// Output format for the `latest` report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON summary at the end.
    Json,
    /// Newline-delimited JSON (one event per line).
    Ndjson,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Ndjson => write!(f, "ndjson"),
        }
    }
}

/// Arguments for the `latest` subcommand.
#[derive(ClapArgs, Clone, Debug, Default)]
pub struct LatestArgs {
    /// Abort the rebase and restore the stash when a repository conflicts
    #[arg(long, help_heading = "Update Options")]
    pub abort_on_conflict: bool,

    /// Leave stashed changes in the stash after a successful update
    #[arg(long, help_heading = "Update Options")]
    pub no_pop_stash: bool,

    /// Workspace root (defaults to the nearest directory containing kira.toml)
    #[arg(long, value_name = "PATH", help_heading = "Workspace")]
    pub workspace: Option<PathBuf>,

    /// Output format: text, json, ndjson
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, help_heading = "Output Options")]
    pub output: OutputFormat,

    /// Suppress progress output
    #[arg(short, long, help_heading = "Output Options")]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Bring every repository of the workspace up to date with its trunk branch
    #[command(
        long_about = "Bring every repository of the workspace up to date with its trunk branch.\n\n\
            For each repository: uncommitted work is stashed, the trunk branch is fetched,\n\
            the current branch is fast-forwarded (on trunk) or rebased onto the fetched\n\
            trunk, and the stash is restored. Repositories with unresolved conflicts or an\n\
            operation in progress block the whole run before anything is changed.",
        after_help = "EXAMPLES:\n    \
            # Update all repositories of the current workspace\n    \
            kira latest\n\n    \
            # Restore every repository to its pre-run state on conflicts\n    \
            kira latest --abort-on-conflict\n\n    \
            # Machine-readable output\n    \
            kira latest --output ndjson"
    )]
    Latest(LatestArgs),
}

#[derive(Parser, Clone, Debug)]
#[command(
    name = "kira",
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"),
    about = "Work item workflow tooling with multi-repository git synchronization",
    long_about = "Work item workflow tooling with multi-repository git synchronization.\n\n\
        Configuration is read from kira.toml at the workspace root,\n\
        ~/.config/kira/config.toml and KIRA_* environment variables."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error); logging is off by default
    #[arg(long, global = true, value_name = "LEVEL", help_heading = "Logging")]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "FILE", help_heading = "Logging")]
    pub log_file: Option<PathBuf>,

    /// Log format (text, json)
    #[arg(long, global = true, value_name = "FORMAT", help_heading = "Logging")]
    pub log_format: Option<String>,
}

// ============================================================================
// Synchronization data model
// ============================================================================

/// A repository the `latest` command operates on. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryInfo {
    /// Display name; defaults to the directory base name.
    pub name: String,
    /// Absolute path of the working tree.
    pub path: PathBuf,
    pub trunk_branch: ParsedProperty<String>,
    pub remote: ParsedProperty<String>,
    /// Shared physical root; repositories with the same root are processed in order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_root: Option<PathBuf>,
}

impl RepositoryInfo {
    /// Remote-tracking ref of the trunk, e.g. `origin/main`.
    pub fn remote_trunk_ref(&self) -> String {
        format!("{}/{}", self.remote.value(), self.trunk_branch.value())
    }
}

/// Health of a repository at classification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryState {
    ReadyForUpdate,
    DirtyWorkingDir,
    ConflictsExist,
    InRebase,
    InMerge,
    Error,
}

impl RepositoryState {
    /// Aggregation priority; the highest value wins.
    pub fn priority(self) -> u8 {
        match self {
            RepositoryState::ConflictsExist => 4,
            RepositoryState::InRebase | RepositoryState::InMerge => 3,
            RepositoryState::Error => 2,
            RepositoryState::DirtyWorkingDir => 1,
            RepositoryState::ReadyForUpdate => 0,
        }
    }

    pub fn is_in_operation(self) -> bool {
        matches!(self, RepositoryState::InRebase | RepositoryState::InMerge)
    }

    /// States the pre-flight gate lets through.
    pub fn is_updatable(self) -> bool {
        matches!(
            self,
            RepositoryState::ReadyForUpdate | RepositoryState::DirtyWorkingDir
        )
    }
}

impl fmt::Display for RepositoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RepositoryState::ReadyForUpdate => "ready for update",
            RepositoryState::DirtyWorkingDir => "dirty working directory",
            RepositoryState::ConflictsExist => "conflicts exist",
            RepositoryState::InRebase => "rebase in progress",
            RepositoryState::InMerge => "merge in progress",
            RepositoryState::Error => "error",
        };
        f.write_str(label)
    }
}

/// Classification result for one repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryStateInfo {
    pub repo: RepositoryInfo,
    pub state: RepositoryState,
    pub details: String,
    #[serde(serialize_with = "serialize_optional_error")]
    pub error: Option<LatestError>,
}

/// Worst-case state across a set of repositories plus per-state name lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedState {
    pub overall_state: RepositoryState,
    pub ready_repos: Vec<String>,
    pub dirty_repos: Vec<String>,
    pub conflicting_repos: Vec<String>,
    pub in_operation_repos: Vec<String>,
    pub error_repos: Vec<String>,
}

impl Default for AggregatedState {
    fn default() -> Self {
        Self {
            overall_state: RepositoryState::ReadyForUpdate,
            ready_repos: Vec::new(),
            dirty_repos: Vec::new(),
            conflicting_repos: Vec::new(),
            in_operation_repos: Vec::new(),
            error_repos: Vec::new(),
        }
    }
}

/// Outcome of updating one repository. Created once per repository per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryOperationResult {
    pub repo: RepositoryInfo,
    /// Ordered step labels; failed steps carry a ` (failed)` suffix.
    pub steps: Vec<String>,
    #[serde(serialize_with = "serialize_optional_error")]
    pub error: Option<LatestError>,
    pub had_stash: bool,
    pub stash_popped: bool,
    pub rebase_attempted: bool,
    pub rebase_had_conflicts: bool,
    pub rebase_aborted: bool,
    /// Actionable warnings that do not make the repository fail on their own.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RepositoryOperationResult {
    pub fn new(repo: RepositoryInfo) -> Self {
        Self {
            repo,
            steps: Vec::new(),
            error: None,
            had_stash: false,
            stash_popped: false,
            rebase_attempted: false,
            rebase_had_conflicts: false,
            rebase_aborted: false,
            warnings: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// A stash created by this run is still on the stash stack.
    pub fn stash_preserved(&self) -> bool {
        self.had_stash && !self.stash_popped
    }
}

/// One `<<<<<<<` / `=======` / `>>>>>>>` region of a conflicted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRegion {
    pub start_marker: String,
    pub our_content: Vec<String>,
    /// Common ancestor section written by `merge.conflictStyle=diff3`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_content: Option<Vec<String>>,
    pub separator: String,
    pub their_content: Vec<String>,
    pub end_marker: String,
    /// Up to three lines preceding the start marker.
    pub context_before: Vec<String>,
    /// Up to three lines following the end marker.
    pub context_after: Vec<String>,
    /// 1-based line number of the start marker.
    pub start_line: usize,
}

/// Conflicts of one file as reported by git.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConflict {
    pub repo_name: String,
    pub file_path: String,
    pub regions: Vec<ConflictRegion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// All conflicted files of one repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryConflicts {
    pub repo: RepositoryInfo,
    pub files: Vec<FileConflict>,
}

fn serialize_optional_error<S: Serializer>(
    error: &Option<LatestError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}
