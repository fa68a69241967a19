//! Progress events and the final summary of `kira latest`.
//!
//! Events describe the stages of a run (resolution, classification, the
//! gate, per-repository steps, conflicts) and are serializable for JSON and
//! NDJSON output as well as renderable as text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::ExitCode;
use crate::error::LatestError;
use crate::models::{FileConflict, RepositoryOperationResult, RepositoryState};

/// Progress events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Repositories were resolved and the run is starting.
    Start {
        /// Workspace root the run operates in.
        workspace_root: PathBuf,
        /// `standalone`, `monorepo` or `polyrepo`.
        topology: String,
        /// Number of repositories in the run.
        repositories: usize,
        /// Active work item, when one was found.
        #[serde(skip_serializing_if = "Option::is_none")]
        work_item: Option<String>,
        started_at: DateTime<Utc>,
    },

    /// A repository was classified.
    RepositoryState {
        repo: String,
        state: RepositoryState,
        details: String,
    },

    /// A rebase left by an earlier run was continued.
    RebaseResumed {
        repo: String,
        completed: bool,
        stash_popped: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The pre-flight gate refused to start; nothing was changed.
    PreflightBlocked {
        conflicting: Vec<String>,
        in_operation: Vec<String>,
        errors: Vec<String>,
        message: String,
    },

    /// A step of the update protocol is starting.
    StepStarted { repo: String, step: String },

    /// A repository finished, successfully or not.
    RepositoryComplete {
        repo: String,
        success: bool,
        steps: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },

    /// Parsed conflicts of one repository.
    Conflicts {
        repo: String,
        files: Vec<FileConflict>,
    },

    /// Every repository has been processed.
    Complete {
        successful: usize,
        failed: usize,
        skipped: usize,
    },

    /// A run-level error occurred.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ProgressEvent {
    /// Event for a finished repository.
    pub fn repository_complete(result: &RepositoryOperationResult) -> Self {
        ProgressEvent::RepositoryComplete {
            repo: result.repo.name.clone(),
            success: result.succeeded(),
            steps: result.steps.clone(),
            error: result.error.as_ref().map(|e| e.to_string()),
            warnings: result.warnings.clone(),
        }
    }

    /// Returns true for events quiet mode still shows.
    pub fn is_problem(&self) -> bool {
        match self {
            ProgressEvent::RepositoryComplete { success, .. } => !success,
            ProgressEvent::PreflightBlocked { .. }
            | ProgressEvent::Conflicts { .. }
            | ProgressEvent::Error { .. } => true,
            _ => false,
        }
    }
}

/// Overall result of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SummaryResult {
    /// Every repository is up to date.
    Success,
    /// Some repositories failed.
    PartialFailure,
    /// At least one rebase was left in progress with conflicts.
    Conflict,
    /// The pre-flight gate refused the batch.
    PreflightRejected,
    /// Repository resolution failed.
    ValidationFailed,
    /// The run was interrupted.
    Cancelled,
}

impl SummaryResult {
    pub fn exit_code(self) -> ExitCode {
        match self {
            SummaryResult::Success => ExitCode::Success,
            SummaryResult::PartialFailure => ExitCode::PartialFailure,
            SummaryResult::Conflict => ExitCode::Conflict,
            SummaryResult::PreflightRejected => ExitCode::PreflightRejected,
            SummaryResult::ValidationFailed => ExitCode::ValidationFailed,
            SummaryResult::Cancelled => ExitCode::Cancelled,
        }
    }
}

impl std::fmt::Display for SummaryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummaryResult::Success => write!(f, "success"),
            SummaryResult::PartialFailure => write!(f, "partial_failure"),
            SummaryResult::Conflict => write!(f, "conflict"),
            SummaryResult::PreflightRejected => write!(f, "preflight_rejected"),
            SummaryResult::ValidationFailed => write!(f, "validation_failed"),
            SummaryResult::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Counts for the summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SummaryCounts {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Repositories never started because the run was cancelled.
    pub skipped: usize,
}

impl SummaryCounts {
    pub fn new(successful: usize, failed: usize, skipped: usize) -> Self {
        Self {
            total: successful + failed + skipped,
            successful,
            failed,
            skipped,
        }
    }
}

/// Per-repository status in the summary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryStatus {
    Updated,
    Failed,
    Conflict,
    Skipped,
}

impl std::fmt::Display for RepositoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryStatus::Updated => write!(f, "updated"),
            RepositoryStatus::Failed => write!(f, "failed"),
            RepositoryStatus::Conflict => write!(f, "conflict"),
            RepositoryStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One repository in the summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepositorySummary {
    pub name: String,
    pub path: PathBuf,
    pub status: RepositoryStatus,
    pub steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub had_stash: bool,
    pub stash_popped: bool,
    pub rebase_attempted: bool,
    pub rebase_had_conflicts: bool,
    pub rebase_aborted: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl From<&RepositoryOperationResult> for RepositorySummary {
    fn from(result: &RepositoryOperationResult) -> Self {
        let status = match &result.error {
            None => RepositoryStatus::Updated,
            Some(LatestError::Cancelled { .. }) => RepositoryStatus::Skipped,
            Some(e) if e.is_unresolved_conflict() => RepositoryStatus::Conflict,
            Some(_) => RepositoryStatus::Failed,
        };
        Self {
            name: result.repo.name.clone(),
            path: result.repo.path.clone(),
            status,
            steps: result.steps.clone(),
            error: result.error.as_ref().map(|e| e.to_string()),
            had_stash: result.had_stash,
            stash_popped: result.stash_popped,
            rebase_attempted: result.rebase_attempted,
            rebase_had_conflicts: result.rebase_had_conflicts,
            rebase_aborted: result.rebase_aborted,
            warnings: result.warnings.clone(),
        }
    }
}

/// Commands that bring one failed repository back to a known state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryStep {
    pub repo: String,
    pub commands: Vec<String>,
}

/// Summary information for final output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryInfo {
    pub result: SummaryResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_item: Option<String>,
    pub counts: SummaryCounts,
    pub repositories: Vec<RepositorySummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery_steps: Vec<RecoveryStep>,
}

impl SummaryInfo {
    /// Builds the summary of an update batch.
    ///
    /// Cancellation outranks conflicts, which outrank other failures.
    pub fn from_results(results: &[RepositoryOperationResult], work_item: Option<String>) -> Self {
        let repositories: Vec<RepositorySummary> =
            results.iter().map(RepositorySummary::from).collect();
        let count = |status: RepositoryStatus| {
            repositories.iter().filter(|r| r.status == status).count()
        };
        let skipped = count(RepositoryStatus::Skipped);
        let conflicts = count(RepositoryStatus::Conflict);
        let successful = count(RepositoryStatus::Updated);
        let failed = count(RepositoryStatus::Failed) + conflicts;

        let result = if skipped > 0 {
            SummaryResult::Cancelled
        } else if conflicts > 0 {
            SummaryResult::Conflict
        } else if failed > 0 {
            SummaryResult::PartialFailure
        } else {
            SummaryResult::Success
        };

        let recovery_steps = results
            .iter()
            .filter_map(|r| {
                let commands = recovery_commands(r);
                (!commands.is_empty()).then(|| RecoveryStep {
                    repo: r.repo.name.clone(),
                    commands,
                })
            })
            .collect();

        Self {
            result,
            work_item,
            counts: SummaryCounts::new(successful, failed, skipped),
            repositories,
            recovery_steps,
        }
    }

    /// Summary of a run stopped before any repository was touched.
    pub fn rejected(result: SummaryResult, work_item: Option<String>) -> Self {
        Self {
            result,
            work_item,
            counts: SummaryCounts::default(),
            repositories: Vec::new(),
            recovery_steps: Vec::new(),
        }
    }
}

/// Recovery commands for one repository; empty when it succeeded cleanly.
pub fn recovery_commands(result: &RepositoryOperationResult) -> Vec<String> {
    let path = result.repo.path.display();
    let trunk = result.repo.remote_trunk_ref();
    let mut commands = Vec::new();

    let Some(error) = &result.error else {
        if result.stash_preserved() {
            commands.push(format!("git -C {} stash pop", path));
        }
        return commands;
    };

    match error {
        LatestError::RebaseConflict { aborted: false, files, .. } => {
            commands.push(format!(
                "resolve the conflicts in {} ({})",
                path,
                files.join(", ")
            ));
            commands.push(format!("git -C {} add <files>", path));
            commands.push(format!("git -C {} rebase --continue", path));
            if result.stash_preserved() {
                commands.push(format!("git -C {} stash pop", path));
            }
            commands.push("re-run `kira latest`".to_string());
            return commands;
        }
        LatestError::RebaseConflict { aborted: true, .. } => {
            commands.push(format!(
                "rebase onto {} was aborted; rebase manually with `git -C {} rebase {}`",
                trunk, path, trunk
            ));
        }
        LatestError::RebaseFailed { .. } => {
            commands.push(format!("git -C {} status", path));
            commands.push(format!(
                "git -C {} rebase --abort (if a rebase is still in progress)",
                path
            ));
        }
        LatestError::FetchFailed { .. } => {
            commands.push(format!(
                "check the remote and network access: git -C {} fetch {} {}",
                path, result.repo.remote, result.repo.trunk_branch
            ));
        }
        LatestError::TrunkUpdate { branch, .. } => {
            commands.push(format!(
                "{} has diverged from {}; inspect with `git -C {} log {}...{}`",
                branch, trunk, path, branch, trunk
            ));
        }
        LatestError::DetachedHead { .. } => {
            commands.push(format!("git -C {} checkout <branch>", path));
        }
        LatestError::Stash { operation, .. } if operation == "pop" => {
            commands.push(format!(
                "git -C {} stash pop and resolve any conflicts it reports",
                path
            ));
            return commands;
        }
        LatestError::Cancelled { .. } => {
            commands.push("re-run `kira latest`".to_string());
        }
        _ => {
            commands.push(format!("git -C {} status", path));
        }
    }

    if result.stash_preserved() {
        commands.push(format!("git -C {} stash pop", path));
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GitError;
    use crate::models::RepositoryInfo;
    use crate::parsed_property::ParsedProperty;

    fn result(name: &str, error: Option<LatestError>) -> RepositoryOperationResult {
        let mut result = RepositoryOperationResult::new(RepositoryInfo {
            name: name.to_string(),
            path: PathBuf::from(format!("/ws/{}", name)),
            trunk_branch: ParsedProperty::Default("main".to_string()),
            remote: ParsedProperty::Default("origin".to_string()),
            repo_root: None,
        });
        result.error = error;
        result
    }

    fn conflict(name: &str, aborted: bool) -> LatestError {
        LatestError::RebaseConflict {
            repo: name.to_string(),
            onto: "origin/main".to_string(),
            files: vec!["src/lib.rs".to_string()],
            aborted,
        }
    }

    /// # Progress Event Serialization
    ///
    /// Verifies events are tagged with an `event` field.
    ///
    /// ## Test Scenario
    /// - Serializes a state event and a completion event
    ///
    /// ## Expected Outcome
    /// - Tags are snake_case, optional fields are omitted when empty
    #[test]
    fn test_progress_event_serialization() {
        let event = ProgressEvent::RepositoryState {
            repo: "api".to_string(),
            state: RepositoryState::DirtyWorkingDir,
            details: "1 uncommitted change(s)".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "repository_state");
        assert_eq!(json["state"], "dirty_working_dir");

        let complete = ProgressEvent::repository_complete(&result("api", None));
        let json = serde_json::to_value(&complete).unwrap();
        assert_eq!(json["event"], "repository_complete");
        assert_eq!(json["success"], true);
        assert!(json.get("error").is_none());
        assert!(json.get("warnings").is_none());
    }

    #[test]
    fn test_event_round_trip() {
        let event = ProgressEvent::PreflightBlocked {
            conflicting: vec!["api".to_string()],
            in_operation: vec![],
            errors: vec![],
            message: "resolve merge conflicts in api".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert!(event.is_problem());
        assert!(!ProgressEvent::StepStarted {
            repo: "api".to_string(),
            step: "fetch origin/main".to_string()
        }
        .is_problem());
    }

    /// # Summary Result Precedence
    ///
    /// ## Test Scenario
    /// - Builds summaries from successful, failed, conflicting and
    ///   cancelled repository results
    ///
    /// ## Expected Outcome
    /// - Cancelled > Conflict > PartialFailure > Success
    /// - Counts add up to the number of results
    #[test]
    fn test_summary_result_precedence() {
        let ok = result("ok", None);
        let fetch = result(
            "fetch",
            Some(LatestError::FetchFailed {
                repo: "fetch".to_string(),
                source: GitError::RemoteNotFound {
                    remote: "origin".to_string(),
                    message: "no such remote".to_string(),
                },
            }),
        );
        let left = result("left", Some(conflict("left", false)));
        let skipped = result(
            "skipped",
            Some(LatestError::Cancelled {
                repo: "skipped".to_string(),
            }),
        );

        let summary = SummaryInfo::from_results(&[ok.clone()], None);
        assert_eq!(summary.result, SummaryResult::Success);
        assert!(summary.recovery_steps.is_empty());

        let summary = SummaryInfo::from_results(&[ok.clone(), fetch.clone()], None);
        assert_eq!(summary.result, SummaryResult::PartialFailure);
        assert_eq!(summary.counts, SummaryCounts::new(1, 1, 0));
        assert_eq!(summary.recovery_steps.len(), 1);

        let summary = SummaryInfo::from_results(&[fetch.clone(), left.clone()], None);
        assert_eq!(summary.result, SummaryResult::Conflict);
        assert_eq!(summary.repositories[1].status, RepositoryStatus::Conflict);

        let summary =
            SummaryInfo::from_results(&[ok, fetch, left, skipped], Some("42".to_string()));
        assert_eq!(summary.result, SummaryResult::Cancelled);
        assert_eq!(summary.counts.total, 4);
        assert_eq!(summary.counts.skipped, 1);
        assert_eq!(summary.work_item.as_deref(), Some("42"));
        assert_eq!(summary.result.exit_code(), ExitCode::Cancelled);
    }

    /// # Recovery Commands
    ///
    /// ## Test Scenario
    /// - Asks for recovery steps of a conflict left in progress with a
    ///   preserved stash, of an aborted conflict, and of a detached HEAD
    ///
    /// ## Expected Outcome
    /// - Each names the repository path and a concrete git command
    #[test]
    fn test_recovery_commands() {
        let mut left = result("api", Some(conflict("api", false)));
        left.had_stash = true;
        let commands = recovery_commands(&left);
        assert!(commands[0].contains("src/lib.rs"));
        assert!(commands.contains(&"git -C /ws/api rebase --continue".to_string()));
        assert!(commands.contains(&"git -C /ws/api stash pop".to_string()));
        assert_eq!(commands.last().unwrap(), "re-run `kira latest`");

        let mut aborted = result("api", Some(conflict("api", true)));
        aborted.had_stash = true;
        aborted.stash_popped = true;
        let commands = recovery_commands(&aborted);
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("git -C /ws/api rebase origin/main"));

        let detached = result(
            "api",
            Some(LatestError::DetachedHead {
                repo: "api".to_string(),
            }),
        );
        assert_eq!(
            recovery_commands(&detached),
            vec!["git -C /ws/api checkout <branch>"]
        );

        assert!(recovery_commands(&result("api", None)).is_empty());
    }
}
