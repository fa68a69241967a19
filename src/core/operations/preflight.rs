//! State aggregation and the pre-flight gate.
//!
//! The gate runs before any repository is modified. Repositories that are
//! clean or merely dirty may proceed; conflicts, unfinished rebases or merges
//! and git errors block the whole batch.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::LatestError;
use crate::git::{Git, RebaseResult};
use crate::models::{AggregatedState, RepositoryState, RepositoryStateInfo};

use super::classifier::check_repository_state;

/// Combines per-repository states into the worst-case overall state.
pub fn aggregate_repository_states(states: &[RepositoryStateInfo]) -> AggregatedState {
    let mut aggregated = AggregatedState::default();

    for info in states {
        let name = info.repo.name.clone();
        match info.state {
            RepositoryState::ReadyForUpdate => aggregated.ready_repos.push(name),
            RepositoryState::DirtyWorkingDir => aggregated.dirty_repos.push(name),
            RepositoryState::ConflictsExist => aggregated.conflicting_repos.push(name),
            RepositoryState::InRebase | RepositoryState::InMerge => {
                aggregated.in_operation_repos.push(name)
            }
            RepositoryState::Error => aggregated.error_repos.push(name),
        }
        if info.state.priority() > aggregated.overall_state.priority() {
            aggregated.overall_state = info.state;
        }
    }

    aggregated
}

/// Lets the batch proceed only when every repository is ready or dirty.
///
/// On rejection the error names every offending repository together with
/// the command that gets it unstuck.
pub fn validate_all_repos_clean_or_dirty_for_update(
    aggregated: &AggregatedState,
) -> Result<(), LatestError> {
    if aggregated.overall_state.is_updatable() {
        return Ok(());
    }

    let mut lines = vec!["cannot update: some repositories are not ready".to_string()];
    if !aggregated.conflicting_repos.is_empty() {
        lines.push(format!(
            "  - resolve merge conflicts in {}, then `git add` the files",
            aggregated.conflicting_repos.join(", ")
        ));
    }
    if !aggregated.in_operation_repos.is_empty() {
        lines.push(format!(
            "  - finish the operation in progress in {} (`git rebase --continue`), \
             or run `git rebase --abort` / `git merge --abort`",
            aggregated.in_operation_repos.join(", ")
        ));
    }
    if !aggregated.error_repos.is_empty() {
        lines.push(format!(
            "  - fix git errors in {}",
            aggregated.error_repos.join(", ")
        ));
    }
    lines.push(
        "No repository was modified. Re-run `kira latest` once these are resolved.".to_string(),
    );

    warn!(
        conflicting = ?aggregated.conflicting_repos,
        in_operation = ?aggregated.in_operation_repos,
        errors = ?aggregated.error_repos,
        "pre-flight check rejected the batch"
    );

    Err(LatestError::PreflightBlocked {
        conflicting: aggregated.conflicting_repos.clone(),
        in_operation: aggregated.in_operation_repos.clone(),
        errors: aggregated.error_repos.clone(),
        message: lines.join("\n"),
    })
}

/// What happened to a repository found mid-rebase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResumeOutcome {
    pub repo: String,
    /// `git rebase --continue` finished the rebase.
    pub completed: bool,
    /// A stash left by the interrupted run was restored.
    pub stash_popped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Tries to finish rebases left behind by an interrupted run.
///
/// Only repositories in [`RepositoryState::InRebase`] without unmerged paths
/// are continued. When the rebase completes, the stash recorded as pending
/// by the interrupted run (if any) is popped and the repository is
/// classified again. Other stashes are never touched. Every other state is
/// returned unchanged.
pub async fn try_resume_interrupted_rebases(
    states: Vec<RepositoryStateInfo>,
    timeout: Duration,
) -> (Vec<RepositoryStateInfo>, Vec<ResumeOutcome>) {
    let mut updated = Vec::with_capacity(states.len());
    let mut outcomes = Vec::new();

    for info in states {
        if info.state != RepositoryState::InRebase {
            updated.push(info);
            continue;
        }

        let git = Git::new(&info.repo.path, timeout);
        let outcome = resume_rebase(&git, &info.repo.name).await;
        info!(
            repo = %info.repo.name,
            completed = outcome.completed,
            stash_popped = outcome.stash_popped,
            "resume of interrupted rebase"
        );

        let reclassified = if outcome.completed {
            check_repository_state(&info.repo, timeout).await
        } else {
            info
        };
        outcomes.push(outcome);
        updated.push(reclassified);
    }

    (updated, outcomes)
}

async fn resume_rebase(git: &Git, repo: &str) -> ResumeOutcome {
    let mut outcome = ResumeOutcome {
        repo: repo.to_string(),
        completed: false,
        stash_popped: false,
        message: None,
    };

    match git.unmerged_files().await {
        Ok(files) if !files.is_empty() => {
            outcome.message = Some(format!("{} file(s) still conflicted", files.len()));
            return outcome;
        }
        Ok(_) => {}
        Err(e) => {
            outcome.message = Some(e.to_string());
            return outcome;
        }
    }

    match git.rebase_continue().await {
        Ok(RebaseResult::Success) => outcome.completed = true,
        Ok(RebaseResult::Conflict(files)) => {
            outcome.message = Some(format!(
                "rebase --continue stopped on {} conflicted file(s)",
                files.len()
            ));
            return outcome;
        }
        Ok(RebaseResult::Failed(e)) | Err(e) => {
            outcome.message = Some(e.to_string());
            return outcome;
        }
    }

    let pending = match git.pending_stash().await {
        Ok(pending) => pending,
        Err(e) => {
            outcome.message = Some(format!("could not read the pending stash: {}", e));
            return outcome;
        }
    };
    if let Some(commit) = pending {
        match git.stash_pop(&commit).await {
            Ok(()) => outcome.stash_popped = true,
            Err(e) => {
                outcome.message = Some(format!(
                    "rebase completed but restoring stash {} failed ({}); \
                     run `git stash pop` manually",
                    commit, e
                ));
            }
        }
        if let Err(e) = git.clear_pending_stash().await {
            warn!(repo, error = %e, "failed to clear the pending stash");
        }
    }

    outcome
}
