//! The per-repository update protocol and its batch driver.
//!
//! For each repository: stash uncommitted work, fetch the trunk, then either
//! fast-forward the local trunk (when it is checked out) or rebase the
//! current branch onto the fetched trunk, and finally restore the stash.
//!
//! A stash created here is either popped exactly once or deliberately left
//! in place (rebase conflict kept for the user, `--no-pop-stash`, or a pop
//! that itself conflicted). It is never dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::{GitError, LatestError};
use crate::git::{Git, RebaseResult};
use crate::models::{RepositoryInfo, RepositoryOperationResult};

use super::classifier::rebase_in_progress;

/// Options shared by every repository of a batch.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Abort the rebase and restore the stash when a rebase conflicts.
    pub abort_on_conflict: bool,
    /// Leave the stash in place after a successful update.
    pub no_pop_stash: bool,
    /// Label of stashes created by this run.
    pub stash_message: String,
    pub git_timeout: Duration,
    pub fetch_timeout: Duration,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            abort_on_conflict: false,
            no_pop_stash: false,
            stash_message: "kira latest".to_string(),
            git_timeout: crate::git::DEFAULT_GIT_TIMEOUT,
            fetch_timeout: crate::git::DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// Progress update for repository updates.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateProgress {
    /// A step is starting.
    StepStarted { repo: String, step: String },
    /// All steps of a repository are done.
    Finished(Box<RepositoryOperationResult>),
}

/// Sending half of the progress channel handed to every worker.
///
/// Workers never share mutable state; everything that crosses repository
/// boundaries goes through this channel and is consumed by one reader.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    sender: Option<UnboundedSender<UpdateProgress>>,
}

impl ProgressSink {
    pub fn new(sender: UnboundedSender<UpdateProgress>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A sink that drops every update.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Announces that `step` is starting for `repo_name`.
    pub fn display_operation_progress(&self, repo_name: &str, step: &str) {
        self.send(UpdateProgress::StepStarted {
            repo: repo_name.to_string(),
            step: step.to_string(),
        });
    }

    fn send(&self, update: UpdateProgress) {
        if let Some(sender) = &self.sender {
            // The receiver is gone only when the run is shutting down
            let _ = sender.send(update);
        }
    }
}

/// Accumulates the step log and flags of one repository.
struct UpdateRun<'a> {
    git: Git,
    repo: &'a RepositoryInfo,
    options: &'a UpdateOptions,
    progress: &'a ProgressSink,
    result: RepositoryOperationResult,
    /// Commit of the stash this run created and still owns.
    stash: Option<String>,
}

impl<'a> UpdateRun<'a> {
    fn start(&mut self, step: &str) {
        debug!(repo = %self.repo.name, step, "step started");
        self.progress.display_operation_progress(&self.repo.name, step);
    }

    fn succeeded(&mut self, step: &str) {
        self.result.steps.push(step.to_string());
    }

    fn failed(&mut self, step: &str) {
        self.result.steps.push(format!("{} (failed)", step));
    }

    fn git_error(&self, step: &str, source: GitError) -> LatestError {
        LatestError::Git {
            repo: self.repo.name.clone(),
            step: step.to_string(),
            source,
        }
    }

    fn finish(mut self, error: Option<LatestError>) -> RepositoryOperationResult {
        if let Some(error) = &error {
            warn!(repo = %self.repo.name, %error, "repository update failed");
        } else {
            info!(repo = %self.repo.name, steps = self.result.steps.len(), "repository updated");
        }
        self.result.error = error;
        self.result
    }

    /// Step 1: stash uncommitted work.
    async fn stash_changes(&mut self) -> Result<(), LatestError> {
        let step = "check for uncommitted changes";
        self.start(step);
        let dirty = match self.git.has_uncommitted_changes().await {
            Ok(dirty) => dirty,
            Err(e) => {
                self.failed(step);
                return Err(self.git_error(step, e));
            }
        };
        self.succeeded(step);
        if !dirty {
            return Ok(());
        }

        let step = "stash uncommitted changes";
        self.start(step);
        let pushed = match self.git.stash_push(&self.options.stash_message).await {
            Ok(pushed) => pushed,
            Err(source) => {
                self.failed(step);
                return Err(LatestError::Stash {
                    repo: self.repo.name.clone(),
                    operation: "push".to_string(),
                    source,
                });
            }
        };
        if !pushed {
            // Only ignored files changed; nothing was stashed
            self.succeeded(step);
            return Ok(());
        }

        self.result.had_stash = true;
        match self.git.latest_stash_commit().await {
            Ok(commit) => {
                debug!(repo = %self.repo.name, %commit, "changes stashed");
                self.stash = Some(commit);
                self.succeeded(step);
                Ok(())
            }
            Err(source) => {
                self.failed(step);
                self.result.warnings.push(format!(
                    "the stash created in {} could not be identified; \
                     restore it with `git stash pop`",
                    self.repo.path.display()
                ));
                Err(LatestError::Stash {
                    repo: self.repo.name.clone(),
                    operation: "push".to_string(),
                    source,
                })
            }
        }
    }

    /// Pops the stash created by this run, if any.
    ///
    /// A failed pop leaves the stash in place and is reported as a warning
    /// with the manual command; it is returned so the caller can decide
    /// whether it is the repository's primary error.
    async fn restore_stash(&mut self) -> Option<LatestError> {
        let commit = self.stash.take()?;
        let step = "restore stashed changes";
        self.start(step);
        match self.git.stash_pop(&commit).await {
            Ok(()) => {
                self.result.stash_popped = true;
                self.succeeded(step);
                None
            }
            Err(source) => {
                self.failed(step);
                self.result.warnings.push(format!(
                    "stashed changes could not be restored; run `git stash pop` manually in {}",
                    self.repo.path.display()
                ));
                Some(LatestError::Stash {
                    repo: self.repo.name.clone(),
                    operation: "pop".to_string(),
                    source,
                })
            }
        }
    }

    /// Restores the stash after a failure and returns the original error.
    async fn fail_and_restore(mut self, error: LatestError) -> RepositoryOperationResult {
        // A pop failure after another failure only adds a warning
        let _ = self.restore_stash().await;
        self.finish(Some(error))
    }

    /// Step 2: fetch the trunk branch.
    async fn fetch_trunk(&mut self) -> Result<(), LatestError> {
        let step = format!("fetch {}", self.repo.remote_trunk_ref());
        self.start(&step);
        match self
            .git
            .fetch(
                self.repo.remote.value(),
                self.repo.trunk_branch.value(),
                self.options.fetch_timeout,
            )
            .await
        {
            Ok(()) => {
                self.succeeded(&step);
                Ok(())
            }
            Err(source) => {
                self.failed(&step);
                Err(LatestError::FetchFailed {
                    repo: self.repo.name.clone(),
                    source,
                })
            }
        }
    }

    /// Step 3a: fast-forward the checked-out trunk to the fetched remote ref.
    async fn update_trunk_from_remote(&mut self) -> Result<(), LatestError> {
        let target = self.repo.remote_trunk_ref();
        let step = format!("fast-forward {} to {}", self.repo.trunk_branch, target);
        self.start(&step);
        match self.git.merge_ff_only(&target).await {
            Ok(()) => {
                self.succeeded(&step);
                Ok(())
            }
            Err(source) => {
                self.failed(&step);
                Err(LatestError::TrunkUpdate {
                    repo: self.repo.name.clone(),
                    branch: self.repo.trunk_branch.value().clone(),
                    source,
                })
            }
        }
    }

    /// Step 3b: rebase `branch` onto the fetched trunk and handle conflicts.
    async fn rebase_onto_trunk(&mut self, branch: &str) -> Result<(), LatestError> {
        if branch == self.repo.trunk_branch.value() {
            return Err(LatestError::RebaseOnTrunk {
                repo: self.repo.name.clone(),
                branch: branch.to_string(),
            });
        }

        let onto = self.repo.remote_trunk_ref();
        let step = format!("rebase {} onto {}", branch, onto);
        self.start(&step);
        self.result.rebase_attempted = true;

        let outcome = match self.git.rebase(&onto).await {
            Ok(outcome) => outcome,
            Err(source) => {
                self.failed(&step);
                self.abort_stray_rebase().await;
                return Err(LatestError::RebaseFailed {
                    repo: self.repo.name.clone(),
                    onto,
                    source,
                });
            }
        };

        match outcome {
            RebaseResult::Success => {
                self.succeeded(&step);
                Ok(())
            }
            RebaseResult::Failed(source) => {
                self.failed(&step);
                self.abort_stray_rebase().await;
                Err(LatestError::RebaseFailed {
                    repo: self.repo.name.clone(),
                    onto,
                    source,
                })
            }
            RebaseResult::Conflict(files) => {
                self.failed(&step);
                self.result.rebase_had_conflicts = true;
                info!(repo = %self.repo.name, files = ?files, "rebase stopped on conflicts");

                let aborted = self.options.abort_on_conflict && self.abort_rebase().await;
                Err(LatestError::RebaseConflict {
                    repo: self.repo.name.clone(),
                    onto,
                    files,
                    aborted,
                })
            }
        }
    }

    /// Records the stash behind a rebase left for the user, so a later
    /// resume restores exactly that stash.
    async fn mark_pending_stash(&mut self) {
        let recorded = match &self.stash {
            Some(commit) => self.git.set_pending_stash(commit).await,
            None => self.git.clear_pending_stash().await,
        };
        if let Err(e) = recorded {
            warn!(repo = %self.repo.name, error = %e, "failed to record the pending stash");
        }
        if self.stash.take().is_some() {
            self.result.warnings.push(format!(
                "stashed changes were kept; run `git stash pop` in {} \
                 after `git rebase --continue`",
                self.repo.path.display()
            ));
        }
    }

    async fn abort_rebase(&mut self) -> bool {
        let step = "abort rebase";
        self.start(step);
        match self.git.rebase_abort().await {
            Ok(()) => {
                self.result.rebase_aborted = true;
                self.succeeded(step);
                true
            }
            Err(e) => {
                self.failed(step);
                self.result.warnings.push(format!(
                    "`git rebase --abort` failed ({}); the rebase is still in progress in {}",
                    e,
                    self.repo.path.display()
                ));
                false
            }
        }
    }

    /// Aborts a rebase that failed without conflicts but left state behind.
    async fn abort_stray_rebase(&mut self) {
        if let Ok(git_dir) = self.git.git_dir().await
            && rebase_in_progress(&git_dir)
        {
            self.abort_rebase().await;
        }
    }
}

/// Brings one repository up to date with its trunk branch.
///
/// Never returns an error: every failure is recorded in the result so that
/// the batch can continue with the next repository.
pub async fn process_repository_update(
    repo: &RepositoryInfo,
    options: &UpdateOptions,
    progress: &ProgressSink,
) -> RepositoryOperationResult {
    let span = info_span!("repository", name = %repo.name);
    async move {
        let mut run = UpdateRun {
            git: Git::new(&repo.path, options.git_timeout),
            repo,
            options,
            progress,
            result: RepositoryOperationResult::new(repo.clone()),
            stash: None,
        };

        if let Err(error) = run.stash_changes().await {
            return run.fail_and_restore(error).await;
        }

        if let Err(error) = run.fetch_trunk().await {
            return run.fail_and_restore(error).await;
        }

        let step = "check current branch";
        run.start(step);
        let branch = match run.git.current_branch().await {
            Ok(Some(branch)) => {
                run.succeeded(step);
                branch
            }
            Ok(None) => {
                run.failed(step);
                let error = LatestError::DetachedHead {
                    repo: repo.name.clone(),
                };
                return run.fail_and_restore(error).await;
            }
            Err(e) => {
                run.failed(step);
                let error = run.git_error(step, e);
                return run.fail_and_restore(error).await;
            }
        };

        let updated = if &branch == repo.trunk_branch.value() {
            run.update_trunk_from_remote().await
        } else {
            run.rebase_onto_trunk(&branch).await
        };

        match updated {
            Ok(()) => {}
            Err(error) if error.is_unresolved_conflict() => {
                // Rebase left in progress for the user; the stash stays put
                run.mark_pending_stash().await;
                return run.finish(Some(error));
            }
            Err(error) => return run.fail_and_restore(error).await,
        }

        if options.no_pop_stash {
            if run.stash.take().is_some() {
                run.succeeded("keep stashed changes (--no-pop-stash)");
                run.result.warnings.push(format!(
                    "stashed changes were kept; run `git stash pop` in {} when ready",
                    repo.path.display()
                ));
            }
            return run.finish(None);
        }

        let pop_error = run.restore_stash().await;
        run.finish(pop_error)
    }
    .instrument(span)
    .await
}

/// Runs the update protocol for every repository.
///
/// `groups` come from [`super::resolver::group_repositories`]: members of a
/// group run strictly in order, separate groups run concurrently. A failed
/// repository never stops the others. Once `cancel` is set no further
/// repository is started; those are reported with [`LatestError::Cancelled`].
/// Results are returned in the order of the entries' indices.
pub async fn perform_fetch_and_rebase_for_all_repos(
    groups: Vec<Vec<(usize, RepositoryInfo)>>,
    options: UpdateOptions,
    progress: ProgressSink,
    cancel: Arc<AtomicBool>,
) -> Vec<RepositoryOperationResult> {
    let options = Arc::new(options);
    let total: usize = groups.iter().map(Vec::len).sum();
    info!(repositories = total, groups = groups.len(), "starting batch update");

    let handles: Vec<_> = groups
        .iter()
        .cloned()
        .map(|group| {
            let options = Arc::clone(&options);
            let progress = progress.clone();
            let cancel = Arc::clone(&cancel);
            tokio::spawn(async move {
                let mut results = Vec::with_capacity(group.len());
                for (index, repo) in group {
                    let result = if cancel.load(Ordering::SeqCst) {
                        cancelled_result(repo)
                    } else {
                        process_repository_update(&repo, &options, &progress).await
                    };
                    progress.send(UpdateProgress::Finished(Box::new(result.clone())));
                    results.push((index, result));
                }
                results
            })
        })
        .collect();

    let mut indexed: Vec<(usize, RepositoryOperationResult)> = Vec::with_capacity(total);
    for (outcome, group) in join_all(handles).await.into_iter().zip(groups) {
        match outcome {
            Ok(results) => indexed.extend(results),
            Err(join_error) => {
                warn!(error = %join_error, "update worker terminated unexpectedly");
                for (index, repo) in group {
                    let name = repo.name.clone();
                    let mut result = RepositoryOperationResult::new(repo);
                    result.error = Some(LatestError::Git {
                        repo: name,
                        step: "update".to_string(),
                        source: GitError::Spawn {
                            command: "update worker".to_string(),
                            message: join_error.to_string(),
                        },
                    });
                    indexed.push((index, result));
                }
            }
        }
    }

    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, result)| result).collect()
}

fn cancelled_result(repo: RepositoryInfo) -> RepositoryOperationResult {
    debug!(repo = %repo.name, "skipping repository after cancellation");
    let name = repo.name.clone();
    let mut result = RepositoryOperationResult::new(repo);
    result.error = Some(LatestError::Cancelled { repo: name });
    result
}
