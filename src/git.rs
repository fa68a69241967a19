//! Git command runner.
//!
//! Every git invocation made by kira goes through [`Git::run_with_timeout`]:
//! the repository is always passed explicitly with `git -C <path>`, the call
//! is bounded by a timeout, and failures come back as a classified
//! [`GitError`]. The typed helpers on [`Git`] cover the plumbing the
//! synchronization engine needs (status, stash, fetch, rebase).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::error::GitError;

/// Default time budget for local git commands.
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Ref pointing at the stash a rebase left for the user is waiting on.
pub const PENDING_STASH_REF: &str = "refs/kira/pending-stash";

/// Default time budget for `git fetch`.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

static NETWORK_ERROR_REGEX: OnceLock<Regex> = OnceLock::new();
static MISSING_REMOTE_REGEX: OnceLock<Regex> = OnceLock::new();
static MISSING_REF_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_network_error_regex() -> &'static Regex {
    NETWORK_ERROR_REGEX.get_or_init(|| {
        Regex::new(
            concat!(
                r"(?i)(could not resolve host|unable to access|connection (refused|timed out|reset)",
                r"|network is unreachable|could not read from remote repository|operation timed out",
                r"|ssh: connect to host|authentication failed|the remote end hung up)",
            ),
        )
        .expect("Failed to compile network error regex")
    })
}

fn get_missing_remote_regex() -> &'static Regex {
    MISSING_REMOTE_REGEX.get_or_init(|| {
        Regex::new(r"(?i)(does not appear to be a git repository|no such remote)")
            .expect("Failed to compile missing remote regex")
    })
}

fn get_missing_ref_regex() -> &'static Regex {
    MISSING_REF_REGEX.get_or_init(|| {
        Regex::new(r"(?i)couldn't find remote ref").expect("Failed to compile missing ref regex")
    })
}

/// Captured output of a finished git process.
#[derive(Debug, Clone, PartialEq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Best human-readable description of what went wrong.
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }

    fn into_failure(self, command: String) -> GitError {
        GitError::CommandFailed {
            command,
            message: self.message(),
            exit_code: self.exit_code,
        }
    }
}

/// Result of starting or continuing a rebase.
#[derive(Debug, Clone, PartialEq)]
pub enum RebaseResult {
    Success,
    /// The rebase stopped; the listed files are unmerged.
    Conflict(Vec<String>),
    Failed(GitError),
}

/// Handle for running git commands against one repository.
#[derive(Debug, Clone)]
pub struct Git {
    repo_path: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(repo_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            repo_path: repo_path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.repo_path
    }

    /// Runs `git -C <repo> <args>` with the default timeout.
    ///
    /// A non-zero exit status is not an error here; callers inspect
    /// [`GitOutput::exit_code`]. Errors are returned only when git could not
    /// be started or did not finish in time.
    pub async fn run(&self, args: &[&str]) -> Result<GitOutput, GitError> {
        self.run_with_timeout(args, self.timeout).await
    }

    /// Runs a git command with an explicit timeout.
    pub async fn run_with_timeout(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<GitOutput, GitError> {
        let command = args.join(" ");
        debug!(repo = %self.repo_path.display(), command = %command, "running git");

        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_EDITOR", "true")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(GitError::Spawn {
                    command,
                    message: e.to_string(),
                });
            }
            Err(_) => {
                warn!(
                    repo = %self.repo_path.display(),
                    command = %command,
                    timeout_secs = timeout.as_secs(),
                    "git command timed out"
                );
                return Err(GitError::Timeout {
                    command,
                    seconds: timeout.as_secs(),
                });
            }
        };

        let result = GitOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };
        trace!(command = %command, exit_code = ?result.exit_code, "git finished");
        Ok(result)
    }

    /// Runs a git command and turns a non-zero exit into [`GitError::CommandFailed`].
    pub async fn run_checked(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.run(args).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(output.into_failure(args.join(" ")))
        }
    }

    /// Absolute path of the repository's git directory.
    pub async fn git_dir(&self) -> Result<PathBuf, GitError> {
        if !self.repo_path.exists() {
            return Err(GitError::PathNotFound {
                path: self.repo_path.clone(),
            });
        }
        let output = self.run(&["rev-parse", "--absolute-git-dir"]).await?;
        if !output.success() {
            if output.stderr.contains("not a git repository") {
                return Err(GitError::NotARepository {
                    path: self.repo_path.clone(),
                });
            }
            return Err(output.into_failure("rev-parse --absolute-git-dir".to_string()));
        }
        Ok(PathBuf::from(output.stdout.trim()))
    }

    /// Top-level directory of the working tree containing the repository path.
    pub async fn toplevel(&self) -> Result<PathBuf, GitError> {
        let stdout = self.run_checked(&["rev-parse", "--show-toplevel"]).await?;
        Ok(PathBuf::from(stdout.trim()))
    }

    /// `git status --porcelain -z` output, without taking optional locks.
    ///
    /// Entries are NUL-terminated and paths are never quoted.
    pub async fn status_porcelain(&self) -> Result<String, GitError> {
        self.run_checked(&["--no-optional-locks", "status", "--porcelain", "-z"])
            .await
    }

    pub async fn has_uncommitted_changes(&self) -> Result<bool, GitError> {
        Ok(!self.status_porcelain().await?.trim().is_empty())
    }

    /// Name of the checked-out branch, or `None` on a detached HEAD.
    pub async fn current_branch(&self) -> Result<Option<String>, GitError> {
        let output = self.run(&["symbolic-ref", "--quiet", "--short", "HEAD"]).await?;
        match output.exit_code {
            Some(0) => Ok(Some(output.stdout.trim().to_string())),
            Some(1) => Ok(None),
            _ => Err(output.into_failure("symbolic-ref --quiet --short HEAD".to_string())),
        }
    }

    pub async fn local_branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        self.ref_exists(&format!("refs/heads/{}", branch)).await
    }

    pub async fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool, GitError> {
        self.ref_exists(&format!("refs/remotes/{}/{}", remote, branch))
            .await
    }

    async fn ref_exists(&self, full_ref: &str) -> Result<bool, GitError> {
        let output = self
            .run(&["show-ref", "--verify", "--quiet", full_ref])
            .await?;
        Ok(output.success())
    }

    /// Branch the remote's symbolic HEAD points at (e.g. `main` for `origin/HEAD`).
    pub async fn remote_head(&self, remote: &str) -> Result<Option<String>, GitError> {
        let head_ref = format!("refs/remotes/{}/HEAD", remote);
        let output = self
            .run(&["symbolic-ref", "--quiet", "--short", &head_ref])
            .await?;
        if !output.success() {
            return Ok(None);
        }
        let prefix = format!("{}/", remote);
        let short = output.stdout.trim();
        Ok(Some(short.strip_prefix(&prefix).unwrap_or(short).to_string()))
    }

    pub async fn remotes(&self) -> Result<Vec<String>, GitError> {
        let stdout = self.run_checked(&["remote"]).await?;
        Ok(stdout
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    /// Fetches `branch` from `remote` into `refs/remotes/<remote>/<branch>`.
    pub async fn fetch(
        &self,
        remote: &str,
        branch: &str,
        timeout: Duration,
    ) -> Result<(), GitError> {
        let refspec = format!("+refs/heads/{0}:refs/remotes/{1}/{0}", branch, remote);
        let args = ["fetch", "--no-tags", remote, refspec.as_str()];
        let output = match self.run_with_timeout(&args, timeout).await {
            Err(GitError::Timeout { seconds, .. }) => {
                return Err(GitError::Network {
                    remote: remote.to_string(),
                    message: format!("fetch did not finish within {}s", seconds),
                });
            }
            other => other?,
        };
        if output.success() {
            return Ok(());
        }
        Err(classify_fetch_failure(remote, branch, args.join(" "), output))
    }

    /// Stashes tracked and untracked changes under `message`.
    ///
    /// Returns false when git had nothing to stash.
    pub async fn stash_push(&self, message: &str) -> Result<bool, GitError> {
        let args = ["stash", "push", "--include-untracked", "-m", message];
        let output = self.run(&args).await?;
        if !output.success() {
            return Err(output.into_failure(args.join(" ")));
        }
        let nothing_to_save = output.stdout.contains("No local changes to save")
            || output.stderr.contains("No local changes to save");
        Ok(!nothing_to_save)
    }

    /// Commit id of the newest stash entry.
    pub async fn latest_stash_commit(&self) -> Result<String, GitError> {
        let stdout = self.run_checked(&["rev-parse", "--verify", "refs/stash"]).await?;
        Ok(stdout.trim().to_string())
    }

    /// `stash@{n}` reference of the entry whose commit is `commit`.
    pub async fn find_stash(&self, commit: &str) -> Result<Option<String>, GitError> {
        let stdout = self
            .run_checked(&["stash", "list", "--format=%gd%x09%H"])
            .await?;
        Ok(find_stash_ref(&stdout, commit))
    }

    /// Pops the stash entry whose commit is `commit`.
    pub async fn stash_pop(&self, commit: &str) -> Result<(), GitError> {
        let Some(stash_ref) = self.find_stash(commit).await? else {
            return Err(GitError::CommandFailed {
                command: "stash pop".to_string(),
                message: format!("stash {} is no longer in the stash list", commit),
                exit_code: None,
            });
        };
        self.run_checked(&["stash", "pop", &stash_ref]).await?;
        Ok(())
    }

    /// Remembers the stash an interrupted rebase is waiting to restore.
    pub async fn set_pending_stash(&self, commit: &str) -> Result<(), GitError> {
        self.run_checked(&["update-ref", PENDING_STASH_REF, commit])
            .await?;
        Ok(())
    }

    /// Stash recorded by [`Git::set_pending_stash`], if any.
    pub async fn pending_stash(&self) -> Result<Option<String>, GitError> {
        let output = self
            .run(&["rev-parse", "--verify", "--quiet", PENDING_STASH_REF])
            .await?;
        match output.exit_code {
            Some(0) => Ok(Some(output.stdout.trim().to_string())),
            Some(1) => Ok(None),
            _ => Err(output.into_failure(format!("rev-parse --verify {}", PENDING_STASH_REF))),
        }
    }

    pub async fn clear_pending_stash(&self) -> Result<(), GitError> {
        if self.pending_stash().await?.is_some() {
            self.run_checked(&["update-ref", "-d", PENDING_STASH_REF])
                .await?;
        }
        Ok(())
    }

    /// Moves the checked-out branch to `target` without creating a merge commit.
    pub async fn merge_ff_only(&self, target: &str) -> Result<(), GitError> {
        self.run_checked(&["merge", "--ff-only", target]).await?;
        Ok(())
    }

    pub async fn rebase(&self, onto: &str) -> Result<RebaseResult, GitError> {
        let output = self.run(&["rebase", onto]).await?;
        self.rebase_result(output, format!("rebase {}", onto)).await
    }

    pub async fn rebase_continue(&self) -> Result<RebaseResult, GitError> {
        let output = self.run(&["rebase", "--continue"]).await?;
        self.rebase_result(output, "rebase --continue".to_string())
            .await
    }

    pub async fn rebase_abort(&self) -> Result<(), GitError> {
        self.run_checked(&["rebase", "--abort"]).await?;
        Ok(())
    }

    async fn rebase_result(
        &self,
        output: GitOutput,
        command: String,
    ) -> Result<RebaseResult, GitError> {
        if output.success() {
            return Ok(RebaseResult::Success);
        }

        let unmerged = self.unmerged_files().await?;
        let reported_conflict = output.stdout.contains("CONFLICT")
            || output.stderr.contains("CONFLICT")
            || output.stderr.contains("could not apply");

        if !unmerged.is_empty() || reported_conflict {
            Ok(RebaseResult::Conflict(unmerged))
        } else {
            Ok(RebaseResult::Failed(output.into_failure(command)))
        }
    }

    /// Paths git reports as unmerged.
    pub async fn unmerged_files(&self) -> Result<Vec<String>, GitError> {
        let stdout = self
            .run_checked(&["diff", "--name-only", "-z", "--diff-filter=U"])
            .await?;
        Ok(stdout
            .split('\0')
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Maps a failed fetch to a network, missing-remote or missing-ref error.
pub fn classify_fetch_failure(
    remote: &str,
    branch: &str,
    command: String,
    output: GitOutput,
) -> GitError {
    let message = output.message();
    if get_missing_remote_regex().is_match(&message) {
        GitError::RemoteNotFound {
            remote: remote.to_string(),
            message,
        }
    } else if get_missing_ref_regex().is_match(&message) {
        GitError::RemoteRefNotFound {
            remote: remote.to_string(),
            branch: branch.to_string(),
        }
    } else if get_network_error_regex().is_match(&message) {
        GitError::Network {
            remote: remote.to_string(),
            message,
        }
    } else {
        output.into_failure(command)
    }
}

fn find_stash_ref(stash_list: &str, commit: &str) -> Option<String> {
    stash_list.lines().find_map(|line| {
        let (reference, id) = line.split_once('\t')?;
        (id.trim() == commit).then(|| reference.to_string())
    })
}
