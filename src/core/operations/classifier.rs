//! Repository state classification.
//!
//! Maps the git state of one repository to exactly one [`RepositoryState`].
//! Checks run in priority order: rebase markers, `MERGE_HEAD`, unmerged
//! status entries, any other status entry, clean.

use std::path::Path;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::LatestError;
use crate::git::Git;
use crate::models::{RepositoryInfo, RepositoryState, RepositoryStateInfo};

/// Two-letter porcelain codes git uses for unmerged paths.
const CONFLICT_CODES: [&str; 7] = ["UU", "AA", "DU", "DD", "AU", "UA", "UD"];

/// Checks if a porcelain status code marks an unmerged path.
fn is_conflict_status(code: &str) -> bool {
    CONFLICT_CODES.contains(&code)
}

/// Splits `git status --porcelain -z` output into `(code, path)` entries.
///
/// Paths are raw (never quoted). Renames and copies carry their source path
/// as an extra NUL-terminated field, which is skipped.
pub fn parse_status_entries(status: &str) -> Vec<(&str, &str)> {
    let mut entries = Vec::new();
    let mut fields = status.split('\0').filter(|field| !field.is_empty());
    while let Some(field) = fields.next() {
        let (Some(code), Some(path)) = (field.get(..2), field.get(3..)) else {
            continue;
        };
        if code.contains(['R', 'C']) {
            fields.next();
        }
        entries.push((code, path));
    }
    entries
}

/// Paths of all unmerged entries in `git status --porcelain -z` output.
pub fn extract_conflicting_files(status: &str) -> Vec<String> {
    parse_status_entries(status)
        .into_iter()
        .filter(|(code, _)| is_conflict_status(code))
        .map(|(_, path)| path.to_string())
        .collect()
}

/// True when the git directory holds the state of an unfinished rebase.
pub fn rebase_in_progress(git_dir: &Path) -> bool {
    git_dir.join("rebase-merge").is_dir() || git_dir.join("rebase-apply").is_dir()
}

/// True when the git directory records an unfinished merge.
pub fn merge_in_progress(git_dir: &Path) -> bool {
    git_dir.join("MERGE_HEAD").is_file()
}

/// Classifies one repository.
///
/// Never fails: git errors become [`RepositoryState::Error`] with a
/// [`LatestError::Classifier`] attached.
pub async fn check_repository_state(
    repo: &RepositoryInfo,
    timeout: Duration,
) -> RepositoryStateInfo {
    let git = Git::new(&repo.path, timeout);

    let failed = |source| {
        warn!(repo = %repo.name, error = %source, "failed to check git status");
        let error = LatestError::Classifier {
            repo: repo.name.clone(),
            source,
        };
        RepositoryStateInfo {
            repo: repo.clone(),
            state: RepositoryState::Error,
            details: error.to_string(),
            error: Some(error),
        }
    };

    let git_dir = match git.git_dir().await {
        Ok(dir) => dir,
        Err(e) => return failed(e),
    };

    let (state, details) = if rebase_in_progress(&git_dir) {
        (RepositoryState::InRebase, "rebase in progress".to_string())
    } else if merge_in_progress(&git_dir) {
        (RepositoryState::InMerge, "merge in progress".to_string())
    } else {
        let status = match git.status_porcelain().await {
            Ok(status) => status,
            Err(e) => return failed(e),
        };
        let conflicting = extract_conflicting_files(&status);
        let changed = parse_status_entries(&status).len();

        if !conflicting.is_empty() {
            (
                RepositoryState::ConflictsExist,
                format!("{} conflicting file(s): {}", conflicting.len(), conflicting.join(", ")),
            )
        } else if changed > 0 {
            (
                RepositoryState::DirtyWorkingDir,
                format!("{} uncommitted change(s)", changed),
            )
        } else {
            (RepositoryState::ReadyForUpdate, "working tree clean".to_string())
        }
    };

    debug!(repo = %repo.name, %state, %details, "classified repository");
    RepositoryStateInfo {
        repo: repo.clone(),
        state,
        details,
        error: None,
    }
}

/// Classifies every repository concurrently; results keep the input order.
pub async fn check_all_repositories(
    repos: &[RepositoryInfo],
    timeout: Duration,
) -> Vec<RepositoryStateInfo> {
    join_all(repos.iter().map(|repo| check_repository_state(repo, timeout))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::DEFAULT_GIT_TIMEOUT;
    use crate::parsed_property::ParsedProperty;
    use std::fs;
    use std::path::PathBuf;
    use std::process::Command;
    use tempfile::TempDir;

    fn git_sync(dir: &Path, args: &[&str]) -> bool {
        Command::new("git")
            .current_dir(dir)
            .args(args)
            .output()
            .unwrap()
            .status
            .success()
    }

    fn setup_repo() -> (TempDir, RepositoryInfo) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().to_path_buf();
        for args in [
            &["init", "-b", "main"][..],
            &["config", "user.name", "Test User"],
            &["config", "user.email", "test@example.com"],
            &["config", "commit.gpgsign", "false"],
        ] {
            assert!(git_sync(&path, args));
        }
        fs::write(path.join("file.txt"), "base\n").unwrap();
        assert!(git_sync(&path, &["add", "."]));
        assert!(git_sync(&path, &["commit", "-m", "initial"]));

        let repo = RepositoryInfo {
            name: "repo".to_string(),
            path,
            trunk_branch: ParsedProperty::Default("main".to_string()),
            remote: ParsedProperty::Default("origin".to_string()),
            repo_root: None,
        };
        (temp_dir, repo)
    }

    /// Creates diverging edits of file.txt on `main` and `feature`.
    fn diverge(path: &Path) {
        assert!(git_sync(path, &["checkout", "-b", "feature"]));
        fs::write(path.join("file.txt"), "feature\n").unwrap();
        assert!(git_sync(path, &["commit", "-am", "feature"]));
        assert!(git_sync(path, &["checkout", "main"]));
        fs::write(path.join("file.txt"), "main\n").unwrap();
        assert!(git_sync(path, &["commit", "-am", "main"]));
    }

    /// # Conflict Status Parsing
    ///
    /// ## Test Scenario
    /// - Parses porcelain output mixing every conflict code with modified,
    ///   added, untracked and lookalike entries
    ///
    /// ## Expected Outcome
    /// - Only the seven unmerged codes are reported, in order
    #[test]
    fn test_extract_conflicting_files() {
        let status = "UU both.rs\0AA added.rs\0DU ours_deleted.rs\0DD both_deleted.rs\0\
                      AU au.rs\0UA ua.rs\0UD ud.rs\0 M modified.rs\0A  staged.rs\0\
                      ?? new.rs\0MU weird.rs\0";
        assert_eq!(
            extract_conflicting_files(status),
            vec![
                "both.rs",
                "added.rs",
                "ours_deleted.rs",
                "both_deleted.rs",
                "au.rs",
                "ua.rs",
                "ud.rs"
            ]
        );
        assert!(extract_conflicting_files("").is_empty());
        assert!(extract_conflicting_files(" M a.rs\0").is_empty());
    }

    /// # NUL-Separated Status Entries
    ///
    /// ## Test Scenario
    /// - Status with a space in a path, a rename with its source field and
    ///   a conflicted path containing a quote
    ///
    /// ## Expected Outcome
    /// - Paths come back unquoted and the rename source is not an entry
    #[test]
    fn test_parse_status_entries() {
        let status = " M my file.txt\0R  new name.rs\0old name.rs\0UU say \"hi\".md\0";
        assert_eq!(
            parse_status_entries(status),
            vec![
                (" M", "my file.txt"),
                ("R ", "new name.rs"),
                ("UU", "say \"hi\".md"),
            ]
        );
        assert_eq!(extract_conflicting_files(status), vec!["say \"hi\".md"]);
    }

    #[test]
    fn test_is_conflict_status() {
        assert!(is_conflict_status("UU"));
        assert!(!is_conflict_status("U"));
        assert!(!is_conflict_status(" U"));
        assert!(!is_conflict_status("M "));
    }

    #[tokio::test]
    async fn test_clean_and_dirty_states() {
        let (_temp_dir, repo) = setup_repo();

        let clean = check_repository_state(&repo, DEFAULT_GIT_TIMEOUT).await;
        assert_eq!(clean.state, RepositoryState::ReadyForUpdate);
        assert!(clean.error.is_none());

        fs::write(repo.path.join("untracked.txt"), "x").unwrap();
        let dirty = check_repository_state(&repo, DEFAULT_GIT_TIMEOUT).await;
        assert_eq!(dirty.state, RepositoryState::DirtyWorkingDir);
    }

    /// # Classifier Idempotence
    ///
    /// ## Test Scenario
    /// - Classifies an unchanged dirty repository twice
    ///
    /// ## Expected Outcome
    /// - Both runs report the same state and details
    #[tokio::test]
    async fn test_classifier_is_idempotent() {
        let (_temp_dir, repo) = setup_repo();
        fs::write(repo.path.join("file.txt"), "changed\n").unwrap();

        let first = check_repository_state(&repo, DEFAULT_GIT_TIMEOUT).await;
        let second = check_repository_state(&repo, DEFAULT_GIT_TIMEOUT).await;
        assert_eq!(first, second);
    }

    /// # In-Progress Operations Take Priority
    ///
    /// ## Test Scenario
    /// - A rebase stops on a conflict (unmerged paths and rebase-merge dir)
    /// - A merge stops on a conflict in another repository
    ///
    /// ## Expected Outcome
    /// - The rebase is InRebase and the merge is InMerge even though both
    ///   also have unmerged status entries
    #[tokio::test]
    async fn test_in_progress_operations() {
        let (_rebase_dir, rebase_repo) = setup_repo();
        diverge(&rebase_repo.path);
        assert!(git_sync(&rebase_repo.path, &["checkout", "feature"]));
        assert!(!git_sync(&rebase_repo.path, &["rebase", "main"]));
        let state = check_repository_state(&rebase_repo, DEFAULT_GIT_TIMEOUT).await;
        assert_eq!(state.state, RepositoryState::InRebase);

        let (_merge_dir, merge_repo) = setup_repo();
        diverge(&merge_repo.path);
        assert!(!git_sync(&merge_repo.path, &["merge", "feature"]));
        let state = check_repository_state(&merge_repo, DEFAULT_GIT_TIMEOUT).await;
        assert_eq!(state.state, RepositoryState::InMerge);
    }

    /// # Unmerged Paths Without An Operation
    ///
    /// ## Test Scenario
    /// - A merge conflicts, then MERGE_HEAD is removed by hand
    ///
    /// ## Expected Outcome
    /// - The repository is ConflictsExist and the details list the file
    #[tokio::test]
    async fn test_conflicts_exist_state() {
        let (_temp_dir, repo) = setup_repo();
        diverge(&repo.path);
        assert!(!git_sync(&repo.path, &["merge", "feature"]));
        fs::remove_file(repo.path.join(".git").join("MERGE_HEAD")).unwrap();

        let state = check_repository_state(&repo, DEFAULT_GIT_TIMEOUT).await;
        assert_eq!(state.state, RepositoryState::ConflictsExist);
        assert!(state.details.contains("file.txt"));
    }

    /// # Git Failure Degrades To Error State
    ///
    /// ## Test Scenario
    /// - Classifies a directory that is not a repository
    ///
    /// ## Expected Outcome
    /// - State is Error with a "failed to check git status" classifier error
    #[tokio::test]
    async fn test_not_a_repository_is_error_state() {
        let temp_dir = TempDir::new().unwrap();
        let repo = RepositoryInfo {
            name: "plain".to_string(),
            path: PathBuf::from(temp_dir.path()),
            trunk_branch: ParsedProperty::Default("main".to_string()),
            remote: ParsedProperty::Default("origin".to_string()),
            repo_root: None,
        };

        let results = check_all_repositories(&[repo], DEFAULT_GIT_TIMEOUT).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, RepositoryState::Error);
        assert!(matches!(results[0].error, Some(LatestError::Classifier { .. })));
        assert!(results[0].details.starts_with("failed to check git status"));
    }
}
