//! Runner for `kira latest`.
//!
//! Drives the pipeline: resolve repositories, classify them, resume
//! interrupted rebases, run the pre-flight gate, update every repository and
//! report conflicts and the summary through an [`OutputWriter`].

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::ExitCode;
use crate::core::operations::{
    ProgressSink, UpdateOptions, UpdateProgress, aggregate_repository_states,
    check_all_repositories, group_repositories, parse_conflicts_from_repository,
    perform_fetch_and_rebase_for_all_repos, resolve_repositories, try_resume_interrupted_rebases,
    validate_all_repos_clean_or_dirty_for_update,
};
use crate::core::output::{
    OutputFormatter, OutputWriter, ProgressEvent, SummaryInfo, SummaryResult,
};
use crate::error::LatestError;
use crate::models::{
    RepositoryConflicts, RepositoryInfo, RepositoryOperationResult, RepositoryState,
};
use crate::work_item::{FolderWorkItemLocator, WorkItemLocator};

use super::traits::{LatestRunnerConfig, RunResult};

/// Runs `kira latest` without user interaction.
pub struct LatestRunner<W: Write = io::Stdout> {
    config: LatestRunnerConfig,
    output: OutputWriter<W>,
    cancel: Arc<AtomicBool>,
    locator: Option<Box<dyn WorkItemLocator>>,
}

impl LatestRunner<io::Stdout> {
    /// Creates a new runner with stdout output.
    pub fn new(config: LatestRunnerConfig) -> Self {
        let output = OutputWriter::new(io::stdout(), config.output_format, config.quiet);
        Self::from_parts(config, output)
    }
}

impl<W: Write> LatestRunner<W> {
    /// Creates a new runner with a custom writer.
    pub fn with_writer(config: LatestRunnerConfig, writer: W) -> Self {
        let output = OutputWriter::new(writer, config.output_format, config.quiet);
        Self::from_parts(config, output)
    }

    fn from_parts(config: LatestRunnerConfig, output: OutputWriter<W>) -> Self {
        Self {
            config,
            output,
            cancel: Arc::new(AtomicBool::new(false)),
            locator: None,
        }
    }

    /// Flag that stops the batch before the next repository when set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Replaces the folder-based work item lookup.
    pub fn with_work_item_locator(mut self, locator: Box<dyn WorkItemLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Runs the whole pipeline and reports the outcome.
    pub async fn run(&mut self) -> RunResult {
        let root = self.config.workspace_root.clone();

        let config = match Config::resolve(&root) {
            Ok(config) => config,
            Err(e) => {
                let message = format!("Failed to load configuration: {:#}", e);
                self.emit_error(&message, Some("config"));
                return RunResult::error(ExitCode::GeneralError, message);
            }
        };

        let work_item = self.find_work_item(&config);

        let workspace = match resolve_repositories(&root, &config).await {
            Ok(workspace) => workspace,
            Err(e) => {
                let code = match e {
                    LatestError::Validation { .. } => ExitCode::ValidationFailed,
                    _ => ExitCode::GeneralError,
                };
                self.emit_error(&e.to_string(), Some("validation"));
                self.finish(SummaryInfo::rejected(SummaryResult::ValidationFailed, work_item));
                return RunResult::error(code, e.to_string());
            }
        };

        self.emit_event(ProgressEvent::Start {
            workspace_root: root.clone(),
            topology: workspace.topology.to_string(),
            repositories: workspace.repositories.len(),
            work_item: work_item.clone(),
            started_at: chrono::Utc::now(),
        });

        let git_timeout = config.git_timeout();
        let states = check_all_repositories(&workspace.repositories, git_timeout).await;
        let (states, resumed) = try_resume_interrupted_rebases(states, git_timeout).await;
        for outcome in resumed {
            self.emit_event(ProgressEvent::RebaseResumed {
                repo: outcome.repo,
                completed: outcome.completed,
                stash_popped: outcome.stash_popped,
                message: outcome.message,
            });
        }
        for state in &states {
            self.emit_event(ProgressEvent::RepositoryState {
                repo: state.repo.name.clone(),
                state: state.state,
                details: state.details.clone(),
            });
        }

        let aggregated = aggregate_repository_states(&states);
        if let Err(e) = validate_all_repos_clean_or_dirty_for_update(&aggregated) {
            if let LatestError::PreflightBlocked {
                conflicting,
                in_operation,
                errors,
                message,
            } = e.clone()
            {
                self.emit_event(ProgressEvent::PreflightBlocked {
                    conflicting,
                    in_operation,
                    errors,
                    message,
                });
            }

            let blocked: Vec<RepositoryInfo> = states
                .iter()
                .filter(|s| s.state == RepositoryState::ConflictsExist || s.state.is_in_operation())
                .map(|s| s.repo.clone())
                .collect();
            let conflicts = collect_conflicts(&blocked, git_timeout).await;
            self.write_conflicts(&conflicts);
            self.finish(SummaryInfo::rejected(SummaryResult::PreflightRejected, work_item));
            return RunResult::error(ExitCode::PreflightRejected, e.to_string());
        }

        let options = UpdateOptions {
            abort_on_conflict: self.config.abort_on_conflict,
            no_pop_stash: self.config.no_pop_stash,
            stash_message: config.stash_message().to_string(),
            git_timeout,
            fetch_timeout: config.fetch_timeout(),
        };
        let results = self.update_repositories(&workspace.repositories, options).await;

        let summary = SummaryInfo::from_results(&results, work_item);
        self.emit_event(ProgressEvent::Complete {
            successful: summary.counts.successful,
            failed: summary.counts.failed,
            skipped: summary.counts.skipped,
        });

        let conflicted: Vec<RepositoryInfo> = results
            .iter()
            .filter(|r| r.error.as_ref().is_some_and(LatestError::is_unresolved_conflict))
            .map(|r| r.repo.clone())
            .collect();
        let conflicts = collect_conflicts(&conflicted, git_timeout).await;
        self.write_conflicts(&conflicts);

        let exit_code = summary.result.exit_code();
        info!(result = %summary.result, code = exit_code.code(), "latest finished");
        let message = format!(
            "{} successful, {} failed, {} skipped",
            summary.counts.successful, summary.counts.failed, summary.counts.skipped
        );
        self.finish(summary);

        let result = if exit_code == ExitCode::Success {
            RunResult::success()
        } else {
            RunResult::error(exit_code, message)
        };
        result.with_results(results)
    }

    /// Runs the batch while rendering its progress as it arrives.
    async fn update_repositories(
        &mut self,
        repositories: &[RepositoryInfo],
        options: UpdateOptions,
    ) -> Vec<RepositoryOperationResult> {
        let groups = group_repositories(repositories);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let batch = perform_fetch_and_rebase_for_all_repos(
            groups,
            options,
            ProgressSink::new(tx),
            self.cancel_flag(),
        );

        // The channel closes once the batch has dropped every sink
        let render = async {
            while let Some(update) = rx.recv().await {
                let event = match update {
                    UpdateProgress::StepStarted { repo, step } => {
                        ProgressEvent::StepStarted { repo, step }
                    }
                    UpdateProgress::Finished(result) => ProgressEvent::repository_complete(&result),
                };
                self.emit_event(event);
            }
        };

        let (results, ()) = tokio::join!(batch, render);
        results
    }

    fn find_work_item(&self, config: &Config) -> Option<String> {
        let found = match &self.locator {
            Some(locator) => locator.current_work_item(),
            None => FolderWorkItemLocator::new(config.doing_dir(&self.config.workspace_root))
                .current_work_item(),
        };
        match found {
            Ok(item) => item.map(|item| item.id),
            Err(e) => {
                warn!(error = %e, "failed to look up the current work item");
                None
            }
        }
    }

    fn finish(&mut self, summary: SummaryInfo) {
        if let Err(e) = self.output.write_summary(&summary) {
            eprintln!("Warning: Failed to write summary: {}", e);
        }
        if let Err(e) = self.output.flush() {
            eprintln!("Warning: Failed to flush output: {}", e);
        }
    }

    fn write_conflicts(&mut self, conflicts: &[RepositoryConflicts]) {
        if let Err(e) = self.output.write_conflicts(conflicts) {
            eprintln!("Warning: Failed to write conflict report: {}", e);
        }
    }

    fn emit_event(&mut self, event: ProgressEvent) {
        if let Err(e) = self.output.write_event(&event) {
            eprintln!("Warning: Failed to write event: {}", e);
        }
    }

    fn emit_error(&mut self, message: &str, code: Option<&str>) {
        self.emit_event(ProgressEvent::Error {
            message: message.to_string(),
            code: code.map(str::to_string),
        });
    }
}

/// Conflict reports of the given repositories, skipping those without
/// unmerged files or whose status cannot be read.
async fn collect_conflicts(
    repos: &[RepositoryInfo],
    timeout: std::time::Duration,
) -> Vec<RepositoryConflicts> {
    let mut all = Vec::new();
    for repo in repos {
        match parse_conflicts_from_repository(repo, timeout).await {
            Ok(conflicts) if !conflicts.files.is_empty() => all.push(conflicts),
            Ok(_) => {}
            Err(e) => warn!(repo = %repo.name, error = %e, "failed to read conflicts"),
        }
    }
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutputFormat;
    use crate::work_item::WorkItem;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use tempfile::TempDir;

    struct FixedWorkItem;

    impl WorkItemLocator for FixedWorkItem {
        fn current_work_item(&self) -> anyhow::Result<Option<WorkItem>> {
            Ok(Some(WorkItem {
                id: "017".to_string(),
                path: PathBuf::from("017-sync.md"),
            }))
        }
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .current_dir(dir)
            .args(args)
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {:?} failed", args);
    }

    fn config(root: &Path, format: OutputFormat) -> LatestRunnerConfig {
        LatestRunnerConfig {
            workspace_root: root.to_path_buf(),
            abort_on_conflict: false,
            no_pop_stash: false,
            output_format: format,
            quiet: false,
        }
    }

    /// # Missing Project Path Fails Validation
    ///
    /// ## Test Scenario
    /// - Workspace config lists a project whose directory does not exist
    ///
    /// ## Expected Outcome
    /// - Exit code is ValidationFailed and nothing is updated
    /// - The error event names the project
    #[tokio::test]
    async fn test_validation_failure_exit_code() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("kira.toml"),
            "[workspace]\nrepo_root = \".\"\n\n\
             [[workspace.projects]]\nname = \"ghost\"\npath = \"ghost\"\n",
        )
        .unwrap();

        let mut buffer = Vec::new();
        let result = {
            let mut runner =
                LatestRunner::with_writer(config(temp_dir.path(), OutputFormat::Text), &mut buffer);
            runner.run().await
        };

        assert_eq!(result.exit_code, ExitCode::ValidationFailed);
        assert!(result.results.is_empty());
        let output = String::from_utf8(buffer).unwrap();
        assert!(output.contains("ghost"));
        assert!(output.contains("VALIDATION FAILED"));
    }

    /// # Pre-flight Rejection Leaves Repositories Untouched
    ///
    /// ## Test Scenario
    /// - Standalone repository with a merge stopped on a conflict
    ///
    /// ## Expected Outcome
    /// - Exit code is PreflightRejected
    /// - NDJSON output carries the blocked event and the parsed conflict
    /// - MERGE_HEAD is still present
    #[tokio::test]
    async fn test_preflight_rejection() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path();
        git(path, &["init", "-b", "main"]);
        git(path, &["config", "user.name", "Test User"]);
        git(path, &["config", "user.email", "test@example.com"]);
        git(path, &["config", "commit.gpgsign", "false"]);
        fs::write(path.join("file.txt"), "base\n").unwrap();
        git(path, &["add", "."]);
        git(path, &["commit", "-m", "initial"]);
        git(path, &["checkout", "-b", "feature"]);
        fs::write(path.join("file.txt"), "feature\n").unwrap();
        git(path, &["commit", "-am", "feature"]);
        git(path, &["checkout", "main"]);
        fs::write(path.join("file.txt"), "main\n").unwrap();
        git(path, &["commit", "-am", "main"]);
        let merge = Command::new("git")
            .current_dir(path)
            .args(["merge", "feature"])
            .output()
            .unwrap();
        assert!(!merge.status.success());

        let mut buffer = Vec::new();
        let result = {
            let mut runner =
                LatestRunner::with_writer(config(path, OutputFormat::Ndjson), &mut buffer)
                    .with_work_item_locator(Box::new(FixedWorkItem));
            runner.run().await
        };

        assert_eq!(result.exit_code, ExitCode::PreflightRejected);
        assert!(path.join(".git").join("MERGE_HEAD").exists());

        let output = String::from_utf8(buffer).unwrap();
        let events: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert!(events.iter().any(|e| e["event"] == "start" && e["work_item"] == "017"));
        assert!(events.iter().any(|e| e["event"] == "preflight_blocked"));
        let conflicts = events
            .iter()
            .find(|e| e["event"] == "conflicts")
            .expect("conflict report");
        assert_eq!(conflicts["files"][0]["file_path"], "file.txt");
        assert_eq!(
            conflicts["files"][0]["regions"].as_array().unwrap().len(),
            1
        );
        assert_eq!(events.last().unwrap()["result"], "preflight_rejected");
    }
}
