//! Output formatters for different output modes.
//!
//! This module provides formatters for text, JSON, and NDJSON output modes,
//! each implementing the `OutputFormatter` trait for consistent behavior.

use super::events::{ProgressEvent, RepositoryStatus, SummaryInfo, SummaryResult};
use crate::core::operations::conflicts::format_all_conflicts;
use crate::models::{OutputFormat, RepositoryConflicts};
use std::io::{self, Write};

/// Trait for formatting and writing output events.
pub trait OutputFormatter {
    /// Writes a progress event to the output.
    fn write_event(&mut self, event: &ProgressEvent) -> io::Result<()>;

    /// Writes the conflict report of every conflicting repository.
    fn write_conflicts(&mut self, conflicts: &[RepositoryConflicts]) -> io::Result<()>;

    /// Writes a final summary.
    fn write_summary(&mut self, summary: &SummaryInfo) -> io::Result<()>;

    /// Flushes any buffered output.
    fn flush(&mut self) -> io::Result<()>;
}

/// Writer that formats output according to the specified format.
pub struct OutputWriter<W: Write> {
    writer: W,
    format: OutputFormat,
    quiet: bool,
    events: Vec<ProgressEvent>,
}

impl<W: Write> OutputWriter<W> {
    /// Creates a new OutputWriter with the specified format.
    pub fn new(writer: W, format: OutputFormat, quiet: bool) -> Self {
        Self {
            writer,
            format,
            quiet,
            events: Vec::new(),
        }
    }

    /// Returns the output format.
    pub fn format(&self) -> &OutputFormat {
        &self.format
    }

    /// Writes a line of text.
    fn writeln(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.writer, "{}", text)
    }

    fn write_json_line<T: serde::Serialize>(&mut self, value: &T) -> io::Result<()> {
        let json = serde_json::to_string(value).map_err(io::Error::other)?;
        self.writeln(&json)
    }

    fn status_symbol(status: RepositoryStatus) -> &'static str {
        match status {
            RepositoryStatus::Updated => "✓",
            RepositoryStatus::Failed => "✗",
            RepositoryStatus::Conflict => "⚠",
            RepositoryStatus::Skipped => "⊘",
        }
    }
}

impl<W: Write> OutputFormatter for OutputWriter<W> {
    fn write_event(&mut self, event: &ProgressEvent) -> io::Result<()> {
        if self.quiet && !event.is_problem() {
            return Ok(());
        }
        match self.format {
            OutputFormat::Text => self.write_text_event(event)?,
            OutputFormat::Json => {
                // Buffer events for final summary
                self.events.push(event.clone());
            }
            OutputFormat::Ndjson => self.write_json_line(event)?,
        }
        Ok(())
    }

    fn write_conflicts(&mut self, conflicts: &[RepositoryConflicts]) -> io::Result<()> {
        if conflicts.is_empty() {
            return Ok(());
        }
        match self.format {
            OutputFormat::Text => {
                self.writeln("")?;
                let report = format_all_conflicts(conflicts);
                write!(self.writer, "{}", report)?;
            }
            OutputFormat::Json | OutputFormat::Ndjson => {
                for repo in conflicts {
                    let event = ProgressEvent::Conflicts {
                        repo: repo.repo.name.clone(),
                        files: repo.files.clone(),
                    };
                    // Conflicts are never filtered by quiet mode
                    if self.format == OutputFormat::Json {
                        self.events.push(event);
                    } else {
                        self.write_json_line(&event)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn write_summary(&mut self, summary: &SummaryInfo) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => self.write_text_summary(summary)?,
            OutputFormat::Json => {
                // Write the full summary as JSON
                let output = serde_json::json!({
                    "summary": summary,
                    "events": self.events
                });
                let json = serde_json::to_string_pretty(&output).map_err(io::Error::other)?;
                self.writeln(&json)?;
            }
            OutputFormat::Ndjson => {
                // Write summary as final line
                self.write_json_line(summary)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl<W: Write> OutputWriter<W> {
    /// Writes a text-formatted event.
    fn write_text_event(&mut self, event: &ProgressEvent) -> io::Result<()> {
        match event {
            ProgressEvent::Start {
                workspace_root,
                topology,
                repositories,
                work_item,
                started_at,
            } => {
                self.writeln("")?;
                self.writeln(&format!(
                    "Updating {} workspace ({} repositories) in {}",
                    topology,
                    repositories,
                    workspace_root.display()
                ))?;
                if let Some(id) = work_item {
                    self.writeln(&format!("Work item: {}", id))?;
                }
                self.writeln(&format!(
                    "Started:   {}",
                    started_at.format("%Y-%m-%d %H:%M:%S UTC")
                ))?;
                self.writeln("")?;
            }
            ProgressEvent::RepositoryState {
                repo,
                state,
                details,
            } => {
                self.writeln(&format!("  {}: {} ({})", repo, state, details))?;
            }
            ProgressEvent::RebaseResumed {
                repo,
                completed,
                stash_popped,
                message,
            } => {
                if *completed {
                    let stash = if *stash_popped { ", stash restored" } else { "" };
                    self.writeln(&format!(" ✓ {}: resumed interrupted rebase{}", repo, stash))?;
                } else {
                    self.writeln(&format!(
                        " ⚠ {}: interrupted rebase still has conflicts",
                        repo
                    ))?;
                }
                if let Some(msg) = message {
                    self.writeln(&format!("   {}", msg))?;
                }
            }
            ProgressEvent::PreflightBlocked { message, .. } => {
                self.writeln("")?;
                self.writeln("Pre-flight check failed; no repository was changed.")?;
                for line in message.lines() {
                    self.writeln(&format!("  {}", line))?;
                }
            }
            ProgressEvent::StepStarted { repo, step } => {
                self.writeln(&format!("  [{}] {}...", repo, step))?;
            }
            ProgressEvent::RepositoryComplete {
                repo,
                success,
                error,
                warnings,
                ..
            } => {
                if *success {
                    self.writeln(&format!(" ✓ {} up to date", repo))?;
                } else {
                    let reason = error.as_deref().unwrap_or("unknown error");
                    self.writeln(&format!(" ✗ {} failed: {}", repo, reason))?;
                }
                for warning in warnings {
                    self.writeln(&format!("   ⚠ {}", warning))?;
                }
            }
            ProgressEvent::Conflicts { repo, files } => {
                self.writeln(&format!(" ⚠ {} has conflicts:", repo))?;
                for file in files {
                    self.writeln(&format!("   • {}", file.file_path))?;
                }
            }
            ProgressEvent::Complete {
                successful,
                failed,
                skipped,
            } => {
                self.writeln("")?;
                self.writeln(&format!(
                    "Complete: {} successful, {} failed, {} skipped",
                    successful, failed, skipped
                ))?;
            }
            ProgressEvent::Error { message, code } => {
                let code_str = code
                    .as_ref()
                    .map(|c| format!(" [{}]", c))
                    .unwrap_or_default();
                self.writeln(&format!("Error{}: {}", code_str, message))?;
            }
        }
        Ok(())
    }

    fn write_text_summary(&mut self, summary: &SummaryInfo) -> io::Result<()> {
        self.writeln("")?;
        let result_line = match summary.result {
            SummaryResult::Success => "SUCCESS",
            SummaryResult::PartialFailure => "PARTIAL FAILURE",
            SummaryResult::Conflict => "CONFLICT",
            SummaryResult::PreflightRejected => "PRE-FLIGHT REJECTED",
            SummaryResult::ValidationFailed => "VALIDATION FAILED",
            SummaryResult::Cancelled => "CANCELLED",
        };
        self.writeln("═══════════════════════════════════════════════════════════")?;
        self.writeln(&format!("                      {}", result_line))?;
        self.writeln("═══════════════════════════════════════════════════════════")?;
        self.writeln("")?;

        if let Some(id) = &summary.work_item {
            self.writeln(&format!("Work item: {}", id))?;
            self.writeln("")?;
        }

        if !summary.repositories.is_empty() {
            self.writeln("Repositories:")?;
            for repo in &summary.repositories {
                let symbol = Self::status_symbol(repo.status);
                let label = match repo.status {
                    RepositoryStatus::Updated => "SUCCESS",
                    RepositoryStatus::Skipped => "SKIPPED",
                    RepositoryStatus::Failed | RepositoryStatus::Conflict => "FAILED",
                };
                self.writeln(&format!("  {} {} [{}]", symbol, repo.name, label))?;
                for step in &repo.steps {
                    self.writeln(&format!("      - {}", step))?;
                }
                if let Some(error) = &repo.error {
                    self.writeln(&format!("      error: {}", error))?;
                }
                for warning in &repo.warnings {
                    self.writeln(&format!("      warning: {}", warning))?;
                }
            }
            self.writeln("")?;
        }

        self.writeln("Results:")?;
        self.writeln(&format!("  ✓ Successful: {}", summary.counts.successful))?;
        self.writeln(&format!("  ✗ Failed:     {}", summary.counts.failed))?;
        self.writeln(&format!("  ⊘ Skipped:    {}", summary.counts.skipped))?;
        self.writeln("  ─────────────────")?;
        self.writeln(&format!("    Total:      {}", summary.counts.total))?;
        self.writeln("")?;

        if !summary.recovery_steps.is_empty() {
            self.writeln("Recovery steps:")?;
            for step in &summary.recovery_steps {
                self.writeln(&format!("  {}:", step.repo))?;
                for command in &step.commands {
                    self.writeln(&format!("    {}", command))?;
                }
            }
            self.writeln("")?;
        }
        Ok(())
    }
}
