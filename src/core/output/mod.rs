//! Output system for `kira latest`.
//!
//! This module provides structured output events and formatters for different
//! output formats (text, JSON, NDJSON). It enables consistent progress reporting
//! and final summaries across all output modes.

mod events;
mod format;

pub use events::{
    ProgressEvent, RecoveryStep, RepositoryStatus, RepositorySummary, SummaryCounts, SummaryInfo,
    SummaryResult, recovery_commands,
};
pub use format::{OutputFormatter, OutputWriter};
