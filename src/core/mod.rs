//! Core of the `latest` synchronization engine.
//!
//! - [`operations`]: repository resolution, classification, the pre-flight
//!   gate, the per-repository update protocol and conflict extraction
//! - [`output`]: progress events and report formatting
//! - [`runner`]: the entry point that wires the pipeline together

pub mod operations;
pub mod output;
pub mod runner;

/// Exit codes of `kira latest`.
///
/// These codes are designed for consumption by scripts and CI systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Every repository is up to date.
    Success = 0,

    /// General error (configuration, workspace discovery, output).
    GeneralError = 1,

    /// At least one rebase stopped on conflicts that were left for the user.
    Conflict = 2,

    /// Some repositories failed; recovery steps were printed.
    PartialFailure = 3,

    /// Conflicts, in-progress operations or git errors blocked the run before any change.
    PreflightRejected = 4,

    /// A configured repository path is missing or not a git repository.
    ValidationFailed = 5,

    /// The run was interrupted before every repository was processed.
    Cancelled = 6,
}

impl ExitCode {
    /// Returns the numeric exit code value.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns a human-readable description of the exit code.
    pub fn description(self) -> &'static str {
        match self {
            ExitCode::Success => "All repositories are up to date",
            ExitCode::GeneralError => "General error occurred",
            ExitCode::Conflict => "Rebase conflicts left for manual resolution",
            ExitCode::PartialFailure => "Some repositories failed to update",
            ExitCode::PreflightRejected => "Pre-flight check failed; nothing was changed",
            ExitCode::ValidationFailed => "Repository validation failed",
            ExitCode::Cancelled => "Run was cancelled",
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code())
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
