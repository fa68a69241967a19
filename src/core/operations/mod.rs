//! Core operations of the `latest` pipeline.
//!
//! These operations know nothing about output formats; they return data and
//! push progress through a channel so the runner can render it.
//!
//! # Modules
//!
//! - [`resolver`] - Turning workspace configuration into validated repositories
//! - [`classifier`] - Mapping git state to a [`RepositoryState`](crate::models::RepositoryState)
//! - [`preflight`] - Aggregation, the safety gate and resuming interrupted rebases
//! - [`update`] - Stash, fetch, rebase and restore for each repository
//! - [`conflicts`] - Conflict marker parsing and the conflict report

pub mod classifier;
pub mod conflicts;
pub mod preflight;
pub mod resolver;
pub mod update;

// Re-export commonly used types
pub use classifier::{check_all_repositories, check_repository_state, extract_conflicting_files};
pub use conflicts::{
    ConflictReadError, format_all_conflicts, parse_conflict_markers,
    parse_conflicts_from_repository, read_conflicting_file,
};
pub use preflight::{
    ResumeOutcome, aggregate_repository_states, try_resume_interrupted_rebases,
    validate_all_repos_clean_or_dirty_for_update,
};
pub use resolver::{
    ResolvedWorkspace, WorkspaceTopology, group_repositories, order_repositories_by_dependencies,
    resolve_repositories,
};
pub use update::{
    ProgressSink, UpdateOptions, UpdateProgress, perform_fetch_and_rebase_for_all_repos,
    process_repository_update,
};
