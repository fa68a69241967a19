//! Repository resolution for the `latest` command.
//!
//! Turns the workspace configuration into a validated, ordered list of
//! [`RepositoryInfo`]. Three topologies are supported:
//!
//! - **standalone**: no workspace projects; the git repository containing the
//!   workspace root is the only repository
//! - **monorepo**: every project is a relative path inside the workspace; the
//!   whole workspace is one repository
//! - **polyrepo**: at least one project lives outside the workspace (absolute
//!   or `..` path) or a `repo_root` is configured; each project is its own
//!   repository

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Config, ProjectConfig, WorkspaceConfig};
use crate::error::{GitError, LatestError};
use crate::git::Git;
use crate::git_config::{DEFAULT_REMOTE, TrunkDetectionPolicy, detect_remote, detect_trunk_branch};
use crate::models::RepositoryInfo;
use crate::parsed_property::ParsedProperty;

/// Shape of the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceTopology {
    Standalone,
    Monorepo,
    Polyrepo,
}

impl std::fmt::Display for WorkspaceTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkspaceTopology::Standalone => write!(f, "standalone"),
            WorkspaceTopology::Monorepo => write!(f, "monorepo"),
            WorkspaceTopology::Polyrepo => write!(f, "polyrepo"),
        }
    }
}

/// Resolved repositories in processing order.
#[derive(Debug, Clone)]
pub struct ResolvedWorkspace {
    pub topology: WorkspaceTopology,
    pub repositories: Vec<RepositoryInfo>,
}

/// A repository location before trunk and remote are known.
#[derive(Debug, Clone, PartialEq)]
struct RepositoryCandidate {
    name: String,
    path: PathBuf,
    repo_root: Option<PathBuf>,
    project: Option<ProjectConfig>,
}

/// Classifies the workspace from its configuration.
pub fn detect_topology(workspace: Option<&WorkspaceConfig>) -> WorkspaceTopology {
    let Some(workspace) = workspace.filter(|w| !w.projects.is_empty()) else {
        return WorkspaceTopology::Standalone;
    };

    let external = workspace.repo_root.is_some()
        || workspace
            .projects
            .iter()
            .any(|p| p.repo_root.is_some() || is_external_path(Path::new(&p.path)));

    if external {
        WorkspaceTopology::Polyrepo
    } else {
        WorkspaceTopology::Monorepo
    }
}

/// True for absolute paths and relative paths that leave the workspace.
fn is_external_path(path: &Path) -> bool {
    if path.is_absolute() {
        return true;
    }
    let mut depth: i32 = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => depth -= 1,
            Component::Normal(_) => depth += 1,
            _ => {}
        }
        if depth < 0 {
            return true;
        }
    }
    false
}

/// Lexically resolves `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    // Canonical form when the path exists so that aliases compare equal
    std::fs::canonicalize(&joined).unwrap_or_else(|_| normalize_path(&joined))
}

fn directory_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Resolves, validates and orders the repositories of a workspace.
///
/// Validation failures of all repositories are collected into a single
/// [`LatestError::Validation`] before any git command touches them.
pub async fn resolve_repositories(
    workspace_root: &Path,
    config: &Config,
) -> Result<ResolvedWorkspace, LatestError> {
    let topology = detect_topology(config.workspace.as_ref());
    info!(root = %workspace_root.display(), %topology, "resolving workspace repositories");

    let candidates = match (topology, config.workspace.as_ref()) {
        (WorkspaceTopology::Polyrepo, Some(workspace)) => {
            polyrepo_candidates(workspace_root, workspace)
        }
        _ => vec![single_repository_candidate(workspace_root, config.git_timeout()).await?],
    };

    validate_repositories(&candidates)?;

    let policy = config.trunk_policy();
    let mut repositories = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        repositories.push(resolve_branches(candidate, config, &policy).await);
    }

    Ok(ResolvedWorkspace {
        topology,
        repositories: order_repositories_by_dependencies(repositories),
    })
}

async fn single_repository_candidate(
    workspace_root: &Path,
    timeout: Duration,
) -> Result<RepositoryCandidate, LatestError> {
    let git = Git::new(workspace_root, timeout);
    let toplevel = match git.toplevel().await {
        Ok(path) => path,
        Err(GitError::Spawn { message, .. }) => {
            return Err(LatestError::Validation {
                failures: vec![format!("could not run git: {}", message)],
            });
        }
        Err(_) => {
            return Err(LatestError::Validation {
                failures: vec![format!(
                    "{}: workspace is not inside a git repository",
                    workspace_root.display()
                )],
            });
        }
    };
    let path = absolutize(workspace_root, &toplevel);

    Ok(RepositoryCandidate {
        name: directory_name(&path),
        path,
        repo_root: None,
        project: None,
    })
}

fn polyrepo_candidates(
    workspace_root: &Path,
    workspace: &WorkspaceConfig,
) -> Vec<RepositoryCandidate> {
    let base = workspace
        .repo_root
        .as_deref()
        .map(|root| absolutize(workspace_root, Path::new(root)))
        .unwrap_or_else(|| workspace_root.to_path_buf());

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for project in &workspace.projects {
        let path = absolutize(&base, Path::new(&project.path));
        if !seen.insert(path.clone()) {
            debug!(path = %path.display(), "skipping duplicate project path");
            continue;
        }
        candidates.push(RepositoryCandidate {
            name: project
                .name
                .clone()
                .unwrap_or_else(|| directory_name(&path)),
            repo_root: project
                .repo_root
                .as_deref()
                .map(|root| absolutize(workspace_root, Path::new(root))),
            path,
            project: Some(project.clone()),
        });
    }
    candidates
}

/// Rejects candidates whose path is missing or is not a git working tree.
fn validate_repositories(candidates: &[RepositoryCandidate]) -> Result<(), LatestError> {
    let failures: Vec<String> = candidates
        .iter()
        .filter_map(|candidate| {
            if !candidate.path.is_dir() {
                Some(format!(
                    "{}: path {} does not exist",
                    candidate.name,
                    candidate.path.display()
                ))
            } else if !candidate.path.join(".git").exists() {
                Some(format!(
                    "{}: {} is not a git repository (no .git)",
                    candidate.name,
                    candidate.path.display()
                ))
            } else {
                None
            }
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(LatestError::Validation { failures })
    }
}

/// Resolves remote then trunk: project override > workspace config > detection.
///
/// A git failure during detection falls back to the defaults; the classifier
/// then reports the repository in the `Error` state instead of the whole run
/// failing here.
async fn resolve_branches(
    candidate: RepositoryCandidate,
    config: &Config,
    policy: &TrunkDetectionPolicy,
) -> RepositoryInfo {
    let git = Git::new(&candidate.path, config.git_timeout());
    let detection_failed = |step: &str, error: &GitError| {
        warn!(repo = %candidate.name, step, %error, "detection failed, using the default");
    };

    let project_remote = candidate
        .project
        .as_ref()
        .and_then(|p| p.remote.clone())
        .map(|remote| ParsedProperty::Project(remote, candidate.name.clone()));
    let remote = match project_remote.or_else(|| config.remote.clone()) {
        Some(remote) => remote,
        None => match detect_remote(&git).await {
            Ok(remote) => remote,
            Err(e) => {
                detection_failed("detect remote", &e);
                ParsedProperty::Default(DEFAULT_REMOTE.to_string())
            }
        },
    };

    let project_trunk = candidate
        .project
        .as_ref()
        .and_then(|p| p.trunk_branch.clone())
        .map(|trunk| ParsedProperty::Project(trunk, candidate.name.clone()));
    let trunk_branch = match project_trunk.or_else(|| config.trunk_branch.clone()) {
        Some(trunk) => trunk,
        None => match detect_trunk_branch(&git, remote.value(), policy).await {
            Ok(trunk) => trunk,
            Err(e) => {
                detection_failed("detect trunk branch", &e);
                ParsedProperty::Default(policy.fallback())
            }
        },
    };

    debug!(
        repo = %candidate.name,
        trunk = %trunk_branch,
        trunk_source = %trunk_branch.origin(),
        remote = %remote,
        remote_source = %remote.origin(),
        "resolved repository"
    );

    RepositoryInfo {
        name: candidate.name,
        path: candidate.path,
        trunk_branch,
        remote,
        repo_root: candidate.repo_root,
    }
}

/// Orders repositories so that those sharing a `repo_root` are contiguous.
///
/// Each group is placed where its first member was declared and keeps the
/// declaration order of its members. Repositories without a root keep their
/// position relative to the groups.
pub fn order_repositories_by_dependencies(repos: Vec<RepositoryInfo>) -> Vec<RepositoryInfo> {
    let mut slots: Vec<Option<RepositoryInfo>> = repos.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(slots.len());

    for i in 0..slots.len() {
        let Some(repo) = slots[i].take() else {
            continue;
        };
        let root = repo.repo_root.clone();
        ordered.push(repo);

        if let Some(root) = root {
            for slot in slots.iter_mut().skip(i + 1) {
                if slot.as_ref().and_then(|r| r.repo_root.as_ref()) == Some(&root)
                    && let Some(member) = slot.take()
                {
                    ordered.push(member);
                }
            }
        }
    }

    ordered
}

/// Splits an ordered repository list into groups that must run sequentially.
///
/// Consecutive repositories with the same `repo_root` form one group; every
/// other repository is a group of its own. Entries carry their position in
/// the ordered list.
pub fn group_repositories(ordered: &[RepositoryInfo]) -> Vec<Vec<(usize, RepositoryInfo)>> {
    let mut groups: Vec<Vec<(usize, RepositoryInfo)>> = Vec::new();

    for (index, repo) in ordered.iter().enumerate() {
        let joins_previous = repo.repo_root.is_some()
            && groups
                .last()
                .and_then(|group| group.last())
                .is_some_and(|(_, prev)| prev.repo_root == repo.repo_root);

        match groups.last_mut() {
            Some(group) if joins_previous => group.push((index, repo.clone())),
            _ => groups.push(vec![(index, repo.clone())]),
        }
    }

    groups
}
