//! Trunk branch and remote auto-detection.
//!
//! Used when neither the project nor the workspace configuration names a
//! trunk branch or remote. Detection is a configurable policy rather than a
//! fixed rule: the candidate list and whether the remote's symbolic HEAD wins
//! over local branches both come from `[latest]` in `kira.toml`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GitError;
use crate::git::Git;
use crate::parsed_property::ParsedProperty;

/// Remote used when a repository has zero or several remotes.
pub const DEFAULT_REMOTE: &str = "origin";

/// How to pick a trunk branch for a repository without explicit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrunkDetectionPolicy {
    /// Branch names to look for, in order of preference.
    pub candidates: Vec<String>,
    /// Consult `refs/remotes/<remote>/HEAD` before local branches.
    pub prefer_remote_head: bool,
}

impl Default for TrunkDetectionPolicy {
    fn default() -> Self {
        Self {
            candidates: vec!["main".to_string(), "master".to_string()],
            prefer_remote_head: false,
        }
    }
}

impl TrunkDetectionPolicy {
    /// Trunk assumed when nothing could be detected.
    pub fn fallback(&self) -> String {
        self.candidates
            .first()
            .cloned()
            .unwrap_or_else(|| "main".to_string())
    }
}

/// Detect the trunk branch of a repository.
///
/// Order: remote HEAD (only when preferred), first candidate present as a
/// local branch, remote HEAD, first candidate present as a remote-tracking
/// branch, and finally the first candidate as a default.
pub async fn detect_trunk_branch(
    git: &Git,
    remote: &str,
    policy: &TrunkDetectionPolicy,
) -> Result<ParsedProperty<String>, GitError> {
    if policy.prefer_remote_head
        && let Some(branch) = git.remote_head(remote).await?
    {
        debug!(repo = %git.path().display(), %branch, "trunk detected from remote HEAD");
        return Ok(ParsedProperty::Detected(branch, format!("{}/HEAD", remote)));
    }

    for candidate in &policy.candidates {
        if git.local_branch_exists(candidate).await? {
            debug!(
                repo = %git.path().display(),
                branch = %candidate,
                "trunk detected from local branch"
            );
            return Ok(ParsedProperty::Detected(candidate.clone(), "local branch".to_string()));
        }
    }

    if !policy.prefer_remote_head
        && let Some(branch) = git.remote_head(remote).await?
    {
        debug!(repo = %git.path().display(), %branch, "trunk detected from remote HEAD");
        return Ok(ParsedProperty::Detected(branch, format!("{}/HEAD", remote)));
    }

    for candidate in &policy.candidates {
        if git.remote_branch_exists(remote, candidate).await? {
            return Ok(ParsedProperty::Detected(
                candidate.clone(),
                format!("remote branch {}/{}", remote, candidate),
            ));
        }
    }

    Ok(ParsedProperty::Default(policy.fallback()))
}

/// Detect the remote to fetch from: the only remote if there is exactly one,
/// otherwise `origin`.
pub async fn detect_remote(git: &Git) -> Result<ParsedProperty<String>, GitError> {
    let remotes = git.remotes().await?;
    if remotes.len() == 1 {
        return Ok(ParsedProperty::Detected(
            remotes[0].clone(),
            "only configured remote".to_string(),
        ));
    }
    Ok(ParsedProperty::Default(DEFAULT_REMOTE.to_string()))
}
