//! Configuration management for kira.
//!
//! This module handles loading configuration from multiple sources:
//! - The workspace file `kira.toml`, found by walking up from the current directory
//! - A user-level file `config.toml` under the XDG config directory
//! - `KIRA_*` environment variables
//!
//! Sources are merged with [`Config::merge`]; later sources win.
//!
//! ## Example
//!
//! ```rust,no_run
//! use kira::Config;
//! use std::path::Path;
//!
//! let config = Config::resolve(Path::new("/path/to/workspace")).unwrap();
//! println!("Stash label: {}", config.stash_message());
//! ```

use crate::{error::ConfigError, git_config::TrunkDetectionPolicy, parsed_property::ParsedProperty};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the workspace configuration file.
pub const WORKSPACE_CONFIG_FILE: &str = "kira.toml";

/// `[git]` section: workspace-wide defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitSection {
    pub trunk_branch: Option<String>,
    pub remote: Option<String>,
}

/// One `[[workspace.projects]]` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Display name; defaults to the directory base name.
    pub name: Option<String>,
    /// Path of the project, relative to the workspace root (or `repo_root`) or absolute.
    pub path: String,
    /// Trunk branch override for this project.
    pub trunk_branch: Option<String>,
    /// Remote override for this project.
    pub remote: Option<String>,
    /// Shared physical root; projects with the same root are processed in order.
    pub repo_root: Option<String>,
}

/// `[workspace]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Base directory for relative project paths in a polyrepo workspace.
    pub repo_root: Option<String>,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

/// `[latest]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestSection {
    pub git_timeout_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    pub stash_message: Option<String>,
    pub trunk_candidates: Option<Vec<String>>,
    pub prefer_remote_head: Option<bool>,
}

/// `[work]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkSection {
    pub doing_dir: Option<String>,
}

/// Temporary struct for deserializing TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    git: GitSection,
    workspace: Option<WorkspaceConfig>,
    #[serde(default)]
    latest: LatestSection,
    #[serde(default)]
    work: WorkSection,
}

/// Configuration assembled from config files, environment variables, and defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Workspace-wide trunk branch.
    pub trunk_branch: Option<ParsedProperty<String>>,
    /// Workspace-wide remote.
    pub remote: Option<ParsedProperty<String>>,
    /// Declared projects; `None` means a standalone repository.
    pub workspace: Option<WorkspaceConfig>,
    /// Time budget for local git commands, in seconds.
    pub git_timeout_secs: Option<ParsedProperty<u64>>,
    /// Time budget for `git fetch`, in seconds.
    pub fetch_timeout_secs: Option<ParsedProperty<u64>>,
    /// Label used for stashes created by `kira latest`.
    pub stash_message: Option<ParsedProperty<String>>,
    /// Branch names tried when auto-detecting a trunk.
    pub trunk_candidates: Option<ParsedProperty<Vec<String>>>,
    /// Whether the remote HEAD wins over local branches during detection.
    pub prefer_remote_head: Option<ParsedProperty<bool>>,
    /// Folder holding the work item currently in progress.
    pub doing_dir: Option<ParsedProperty<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trunk_branch: None,
            remote: None,
            workspace: None,
            git_timeout_secs: Some(ParsedProperty::Default(120)),
            fetch_timeout_secs: Some(ParsedProperty::Default(60)),
            stash_message: Some(ParsedProperty::Default("kira latest".to_string())),
            trunk_candidates: Some(ParsedProperty::Default(vec![
                "main".to_string(),
                "master".to_string(),
            ])),
            prefer_remote_head: Some(ParsedProperty::Default(false)),
            doing_dir: Some(ParsedProperty::Default(".work/2_doing".to_string())),
        }
    }
}

impl Config {
    /// A config with every field unset, used as the identity for [`Config::merge`].
    pub fn empty() -> Self {
        Self {
            trunk_branch: None,
            remote: None,
            workspace: None,
            git_timeout_secs: None,
            fetch_timeout_secs: None,
            stash_message: None,
            trunk_candidates: None,
            prefer_remote_head: None,
            doing_dir: None,
        }
    }

    /// Resolve the effective configuration for a workspace root.
    ///
    /// Precedence: environment > workspace `kira.toml` > user config > defaults.
    pub fn resolve(workspace_root: &Path) -> Result<Self> {
        let user = match Self::user_config_path() {
            Some(path) => Self::load_from_path(&path)?,
            None => Self::empty(),
        };
        let workspace = Self::load_from_path(&workspace_root.join(WORKSPACE_CONFIG_FILE))?;

        let config = Self::default()
            .merge(user)
            .merge(workspace)
            .merge(Self::load_from_env());
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file; a missing file yields an empty config.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::empty());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::FileReadError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let from_file = |v| ParsedProperty::File(v, path.to_path_buf());

        Ok(Self {
            trunk_branch: file.git.trunk_branch.map(from_file),
            remote: file.git.remote.map(from_file),
            workspace: file.workspace,
            git_timeout_secs: file
                .latest
                .git_timeout_secs
                .map(|v| ParsedProperty::File(v, path.to_path_buf())),
            fetch_timeout_secs: file
                .latest
                .fetch_timeout_secs
                .map(|v| ParsedProperty::File(v, path.to_path_buf())),
            stash_message: file.latest.stash_message.map(from_file),
            trunk_candidates: file
                .latest
                .trunk_candidates
                .map(|v| ParsedProperty::File(v, path.to_path_buf())),
            prefer_remote_head: file
                .latest
                .prefer_remote_head
                .map(|v| ParsedProperty::File(v, path.to_path_buf())),
            doing_dir: file.work.doing_dir.map(from_file),
        })
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Self {
        Self {
            trunk_branch: std::env::var("KIRA_TRUNK_BRANCH")
                .ok()
                .map(|v| ParsedProperty::Env(v.clone(), v)),
            remote: std::env::var("KIRA_REMOTE")
                .ok()
                .map(|v| ParsedProperty::Env(v.clone(), v)),
            git_timeout_secs: std::env::var("KIRA_GIT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok().map(|v| ParsedProperty::Env(v, s))),
            fetch_timeout_secs: std::env::var("KIRA_FETCH_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok().map(|v| ParsedProperty::Env(v, s))),
            ..Self::empty()
        }
    }

    /// Location of the user-level config file
    fn user_config_path() -> Option<PathBuf> {
        // Use XDG_CONFIG_HOME if set, otherwise the platform config dir
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .ok()
            .or_else(dirs::config_dir)?;
        Some(config_dir.join("kira").join("config.toml"))
    }

    /// Merge this config with another, preferring values from other when they exist
    pub fn merge(self, other: Self) -> Self {
        Self {
            trunk_branch: other.trunk_branch.or(self.trunk_branch),
            remote: other.remote.or(self.remote),
            workspace: other.workspace.or(self.workspace),
            git_timeout_secs: other.git_timeout_secs.or(self.git_timeout_secs),
            fetch_timeout_secs: other.fetch_timeout_secs.or(self.fetch_timeout_secs),
            stash_message: other.stash_message.or(self.stash_message),
            trunk_candidates: other.trunk_candidates.or(self.trunk_candidates),
            prefer_remote_head: other.prefer_remote_head.or(self.prefer_remote_head),
            doing_dir: other.doing_dir.or(self.doing_dir),
        }
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("git_timeout_secs", &self.git_timeout_secs),
            ("fetch_timeout_secs", &self.fetch_timeout_secs),
        ] {
            if let Some(prop) = value
                && *prop.value() == 0
            {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("must be greater than zero ({})", prop.origin()),
                });
            }
        }

        if let Some(message) = &self.stash_message
            && message.trim().is_empty()
        {
            return Err(ConfigError::InvalidValue {
                field: "stash_message".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if let Some(workspace) = &self.workspace
            && let Some(project) = workspace.projects.iter().find(|p| p.path.trim().is_empty())
        {
            return Err(ConfigError::InvalidValue {
                field: "workspace.projects.path".to_string(),
                message: format!(
                    "project '{}' has an empty path",
                    project.name.as_deref().unwrap_or("<unnamed>")
                ),
            });
        }

        Ok(())
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs.as_deref().copied().unwrap_or(120))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.as_deref().copied().unwrap_or(60))
    }

    pub fn stash_message(&self) -> &str {
        self.stash_message
            .as_deref()
            .map(String::as_str)
            .unwrap_or("kira latest")
    }

    /// Trunk auto-detection policy built from `[latest]`.
    pub fn trunk_policy(&self) -> TrunkDetectionPolicy {
        let defaults = TrunkDetectionPolicy::default();
        TrunkDetectionPolicy {
            candidates: self
                .trunk_candidates
                .as_deref()
                .cloned()
                .unwrap_or(defaults.candidates),
            prefer_remote_head: self
                .prefer_remote_head
                .as_deref()
                .copied()
                .unwrap_or(defaults.prefer_remote_head),
        }
    }

    /// Absolute path of the "doing" folder for a workspace root.
    pub fn doing_dir(&self, workspace_root: &Path) -> PathBuf {
        let dir = self
            .doing_dir
            .as_deref()
            .map(String::as_str)
            .unwrap_or(".work/2_doing");
        workspace_root.join(dir)
    }
}

/// Walk up from `start` to the first directory containing `kira.toml`.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(WORKSPACE_CONFIG_FILE).is_file())
        .map(Path::to_path_buf)
}
