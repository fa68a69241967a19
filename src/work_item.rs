//! Lookup of the work item currently in progress.
//!
//! Work items are markdown files that move between status folders. The one
//! being worked on lives in the "doing" folder, and its ID is the numeric
//! prefix of its file name (`012-add-login.md` has ID `012`).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

static WORK_ITEM_ID_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_work_item_id_regex() -> &'static Regex {
    WORK_ITEM_ID_REGEX.get_or_init(|| {
        Regex::new(r"^(\d+)(?:[-_. ]|$)").expect("Failed to compile work item ID regex")
    })
}

/// The active work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub id: String,
    pub path: PathBuf,
}

/// Finds the work item the current run is scoped to.
pub trait WorkItemLocator {
    /// Returns `Ok(None)` when no work item is in progress.
    fn current_work_item(&self) -> Result<Option<WorkItem>>;
}

/// Locates the active work item by scanning a status folder.
#[derive(Debug, Clone)]
pub struct FolderWorkItemLocator {
    doing_dir: PathBuf,
}

impl FolderWorkItemLocator {
    pub fn new(doing_dir: impl Into<PathBuf>) -> Self {
        Self {
            doing_dir: doing_dir.into(),
        }
    }

    pub fn doing_dir(&self) -> &Path {
        &self.doing_dir
    }
}

impl WorkItemLocator for FolderWorkItemLocator {
    fn current_work_item(&self) -> Result<Option<WorkItem>> {
        let entries = match fs::read_dir(&self.doing_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(dir = %self.doing_dir.display(), "no doing folder");
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read work folder {}", self.doing_dir.display())
                });
            }
        };

        let mut items = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| {
                    format!("Failed to read work folder {}", self.doing_dir.display())
                })?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(work_item_id_from_file_name)
            {
                items.push(WorkItem { id, path });
            }
        }

        // read_dir order is platform dependent
        items.sort_by(|a, b| a.path.cmp(&b.path));
        if items.len() > 1 {
            debug!(count = items.len(), "several work items in progress, using the first");
        }
        Ok(items.into_iter().next())
    }
}

/// Extracts the leading numeric ID of a work item file name.
pub fn work_item_id_from_file_name(file_name: &str) -> Option<String> {
    get_work_item_id_regex()
        .captures(file_name)
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_work_item_id_from_file_name() {
        assert_eq!(work_item_id_from_file_name("012-add-login.md"), Some("012".to_string()));
        assert_eq!(work_item_id_from_file_name("7_fix.md"), Some("7".to_string()));
        assert_eq!(work_item_id_from_file_name("42.md"), Some("42".to_string()));
        assert_eq!(work_item_id_from_file_name("README.md"), None);
        assert_eq!(work_item_id_from_file_name("12abc.md"), None);
    }

    /// # Missing Doing Folder
    ///
    /// ## Test Scenario
    /// - The configured doing folder does not exist
    ///
    /// ## Expected Outcome
    /// - No work item is reported and no error is raised
    #[test]
    fn test_missing_folder_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let locator = FolderWorkItemLocator::new(temp_dir.path().join(".work/2_doing"));
        assert_eq!(locator.current_work_item().unwrap(), None);
    }

    /// # Current Work Item Lookup
    ///
    /// ## Test Scenario
    /// - Doing folder holds two work items, a note without ID and a non-markdown file
    ///
    /// ## Expected Outcome
    /// - The work item with the lowest file name is returned
    #[test]
    fn test_finds_work_item_in_doing_folder() {
        let temp_dir = TempDir::new().unwrap();
        let doing = temp_dir.path().join("doing");
        fs::create_dir_all(&doing).unwrap();
        fs::write(doing.join("notes.md"), "").unwrap();
        fs::write(doing.join("003-export.txt"), "").unwrap();
        fs::write(doing.join("021-sync.md"), "").unwrap();
        fs::write(doing.join("014-login.md"), "").unwrap();

        let item = FolderWorkItemLocator::new(&doing)
            .current_work_item()
            .unwrap()
            .unwrap();
        assert_eq!(item.id, "014");
        assert_eq!(item.path, doing.join("014-login.md"));
    }
}
