//! Conflict extraction and reporting.
//!
//! Reads the files git reports as unmerged, recovers the
//! `<<<<<<<` / `=======` / `>>>>>>>` regions from them and renders a single
//! report across every conflicting repository. Malformed regions are left
//! out of the report instead of failing the file.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::error::GitError;
use crate::git::Git;
use crate::models::{ConflictRegion, FileConflict, RepositoryConflicts, RepositoryInfo};

use super::classifier::extract_conflicting_files;

/// Lines of surrounding text kept on each side of a region.
const CONTEXT_LINES: usize = 3;

const MARKER_LEN: usize = 7;

/// Why a conflicted file could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictReadError {
    #[error("file appears to be binary")]
    Binary,

    #[error("file does not exist")]
    Missing,

    #[error("file could not be read: {0}")]
    Unreadable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Start,
    Base,
    Separator,
    End,
}

/// Recognizes a conflict marker line.
///
/// Labelled markers must be exactly seven characters followed by nothing or
/// a space, so `<<<<<<<<` or `=======x` are ordinary content.
fn marker(line: &str) -> Option<Marker> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line == "=======" {
        return Some(Marker::Separator);
    }
    let kind = match line.get(..MARKER_LEN)? {
        "<<<<<<<" => Marker::Start,
        "|||||||" => Marker::Base,
        ">>>>>>>" => Marker::End,
        _ => return None,
    };
    match line.as_bytes().get(MARKER_LEN) {
        None | Some(b' ') => Some(kind),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Ours,
    Base,
    Theirs,
}

/// A region whose end marker has not been seen yet.
struct OpenRegion {
    start_index: usize,
    start_marker: String,
    section: Section,
    ours: Vec<String>,
    base: Option<Vec<String>>,
    separator: String,
    theirs: Vec<String>,
}

impl OpenRegion {
    fn new(start_index: usize, start_marker: &str) -> Self {
        Self {
            start_index,
            start_marker: start_marker.to_string(),
            section: Section::Ours,
            ours: Vec::new(),
            base: None,
            separator: String::new(),
            theirs: Vec::new(),
        }
    }

    fn push(&mut self, line: &str) {
        let target = match self.section {
            Section::Ours => &mut self.ours,
            Section::Base => self.base.get_or_insert_with(Vec::new),
            Section::Theirs => &mut self.theirs,
        };
        target.push(line.to_string());
    }
}

/// Extracts every well-formed conflict region from `content`.
///
/// A region needs its start, separator and end markers in that order; a
/// diff3 base section (`|||||||`) between start and separator is optional.
/// A missing or out-of-order marker drops the region being read and
/// scanning continues with the next start marker.
pub fn parse_conflict_markers(content: &str) -> Vec<ConflictRegion> {
    let lines: Vec<&str> = content.lines().collect();
    let mut regions = Vec::new();
    let mut open: Option<OpenRegion> = None;
    // First line that may serve as context for the next region
    let mut context_floor = 0;

    for (index, line) in lines.iter().enumerate() {
        match marker(line) {
            Some(Marker::Start) => {
                if open.is_some() {
                    debug!(line = index + 1, "nested conflict start marker, dropping open region");
                }
                open = Some(OpenRegion::new(index, line));
            }
            Some(Marker::Base) => match open.as_mut() {
                Some(region) if region.section == Section::Ours => {
                    region.section = Section::Base;
                    region.base = Some(Vec::new());
                }
                _ => open = None,
            },
            Some(Marker::Separator) => match open.as_mut() {
                Some(region) if region.section != Section::Theirs => {
                    region.section = Section::Theirs;
                    region.separator = line.to_string();
                }
                Some(_) => open = None,
                // A lone separator outside a region is ordinary text
                None => {}
            },
            Some(Marker::End) => {
                if let Some(region) = open.take()
                    && region.section == Section::Theirs
                {
                    let before_start = region
                        .start_index
                        .saturating_sub(CONTEXT_LINES)
                        .max(context_floor);
                    let context_before = lines[before_start..region.start_index]
                        .iter()
                        .map(|l| l.to_string())
                        .collect();
                    let context_after = lines[index + 1..]
                        .iter()
                        .take(CONTEXT_LINES)
                        .take_while(|l| marker(l) != Some(Marker::Start))
                        .map(|l| l.to_string())
                        .collect();

                    regions.push(ConflictRegion {
                        start_marker: region.start_marker,
                        our_content: region.ours,
                        base_content: region.base,
                        separator: region.separator,
                        their_content: region.theirs,
                        end_marker: line.to_string(),
                        context_before,
                        context_after,
                        start_line: region.start_index + 1,
                    });
                    context_floor = index + 1;
                }
            }
            None => {
                if let Some(region) = open.as_mut() {
                    region.push(line);
                }
            }
        }
    }

    regions
}

/// Reads a conflicted file as text.
///
/// Content with a NUL byte is treated as binary and rejected.
pub fn read_conflicting_file(path: &Path) -> Result<String, ConflictReadError> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ConflictReadError::Missing,
        _ => ConflictReadError::Unreadable(e.to_string()),
    })?;
    if bytes.contains(&0) {
        return Err(ConflictReadError::Binary);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parses one conflicted file of `repo`; read failures end up in `error`.
pub fn parse_file_conflict(repo: &RepositoryInfo, file_path: &str) -> FileConflict {
    let (regions, error) = match read_conflicting_file(&repo.path.join(file_path)) {
        Ok(content) => (parse_conflict_markers(&content), None),
        Err(e) => (Vec::new(), Some(e.to_string())),
    };
    FileConflict {
        repo_name: repo.name.clone(),
        file_path: file_path.to_string(),
        regions,
        error,
    }
}

/// Collects the conflicts of every file git reports as unmerged.
pub async fn parse_conflicts_from_repository(
    repo: &RepositoryInfo,
    timeout: Duration,
) -> Result<RepositoryConflicts, GitError> {
    let git = Git::new(&repo.path, timeout);
    let status = git.status_porcelain().await?;
    let files = extract_conflicting_files(&status)
        .iter()
        .map(|file| parse_file_conflict(repo, file))
        .collect();

    Ok(RepositoryConflicts {
        repo: repo.clone(),
        files,
    })
}

/// Renders one region with its markers and context.
pub fn format_conflict_for_display(region: &ConflictRegion, index: usize) -> String {
    let mut out = format!("    Conflict {} (line {}):\n", index + 1, region.start_line);
    for line in &region.context_before {
        out.push_str(&format!("        {}\n", line));
    }
    out.push_str(&format!("      {}\n", region.start_marker));
    for line in &region.our_content {
        out.push_str(&format!("      {}\n", line));
    }
    if let Some(base) = &region.base_content {
        out.push_str("      |||||||\n");
        for line in base {
            out.push_str(&format!("      {}\n", line));
        }
    }
    out.push_str(&format!("      {}\n", region.separator));
    for line in &region.their_content {
        out.push_str(&format!("      {}\n", line));
    }
    out.push_str(&format!("      {}\n", region.end_marker));
    for line in &region.context_after {
        out.push_str(&format!("        {}\n", line));
    }
    out
}

pub fn format_file_conflicts(file: &FileConflict) -> String {
    if let Some(error) = &file.error {
        return format!("  • {}: {}\n", file.file_path, error);
    }
    if file.regions.is_empty() {
        return format!("  • {}: no conflict markers found\n", file.file_path);
    }

    let mut out = format!(
        "  • {} ({} conflict(s))\n",
        file.file_path,
        file.regions.len()
    );
    for (index, region) in file.regions.iter().enumerate() {
        out.push_str(&format_conflict_for_display(region, index));
    }
    out
}

pub fn format_repository_conflicts(conflicts: &RepositoryConflicts) -> String {
    let mut out = format!(
        "Repository: {} ({})\n",
        conflicts.repo.name,
        conflicts.repo.path.display()
    );
    for file in &conflicts.files {
        out.push_str(&format_file_conflicts(file));
    }
    out
}

/// Renders the report across all conflicting repositories, followed by
/// resolution instructions. Empty when there is nothing to report.
pub fn format_all_conflicts(all: &[RepositoryConflicts]) -> String {
    if all.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str("╔════════════════════════════════════════════════════════════╗\n");
    out.push_str("║                    CONFLICTS DETECTED                      ║\n");
    out.push_str("╚════════════════════════════════════════════════════════════╝\n\n");
    for conflicts in all {
        out.push_str(&format_repository_conflicts(conflicts));
        out.push('\n');
    }
    out.push_str("To resolve:\n");
    out.push_str("  1. Edit the files above and remove the conflict markers\n");
    out.push_str("  2. Stage the resolved files: git add <files>\n");
    out.push_str("  3. Continue the rebase: git rebase --continue\n");
    out.push_str("  4. Re-run `kira latest` to continue\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::DEFAULT_GIT_TIMEOUT;
    use crate::parsed_property::ParsedProperty;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn repo(path: PathBuf) -> RepositoryInfo {
        RepositoryInfo {
            name: "api".to_string(),
            path,
            trunk_branch: ParsedProperty::Default("main".to_string()),
            remote: ParsedProperty::Default("origin".to_string()),
            repo_root: None,
        }
    }

    #[test]
    fn test_marker_recognition() {
        assert_eq!(marker("<<<<<<< HEAD"), Some(Marker::Start));
        assert_eq!(marker("<<<<<<<"), Some(Marker::Start));
        assert_eq!(marker("======="), Some(Marker::Separator));
        assert_eq!(marker("=======\r"), Some(Marker::Separator));
        assert_eq!(marker(">>>>>>> feature"), Some(Marker::End));
        assert_eq!(marker("||||||| base"), Some(Marker::Base));
        assert_eq!(marker("<<<<<<<< HEAD"), None);
        assert_eq!(marker("======= trailing"), None);
        assert_eq!(marker("========"), None);
        assert_eq!(marker("  <<<<<<< HEAD"), None);
        assert_eq!(marker(""), None);
    }

    /// # Well-Formed Regions
    ///
    /// ## Test Scenario
    /// - Parses a file with two conflict regions separated by ordinary code
    ///
    /// ## Expected Outcome
    /// - Two regions with their markers, both sides and 1-based start lines
    /// - Context stops at the neighbouring region
    #[test]
    fn test_parse_two_regions() {
        let content = "\
fn a() {}
fn b() {}
<<<<<<< HEAD
let x = 1;
=======
let x = 2;
>>>>>>> feature
middle
<<<<<<< HEAD
ours
=======
theirs
>>>>>>> feature
tail 1
tail 2
tail 3
tail 4
";
        let regions = parse_conflict_markers(content);
        assert_eq!(regions.len(), 2);

        let first = &regions[0];
        assert_eq!(first.start_line, 3);
        assert_eq!(first.start_marker, "<<<<<<< HEAD");
        assert_eq!(first.our_content, vec!["let x = 1;"]);
        assert_eq!(first.their_content, vec!["let x = 2;"]);
        assert_eq!(first.end_marker, ">>>>>>> feature");
        assert_eq!(first.context_before, vec!["fn a() {}", "fn b() {}"]);
        assert_eq!(first.context_after, vec!["middle"]);
        assert!(first.base_content.is_none());

        let second = &regions[1];
        assert_eq!(second.start_line, 9);
        assert_eq!(second.context_before, vec!["middle"]);
        assert_eq!(second.context_after, vec!["tail 1", "tail 2", "tail 3"]);
    }

    /// # Malformed Regions Are Skipped
    ///
    /// ## Test Scenario
    /// - A region without separator
    /// - A region with a second separator
    /// - An end marker with no start
    ///
    /// ## Expected Outcome
    /// - No regions and no error; a following good region is still found
    #[test]
    fn test_malformed_regions_skipped() {
        assert!(parse_conflict_markers("<<<<<<< HEAD\nours\n>>>>>>> feature\n").is_empty());
        let doubled = "<<<<<<< HEAD\na\n=======\nb\n=======\nc\n>>>>>>> x\n";
        assert!(parse_conflict_markers(doubled).is_empty());
        assert!(parse_conflict_markers(">>>>>>> stray\n=======\n").is_empty());
        assert!(parse_conflict_markers("no conflicts here\n").is_empty());

        let content = "<<<<<<< HEAD\nbroken\n<<<<<<< HEAD\nok\n=======\nfine\n>>>>>>> feature\n";
        let regions = parse_conflict_markers(content);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].start_line, 3);
        assert_eq!(regions[0].our_content, vec!["ok"]);
    }

    #[test]
    fn test_parse_diff3_base_section() {
        let content = "<<<<<<< HEAD\nours\n||||||| merged common ancestors\nbase\n\
                       =======\ntheirs\n>>>>>>> feature\n";
        let regions = parse_conflict_markers(content);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].our_content, vec!["ours"]);
        assert_eq!(regions[0].base_content, Some(vec!["base".to_string()]));
        assert_eq!(regions[0].their_content, vec!["theirs"]);
    }

    #[test]
    fn test_parse_counts_n_regions() {
        let region = "<<<<<<< HEAD\na\n=======\nb\n>>>>>>> f\n";
        for n in [0, 1, 5] {
            let content = region.repeat(n);
            assert_eq!(parse_conflict_markers(&content).len(), n);
        }
    }

    /// # Reading Conflicted Files
    ///
    /// ## Test Scenario
    /// - Reads a text file, a file with a NUL byte and a missing file
    ///
    /// ## Expected Outcome
    /// - Text is returned; binary and missing files give their errors
    #[test]
    fn test_read_conflicting_file() {
        let temp_dir = TempDir::new().unwrap();
        let text = temp_dir.path().join("a.txt");
        let binary = temp_dir.path().join("b.bin");
        fs::write(&text, "hello\n").unwrap();
        fs::write(&binary, [0x50, 0x00, 0x4b]).unwrap();

        assert_eq!(read_conflicting_file(&text).unwrap(), "hello\n");
        assert_eq!(
            read_conflicting_file(&binary).unwrap_err(),
            ConflictReadError::Binary
        );
        assert_eq!(
            read_conflicting_file(&temp_dir.path().join("gone.txt")).unwrap_err(),
            ConflictReadError::Missing
        );
        assert!(ConflictReadError::Binary.to_string().contains("appears to be binary"));
    }

    #[test]
    fn test_parse_file_conflict_records_errors() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("image.png"), [1u8, 0, 2]).unwrap();
        let repo = repo(temp_dir.path().to_path_buf());

        let file = parse_file_conflict(&repo, "image.png");
        assert_eq!(file.repo_name, "api");
        assert!(file.regions.is_empty());
        assert_eq!(file.error.as_deref(), Some("file appears to be binary"));

        let missing = parse_file_conflict(&repo, "deleted.rs");
        assert_eq!(missing.error.as_deref(), Some("file does not exist"));
    }

    /// # Conflict Report Rendering
    ///
    /// ## Test Scenario
    /// - Formats a repository with one parsed file and one binary file
    ///
    /// ## Expected Outcome
    /// - Report names the repository, both files, the region content
    /// - Report ends with the resolution instructions
    #[test]
    fn test_format_all_conflicts() {
        let repo = repo(PathBuf::from("/work/api"));
        let parsed = FileConflict {
            repo_name: "api".to_string(),
            file_path: "src/lib.rs".to_string(),
            regions: parse_conflict_markers(
                "before\n<<<<<<< HEAD\nmine\n=======\nyours\n>>>>>>> feature\n",
            ),
            error: None,
        };
        let binary = FileConflict {
            repo_name: "api".to_string(),
            file_path: "logo.png".to_string(),
            regions: Vec::new(),
            error: Some("file appears to be binary".to_string()),
        };
        let report = format_all_conflicts(&[RepositoryConflicts {
            repo,
            files: vec![parsed, binary],
        }]);

        assert!(report.contains("Repository: api (/work/api)"));
        assert!(report.contains("src/lib.rs (1 conflict(s))"));
        assert!(report.contains("Conflict 1 (line 2):"));
        assert!(report.contains("mine"));
        assert!(report.contains("yours"));
        assert!(report.contains("logo.png: file appears to be binary"));
        assert!(report.contains("git add <files>"));
        assert!(report.contains("git rebase --continue"));
        assert!(report.trim_end().ends_with("Re-run `kira latest` to continue"));

        assert!(format_all_conflicts(&[]).is_empty());
    }

    fn git(dir: &Path, args: &[&str]) -> bool {
        std::process::Command::new("git")
            .current_dir(dir)
            .args(args)
            .output()
            .unwrap()
            .status
            .success()
    }

    /// # Conflicted File Name With Spaces
    ///
    /// ## Test Scenario
    /// - A merge conflicts on `my file.txt`, a name git would quote in
    ///   plain porcelain output
    ///
    /// ## Expected Outcome
    /// - The report names the file unquoted, reads it and finds one region
    #[tokio::test]
    async fn test_conflicts_in_file_name_with_spaces() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path();
        for args in [
            &["init", "-b", "main"][..],
            &["config", "user.name", "Test User"],
            &["config", "user.email", "test@example.com"],
            &["config", "commit.gpgsign", "false"],
        ] {
            assert!(git(path, args));
        }
        fs::write(path.join("my file.txt"), "base\n").unwrap();
        assert!(git(path, &["add", "."]));
        assert!(git(path, &["commit", "-m", "initial"]));
        assert!(git(path, &["checkout", "-b", "feature"]));
        fs::write(path.join("my file.txt"), "feature\n").unwrap();
        assert!(git(path, &["commit", "-am", "feature"]));
        assert!(git(path, &["checkout", "main"]));
        fs::write(path.join("my file.txt"), "main\n").unwrap();
        assert!(git(path, &["commit", "-am", "main"]));
        assert!(!git(path, &["merge", "feature"]));

        let conflicts =
            parse_conflicts_from_repository(&repo(path.to_path_buf()), DEFAULT_GIT_TIMEOUT)
                .await
                .unwrap();

        assert_eq!(conflicts.files.len(), 1);
        let file = &conflicts.files[0];
        assert_eq!(file.file_path, "my file.txt");
        assert_eq!(file.error, None);
        assert_eq!(file.regions.len(), 1);
        assert_eq!(file.regions[0].our_content, vec!["main"]);
        assert_eq!(file.regions[0].their_content, vec!["feature"]);
    }
}
