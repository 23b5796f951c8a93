//! Changed-file list input and version-control metadata.
//!
//! The `run` subcommand receives the set of changed files as a path to
//! either a plain-text list (one path per line) or a JSON array of strings.
//! Repo metadata comes from the version-control tool when present; when it
//! is absent every derived field is `None` and diff maps are empty.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;
use tracing::debug;

// ============================================================================
// Changed-file input
// ============================================================================

/// Parse a changed-files document into a path list.
///
/// Format detection: if the first non-whitespace character is `[`, the
/// content is a JSON array of strings; otherwise it is newline-separated
/// text with blank lines stripped.
///
/// # Errors
///
/// Returns an error when JSON was detected but does not parse as an array
/// of strings.
pub fn parse_changed_files(content: &str) -> Result<Vec<String>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        let files: Vec<String> =
            serde_json::from_str(content).context("Changed-files JSON must be an array of strings")?;
        return Ok(files.into_iter().filter(|f| !f.trim().is_empty()).collect());
    }

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Read and parse a changed-files document from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_changed_files(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read changed-files list: {}", path.display()))?;
    parse_changed_files(&content)
}

// ============================================================================
// Repo metadata
// ============================================================================

/// Repository facts derived from the version-control tool.
#[derive(Debug, Clone, Default)]
pub struct RepoInfo {
    /// Remote URL or repository name, when resolvable.
    pub repo: Option<String>,
    /// Current branch name, when resolvable.
    pub branch: Option<String>,
}

impl RepoInfo {
    /// Probe git for repo and branch names. Absence of git (or of a
    /// repository at `cwd`) degrades to all-`None`.
    #[must_use]
    pub fn detect(cwd: &Path) -> Self {
        Self {
            repo: git_stdout(cwd, &["remote", "get-url", "origin"]),
            branch: git_stdout(cwd, &["rev-parse", "--abbrev-ref", "HEAD"]),
        }
    }
}

fn git_stdout(cwd: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).current_dir(cwd).output().ok()?;
    if !output.status.success() {
        debug!(?args, "git probe failed");
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_text() {
        let files = parse_changed_files("src/a.ts\nsrc/b.tsx\n").unwrap();
        assert_eq!(files, vec!["src/a.ts", "src/b.tsx"]);
    }

    #[test]
    fn test_parse_blank_lines_stripped() {
        let files = parse_changed_files("\n  \nsrc/a.ts\n\n").unwrap();
        assert_eq!(files, vec!["src/a.ts"]);
    }

    #[test]
    fn test_only_blank_lines_is_empty_not_error() {
        let files = parse_changed_files("\n   \n\t\n").unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_parse_json_array() {
        let files = parse_changed_files(r#"  ["src/a.ts", "src/b.ts"]"#).unwrap();
        assert_eq!(files, vec!["src/a.ts", "src/b.ts"]);
    }

    #[test]
    fn test_parse_json_detected_by_first_char() {
        // Leading whitespace before '[' still selects JSON parsing.
        let files = parse_changed_files("\n\t [\"x.ts\"]").unwrap();
        assert_eq!(files, vec!["x.ts"]);
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(parse_changed_files("[1, 2, 3]").is_err());
        assert!(parse_changed_files("[\"unterminated").is_err());
    }

    #[test]
    fn test_repo_info_outside_repo() {
        let temp = tempfile::TempDir::new().unwrap();
        let info = RepoInfo::detect(temp.path());
        assert!(info.branch.is_none());
        assert!(info.repo.is_none());
    }
}
