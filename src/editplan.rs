//! Candidate edit plans and their application to the working tree.
//!
//! An edit plan is a set of inclusive line-range replacements proposed by
//! the patch model. The plan passes through normalization, path
//! sanitization, and scope/size checks before a single byte of the tree
//! changes; application itself does not roll back partial work - the
//! repair loop's snapshot is the recovery path.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

// ============================================================================
// Plan types
// ============================================================================

/// One inclusive line-range replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    /// Path relative to the project root.
    pub file: String,
    /// First replaced line, 1-based.
    pub start_line: usize,
    /// Last replaced line, inclusive; `end_line >= start_line`.
    pub end_line: usize,
    /// New content for the range; empty deletes the range.
    pub replacement: String,
}

impl Edit {
    /// Predicted line cost: removed range plus replacement lines.
    #[must_use]
    pub fn predicted_lines(&self) -> usize {
        (self.end_line - self.start_line + 1) + count_lines(&self.replacement)
    }
}

/// A validated candidate plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditPlan {
    #[serde(default)]
    pub summary: String,
    pub edits: Vec<Edit>,
}

impl EditPlan {
    /// Normalize a parsed model payload into a plan.
    ///
    /// Malformed edits (wrong types, `start_line < 1`,
    /// `end_line < start_line`) are dropped individually; a plan with zero
    /// surviving edits is `None`.
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let summary = value
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let edits: Vec<Edit> = value
            .get("edits")?
            .as_array()?
            .iter()
            .filter_map(normalize_edit)
            .collect();

        if edits.is_empty() {
            return None;
        }

        Some(Self { summary, edits })
    }

    /// Total predicted line cost across edits.
    #[must_use]
    pub fn predicted_lines(&self) -> usize {
        self.edits.iter().map(Edit::predicted_lines).sum()
    }

    /// Distinct files the plan touches, in plan order.
    #[must_use]
    pub fn touched_files(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.edits
            .iter()
            .filter(|e| seen.insert(e.file.clone()))
            .map(|e| e.file.clone())
            .collect()
    }

    /// Reject absolute paths outside `cwd` and relativize the rest.
    ///
    /// # Errors
    ///
    /// Returns the offending path when an absolute path is not rooted at
    /// `cwd`.
    pub fn sanitize_paths(&mut self, cwd: &Path) -> std::result::Result<(), String> {
        for edit in &mut self.edits {
            let path = PathBuf::from(&edit.file);
            if path.is_absolute() {
                match path.strip_prefix(cwd) {
                    Ok(rel) => edit.file = rel.display().to_string(),
                    Err(_) => return Err(edit.file.clone()),
                }
            }
        }
        Ok(())
    }

    /// Files not present in the allowed set, in plan order.
    #[must_use]
    pub fn out_of_scope(&self, allowed_files: &[String]) -> Vec<String> {
        self.touched_files()
            .into_iter()
            .filter(|f| !allowed_files.iter().any(|a| a == f))
            .collect()
    }
}

fn normalize_edit(value: &serde_json::Value) -> Option<Edit> {
    let file = value.get("file")?.as_str()?.to_string();
    let start_line = value.get("start_line")?.as_u64()? as usize;
    let end_line = value.get("end_line")?.as_u64()? as usize;
    let replacement = value
        .get("replacement")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    if file.is_empty() || start_line < 1 || end_line < start_line {
        return None;
    }

    Some(Edit {
        file,
        start_line,
        end_line,
        replacement,
    })
}

/// Line count of a replacement; empty contributes nothing.
fn count_lines(text: &str) -> usize {
    if text.is_empty() {
        0
    } else {
        text.split(['\n'])
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .count()
    }
}

/// Whether a relative path tries to climb out of the tree.
#[must_use]
pub fn has_parent_traversal(path: &str) -> bool {
    Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
}

// ============================================================================
// Application
// ============================================================================

/// Why applying a plan failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The target file does not exist.
    MissingFile(String),
    /// The requested range falls outside the file.
    InvalidLineRange {
        file: String,
        start_line: usize,
        end_line: usize,
    },
    /// IO failure while reading or writing.
    Io(String),
}

impl ApplyError {
    /// The action-record reason detail for this failure.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::MissingFile(file) => format!("missing_file:{file}"),
            Self::InvalidLineRange {
                file,
                start_line,
                end_line,
            } => format!("invalid_line_range:{file}:{start_line}-{end_line}"),
            Self::Io(message) => format!("io:{message}"),
        }
    }
}

/// Apply every edit in order, persisting each file as it is touched.
///
/// Edits to the same file must be ordered by the caller; each edit sees
/// the file as left by the previous one. Partial applications are not
/// rolled back here.
///
/// # Errors
///
/// Returns the first failure encountered.
pub fn apply_plan(plan: &EditPlan, cwd: &Path) -> std::result::Result<Vec<String>, ApplyError> {
    for edit in &plan.edits {
        apply_edit(edit, cwd)?;
    }
    Ok(plan.touched_files())
}

fn apply_edit(edit: &Edit, cwd: &Path) -> std::result::Result<(), ApplyError> {
    let path = cwd.join(&edit.file);
    if !path.is_file() {
        return Err(ApplyError::MissingFile(edit.file.clone()));
    }

    let content =
        std::fs::read_to_string(&path).map_err(|e| ApplyError::Io(e.to_string()))?;
    let had_trailing_newline = content.ends_with('\n');
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    if edit.start_line < 1 || edit.end_line < edit.start_line || edit.end_line > lines.len() {
        return Err(ApplyError::InvalidLineRange {
            file: edit.file.clone(),
            start_line: edit.start_line,
            end_line: edit.end_line,
        });
    }

    let replacement_lines: Vec<String> = if edit.replacement.is_empty() {
        Vec::new()
    } else {
        edit.replacement
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect()
    };

    debug!(
        file = %edit.file,
        start = edit.start_line,
        end = edit.end_line,
        new_lines = replacement_lines.len(),
        "splicing edit"
    );

    lines.splice(edit.start_line - 1..edit.end_line, replacement_lines);

    let mut output = lines.join("\n");
    if had_trailing_newline && !output.is_empty() {
        output.push('\n');
    }
    std::fs::write(&path, output).map_err(|e| ApplyError::Io(e.to_string()))?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
