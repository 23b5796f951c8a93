//! Deterministic pre-fix rules.
//!
//! Before any model gets involved, a small rule table applies low-risk
//! automated fixes keyed on which gates are failing. Every rule declares
//! its trigger, records the exact command and exit code it ran, leaves the
//! tree committable on success, and is safe to re-run.

use crate::command::run_command;
use crate::report::GateKind;
use crate::repair::ActionRecord;
use anyhow::Result;
use std::collections::BTreeSet;
use std::path::{Component, Path};
use tracing::{debug, info};

/// File extensions the autofix rule considers source code.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "mjs", "cjs", "vue", "svelte", "css", "scss",
];

/// Directory names never touched by automated fixes.
pub const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "dist",
    "build",
    ".next",
    "out",
    "coverage",
    ".git",
    ".quick-gate",
    ".lighthouseci",
];

/// Cap on the scoped file set handed to a fixer command.
pub const MAX_SCOPED_FILES: usize = 20;

// ============================================================================
// Outcome
// ============================================================================

/// What the pre-fixer did this attempt.
#[derive(Debug, Clone)]
pub struct PreFixOutcome {
    /// Whether any rule actually ran a command.
    pub acted: bool,
    /// One record per triggered rule, in rule-table order.
    pub actions: Vec<ActionRecord>,
}

// ============================================================================
// Rule table
// ============================================================================

/// Apply the deterministic rules for the given failing-gate set.
///
/// Rule 1 (lint): run the problem-class-only lint autofix on the scoped
/// file set. Rules for the remaining gates are placeholders that record
/// `requires_manual_or_model_patch`.
///
/// # Errors
///
/// Fails only when the fixer command cannot be spawned at all.
pub async fn run_prefix(
    cwd: &Path,
    failing_gates: &BTreeSet<GateKind>,
    candidate_files: &[String],
) -> Result<PreFixOutcome> {
    let mut actions = Vec::new();
    let mut acted = false;

    if failing_gates.contains(&GateKind::Lint) {
        let scoped = scoped_files(candidate_files);
        if scoped.is_empty() {
            debug!("lint autofix skipped: no scoped files");
            actions.push(
                ActionRecord::new("deterministic_prefix")
                    .with_rule("lint_autofix_problem")
                    .with_reason("no_scoped_files"),
            );
        } else {
            let command = format!(
                "npx eslint --fix --fix-type problem {}",
                scoped.join(" ")
            );
            let trace = run_command(&command, cwd, None).await?;
            info!(
                exit_code = ?trace.exit_code,
                files = scoped.len(),
                "lint autofix ran"
            );
            acted = true;
            actions.push(
                ActionRecord::new("deterministic_prefix")
                    .with_rule("lint_autofix_problem")
                    .with_command(&command, trace.exit_code),
            );
        }
    }

    for gate in [GateKind::Typecheck, GateKind::Build, GateKind::Lighthouse] {
        if failing_gates.contains(&gate) {
            actions.push(
                ActionRecord::new("deterministic_prefix")
                    .with_rule(gate.name())
                    .with_reason("requires_manual_or_model_patch"),
            );
        }
    }

    Ok(PreFixOutcome { acted, actions })
}

// ============================================================================
// Scoped file set
// ============================================================================

/// Filter the candidate list down to files a fixer may touch.
///
/// Keeps relative source-code paths outside build/vendor/coverage
/// directories, rejects minified artifacts and parent-directory
/// references, and caps the result at [`MAX_SCOPED_FILES`].
#[must_use]
pub fn scoped_files(candidates: &[String]) -> Vec<String> {
    candidates
        .iter()
        .filter(|file| is_fixable_path(file))
        .take(MAX_SCOPED_FILES)
        .cloned()
        .collect()
}

fn is_fixable_path(file: &str) -> bool {
    let path = Path::new(file);

    if path.is_absolute() {
        return false;
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return false;
    }

    let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if !SOURCE_EXTENSIONS.contains(&extension) {
        return false;
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if file_name.contains(".min.") {
        return false;
    }

    !path.components().any(|component| {
        matches!(component, Component::Normal(name)
            if name.to_str().is_some_and(|n| EXCLUDED_DIRS.contains(&n)))
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_scoped_files_keeps_source_extensions() {
        let scoped = scoped_files(&strings(&[
            "src/a.ts",
            "src/b.tsx",
            "styles/app.scss",
            "README.md",
            "assets/logo.png",
        ]));
        assert_eq!(scoped, strings(&["src/a.ts", "src/b.tsx", "styles/app.scss"]));
    }

    #[test]
    fn test_scoped_files_rejects_vendor_and_build_dirs() {
        let scoped = scoped_files(&strings(&[
            "node_modules/lib/index.js",
            "dist/app.js",
            "coverage/report.js",
            ".next/chunk.js",
            "src/ok.js",
        ]));
        assert_eq!(scoped, strings(&["src/ok.js"]));
    }

    #[test]
    fn test_scoped_files_rejects_minified_absolute_and_traversal() {
        let scoped = scoped_files(&strings(&[
            "public/vendor.min.js",
            "/etc/passwd.js",
            "../outside/app.ts",
            "src/inside.ts",
        ]));
        assert_eq!(scoped, strings(&["src/inside.ts"]));
    }

    #[test]
    fn test_scoped_files_cap() {
        let many: Vec<String> = (0..50).map(|i| format!("src/f{i}.ts")).collect();
        assert_eq!(scoped_files(&many).len(), MAX_SCOPED_FILES);
    }

    /// Put a stub `npx` on PATH so the rule runs hermetically.
    fn stub_npx(temp: &TempDir) {
        let bin = temp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let npx = bin.join("npx");
        std::fs::write(&npx, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&npx, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let path = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{}:{path}", bin.display()));
    }

    #[tokio::test]
    async fn test_lint_rule_runs_and_records_command() {
        let temp = TempDir::new().unwrap();
        stub_npx(&temp);
        let mut failing = BTreeSet::new();
        failing.insert(GateKind::Lint);

        let outcome = run_prefix(temp.path(), &failing, &strings(&["src/a.ts"]))
            .await
            .unwrap();

        assert!(outcome.acted);
        assert_eq!(outcome.actions.len(), 1);
        let action = &outcome.actions[0];
        assert_eq!(action.strategy, "deterministic_prefix");
        assert_eq!(action.rule.as_deref(), Some("lint_autofix_problem"));
        let command = action.command.as_deref().unwrap();
        assert!(command.contains("--fix-type problem"));
        assert!(command.contains("src/a.ts"));
    }

    #[tokio::test]
    async fn test_lint_rule_without_scoped_files_does_not_act() {
        let temp = TempDir::new().unwrap();
        let mut failing = BTreeSet::new();
        failing.insert(GateKind::Lint);

        let outcome = run_prefix(temp.path(), &failing, &strings(&["README.md"]))
            .await
            .unwrap();

        assert!(!outcome.acted);
        assert_eq!(outcome.actions[0].reason.as_deref(), Some("no_scoped_files"));
    }

    #[tokio::test]
    async fn test_other_gates_get_placeholder_actions() {
        let temp = TempDir::new().unwrap();
        let mut failing = BTreeSet::new();
        failing.insert(GateKind::Typecheck);
        failing.insert(GateKind::Lighthouse);

        let outcome = run_prefix(temp.path(), &failing, &[]).await.unwrap();

        assert!(!outcome.acted);
        assert_eq!(outcome.actions.len(), 2);
        assert!(outcome
            .actions
            .iter()
            .all(|a| a.reason.as_deref() == Some("requires_manual_or_model_patch")));
        let rules: Vec<_> = outcome
            .actions
            .iter()
            .filter_map(|a| a.rule.as_deref())
            .collect();
        assert_eq!(rules, vec!["typecheck", "lighthouse"]);
    }

    #[tokio::test]
    async fn test_no_failing_gates_no_actions() {
        let temp = TempDir::new().unwrap();
        let outcome = run_prefix(temp.path(), &BTreeSet::new(), &[]).await.unwrap();
        assert!(!outcome.acted);
        assert!(outcome.actions.is_empty());
    }
}
