//! Patch adapter: asks the patch model for an edit plan and applies it
//! under strict scope and size budgets.
//!
//! The pipeline is a fixed sequence of stages, each terminal on failure:
//! deny-list check, invocation (with one retry on unparsable output),
//! normalization, path sanitization, scope check, predicted-size budget,
//! relevance scoring, application. Only application mutates the working
//! tree; the repair loop's snapshot is the recovery path for partial
//! applies.

use super::{parse_json_liberal, FailureContext, ModelRunner};
use crate::config::ModelPolicy;
use crate::editplan::{apply_plan, has_parent_traversal, EditPlan};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Minimum relevance score an edit plan must reach.
pub const MIN_DIFF_SCORE: f64 = 0.5;

/// Weight of the file-overlap ratio in the relevance score.
pub const OVERLAP_WEIGHT: f64 = 0.7;

/// Weight of the line-budget term in the relevance score.
pub const LINE_WEIGHT: f64 = 0.3;

/// Characters of prior output echoed into the retry prompt.
const RETRY_EXCERPT_CHARS: usize = 400;

// ============================================================================
// Result type
// ============================================================================

/// Result of one patch invocation.
#[derive(Debug, Clone)]
pub struct PatchResult {
    /// Whether a model call was made (deny-listed models are never called).
    pub attempted: bool,
    /// Whether an edit plan was applied.
    pub applied: bool,
    /// Failure reason when not applied.
    pub reason: Option<String>,
    /// Extra failure detail (offending files, apply error).
    pub detail: Option<String>,
    /// Relevance score of the accepted plan.
    pub score: Option<f64>,
    /// Predicted line cost of the accepted plan.
    pub patch_lines: Option<usize>,
    /// Files the accepted plan touched.
    pub touched_files: Vec<String>,
}

impl PatchResult {
    fn refused(reason: &str) -> Self {
        Self {
            attempted: false,
            applied: false,
            reason: Some(reason.to_string()),
            detail: None,
            score: None,
            patch_lines: None,
            touched_files: Vec::new(),
        }
    }

    fn rejected(reason: &str) -> Self {
        Self {
            attempted: true,
            ..Self::refused(reason)
        }
    }

    fn rejected_with(reason: &str, detail: String) -> Self {
        Self {
            detail: Some(detail),
            ..Self::rejected(reason)
        }
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Invokes the patch model, validates its plan, and applies it.
pub struct PatchAdapter<'a> {
    runner: &'a dyn ModelRunner,
    policy: &'a ModelPolicy,
    cwd: PathBuf,
    max_patch_lines: usize,
}

impl<'a> PatchAdapter<'a> {
    /// Create an adapter bound to a runner, policy, and working tree.
    #[must_use]
    pub fn new(
        runner: &'a dyn ModelRunner,
        policy: &'a ModelPolicy,
        cwd: impl AsRef<Path>,
        max_patch_lines: usize,
    ) -> Self {
        Self {
            runner,
            policy,
            cwd: cwd.as_ref().to_path_buf(),
            max_patch_lines,
        }
    }

    /// Run the full pipeline against the gathered failure context.
    pub async fn run(&self, context: &FailureContext) -> PatchResult {
        let model = &self.policy.patch_model;

        if self.policy.is_hint_only(model) {
            info!(%model, "refusing hint-only model as patch model");
            return PatchResult::refused("patch_model_is_hint_only");
        }

        // Invocation, with one retry on unparsable output.
        let prompt = build_patch_prompt(context);
        let first = match self.runner.invoke(model, &prompt).await {
            Ok(output) => output,
            Err(failure) => return PatchResult::rejected(failure.reason()),
        };

        let value = match parse_json_liberal(&first) {
            Some(value) => value,
            None => {
                debug!("patch output unparsable, retrying with reminder prompt");
                let reminder = build_retry_prompt(context, &first);
                let second = match self.runner.invoke(model, &reminder).await {
                    Ok(output) => output,
                    Err(failure) => return PatchResult::rejected(failure.reason()),
                };
                match parse_json_liberal(&second) {
                    Some(value) => value,
                    None => return PatchResult::rejected("invalid_edit_plan_json"),
                }
            }
        };

        // Stage 1: normalize.
        let Some(mut plan) = EditPlan::from_value(&value) else {
            return PatchResult::rejected("invalid_edit_plan_json");
        };

        // Stage 2: path sanitization.
        if let Err(offender) = plan.sanitize_paths(&self.cwd) {
            return PatchResult::rejected_with("file_out_of_scope", offender);
        }
        if let Some(traversal) = plan
            .touched_files()
            .into_iter()
            .find(|f| has_parent_traversal(f))
        {
            return PatchResult::rejected_with("file_out_of_scope", traversal);
        }

        // Stage 3: scope check.
        let out_of_scope = plan.out_of_scope(&context.allowed_files);
        if !out_of_scope.is_empty() {
            return PatchResult::rejected_with("file_out_of_scope", out_of_scope.join(", "));
        }

        // Stage 4: predicted size.
        let patch_lines = plan.predicted_lines();
        if patch_lines > self.max_patch_lines {
            return PatchResult::rejected_with(
                "patch_budget_exceeded",
                format!("{patch_lines} predicted lines > {}", self.max_patch_lines),
            );
        }

        // Stage 5: relevance score.
        let score = relevance_score(&plan, &context.merged_files, patch_lines, self.max_patch_lines);
        if score < MIN_DIFF_SCORE {
            return PatchResult::rejected_with("diff_score_too_low", format!("score {score}"));
        }

        // Stage 6: apply.
        let touched_files = match apply_plan(&plan, &self.cwd) {
            Ok(files) => files,
            Err(err) => {
                return PatchResult::rejected_with("apply_plan_failed", err.detail());
            }
        };

        info!(
            files = touched_files.len(),
            patch_lines, score, "edit plan applied"
        );

        PatchResult {
            attempted: true,
            applied: true,
            reason: None,
            detail: None,
            score: Some(score),
            patch_lines: Some(patch_lines),
            touched_files,
        }
    }
}

/// `round2(0.7 * overlapRatio + 0.3 * lineScore)`.
fn relevance_score(
    plan: &EditPlan,
    merged_files: &[String],
    predicted_lines: usize,
    max_patch_lines: usize,
) -> f64 {
    let touched = plan.touched_files();
    let overlap = if touched.is_empty() {
        0.0
    } else {
        let in_scope = touched
            .iter()
            .filter(|f| merged_files.iter().any(|m| &m == f))
            .count();
        in_scope as f64 / touched.len() as f64
    };

    let line_score = if predicted_lines <= max_patch_lines {
        1.0
    } else {
        0.0
    };

    let raw = OVERLAP_WEIGHT * overlap + LINE_WEIGHT * line_score;
    (raw * 100.0).round() / 100.0
}

// ============================================================================
// Prompts
// ============================================================================

fn build_patch_prompt(context: &FailureContext) -> String {
    let findings = serde_json::to_string_pretty(&context.findings).unwrap_or_default();

    let mut prompt = String::new();
    prompt.push_str(
        "You are a front-end repair assistant. Propose a minimal edit plan that \
         fixes the failures below.\n\n## Findings\n\n",
    );
    prompt.push_str(&findings);
    prompt.push_str("\n\n## File snippets\n\n");
    for snippet in &context.snippets {
        prompt.push_str(&format!("### {}\n```\n{}\n```\n", snippet.file, snippet.content));
    }
    prompt.push_str("\n## Allowed files\n\n");
    for file in &context.allowed_files {
        prompt.push_str(&format!("- {file}\n"));
    }
    prompt.push_str(
        "\nReply with STRICT JSON only, no prose:\n\
         {\"summary\": \"<one line>\", \"edits\": [{\"file\": \"<relative path>\", \
         \"start_line\": <int>, \"end_line\": <int>, \"replacement\": \"<new content>\"}]}\n\
         Line numbers are 1-based and inclusive. Touch only the allowed files. \
         Keep the plan as small as possible.\n",
    );
    prompt
}

fn build_retry_prompt(context: &FailureContext, prior_output: &str) -> String {
    let excerpt: String = prior_output.chars().take(RETRY_EXCERPT_CHARS).collect();

    let mut prompt = String::new();
    prompt.push_str(
        "Your previous reply was not valid JSON. Reply with ONLY a JSON object, \
         nothing before or after it.\n\nRequired shape:\n\
         {\"summary\": \"<one line>\", \"edits\": [{\"file\": \"<relative path>\", \
         \"start_line\": <int>, \"end_line\": <int>, \"replacement\": \"<new content>\"}]}\n\n\
         Files you may touch:\n",
    );
    for file in &context.allowed_files {
        prompt.push_str(&format!("- {file}\n"));
    }
    prompt.push_str("\nYour previous reply began with:\n");
    prompt.push_str(&excerpt);
    prompt.push('\n');
    prompt
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FindingDigest, MockRunner, ModelFailure};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn context(allowed: &[&str]) -> FailureContext {
        FailureContext {
            snippets: Vec::new(),
            findings: vec![FindingDigest {
                id: "lint_exit_1".into(),
                gate: "lint".into(),
                summary: "lint failed".into(),
                files: allowed.iter().map(|s| s.to_string()).collect(),
                metric: None,
                route: None,
                raw_context: String::new(),
            }],
            allowed_files: allowed.iter().map(|s| s.to_string()).collect(),
            merged_files: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn policy() -> ModelPolicy {
        ModelPolicy {
            patch_model: "mistral:7b".into(),
            ..ModelPolicy::default()
        }
    }

    fn plan_json(file: &str) -> String {
        format!(
            r#"{{"summary": "fix", "edits": [{{"file": "{file}", "start_line": 1, "end_line": 1, "replacement": "fixed"}}]}}"#
        )
    }

    #[tokio::test]
    async fn test_hint_only_model_refused_without_invocation() {
        struct PanicRunner;
        #[async_trait::async_trait]
        impl ModelRunner for PanicRunner {
            async fn invoke(&self, _: &str, _: &str) -> Result<String, ModelFailure> {
                panic!("deny-listed model must never be invoked");
            }
        }

        let temp = TempDir::new().unwrap();
        let denied = ModelPolicy {
            patch_model: "qwen2.5:1.5b".into(),
            ..ModelPolicy::default()
        };
        let adapter = PatchAdapter::new(&PanicRunner, &denied, temp.path(), 150);
        let result = adapter.run(&context(&["src/a.ts"])).await;

        assert!(!result.attempted);
        assert!(!result.applied);
        assert_eq!(result.reason.as_deref(), Some("patch_model_is_hint_only"));
    }

    #[tokio::test]
    async fn test_allow_hint_only_env_disables_deny_list() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.ts"), "broken\n").unwrap();
        let relaxed = ModelPolicy {
            patch_model: "qwen2.5:1.5b".into(),
            allow_hint_only_patch: true,
            ..ModelPolicy::default()
        };
        let runner = MockRunner::new(plan_json("a.ts"));
        let adapter = PatchAdapter::new(&runner, &relaxed, temp.path(), 150);
        let result = adapter.run(&context(&["a.ts"])).await;

        assert!(result.applied);
    }

    #[tokio::test]
    async fn test_successful_apply_reports_score_and_lines() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.ts"), "broken\nok\n").unwrap();
        let runner = MockRunner::new(plan_json("a.ts"));
        let p = policy();
        let adapter = PatchAdapter::new(&runner, &p, temp.path(), 150);
        let result = adapter.run(&context(&["a.ts"])).await;

        assert!(result.attempted);
        assert!(result.applied);
        assert_eq!(result.score, Some(1.0));
        assert_eq!(result.patch_lines, Some(2));
        assert_eq!(result.touched_files, vec!["a.ts"]);
        assert_eq!(
            std::fs::read_to_string(temp.path().join("a.ts")).unwrap(),
            "fixed\nok\n"
        );
    }

    #[tokio::test]
    async fn test_out_of_scope_file_rejected() {
        let temp = TempDir::new().unwrap();
        let runner = MockRunner::new(plan_json("README.md"));
        let p = policy();
        let adapter = PatchAdapter::new(&runner, &p, temp.path(), 150);
        let result = adapter.run(&context(&["src/app.ts"])).await;

        assert!(!result.applied);
        assert_eq!(result.reason.as_deref(), Some("file_out_of_scope"));
        assert_eq!(result.detail.as_deref(), Some("README.md"));
    }

    #[tokio::test]
    async fn test_parent_traversal_rejected() {
        let temp = TempDir::new().unwrap();
        let runner = MockRunner::new(plan_json("../outside.ts"));
        let p = policy();
        let adapter = PatchAdapter::new(&runner, &p, temp.path(), 150);
        let result = adapter.run(&context(&["../outside.ts"])).await;

        assert!(!result.applied);
        assert_eq!(result.reason.as_deref(), Some("file_out_of_scope"));
    }

    #[tokio::test]
    async fn test_predicted_budget_rejection() {
        let temp = TempDir::new().unwrap();
        let big_replacement = vec!["line"; 200].join("\\n");
        let runner = MockRunner::new(format!(
            r#"{{"summary": "huge", "edits": [{{"file": "a.ts", "start_line": 1, "end_line": 1, "replacement": "{big_replacement}"}}]}}"#
        ));
        let p = policy();
        let adapter = PatchAdapter::new(&runner, &p, temp.path(), 150);
        let result = adapter.run(&context(&["a.ts"])).await;

        assert!(!result.applied);
        assert_eq!(result.reason.as_deref(), Some("patch_budget_exceeded"));
    }

    #[tokio::test]
    async fn test_retry_once_on_unparsable_output() {
        struct TwoShotRunner {
            calls: AtomicUsize,
        }
        #[async_trait::async_trait]
        impl ModelRunner for TwoShotRunner {
            async fn invoke(&self, _: &str, prompt: &str) -> Result<String, ModelFailure> {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call == 0 {
                    Ok("I think you should fix the import.".into())
                } else {
                    // The retry prompt must carry the allowed files.
                    assert!(prompt.contains("a.ts"));
                    assert!(prompt.contains("previous reply"));
                    Ok(
                        r#"{"summary": "fix", "edits": [{"file": "a.ts", "start_line": 1, "end_line": 1, "replacement": "fixed"}]}"#
                            .into(),
                    )
                }
            }
        }

        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.ts"), "broken\n").unwrap();
        let runner = TwoShotRunner {
            calls: AtomicUsize::new(0),
        };
        let p = policy();
        let adapter = PatchAdapter::new(&runner, &p, temp.path(), 150);
        let result = adapter.run(&context(&["a.ts"])).await;

        assert!(result.applied);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_unparsable_output_is_terminal() {
        struct GarbageRunner {
            calls: AtomicUsize,
        }
        #[async_trait::async_trait]
        impl ModelRunner for GarbageRunner {
            async fn invoke(&self, _: &str, _: &str) -> Result<String, ModelFailure> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok("still not json".into())
            }
        }

        let temp = TempDir::new().unwrap();
        let runner = GarbageRunner {
            calls: AtomicUsize::new(0),
        };
        let p = policy();
        let adapter = PatchAdapter::new(&runner, &p, temp.path(), 150);
        let result = adapter.run(&context(&["a.ts"])).await;

        assert!(!result.applied);
        assert_eq!(result.reason.as_deref(), Some("invalid_edit_plan_json"));
        // Exactly one retry.
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_apply_failure_reports_detail() {
        let temp = TempDir::new().unwrap();
        let runner = MockRunner::new(plan_json("ghost.ts"));
        let p = policy();
        let adapter = PatchAdapter::new(&runner, &p, temp.path(), 150);
        let result = adapter.run(&context(&["ghost.ts"])).await;

        assert!(!result.applied);
        assert_eq!(result.reason.as_deref(), Some("apply_plan_failed"));
        assert_eq!(result.detail.as_deref(), Some("missing_file:ghost.ts"));
    }

    #[test]
    fn test_relevance_score_rounding_and_overlap() {
        let plan = EditPlan {
            summary: String::new(),
            edits: vec![
                crate::editplan::Edit {
                    file: "in.ts".into(),
                    start_line: 1,
                    end_line: 1,
                    replacement: "x".into(),
                },
                crate::editplan::Edit {
                    file: "out.ts".into(),
                    start_line: 1,
                    end_line: 1,
                    replacement: "y".into(),
                },
                crate::editplan::Edit {
                    file: "other.ts".into(),
                    start_line: 1,
                    end_line: 1,
                    replacement: "z".into(),
                },
            ],
        };
        let merged = vec!["in.ts".to_string()];
        // overlap 1/3, line score 1 -> 0.7*0.333 + 0.3 = 0.533 -> 0.53
        let score = relevance_score(&plan, &merged, 6, 150);
        assert_eq!(score, 0.53);
    }

    #[tokio::test]
    async fn test_low_overlap_rejected_as_diff_score_too_low() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("unrelated.ts"), "x\n").unwrap();
        // Plan touches only a file outside the merged set but inside
        // allowed (allowed and merged differ in this synthetic context).
        let runner = MockRunner::new(plan_json("unrelated.ts"));
        let p = policy();
        let adapter = PatchAdapter::new(&runner, &p, temp.path(), 150);

        let mut ctx = context(&["unrelated.ts"]);
        ctx.merged_files = vec!["src/app.ts".into()];
        let result = adapter.run(&ctx).await;

        assert!(!result.applied);
        // overlap 0, line 1 -> 0.3 < 0.5
        assert_eq!(result.reason.as_deref(), Some("diff_score_too_low"));
    }
}
