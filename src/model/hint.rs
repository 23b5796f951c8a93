//! Hint adapter: asks a small local model for repair hints.
//!
//! Hints are advisory. The adapter never fails an attempt; a model that is
//! missing, slow, or incoherent just produces an attempted-but-not-accepted
//! result that the loop records and moves past.

use super::{parse_json_liberal, FailureContext, ModelRunner};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum hints accepted from one invocation.
pub const MAX_HINTS: usize = 6;

/// Confidence levels a hint may carry.
pub const CONFIDENCE_LEVELS: &[&str] = &["low", "medium", "high"];

// ============================================================================
// Types
// ============================================================================

/// A single model-suggested hint tied to a finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hint {
    pub finding_id: String,
    pub hint: String,
    pub confidence: String,
}

/// Result of one hint invocation.
#[derive(Debug, Clone)]
pub struct HintResult {
    /// Whether a model call was made at all.
    pub attempted: bool,
    /// Whether usable hints came back.
    pub accepted: bool,
    /// Failure reason when not accepted.
    pub reason: Option<String>,
    /// Accepted hints, at most [`MAX_HINTS`].
    pub hints: Vec<Hint>,
}

impl HintResult {
    fn rejected(reason: &str) -> Self {
        Self {
            attempted: true,
            accepted: false,
            reason: Some(reason.to_string()),
            hints: Vec::new(),
        }
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Invokes the hint model and parses its output leniently.
pub struct HintAdapter<'a> {
    runner: &'a dyn ModelRunner,
    model: String,
}

impl<'a> HintAdapter<'a> {
    /// Create an adapter bound to a runner and model identifier.
    #[must_use]
    pub fn new(runner: &'a dyn ModelRunner, model: impl Into<String>) -> Self {
        Self {
            runner,
            model: model.into(),
        }
    }

    /// Ask for hints against the gathered failure context.
    pub async fn run(&self, context: &FailureContext) -> HintResult {
        let prompt = build_hint_prompt(context);

        let output = match self.runner.invoke(&self.model, &prompt).await {
            Ok(output) => output,
            Err(failure) => {
                debug!(model = %self.model, reason = failure.reason(), "hint model unavailable");
                return HintResult::rejected(failure.reason());
            }
        };

        let Some(value) = parse_json_liberal(&output) else {
            return HintResult::rejected("invalid_hint_json");
        };

        let hints = extract_hints(&value, context);
        if hints.is_empty() {
            return HintResult::rejected("invalid_hint_json");
        }

        debug!(count = hints.len(), "hints accepted");
        HintResult {
            attempted: true,
            accepted: true,
            reason: None,
            hints,
        }
    }
}

/// Pull valid hints out of the parsed payload.
///
/// A hint must name an existing finding id and carry a known confidence
/// level; anything else is dropped. At most [`MAX_HINTS`] survive.
fn extract_hints(value: &serde_json::Value, context: &FailureContext) -> Vec<Hint> {
    let Some(items) = value.get("hints").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let finding_id = item.get("finding_id")?.as_str()?.to_string();
            let hint = item.get("hint")?.as_str()?.to_string();
            let confidence = item.get("confidence")?.as_str()?.to_lowercase();

            if hint.trim().is_empty() || !CONFIDENCE_LEVELS.contains(&confidence.as_str()) {
                return None;
            }
            if !context.findings.iter().any(|f| f.id == finding_id) {
                return None;
            }

            Some(Hint {
                finding_id,
                hint,
                confidence,
            })
        })
        .take(MAX_HINTS)
        .collect()
}

/// Assemble the strict-JSON hint prompt.
fn build_hint_prompt(context: &FailureContext) -> String {
    let findings = serde_json::to_string_pretty(&context.findings).unwrap_or_default();

    let mut prompt = String::new();
    prompt.push_str(
        "You are a front-end quality assistant. The following quality gates failed.\n\n",
    );
    prompt.push_str("## Findings\n\n");
    prompt.push_str(&findings);
    prompt.push_str("\n\n## File snippets\n\n");
    for snippet in &context.snippets {
        prompt.push_str(&format!("### {}\n```\n{}\n```\n", snippet.file, snippet.content));
    }
    prompt.push_str(
        "\nReply with STRICT JSON only, no prose, in this exact shape:\n\
         {\"hints\": [{\"finding_id\": \"<id>\", \"hint\": \"<one sentence>\", \
         \"confidence\": \"low|medium|high\"}]}\n\
         Reference only the finding ids listed above. At most 6 hints.\n",
    );
    prompt
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FindingDigest, MockRunner};

    fn context() -> FailureContext {
        FailureContext {
            snippets: Vec::new(),
            findings: vec![
                FindingDigest {
                    id: "lint_exit_1".into(),
                    gate: "lint".into(),
                    summary: "lint failed".into(),
                    files: vec!["src/a.ts".into()],
                    metric: None,
                    route: None,
                    raw_context: String::new(),
                },
                FindingDigest {
                    id: "typecheck_exit_2".into(),
                    gate: "typecheck".into(),
                    summary: "tsc failed".into(),
                    files: Vec::new(),
                    metric: None,
                    route: None,
                    raw_context: String::new(),
                },
            ],
            allowed_files: vec!["src/a.ts".into()],
            merged_files: vec!["src/a.ts".into()],
        }
    }

    #[tokio::test]
    async fn test_accepts_valid_hints() {
        let runner = MockRunner::new(
            r#"{"hints": [{"finding_id": "lint_exit_1", "hint": "Remove the unused import.", "confidence": "high"}]}"#,
        );
        let adapter = HintAdapter::new(&runner, "test-model");
        let result = adapter.run(&context()).await;

        assert!(result.attempted);
        assert!(result.accepted);
        assert_eq!(result.hints.len(), 1);
        assert_eq!(result.hints[0].confidence, "high");
    }

    #[tokio::test]
    async fn test_parses_json_wrapped_in_prose() {
        let runner = MockRunner::new(
            "Here you go:\n{\"hints\": [{\"finding_id\": \"lint_exit_1\", \"hint\": \"Fix it.\", \"confidence\": \"low\"}]}\nGood luck!",
        );
        let adapter = HintAdapter::new(&runner, "test-model");
        let result = adapter.run(&context()).await;
        assert!(result.accepted);
        assert_eq!(result.hints.len(), 1);
    }

    #[tokio::test]
    async fn test_drops_unknown_finding_ids_and_bad_confidence() {
        let runner = MockRunner::new(
            r#"{"hints": [
                {"finding_id": "nonexistent", "hint": "x", "confidence": "high"},
                {"finding_id": "lint_exit_1", "hint": "y", "confidence": "certain"},
                {"finding_id": "lint_exit_1", "hint": "keep me", "confidence": "medium"}
            ]}"#,
        );
        let adapter = HintAdapter::new(&runner, "test-model");
        let result = adapter.run(&context()).await;

        assert_eq!(result.hints.len(), 1);
        assert_eq!(result.hints[0].hint, "keep me");
    }

    #[tokio::test]
    async fn test_caps_at_max_hints() {
        let many: Vec<String> = (0..10)
            .map(|i| {
                format!(
                    r#"{{"finding_id": "lint_exit_1", "hint": "hint {i}", "confidence": "low"}}"#
                )
            })
            .collect();
        let runner = MockRunner::new(format!(r#"{{"hints": [{}]}}"#, many.join(",")));
        let adapter = HintAdapter::new(&runner, "test-model");
        let result = adapter.run(&context()).await;

        assert_eq!(result.hints.len(), MAX_HINTS);
    }

    #[tokio::test]
    async fn test_unparsable_output_rejected() {
        let runner = MockRunner::new("I could not help with that.");
        let adapter = HintAdapter::new(&runner, "test-model");
        let result = adapter.run(&context()).await;

        assert!(result.attempted);
        assert!(!result.accepted);
        assert_eq!(result.reason.as_deref(), Some("invalid_hint_json"));
    }

    #[tokio::test]
    async fn test_model_failure_reason_propagates() {
        struct FailingRunner;
        #[async_trait::async_trait]
        impl ModelRunner for FailingRunner {
            async fn invoke(
                &self,
                _model: &str,
                _prompt: &str,
            ) -> Result<String, crate::model::ModelFailure> {
                Err(crate::model::ModelFailure::Timeout)
            }
        }

        let adapter = HintAdapter::new(&FailingRunner, "slow-model");
        let result = adapter.run(&context()).await;

        assert!(result.attempted);
        assert!(!result.accepted);
        assert_eq!(result.reason.as_deref(), Some("model_command_timeout"));
    }

    #[test]
    fn test_prompt_mentions_findings_and_shape() {
        let prompt = build_hint_prompt(&context());
        assert!(prompt.contains("lint_exit_1"));
        assert!(prompt.contains("STRICT JSON"));
        assert!(prompt.contains("confidence"));
    }
}
