//! Local-model invocation and shared adapter plumbing.
//!
//! Both adapters (hint and patch) talk to an abstract [`ModelRunner`]
//! addressed by a model identifier. The production runner shells out to
//! `ollama run`; tests and the documented env hooks substitute canned
//! output. The context gatherer and the liberal JSON parser live here
//! because both adapters share them.

pub mod hint;
pub mod patch;

use crate::command::run_command_with_stdin;
use crate::report::FailuresReport;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Maximum file snippets included in a prompt context.
pub const MAX_SNIPPET_FILES: usize = 3;

/// Lines taken from the top of each snippet file.
pub const SNIPPET_LINES: usize = 40;

/// Character cap on per-finding raw context.
pub const MAX_RAW_CONTEXT_CHARS: usize = 600;

/// Entries exposed to the model as the allowed-files set.
pub const MAX_ALLOWED_FILES: usize = 12;

// ============================================================================
// Model runner
// ============================================================================

/// Why a model invocation produced no usable output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelFailure {
    /// The runner binary or the model itself is unavailable.
    MissingModel,
    /// The call exceeded its timeout.
    Timeout,
    /// The runner exited non-zero.
    CommandFailed { exit_code: Option<i32> },
}

impl ModelFailure {
    /// Action-record reason string.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingModel => "missing_model",
            Self::Timeout => "model_command_timeout",
            Self::CommandFailed { .. } => "model_command_failed",
        }
    }
}

/// An opaque local-model backend addressed by model identifier.
#[async_trait]
pub trait ModelRunner: Send + Sync {
    /// Run one prompt through the named model and return its raw output.
    async fn invoke(&self, model: &str, prompt: &str) -> Result<String, ModelFailure>;
}

/// Production runner: shells out to `ollama run <model>` with the prompt
/// on stdin, bounded by the configured per-call timeout.
pub struct OllamaRunner {
    cwd: PathBuf,
    timeout: Duration,
}

impl OllamaRunner {
    /// Create a runner working under `cwd`.
    #[must_use]
    pub fn new(cwd: impl AsRef<Path>, timeout_ms: u64) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

#[async_trait]
impl ModelRunner for OllamaRunner {
    async fn invoke(&self, model: &str, prompt: &str) -> Result<String, ModelFailure> {
        if which::which("ollama").is_err() {
            debug!("ollama binary not on PATH");
            return Err(ModelFailure::MissingModel);
        }

        let command = format!("ollama run {model}");
        let trace = run_command_with_stdin(&command, &self.cwd, prompt, Some(self.timeout))
            .await
            .map_err(|_| ModelFailure::CommandFailed { exit_code: None })?;

        if trace.timed_out {
            return Err(ModelFailure::Timeout);
        }
        if !trace.success() {
            // `ollama run` reports an unpulled model on stderr.
            if trace.stderr.contains("not found") {
                return Err(ModelFailure::MissingModel);
            }
            return Err(ModelFailure::CommandFailed {
                exit_code: trace.exit_code,
            });
        }

        Ok(trace.stdout)
    }
}

/// Canned-output runner used by the env-var mock hooks and tests.
pub struct MockRunner {
    output: String,
}

impl MockRunner {
    #[must_use]
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

#[async_trait]
impl ModelRunner for MockRunner {
    async fn invoke(&self, _model: &str, _prompt: &str) -> Result<String, ModelFailure> {
        Ok(self.output.clone())
    }
}

// ============================================================================
// Failure context
// ============================================================================

/// A file snippet included in the prompt.
#[derive(Debug, Clone, Serialize)]
pub struct FileSnippet {
    pub file: String,
    pub content: String,
}

/// One finding, reduced to what the model needs.
#[derive(Debug, Clone, Serialize)]
pub struct FindingDigest {
    pub id: String,
    pub gate: String,
    pub summary: String,
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    pub raw_context: String,
}

/// Everything an adapter invocation knows about the failure.
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub snippets: Vec<FileSnippet>,
    pub findings: Vec<FindingDigest>,
    /// First [`MAX_ALLOWED_FILES`] of the merged list; the edit scope.
    pub allowed_files: Vec<String>,
    /// The full merged changed ∪ finding file list, for relevance scoring.
    pub merged_files: Vec<String>,
}

impl FailureContext {
    /// Gather context from the current failures report and working tree.
    ///
    /// The merged file list is `changed_files` followed by every finding's
    /// files, insertion-ordered and deduplicated; the first three readable
    /// entries become snippets and the first twelve become the
    /// allowed-files set.
    #[must_use]
    pub fn gather(report: &FailuresReport, cwd: &Path) -> Self {
        let merged = merged_file_list(report);

        let snippets = merged
            .iter()
            .filter_map(|file| {
                let content = std::fs::read_to_string(cwd.join(file)).ok()?;
                let head: Vec<&str> = content.lines().take(SNIPPET_LINES).collect();
                Some(FileSnippet {
                    file: file.clone(),
                    content: head.join("\n"),
                })
            })
            .take(MAX_SNIPPET_FILES)
            .collect();

        let findings = report
            .findings
            .iter()
            .map(|finding| {
                let raw = finding
                    .raw
                    .stderr_excerpt
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .or(finding.raw.stdout_excerpt.as_deref())
                    .unwrap_or_default();
                FindingDigest {
                    id: finding.id.clone(),
                    gate: finding.gate.name().to_string(),
                    summary: finding.summary.clone(),
                    files: finding.files.clone(),
                    metric: finding.metric.clone(),
                    route: finding.route.clone(),
                    raw_context: truncate_chars(raw, MAX_RAW_CONTEXT_CHARS),
                }
            })
            .collect();

        let allowed_files = merged.iter().take(MAX_ALLOWED_FILES).cloned().collect();

        Self {
            snippets,
            findings,
            allowed_files,
            merged_files: merged,
        }
    }
}

/// `changed_files` followed by finding files, insertion-ordered dedup.
#[must_use]
pub fn merged_file_list(report: &FailuresReport) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();
    let finding_files = report.findings.iter().flat_map(|f| f.files.iter());
    for file in report.changed_files.iter().chain(finding_files) {
        if seen.insert(file.clone()) {
            merged.push(file.clone());
        }
    }
    merged
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

// ============================================================================
// Liberal JSON parsing
// ============================================================================

/// Parse model output that is supposed to be JSON but often is not quite.
///
/// First attempt: the whole trimmed text. On failure: the substring
/// between the first `{` and the last `}`, which strips prose preambles
/// and trailing commentary.
#[must_use]
pub fn parse_json_liberal(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{
        Finding, FindingRaw, GateKind, GateStatus, GateSummary, RunMode, RunStatus, REPORT_VERSION,
    };

    fn report_with(changed: &[&str], findings: Vec<Finding>) -> FailuresReport {
        FailuresReport {
            version: REPORT_VERSION,
            run_id: "run-test".into(),
            mode: RunMode::Canary,
            status: if findings.is_empty() {
                RunStatus::Pass
            } else {
                RunStatus::Fail
            },
            timestamp: chrono::Utc::now(),
            repo: None,
            branch: None,
            changed_files: changed.iter().map(|s| s.to_string()).collect(),
            gates: vec![GateSummary {
                name: GateKind::Lint,
                status: GateStatus::Fail,
                duration_ms: 5,
            }],
            findings,
            inferred_hints: Vec::new(),
        }
    }

    #[test]
    fn test_merged_file_list_order_and_dedup() {
        let mut finding = Finding::new("lint_exit_1", GateKind::Lint, "lint failed");
        finding.files = vec!["src/b.ts".into(), "src/a.ts".into()];
        let report = report_with(&["src/a.ts", "src/c.ts"], vec![finding]);

        let merged = merged_file_list(&report);
        assert_eq!(merged, vec!["src/a.ts", "src/c.ts", "src/b.ts"]);
    }

    #[test]
    fn test_gather_snippets_and_allowed_files() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("src")).unwrap();
        let long: String = (0..80).map(|i| format!("line{i}\n")).collect();
        std::fs::write(temp.path().join("src/a.ts"), &long).unwrap();

        let report = report_with(
            &["src/a.ts", "src/missing.ts"],
            vec![Finding::new("lint_exit_1", GateKind::Lint, "fail")],
        );
        let context = FailureContext::gather(&report, temp.path());

        assert_eq!(context.snippets.len(), 1);
        assert_eq!(context.snippets[0].file, "src/a.ts");
        assert_eq!(context.snippets[0].content.lines().count(), SNIPPET_LINES);
        // Missing files stay in allowed_files; only snippets need to exist.
        assert_eq!(context.allowed_files, vec!["src/a.ts", "src/missing.ts"]);
    }

    #[test]
    fn test_gather_caps_allowed_files() {
        let files: Vec<String> = (0..20).map(|i| format!("src/f{i}.ts")).collect();
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        let report = report_with(&refs, Vec::new());
        let temp = tempfile::TempDir::new().unwrap();

        let context = FailureContext::gather(&report, temp.path());
        assert_eq!(context.allowed_files.len(), MAX_ALLOWED_FILES);
    }

    #[test]
    fn test_raw_context_prefers_stderr_and_truncates() {
        let mut finding = Finding::new("typecheck_exit_2", GateKind::Typecheck, "tsc failed");
        finding.raw = FindingRaw {
            stdout_excerpt: Some("stdout stuff".into()),
            stderr_excerpt: Some("e".repeat(1000)),
            threshold_source: None,
        };
        let report = report_with(&[], vec![finding]);
        let temp = tempfile::TempDir::new().unwrap();

        let context = FailureContext::gather(&report, temp.path());
        assert_eq!(context.findings[0].raw_context.len(), MAX_RAW_CONTEXT_CHARS);
        assert!(context.findings[0].raw_context.starts_with('e'));
    }

    #[test]
    fn test_parse_json_liberal_clean() {
        let value = parse_json_liberal(r#"{"hints": []}"#).unwrap();
        assert!(value.get("hints").is_some());
    }

    #[test]
    fn test_parse_json_liberal_with_prose() {
        let text = "Sure! Here is the JSON you asked for:\n{\"summary\": \"fix\", \"edits\": []}\nHope that helps.";
        let value = parse_json_liberal(text).unwrap();
        assert_eq!(value["summary"], "fix");
    }

    #[test]
    fn test_parse_json_liberal_garbage() {
        assert!(parse_json_liberal("no braces here").is_none());
        assert!(parse_json_liberal("{ not json }").is_none());
        assert!(parse_json_liberal("").is_none());
    }

    #[test]
    fn test_model_failure_reasons() {
        assert_eq!(ModelFailure::MissingModel.reason(), "missing_model");
        assert_eq!(ModelFailure::Timeout.reason(), "model_command_timeout");
        assert_eq!(
            ModelFailure::CommandFailed { exit_code: Some(1) }.reason(),
            "model_command_failed"
        );
    }

    #[tokio::test]
    async fn test_mock_runner_returns_verbatim() {
        let runner = MockRunner::new("{\"hints\":[]}");
        let output = runner.invoke("any-model", "prompt").await.unwrap();
        assert_eq!(output, "{\"hints\":[]}");
    }
}
