//! Finding model and persisted run artifacts.
//!
//! Everything the gates produce is normalized into [`Finding`] records and
//! collected into a [`FailuresReport`], the canonical current state that the
//! repair loop reads and every rerun replaces. Reports validate against
//! their schema before they are written; a malformed outbound artifact is a
//! bug, not something to persist.

use crate::command::CommandTrace;
use crate::error::{QuickGateError, Result as QgResult};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Schema version stamped into every artifact.
pub const REPORT_VERSION: u32 = 1;

/// Directory under the project root holding all quick-gate artifacts.
pub const ARTIFACT_DIR: &str = ".quick-gate";

// ============================================================================
// Core enums
// ============================================================================

/// The four deterministic quality gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    Lint,
    Typecheck,
    Build,
    Lighthouse,
}

impl GateKind {
    /// All gates in plan order.
    pub const ALL: [GateKind; 4] = [
        GateKind::Lint,
        GateKind::Typecheck,
        GateKind::Build,
        GateKind::Lighthouse,
    ];

    /// Lowercase name as used in config keys and finding ids.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lint => "lint",
            Self::Typecheck => "typecheck",
            Self::Build => "build",
            Self::Lighthouse => "lighthouse",
        }
    }

    /// Whether findings from this gate are candidates for a model patch.
    ///
    /// Build failures and Lighthouse regressions need either a human or a
    /// change the line-edit contract cannot express.
    #[must_use]
    pub fn is_model_patchable(&self) -> bool {
        matches!(self, Self::Lint | Self::Typecheck)
    }
}

impl std::fmt::Display for GateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Run mode: canary skips the production build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Canary,
    Full,
}

impl RunMode {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Canary => "canary",
            Self::Full => "full",
        }
    }

    /// Whether a gate runs in this mode.
    #[must_use]
    pub fn includes(&self, gate: GateKind) -> bool {
        match gate {
            GateKind::Build => matches!(self, Self::Full),
            _ => true,
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Finding severity. Everything the gates emit today is `High`;
/// `Critical` is schema-accepted for forward compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Critical,
}

/// Outcome of one planned gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Pass,
    Fail,
    Skipped,
}

// ============================================================================
// Finding
// ============================================================================

/// Trace excerpts and attribution carried inside a finding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingRaw {
    /// First lines of the failing command's stdout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_excerpt: Option<String>,
    /// First lines of the failing command's stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_excerpt: Option<String>,
    /// Where a Lighthouse threshold came from. Always present for
    /// lighthouse findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_source: Option<String>,
}

/// One gate failure, with enough context to drive a repair decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Stable identifier for this (gate, failure) pair.
    pub id: String,
    /// The gate that produced the finding.
    pub gate: GateKind,
    pub severity: Severity,
    /// One-line description.
    pub summary: String,
    /// Files implicated in the failure, relative to the project root.
    #[serde(default)]
    pub files: Vec<String>,
    /// Lighthouse route, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// Lighthouse metric, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    /// Observed value (numeric or raw).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<serde_json::Value>,
    /// Threshold the observed value was judged against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<serde_json::Value>,
    /// Always `"fail"`; pass states produce no finding.
    pub status: String,
    #[serde(default)]
    pub raw: FindingRaw,
}

impl Finding {
    /// Create a failing finding with the mandatory fields.
    pub fn new(id: impl Into<String>, gate: GateKind, summary: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            gate,
            severity: Severity::High,
            summary: summary.into(),
            files: Vec::new(),
            route: None,
            metric: None,
            actual: None,
            threshold: None,
            status: "fail".to_string(),
            raw: FindingRaw::default(),
        }
    }

    /// Attach implicated files.
    #[must_use]
    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    /// Attach stream excerpts from the failing command.
    #[must_use]
    pub fn with_excerpts(mut self, trace: &CommandTrace) -> Self {
        self.raw.stdout_excerpt = Some(trace.stdout_excerpt());
        self.raw.stderr_excerpt = Some(trace.stderr_excerpt());
        self
    }
}

// ============================================================================
// Gate summary
// ============================================================================

/// Status line for one planned gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSummary {
    pub name: GateKind,
    pub status: GateStatus,
    pub duration_ms: u64,
}

// ============================================================================
// Inferred hints
// ============================================================================

/// A model-suggested hint attached to a finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferredHint {
    pub finding_id: String,
    pub hint: String,
    pub confidence: String,
}

// ============================================================================
// Failures report
// ============================================================================

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pass,
    Fail,
}

/// The canonical result of one gate run. Replaced on every rerun.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailuresReport {
    pub version: u32,
    pub run_id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub changed_files: Vec<String>,
    pub gates: Vec<GateSummary>,
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub inferred_hints: Vec<InferredHint>,
}

impl FailuresReport {
    /// Validate the report against its schema.
    ///
    /// Returns the list of violations; empty means valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.version != REPORT_VERSION {
            problems.push(format!(
                "version must be {REPORT_VERSION}, got {}",
                self.version
            ));
        }
        if self.run_id.is_empty() {
            problems.push("run_id must be non-empty".to_string());
        }

        let pass = matches!(self.status, RunStatus::Pass);
        if pass != self.findings.is_empty() {
            problems.push(format!(
                "status {} inconsistent with {} findings",
                if pass { "pass" } else { "fail" },
                self.findings.len()
            ));
        }

        for finding in &self.findings {
            if finding.id.is_empty() {
                problems.push("finding with empty id".to_string());
            }
            if finding.status != "fail" {
                problems.push(format!("finding {} has status {}", finding.id, finding.status));
            }
            if finding.gate == GateKind::Lighthouse && finding.raw.threshold_source.is_none() {
                problems.push(format!(
                    "lighthouse finding {} missing threshold_source",
                    finding.id
                ));
            }
        }

        problems
    }

    /// Serialize, validate, and write the report to `path`.
    ///
    /// # Errors
    ///
    /// Fails on schema violations before any bytes hit disk, or on IO
    /// failure.
    pub fn write(&self, path: &Path) -> QgResult<()> {
        let problems = self.validate();
        if !problems.is_empty() {
            return Err(QuickGateError::validation("failures.json", &problems));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a previously written report.
    ///
    /// # Errors
    ///
    /// Fails when the file is missing or does not parse.
    pub fn read(path: &Path) -> QgResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| QuickGateError::ArtifactRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| QuickGateError::ArtifactRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

// ============================================================================
// Run metadata
// ============================================================================

/// Supplementary per-run facts, written next to the failures report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: u32,
    pub run_id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub changed_file_count: usize,
    pub finding_count: usize,
    /// Per-gate durations in milliseconds.
    pub gate_durations_ms: BTreeMap<String, u64>,
}

impl RunMetadata {
    /// Write the metadata artifact.
    ///
    /// # Errors
    ///
    /// Fails on IO or serialization failure.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

// ============================================================================
// Artifact paths
// ============================================================================

/// Resolved locations of every persisted artifact for one project.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub root: PathBuf,
}

impl ArtifactPaths {
    /// Artifact paths for the project at `cwd`.
    #[must_use]
    pub fn new(cwd: &Path) -> Self {
        Self {
            root: cwd.join(ARTIFACT_DIR),
        }
    }

    #[must_use]
    pub fn failures(&self) -> PathBuf {
        self.root.join("failures.json")
    }

    #[must_use]
    pub fn run_metadata(&self) -> PathBuf {
        self.root.join("run-metadata.json")
    }

    #[must_use]
    pub fn agent_brief_json(&self) -> PathBuf {
        self.root.join("agent-brief.json")
    }

    #[must_use]
    pub fn agent_brief_md(&self) -> PathBuf {
        self.root.join("agent-brief.md")
    }

    #[must_use]
    pub fn repair_report(&self) -> PathBuf {
        self.root.join("repair-report.json")
    }

    #[must_use]
    pub fn escalation(&self) -> PathBuf {
        self.root.join("escalation.json")
    }

    #[must_use]
    pub fn backup_attempt(&self, attempt: u32) -> PathBuf {
        self.root.join(format!("backup-attempt-{attempt}"))
    }
}

/// Generate a run identifier from the wall clock.
#[must_use]
pub fn new_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S%.3f"))
}

// ============================================================================
// Tests
// ============================================================================
