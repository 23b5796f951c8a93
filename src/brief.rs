//! Agent brief generation.
//!
//! The brief condenses the current failures report into two artifacts: a
//! machine-readable `agent-brief.json` (schema-validated before write) and
//! a human-readable `agent-brief.md` with per-gate guidance. The repair
//! loop refreshes both after every rerun.

use crate::error::{QuickGateError, Result as QgResult};
use crate::report::{
    ArtifactPaths, FailuresReport, GateKind, GateStatus, RunMode, RunStatus, REPORT_VERSION,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Findings carried into the brief, most useful first.
pub const MAX_BRIEF_FINDINGS: usize = 10;

// ============================================================================
// Brief JSON
// ============================================================================

/// One finding, reduced for the brief.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefFinding {
    pub id: String,
    pub gate: GateKind,
    pub summary: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
}

/// Per-gate status line for the brief.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefGate {
    pub name: GateKind,
    pub status: GateStatus,
    pub duration_ms: u64,
}

/// The machine-readable agent brief.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBrief {
    pub version: u32,
    pub run_id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub generated_at: DateTime<Utc>,
    pub finding_count: usize,
    pub gates: Vec<BriefGate>,
    pub top_findings: Vec<BriefFinding>,
    pub next_actions: Vec<String>,
}

impl AgentBrief {
    /// Build a brief from the current failures report.
    #[must_use]
    pub fn from_report(report: &FailuresReport) -> Self {
        let top_findings = report
            .findings
            .iter()
            .take(MAX_BRIEF_FINDINGS)
            .map(|finding| BriefFinding {
                id: finding.id.clone(),
                gate: finding.gate,
                summary: finding.summary.clone(),
                files: finding.files.clone(),
                route: finding.route.clone(),
                metric: finding.metric.clone(),
            })
            .collect();

        Self {
            version: REPORT_VERSION,
            run_id: report.run_id.clone(),
            mode: report.mode,
            status: report.status,
            generated_at: Utc::now(),
            finding_count: report.findings.len(),
            gates: report
                .gates
                .iter()
                .map(|gate| BriefGate {
                    name: gate.name,
                    status: gate.status,
                    duration_ms: gate.duration_ms,
                })
                .collect(),
            top_findings,
            next_actions: next_actions(report),
        }
    }

    /// Validate the brief against its schema.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.version != REPORT_VERSION {
            problems.push(format!("version must be {REPORT_VERSION}, got {}", self.version));
        }
        if self.run_id.is_empty() {
            problems.push("run_id must be non-empty".to_string());
        }
        let pass = matches!(self.status, RunStatus::Pass);
        if pass != (self.finding_count == 0) {
            problems.push(format!(
                "status {} inconsistent with finding_count {}",
                if pass { "pass" } else { "fail" },
                self.finding_count
            ));
        }
        if self.top_findings.len() > self.finding_count {
            problems.push("top_findings longer than finding_count".to_string());
        }
        problems
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Write both brief artifacts for the given report.
///
/// # Errors
///
/// Fails when the JSON brief violates its schema, before any write.
pub fn write_brief(report: &FailuresReport, paths: &ArtifactPaths) -> QgResult<()> {
    let brief = AgentBrief::from_report(report);

    let problems = brief.validate();
    if !problems.is_empty() {
        return Err(QuickGateError::validation("agent-brief.json", &problems));
    }

    std::fs::create_dir_all(&paths.root)?;
    std::fs::write(
        paths.agent_brief_json(),
        serde_json::to_string_pretty(&brief)?,
    )?;
    std::fs::write(paths.agent_brief_md(), render_markdown(&brief, report))?;
    Ok(())
}

/// Render the human-readable brief.
#[must_use]
pub fn render_markdown(brief: &AgentBrief, report: &FailuresReport) -> String {
    let mut md = String::new();

    md.push_str(&format!(
        "# Quality gate brief - {}\n\n",
        match brief.status {
            RunStatus::Pass => "PASS",
            RunStatus::Fail => "FAIL",
        }
    ));
    md.push_str(&format!(
        "Run `{}` in {} mode, {} finding(s).\n\n",
        brief.run_id, brief.mode, brief.finding_count
    ));

    md.push_str("## Gates\n\n| Gate | Status | Duration |\n|---|---|---|\n");
    for gate in &brief.gates {
        let status = match gate.status {
            GateStatus::Pass => "pass",
            GateStatus::Fail => "fail",
            GateStatus::Skipped => "skipped",
        };
        md.push_str(&format!(
            "| {} | {} | {} ms |\n",
            gate.name, status, gate.duration_ms
        ));
    }

    if !brief.top_findings.is_empty() {
        md.push_str("\n## Findings\n\n");
        for finding in &brief.top_findings {
            md.push_str(&format!("- **{}** [{}] {}\n", finding.id, finding.gate, finding.summary));
            if !finding.files.is_empty() {
                md.push_str(&format!("  - files: {}\n", finding.files.join(", ")));
            }
            if let (Some(route), Some(metric)) = (&finding.route, &finding.metric) {
                md.push_str(&format!("  - route: {route}, metric: {metric}\n"));
            }
        }
        if brief.finding_count > brief.top_findings.len() {
            md.push_str(&format!(
                "\n... and {} more finding(s) in failures.json.\n",
                brief.finding_count - brief.top_findings.len()
            ));
        }
    }

    if !report.inferred_hints.is_empty() {
        md.push_str("\n## Hints\n\n");
        for hint in &report.inferred_hints {
            md.push_str(&format!(
                "- ({}) {}: {}\n",
                hint.confidence, hint.finding_id, hint.hint
            ));
        }
    }

    if !brief.next_actions.is_empty() {
        md.push_str("\n## Next actions\n\n");
        for action in &brief.next_actions {
            md.push_str(&format!("1. {action}\n"));
        }
    }

    md
}

/// Per-gate guidance, one entry per failing gate.
fn next_actions(report: &FailuresReport) -> Vec<String> {
    let mut actions = Vec::new();
    let failing: Vec<GateKind> = report
        .gates
        .iter()
        .filter(|g| g.status == GateStatus::Fail)
        .map(|g| g.name)
        .collect();

    for gate in failing {
        let guidance = match gate {
            GateKind::Lint => {
                "Run the lint command locally; most problems are auto-fixable with --fix."
            }
            GateKind::Typecheck => {
                "Run the type checker locally and fix reported type errors file by file."
            }
            GateKind::Build => {
                "Reproduce the production build locally; check the first error in the excerpt."
            }
            GateKind::Lighthouse => {
                "Inspect the failing routes and metrics; compare against the configured thresholds."
            }
        };
        actions.push(format!("{gate}: {guidance}"));
    }

    if actions.is_empty() && report.status == RunStatus::Pass {
        actions.push("All gates passed; safe to proceed.".to_string());
    }

    actions
}

// ============================================================================
// Tests
// ============================================================================
