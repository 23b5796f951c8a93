//! Gate planning, command resolution, and execution.
//!
//! The gate runner turns a mode and a changed-file list into a uniform
//! result: one [`GateSummary`] per planned gate, zero or more [`Finding`]s,
//! and the raw [`CommandTrace`]s. It never errors on a failing gate; the
//! only fatal condition is a missing project manifest.
//!
//! # Command resolution
//!
//! Per gate, first match wins:
//!
//! 1. `commands.<gate>` in `quick-gate.config.json`
//! 2. a `package.json` script named after the gate (`npm run <gate>`)
//! 3. a well-known fallback: `npx tsc --noEmit` for typecheck,
//!    `npx lhci autorun` for lighthouse
//!
//! A gate with no resolvable command fails with a synthetic
//! `<gate>_missing_command` finding instead of spawning anything.

pub mod lighthouse;

use crate::changed::RepoInfo;
use crate::command::{run_command, CommandTrace};
use crate::config::GateConfig;
use crate::error::{QuickGateError, Result as QgResult};
use crate::report::{
    new_run_id, FailuresReport, Finding, GateKind, GateStatus, GateSummary, RunMode, RunStatus,
    REPORT_VERSION,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ============================================================================
// Project manifest
// ============================================================================

/// The slice of `package.json` the runner consumes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectManifest {
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
}

impl ProjectManifest {
    /// Load `package.json` from the project root.
    ///
    /// # Errors
    ///
    /// Returns [`QuickGateError::MissingManifest`] when the file is absent,
    /// which is fatal for a run.
    pub fn load(cwd: &Path) -> QgResult<Self> {
        let path = cwd.join("package.json");
        if !path.exists() {
            return Err(QuickGateError::MissingManifest {
                cwd: cwd.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(&path)?;
        let manifest: Self = serde_json::from_str(&text).map_err(|e| {
            QuickGateError::config_with_path(format!("package.json did not parse: {e}"), path)
        })?;
        Ok(manifest)
    }

    /// Whether a script with the given name is declared.
    #[must_use]
    pub fn has_script(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }
}

// ============================================================================
// Command resolution
// ============================================================================

/// Resolve the concrete command for a gate, or `None` when nothing applies.
#[must_use]
pub fn resolve_gate_command(
    gate: GateKind,
    config: &GateConfig,
    manifest: &ProjectManifest,
) -> Option<String> {
    if let Some(command) = config.command_override(gate.name()) {
        return Some(command.to_string());
    }

    if manifest.has_script(gate.name()) {
        return Some(format!("npm run {}", gate.name()));
    }

    match gate {
        GateKind::Typecheck => Some("npx tsc --noEmit".to_string()),
        GateKind::Lighthouse => Some("npx lhci autorun".to_string()),
        GateKind::Lint | GateKind::Build => None,
    }
}

// ============================================================================
// Gate runner
// ============================================================================

/// Result of one full gate run.
#[derive(Debug)]
pub struct GateRun {
    pub gates: Vec<GateSummary>,
    pub findings: Vec<Finding>,
    pub traces: Vec<CommandTrace>,
}

/// Executes the planned gates for one mode against one working tree.
pub struct GateRunner {
    cwd: PathBuf,
    mode: RunMode,
    config: GateConfig,
}

impl GateRunner {
    /// Create a runner for the project at `cwd`.
    #[must_use]
    pub fn new(cwd: impl AsRef<Path>, mode: RunMode, config: GateConfig) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            mode,
            config,
        }
    }

    /// Run every planned gate in order.
    ///
    /// # Errors
    ///
    /// Fails only when `package.json` is missing; gate failures become
    /// findings.
    pub async fn run(&self) -> QgResult<GateRun> {
        let manifest = ProjectManifest::load(&self.cwd)?;

        let mut gates = Vec::new();
        let mut findings = Vec::new();
        let mut traces = Vec::new();

        for gate in GateKind::ALL {
            if !self.mode.includes(gate) {
                debug!(%gate, mode = %self.mode, "gate skipped by mode");
                gates.push(GateSummary {
                    name: gate,
                    status: GateStatus::Skipped,
                    duration_ms: 0,
                });
                continue;
            }

            let Some(command) = resolve_gate_command(gate, &self.config, &manifest) else {
                info!(%gate, "no command resolved");
                let mut finding = Finding::new(
                    format!("{gate}_missing_command"),
                    gate,
                    format!("No command could be resolved for the {gate} gate"),
                );
                if gate == GateKind::Lighthouse {
                    finding.raw.threshold_source = Some("unknown".to_string());
                }
                findings.push(finding);
                gates.push(GateSummary {
                    name: gate,
                    status: GateStatus::Fail,
                    duration_ms: 0,
                });
                continue;
            };

            let trace = run_command(&command, &self.cwd, None)
                .await
                .map_err(QuickGateError::Other)?;
            let passed = trace.success();
            let duration_ms = trace.duration_ms;

            if passed {
                debug!(%gate, duration_ms, "gate passed");
            } else {
                findings.extend(self.failure_findings(gate, &trace));
            }

            gates.push(GateSummary {
                name: gate,
                status: if passed { GateStatus::Pass } else { GateStatus::Fail },
                duration_ms,
            });
            traces.push(trace);
        }

        Ok(GateRun {
            gates,
            findings,
            traces,
        })
    }

    /// Findings for one failing gate invocation.
    ///
    /// Lighthouse gets its extractor first; the exit-code finding is only
    /// the fallback when the artifact produced nothing.
    fn failure_findings(&self, gate: GateKind, trace: &CommandTrace) -> Vec<Finding> {
        if gate == GateKind::Lighthouse {
            let extracted = lighthouse::extract_findings(&self.cwd, &self.config.lighthouse);
            if !extracted.is_empty() {
                debug!(count = extracted.len(), "lighthouse findings extracted");
                return extracted;
            }
        }

        let mut finding = exit_code_finding(gate, trace);
        if gate == GateKind::Lighthouse {
            finding.raw.threshold_source = Some("unknown".to_string());
        }
        vec![finding]
    }
}

/// The single exit-code finding for a failing gate command.
#[must_use]
pub fn exit_code_finding(gate: GateKind, trace: &CommandTrace) -> Finding {
    let (id, summary) = match trace.exit_code {
        Some(code) => (
            format!("{gate}_exit_{code}"),
            format!("{gate} command exited with code {code}"),
        ),
        None => (
            format!("{gate}_timeout"),
            format!("{gate} command timed out"),
        ),
    };
    Finding::new(id, gate, summary).with_excerpts(trace)
}

// ============================================================================
// Run orchestration
// ============================================================================

/// Execute the gates and build the canonical failures report.
///
/// This is the shared entry for the `run` subcommand and for every rerun
/// the repair loop performs.
///
/// # Errors
///
/// Fails when the manifest is missing or the report fails validation.
pub async fn execute_run(
    cwd: &Path,
    mode: RunMode,
    config: &GateConfig,
    changed_files: &[String],
    run_id: Option<String>,
) -> QgResult<(FailuresReport, GateRun)> {
    let runner = GateRunner::new(cwd, mode, config.clone());
    let run = runner.run().await?;
    let repo_info = RepoInfo::detect(cwd);

    let status = if run.findings.is_empty() {
        RunStatus::Pass
    } else {
        RunStatus::Fail
    };

    let report = FailuresReport {
        version: REPORT_VERSION,
        run_id: run_id.unwrap_or_else(new_run_id),
        mode,
        status,
        timestamp: chrono::Utc::now(),
        repo: repo_info.repo,
        branch: repo_info.branch,
        changed_files: changed_files.to_vec(),
        gates: run.gates.clone(),
        findings: run.findings.clone(),
        inferred_hints: Vec::new(),
    };

    Ok((report, run))
}

// ============================================================================
// Tests
// ============================================================================
