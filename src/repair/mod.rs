//! The bounded repair loop.
//!
//! Given a failing run, the loop repeatedly snapshots the workspace,
//! applies a tiered sequence of fixers (deterministic pre-fix, hint model,
//! patch model), reruns the gates, and compares finding counts. It
//! terminates with a repair report on a passing rerun or with a typed
//! escalation when its budgets run out: attempts, patch lines, consecutive
//! non-improving attempts, and wall clock.
//!
//! Every invocation ends with exactly one terminal artifact -
//! `repair-report.json` or `escalation.json` - never both.

pub mod diff;

use crate::brief::write_brief;
use crate::config::{GateConfig, ModelPolicy, RepairPolicy};
use crate::error::{QuickGateError, Result as QgResult};
use crate::gates::execute_run;
use crate::model::hint::HintAdapter;
use crate::model::patch::PatchAdapter;
use crate::model::{merged_file_list, FailureContext, MockRunner, ModelRunner, OllamaRunner};
use crate::prefix::run_prefix;
use crate::report::{ArtifactPaths, FailuresReport, GateKind, InferredHint, RunStatus};
use crate::snapshot::SnapshotManager;
use self::diff::{delta_lines, sample_diff};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Artifact schema version.
pub const REPAIR_VERSION: u32 = 1;

// ============================================================================
// Records
// ============================================================================

/// One action taken (or skipped) inside an attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Strategy tag, e.g. `deterministic_prefix` or `model_patch`.
    pub strategy: String,
    /// Rule name for pre-fix actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// Exact command a fixer ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Exit code of that command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Why the action was skipped or rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Extra detail (offending files, before/after counts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Relevance score of an applied edit plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Predicted line cost of an applied edit plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_lines: Option<usize>,
    /// Files an applied edit plan touched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub touched_files: Vec<String>,
    /// Hints accepted from the hint model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_count: Option<usize>,
}

impl ActionRecord {
    /// Create a record with just a strategy tag.
    #[must_use]
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            rule: None,
            command: None,
            exit_code: None,
            reason: None,
            detail: None,
            score: None,
            patch_lines: None,
            touched_files: Vec::new(),
            hint_count: None,
        }
    }

    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>, exit_code: Option<i32>) -> Self {
        self.command = Some(command.into());
        self.exit_code = exit_code;
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// One loop iteration, appended in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt index.
    pub attempt: u32,
    /// Actual patch-line delta the attempt introduced.
    pub patch_lines: u64,
    pub before_findings: usize,
    pub after_findings: usize,
    pub improved: bool,
    pub worsened: bool,
    /// Rerun status: `pass` or `fail`.
    pub status: String,
    /// Ordered actions taken this attempt.
    pub actions: Vec<ActionRecord>,
}

// ============================================================================
// Terminal artifacts
// ============================================================================

/// Terminal escalation reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    NoImprovement,
    PatchBudgetExceeded,
    UnknownBlocker,
    /// Reserved; accepted in the schema, never emitted today.
    ArchitecturalChangeRequired,
    /// Reserved; accepted in the schema, never emitted today.
    FlakyEvaluator,
}

/// Successful termination: the rerun passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairReport {
    pub version: u32,
    /// Always `"pass"`.
    pub status: String,
    pub run_id: String,
    pub attempts: Vec<AttemptRecord>,
}

/// Unsuccessful termination with machine-readable evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub version: u32,
    /// Always `"escalated"`.
    pub status: String,
    pub reason_code: ReasonCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<serde_json::Value>,
    pub attempts: Vec<AttemptRecord>,
}

/// How a repair invocation ended.
#[derive(Debug)]
pub enum RepairOutcome {
    Pass(RepairReport),
    Escalated(Escalation),
}

impl RepairOutcome {
    /// CLI exit code for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Pass(_) => 0,
            Self::Escalated(_) => 2,
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// Per-invocation knobs from the CLI.
#[derive(Debug, Clone, Default)]
pub struct RepairOptions {
    /// Override for the configured `maxAttempts`.
    pub max_attempts: Option<u32>,
    /// Skip model adapters entirely.
    pub deterministic_only: bool,
}

// ============================================================================
// The loop
// ============================================================================

/// Drives repair attempts for one project until pass or escalation.
pub struct RepairLoop {
    cwd: PathBuf,
    paths: ArtifactPaths,
    config: GateConfig,
    policy: RepairPolicy,
    model_policy: ModelPolicy,
    options: RepairOptions,
}

impl RepairLoop {
    /// Create a loop for the project at `cwd`.
    ///
    /// The model policy is read from the environment here, once, and never
    /// re-read mid-loop.
    ///
    /// # Errors
    ///
    /// Fails when the project config is unreadable.
    pub fn new(cwd: impl AsRef<Path>, options: RepairOptions) -> QgResult<Self> {
        let cwd = cwd.as_ref().to_path_buf();
        let config = GateConfig::load(&cwd).map_err(QuickGateError::Other)?;
        let mut policy = config.policy;
        if let Some(max_attempts) = options.max_attempts {
            policy.max_attempts = max_attempts;
        }

        Ok(Self {
            paths: ArtifactPaths::new(&cwd),
            cwd,
            config,
            policy,
            model_policy: ModelPolicy::from_env(),
            options,
        })
    }

    /// Run the loop against the failures report at `input`.
    ///
    /// # Errors
    ///
    /// Fails on unreadable input or on internal IO failures; gate failures
    /// and model failures are handled inside the loop.
    pub async fn run(&self, input: &Path) -> QgResult<RepairOutcome> {
        let mut report = FailuresReport::read(input)?;
        let mode = report.mode;
        let changed_files = report.changed_files.clone();

        // A fresh invocation owns the terminal artifacts.
        let _ = std::fs::remove_file(self.paths.repair_report());
        let _ = std::fs::remove_file(self.paths.escalation());

        if report.status == RunStatus::Pass {
            info!("input report already passing, nothing to repair");
            return self.finish_pass(&report.run_id, Vec::new());
        }

        let snapshots = SnapshotManager::new(&self.cwd);
        let started = Instant::now();
        let mut previous_count = report.findings.len();
        let mut no_improvement: u32 = 0;
        let mut attempts: Vec<AttemptRecord> = Vec::new();

        info!(
            findings = previous_count,
            max_attempts = self.policy.max_attempts,
            deterministic_only = self.options.deterministic_only,
            "repair loop starting"
        );

        for attempt in 1..=self.policy.max_attempts {
            // Step 1: wall-clock cap.
            let elapsed_ms = started.elapsed().as_millis() as u64;
            if elapsed_ms > self.policy.time_cap_ms {
                warn!(elapsed_ms, cap_ms = self.policy.time_cap_ms, "time cap hit");
                self.cleanup_backups(attempt);
                return self.finish_escalated(
                    ReasonCode::UnknownBlocker,
                    format!(
                        "time cap of {} ms exceeded after {} ms",
                        self.policy.time_cap_ms, elapsed_ms
                    ),
                    Some(serde_json::json!({
                        "elapsed_ms": elapsed_ms,
                        "time_cap_ms": self.policy.time_cap_ms,
                    })),
                    attempts,
                );
            }

            // Step 2: snapshot; a new backup supersedes the previous one.
            let backup = self.paths.backup_attempt(attempt);
            snapshots
                .capture(&backup)
                .map_err(|e| QuickGateError::snapshot(e.to_string()))?;
            if attempt > 1 {
                let _ = std::fs::remove_dir_all(self.paths.backup_attempt(attempt - 1));
            }

            // Step 3: pre-action diff sample.
            let before_diff = sample_diff(&self.cwd);

            // Step 4: fixed action sequence.
            let mut actions: Vec<ActionRecord> = Vec::new();
            let mut short_circuit_pass = false;
            let mut attempt_hints: Vec<InferredHint> = Vec::new();

            // 4a: deterministic pre-fix, with an immediate rerun if it acted.
            let failing_gates: BTreeSet<GateKind> =
                report.findings.iter().map(|f| f.gate).collect();
            let candidates = merged_file_list(&report);
            let prefix = run_prefix(&self.cwd, &failing_gates, &candidates)
                .await
                .map_err(QuickGateError::Other)?;
            actions.extend(prefix.actions);

            if prefix.acted {
                let (refreshed, _) =
                    execute_run(&self.cwd, mode, &self.config, &changed_files, None).await?;
                refreshed.write(&self.paths.failures())?;
                write_brief(&refreshed, &self.paths)?;

                actions.push(
                    ActionRecord::new("deterministic_prefix_rerun").with_detail(format!(
                        "findings {} -> {}",
                        report.findings.len(),
                        refreshed.findings.len()
                    )),
                );

                if refreshed.findings.is_empty() {
                    short_circuit_pass = true;
                }
                report = refreshed;
            }

            if !short_circuit_pass {
                if self.options.deterministic_only {
                    // 4b: model adapters disabled by flag.
                    actions.push(ActionRecord::new("deterministic_only_mode"));
                } else if !report.findings.iter().any(|f| f.gate.is_model_patchable()) {
                    // 4c: nothing a line edit could fix.
                    actions.push(
                        ActionRecord::new("skip_model_patch")
                            .with_reason("no_patchable_gate_in_findings"),
                    );
                } else {
                    let context = FailureContext::gather(&report, &self.cwd);

                    // 4d: hints are advisory and never fail the attempt.
                    let hint_runner = self.hint_runner();
                    let hint_adapter =
                        HintAdapter::new(hint_runner.as_ref(), &self.model_policy.hint_model);
                    let hint_result = hint_adapter.run(&context).await;
                    let mut hint_action = ActionRecord::new("model_hint");
                    hint_action.hint_count = Some(hint_result.hints.len());
                    if let Some(reason) = &hint_result.reason {
                        hint_action = hint_action.with_reason(reason.clone());
                    }
                    actions.push(hint_action);
                    attempt_hints = hint_result
                        .hints
                        .iter()
                        .map(|h| InferredHint {
                            finding_id: h.finding_id.clone(),
                            hint: h.hint.clone(),
                            confidence: h.confidence.clone(),
                        })
                        .collect();

                    // 4e: patch; reported either way, terminal for neither.
                    let patch_runner = self.patch_runner();
                    let patch_adapter = PatchAdapter::new(
                        patch_runner.as_ref(),
                        &self.model_policy,
                        &self.cwd,
                        self.policy.max_patch_lines as usize,
                    );
                    let patch_result = patch_adapter.run(&context).await;
                    let mut patch_action = ActionRecord::new("model_patch");
                    patch_action.score = patch_result.score;
                    patch_action.patch_lines = patch_result.patch_lines;
                    patch_action.touched_files = patch_result.touched_files.clone();
                    if let Some(reason) = &patch_result.reason {
                        patch_action = patch_action.with_reason(reason.clone());
                    }
                    if let Some(detail) = &patch_result.detail {
                        patch_action = patch_action.with_detail(detail.clone());
                    }
                    actions.push(patch_action);
                }
            }

            // Step 5: post-action diff and the actual-size budget.
            let after_diff = sample_diff(&self.cwd);
            let actual_delta = delta_lines(&before_diff, &after_diff);
            if actual_delta > u64::from(self.policy.max_patch_lines) {
                warn!(
                    actual_delta,
                    budget = self.policy.max_patch_lines,
                    "patch-line budget exceeded, rolling back"
                );
                snapshots
                    .restore(&backup)
                    .map_err(|e| QuickGateError::snapshot(e.to_string()))?;
                attempts.push(AttemptRecord {
                    attempt,
                    patch_lines: actual_delta,
                    before_findings: previous_count,
                    after_findings: previous_count,
                    improved: false,
                    worsened: false,
                    status: "fail".to_string(),
                    actions,
                });
                self.cleanup_backups(attempt);
                return self.finish_escalated(
                    ReasonCode::PatchBudgetExceeded,
                    format!(
                        "attempt {attempt} changed {actual_delta} lines, budget is {}",
                        self.policy.max_patch_lines
                    ),
                    Some(serde_json::json!({
                        "patch_lines": actual_delta,
                        "max_patch_lines": self.policy.max_patch_lines,
                    })),
                    attempts,
                );
            }

            // Step 6: short-circuit pass from the pre-fix rerun.
            if short_circuit_pass {
                attempts.push(AttemptRecord {
                    attempt,
                    patch_lines: actual_delta,
                    before_findings: previous_count,
                    after_findings: 0,
                    improved: true,
                    worsened: false,
                    status: "pass".to_string(),
                    actions,
                });
                self.cleanup_backups(attempt);
                return self.finish_pass(&report.run_id, attempts);
            }

            // Step 7: rerun the gates; this replaces failures.json.
            let (mut rerun, _) =
                execute_run(&self.cwd, mode, &self.config, &changed_files, None).await?;
            rerun.inferred_hints = attempt_hints;
            rerun.write(&self.paths.failures())?;
            write_brief(&rerun, &self.paths)?;

            // Step 8: compare.
            let current_count = rerun.findings.len();
            let improved = current_count < previous_count;
            let worsened = current_count > previous_count;
            let rerun_passed = rerun.status == RunStatus::Pass;
            debug!(
                attempt,
                before = previous_count,
                after = current_count,
                improved,
                worsened,
                "attempt compared"
            );

            attempts.push(AttemptRecord {
                attempt,
                patch_lines: actual_delta,
                before_findings: previous_count,
                after_findings: current_count,
                improved,
                worsened,
                status: if rerun_passed { "pass" } else { "fail" }.to_string(),
                actions,
            });

            // Step 9: passing rerun terminates.
            if rerun_passed {
                self.cleanup_backups(attempt);
                return self.finish_pass(&rerun.run_id, attempts);
            }

            // Step 10: regression rolls back; the attempt is not retried.
            if worsened {
                info!(attempt, "findings increased, restoring snapshot");
                snapshots
                    .restore(&backup)
                    .map_err(|e| QuickGateError::snapshot(e.to_string()))?;
            }

            // Step 11: bookkeeping.
            if improved {
                no_improvement = 0;
            } else {
                no_improvement += 1;
            }
            previous_count = current_count;
            report = rerun;

            // Step 12: stagnation trip.
            if no_improvement >= self.policy.abort_on_no_improvement {
                self.cleanup_backups(attempt);
                return self.finish_escalated(
                    ReasonCode::NoImprovement,
                    format!(
                        "{no_improvement} consecutive attempts without a finding-count decrease"
                    ),
                    None,
                    attempts,
                );
            }
        }

        // Step 13: attempts exhausted.
        self.cleanup_backups(self.policy.max_attempts);
        self.finish_escalated(
            ReasonCode::UnknownBlocker,
            format!("attempts exhausted ({} allowed)", self.policy.max_attempts),
            None,
            attempts,
        )
    }

    // =========================================================================
    // Termination helpers
    // =========================================================================

    fn finish_pass(&self, run_id: &str, attempts: Vec<AttemptRecord>) -> QgResult<RepairOutcome> {
        let report = RepairReport {
            version: REPAIR_VERSION,
            status: "pass".to_string(),
            run_id: run_id.to_string(),
            attempts,
        };
        write_json(&self.paths.repair_report(), &report)?;
        info!("repair loop finished: pass");
        Ok(RepairOutcome::Pass(report))
    }

    fn finish_escalated(
        &self,
        reason_code: ReasonCode,
        message: String,
        evidence: Option<serde_json::Value>,
        attempts: Vec<AttemptRecord>,
    ) -> QgResult<RepairOutcome> {
        let escalation = Escalation {
            version: REPAIR_VERSION,
            status: "escalated".to_string(),
            reason_code,
            message,
            evidence,
            attempts,
        };
        write_json(&self.paths.escalation(), &escalation)?;
        info!(?reason_code, "repair loop finished: escalated");
        Ok(RepairOutcome::Escalated(escalation))
    }

    fn cleanup_backups(&self, upto: u32) {
        for attempt in 1..=upto {
            let _ = std::fs::remove_dir_all(self.paths.backup_attempt(attempt));
        }
    }

    // =========================================================================
    // Runner selection
    // =========================================================================

    fn hint_runner(&self) -> Box<dyn ModelRunner> {
        match &self.model_policy.mock_hint_output {
            Some(output) => Box::new(MockRunner::new(output.clone())),
            None => Box::new(OllamaRunner::new(&self.cwd, self.model_policy.model_timeout_ms)),
        }
    }

    fn patch_runner(&self) -> Box<dyn ModelRunner> {
        match &self.model_policy.mock_patch_output {
            Some(output) => Box::new(MockRunner::new(output.clone())),
            None => Box::new(OllamaRunner::new(&self.cwd, self.model_policy.model_timeout_ms)),
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> QgResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
