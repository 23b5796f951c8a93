//! Configuration loading for quick-gate.
//!
//! Two layers of configuration feed the orchestrator:
//!
//! - [`GateConfig`] - the optional `quick-gate.config.json` in the project
//!   root: per-gate command overrides, repair policy numbers, and Lighthouse
//!   thresholds. Unknown keys are ignored; known keys merge over defaults.
//! - [`ModelPolicy`] - model selection and mock hooks read from the
//!   environment once at the start of a repair invocation and threaded
//!   through the adapters as an immutable value.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Config file name looked up in the project root.
pub const CONFIG_FILE: &str = "quick-gate.config.json";

// ============================================================================
// Repair Policy
// ============================================================================

/// Budgets for the repair loop, merged from `policy` in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairPolicy {
    /// Maximum loop attempts.
    #[serde(default = "default_max_attempts", rename = "maxAttempts")]
    pub max_attempts: u32,
    /// Maximum patch lines per attempt (predicted and actual).
    #[serde(default = "default_max_patch_lines", rename = "maxPatchLines")]
    pub max_patch_lines: u32,
    /// Consecutive non-improving attempts before escalation.
    #[serde(default = "default_abort_on_no_improvement", rename = "abortOnNoImprovement")]
    pub abort_on_no_improvement: u32,
    /// Wall-clock cap for the whole loop, in milliseconds.
    #[serde(default = "default_time_cap_ms", rename = "timeCapMs")]
    pub time_cap_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_patch_lines() -> u32 {
    150
}

fn default_abort_on_no_improvement() -> u32 {
    2
}

fn default_time_cap_ms() -> u64 {
    20 * 60 * 1000
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_patch_lines: default_max_patch_lines(),
            abort_on_no_improvement: default_abort_on_no_improvement(),
            time_cap_ms: default_time_cap_ms(),
        }
    }
}

// ============================================================================
// Gate Config
// ============================================================================

/// Per-gate command overrides from `commands` in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typecheck: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighthouse: Option<String>,
}

/// Lighthouse threshold table from `lighthouse.thresholds`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LighthouseConfig {
    /// Metric or category name to numeric threshold.
    #[serde(default = "default_thresholds")]
    pub thresholds: BTreeMap<String, f64>,
}

fn default_thresholds() -> BTreeMap<String, f64> {
    let mut map = BTreeMap::new();
    for category in ["performance", "accessibility", "best-practices", "seo"] {
        map.insert(category.to_string(), 0.8);
    }
    map
}

impl Default for LighthouseConfig {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
        }
    }
}

/// Parsed project configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Gate command overrides.
    #[serde(default)]
    pub commands: CommandOverrides,
    /// Repair loop policy.
    #[serde(default)]
    pub policy: RepairPolicy,
    /// Lighthouse thresholds.
    #[serde(default)]
    pub lighthouse: LighthouseConfig,
}

impl GateConfig {
    /// Load configuration from `<cwd>/quick-gate.config.json`.
    ///
    /// A missing file yields the defaults. A present but malformed file is
    /// an error - silently ignoring a config the user wrote hides real
    /// mistakes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(cwd: &Path) -> Result<Self> {
        let path = cwd.join(CONFIG_FILE);
        if !path.exists() {
            debug!("no {CONFIG_FILE}, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// The configured command override for a gate name, if any.
    #[must_use]
    pub fn command_override(&self, gate: &str) -> Option<&str> {
        match gate {
            "lint" => self.commands.lint.as_deref(),
            "typecheck" => self.commands.typecheck.as_deref(),
            "build" => self.commands.build.as_deref(),
            "lighthouse" => self.commands.lighthouse.as_deref(),
            _ => None,
        }
    }
}

// ============================================================================
// Model Policy
// ============================================================================

/// Default hint model identifier.
pub const DEFAULT_HINT_MODEL: &str = "qwen2.5:1.5b";

/// Default patch model identifier.
pub const DEFAULT_PATCH_MODEL: &str = "mistral:7b";

/// Default per-model-call timeout in milliseconds.
pub const DEFAULT_MODEL_TIMEOUT_MS: u64 = 60_000;

/// Model identifiers that may only serve as hint models.
///
/// Small instruction-tuned models produce usable one-line hints but
/// unusable multi-line edit plans; the patch adapter refuses them outright
/// unless `QUICK_GATE_ALLOW_HINT_ONLY_PATCH=1`.
pub const HINT_ONLY_MODELS: &[&str] = &["qwen2.5:0.5b", "qwen2.5:1.5b", "tinyllama:1.1b"];

/// Immutable model configuration, read from the environment once per
/// repair invocation.
#[derive(Debug, Clone)]
pub struct ModelPolicy {
    /// Hint model identifier.
    pub hint_model: String,
    /// Patch model identifier.
    pub patch_model: String,
    /// Per-model-call timeout in milliseconds.
    pub model_timeout_ms: u64,
    /// When true, the hint-only deny list is not enforced.
    pub allow_hint_only_patch: bool,
    /// Test hook: verbatim hint-model output.
    pub mock_hint_output: Option<String>,
    /// Test hook: verbatim patch-model output.
    pub mock_patch_output: Option<String>,
}

impl Default for ModelPolicy {
    fn default() -> Self {
        Self {
            hint_model: DEFAULT_HINT_MODEL.to_string(),
            patch_model: DEFAULT_PATCH_MODEL.to_string(),
            model_timeout_ms: DEFAULT_MODEL_TIMEOUT_MS,
            allow_hint_only_patch: false,
            mock_hint_output: None,
            mock_patch_output: None,
        }
    }
}

impl ModelPolicy {
    /// Read the policy from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            hint_model: std::env::var("QUICK_GATE_HINT_MODEL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.hint_model),
            patch_model: std::env::var("QUICK_GATE_PATCH_MODEL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.patch_model),
            model_timeout_ms: std::env::var("QUICK_GATE_MODEL_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MODEL_TIMEOUT_MS),
            allow_hint_only_patch: std::env::var("QUICK_GATE_ALLOW_HINT_ONLY_PATCH")
                .map(|v| v == "1")
                .unwrap_or(false),
            mock_hint_output: std::env::var("QUICK_GATE_MOCK_OLLAMA_HINT").ok(),
            mock_patch_output: std::env::var("QUICK_GATE_MOCK_OLLAMA_PATCH").ok(),
        }
    }

    /// Whether `model` is restricted to hint duty.
    #[must_use]
    pub fn is_hint_only(&self, model: &str) -> bool {
        !self.allow_hint_only_patch && HINT_ONLY_MODELS.contains(&model)
    }
}

// ============================================================================
// Tests
// ============================================================================
