//! quick-gate - quality-gate orchestrator with bounded auto-repair.
//!
//! Runs a fixed set of deterministic checks (lint, type-check, optional
//! production build, Lighthouse audit) against a front-end project,
//! normalizes their output into structured findings, and optionally drives
//! a bounded repair loop that combines deterministic fixers with
//! model-generated edit plans, escalating with machine-readable evidence
//! when repair cannot succeed.
//!
//! # Architecture
//!
//! - [`command`] - shell command execution with capture and timeout
//! - [`config`] - project config file and environment model policy
//! - [`changed`] - changed-file input parsing and repo metadata
//! - [`report`] - finding model and persisted run artifacts
//! - [`gates`] - gate planning, command resolution, and execution
//! - [`prefix`] - deterministic pre-fix rule table
//! - [`editplan`] - edit-plan validation and application
//! - [`model`] - hint/patch model adapters and the local-model runner
//! - [`snapshot`] - per-attempt workspace backup and restore
//! - [`repair`] - the bounded repair loop state machine
//! - [`brief`] - agent brief rendering
//!
//! # Example
//!
//! ```rust,ignore
//! use quick_gate::config::GateConfig;
//! use quick_gate::gates::execute_run;
//! use quick_gate::report::RunMode;
//!
//! let config = GateConfig::load(".".as_ref())?;
//! let (report, _) = execute_run(
//!     ".".as_ref(),
//!     RunMode::Canary,
//!     &config,
//!     &["src/app.ts".to_string()],
//!     None,
//! ).await?;
//! println!("{:?}", report.status);
//! ```

pub mod brief;
pub mod changed;
pub mod command;
pub mod config;
pub mod editplan;
pub mod error;
pub mod gates;
pub mod model;
pub mod prefix;
pub mod repair;
pub mod report;
pub mod snapshot;

// Re-export commonly used types
pub use error::{QuickGateError, Result};

// Re-export the data model
pub use report::{
    ArtifactPaths, FailuresReport, Finding, GateKind, GateStatus, GateSummary, RunMode, RunStatus,
    Severity,
};

// Re-export gate execution
pub use gates::{execute_run, GateRun, GateRunner, ProjectManifest};

// Re-export configuration
pub use config::{GateConfig, LighthouseConfig, ModelPolicy, RepairPolicy};

// Re-export repair types
pub use repair::{
    ActionRecord, AttemptRecord, Escalation, ReasonCode, RepairLoop, RepairOptions, RepairOutcome,
    RepairReport,
};

// Re-export the command trace
pub use command::CommandTrace;
