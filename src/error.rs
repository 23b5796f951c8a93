//! Custom error types for quick-gate.
//!
//! This module provides structured error types that enable consistent
//! exit-code mapping and recovery decisions across the CLI.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for quick-gate operations
#[derive(Error, Debug)]
pub enum QuickGateError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid CLI usage
    #[error("Usage error: {message}")]
    Usage { message: String },

    /// The project manifest (package.json) is absent
    #[error("No package.json found in {cwd} - not a front-end project?")]
    MissingManifest { cwd: PathBuf },

    // =========================================================================
    // Artifact Errors
    // =========================================================================
    /// An outbound artifact failed schema validation
    #[error("Artifact '{artifact}' failed validation: {problems}")]
    ArtifactValidation { artifact: String, problems: String },

    /// Failed to read or parse a persisted artifact
    #[error("Artifact '{path}' unreadable: {message}")]
    ArtifactRead { path: PathBuf, message: String },

    // =========================================================================
    // Repair Loop Errors
    // =========================================================================
    /// Repair loop internal failure
    #[error("Repair loop error: {message}")]
    Repair { message: String },

    /// Snapshot capture or restore failed
    #[error("Snapshot error: {message}")]
    Snapshot { message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QuickGateError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Create a repair loop error
    pub fn repair(message: impl Into<String>) -> Self {
        Self::Repair {
            message: message.into(),
        }
    }

    /// Create a snapshot error
    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot {
            message: message.into(),
        }
    }

    /// Create an artifact validation error
    pub fn validation(artifact: impl Into<String>, problems: &[String]) -> Self {
        Self::ArtifactValidation {
            artifact: artifact.into(),
            problems: problems.join("; "),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is a usage error (bad flags, missing input)
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage { .. } | Self::Config { .. })
    }

    /// Check if this error is fatal (no artifact should be written)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingManifest { .. } | Self::ArtifactValidation { .. }
        )
    }
}

/// Type alias for quick-gate results
pub type Result<T> = std::result::Result<T, QuickGateError>;
