//! Shell command execution with capture and timeout.
//!
//! Every external tool quick-gate touches (gate commands, the model runner,
//! rsync, git) runs through [`run_command`], which spawns the command under
//! a working directory, optionally bounds it with a timeout, and returns a
//! [`CommandTrace`] with the verbatim captured streams. The trace is a pure
//! record of what happened; interpretation (pass/fail, finding extraction)
//! belongs to the caller.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Number of stream lines kept when a trace is excerpted into a finding.
pub const EXCERPT_LINES: usize = 30;

// ============================================================================
// Command Trace
// ============================================================================

/// Verbatim record of one external command invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTrace {
    /// The shell command line that was run.
    pub command: String,
    /// Working directory the command ran under.
    pub cwd: String,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Exit code; `None` when the process was killed on timeout.
    pub exit_code: Option<i32>,
    /// Whether the timeout fired.
    pub timed_out: bool,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandTrace {
    /// Whether the command completed with a zero exit.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// First [`EXCERPT_LINES`] lines of stdout.
    #[must_use]
    pub fn stdout_excerpt(&self) -> String {
        excerpt(&self.stdout)
    }

    /// First [`EXCERPT_LINES`] lines of stderr.
    #[must_use]
    pub fn stderr_excerpt(&self) -> String {
        excerpt(&self.stderr)
    }
}

fn excerpt(text: &str) -> String {
    text.lines()
        .take(EXCERPT_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Runner
// ============================================================================

/// Run a shell command under `cwd`, capturing both streams.
///
/// The command line is passed to `sh -c`, matching how project scripts
/// declare their gate commands. When `timeout` is set and expires, the child
/// is killed and the trace comes back with `timed_out=true` and no exit
/// code. A non-zero exit is not an error here; only a spawn failure is.
///
/// # Errors
///
/// Returns an error if the shell itself cannot be spawned.
pub async fn run_command(
    command: &str,
    cwd: &Path,
    timeout: Option<Duration>,
) -> Result<CommandTrace> {
    let started_at = Utc::now();
    let start = Instant::now();

    debug!(command, cwd = %cwd.display(), "running command");

    let child = AsyncCommand::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn command: {command}"))?;

    let (exit_code, timed_out, stdout, stderr) = match timeout {
        Some(limit) => {
            match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => {
                    let output = output.context("Failed to collect command output")?;
                    (
                        output.status.code(),
                        false,
                        String::from_utf8_lossy(&output.stdout).to_string(),
                        String::from_utf8_lossy(&output.stderr).to_string(),
                    )
                }
                Err(_) => {
                    debug!(command, timeout_ms = limit.as_millis() as u64, "command timed out");
                    // wait_with_output consumed the child; kill_on_drop reaps it.
                    (None, true, String::new(), String::new())
                }
            }
        }
        None => {
            let output = child
                .wait_with_output()
                .await
                .context("Failed to collect command output")?;
            (
                output.status.code(),
                false,
                String::from_utf8_lossy(&output.stdout).to_string(),
                String::from_utf8_lossy(&output.stderr).to_string(),
            )
        }
    };

    Ok(CommandTrace {
        command: command.to_string(),
        cwd: cwd.display().to_string(),
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
        exit_code,
        timed_out,
        stdout,
        stderr,
    })
}

/// Run a shell command, writing `input` to its stdin first.
///
/// Used for the model runner, which takes its prompt on stdin the way
/// `ollama run` expects it.
///
/// # Errors
///
/// Returns an error if the shell cannot be spawned or stdin cannot be
/// written.
pub async fn run_command_with_stdin(
    command: &str,
    cwd: &Path,
    input: &str,
    timeout: Option<Duration>,
) -> Result<CommandTrace> {
    let started_at = Utc::now();
    let start = Instant::now();

    debug!(command, input_len = input.len(), "running command with stdin");

    let mut child = AsyncCommand::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn command: {command}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        use tokio::io::AsyncWriteExt;
        stdin
            .write_all(input.as_bytes())
            .await
            .context("Failed to write stdin")?;
        stdin.flush().await.context("Failed to flush stdin")?;
        drop(stdin);
    }

    let (exit_code, timed_out, stdout, stderr) = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => {
                let output = output.context("Failed to collect command output")?;
                (
                    output.status.code(),
                    false,
                    String::from_utf8_lossy(&output.stdout).to_string(),
                    String::from_utf8_lossy(&output.stderr).to_string(),
                )
            }
            Err(_) => (None, true, String::new(), String::new()),
        },
        None => {
            let output = child
                .wait_with_output()
                .await
                .context("Failed to collect command output")?;
            (
                output.status.code(),
                false,
                String::from_utf8_lossy(&output.stdout).to_string(),
                String::from_utf8_lossy(&output.stderr).to_string(),
            )
        }
    };

    Ok(CommandTrace {
        command: command.to_string(),
        cwd: cwd.display().to_string(),
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
        exit_code,
        timed_out,
        stdout,
        stderr,
    })
}

// ============================================================================
// Tests
// ============================================================================
