//! quick-gate CLI entry point.
//!
//! Three subcommands: `run` executes the gates and writes the failures
//! report, `summarize` renders the agent brief, `repair` drives the
//! bounded repair loop. Exit codes: 0 pass, 1 failure or usage error,
//! 2 escalation.

use clap::{Parser, Subcommand};
use colored::Colorize;
use quick_gate::brief::write_brief;
use quick_gate::changed::load_changed_files;
use quick_gate::config::GateConfig;
use quick_gate::gates::execute_run;
use quick_gate::report::{
    ArtifactPaths, FailuresReport, RunMetadata, RunMode, RunStatus, REPORT_VERSION,
};
use quick_gate::repair::{RepairLoop, RepairOptions, RepairOutcome};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quick-gate")]
#[command(version = "0.1.0")]
#[command(about = "Quality-gate orchestrator for front-end projects with bounded auto-repair")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the quality gates against the changed files
    Run {
        /// Gate plan: canary skips the production build
        #[arg(long, value_enum)]
        mode: RunMode,

        /// Path to the changed-files list (text lines or a JSON array)
        #[arg(long, value_name = "PATH")]
        changed_files: PathBuf,
    },

    /// Render the agent brief from a failures report
    Summarize {
        /// Path to failures.json
        #[arg(long, value_name = "PATH")]
        input: PathBuf,
    },

    /// Drive the bounded repair loop against a failures report
    Repair {
        /// Path to failures.json
        #[arg(long, value_name = "PATH")]
        input: PathBuf,

        /// Override the configured maximum attempts
        #[arg(long, value_name = "N")]
        max_attempts: Option<u32>,

        /// Run only deterministic fixers, no model calls
        #[arg(long)]
        deterministic_only: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            let code: u8 = match err.kind() {
                ErrorKind::DisplayHelp
                | ErrorKind::DisplayVersion
                | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => 0,
                _ => 1,
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    let code = match cli.command {
        Commands::Run {
            mode,
            changed_files,
        } => cmd_run(mode, &changed_files).await,
        Commands::Summarize { input } => cmd_summarize(&input),
        Commands::Repair {
            input,
            max_attempts,
            deterministic_only,
        } => {
            cmd_repair(
                &input,
                RepairOptions {
                    max_attempts,
                    deterministic_only,
                },
            )
            .await
        }
    };

    ExitCode::from(code)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("QUICK_GATE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// run
// ============================================================================

async fn cmd_run(mode: RunMode, changed_files_path: &std::path::Path) -> u8 {
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("{} {e}", "error:".red());
            return 1;
        }
    };

    let changed_files = match load_changed_files(changed_files_path) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red());
            return 1;
        }
    };

    let config = match GateConfig::load(&cwd) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red());
            return 1;
        }
    };

    let started = std::time::Instant::now();
    let (report, _run) = match execute_run(&cwd, mode, &config, &changed_files, None).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{} {e}", "error:".red());
            return 1;
        }
    };

    let paths = ArtifactPaths::new(&cwd);
    if let Err(e) = report.write(&paths.failures()) {
        eprintln!("{} {e}", "error:".red());
        return 1;
    }

    let metadata = RunMetadata {
        version: REPORT_VERSION,
        run_id: report.run_id.clone(),
        mode,
        status: report.status,
        started_at: report.timestamp,
        duration_ms: started.elapsed().as_millis() as u64,
        repo: report.repo.clone(),
        branch: report.branch.clone(),
        changed_file_count: report.changed_files.len(),
        finding_count: report.findings.len(),
        gate_durations_ms: report
            .gates
            .iter()
            .map(|g| (g.name.to_string(), g.duration_ms))
            .collect::<BTreeMap<_, _>>(),
    };
    if let Err(e) = metadata.write(&paths.run_metadata()) {
        eprintln!("{} {e:#}", "error:".red());
        return 1;
    }

    print_run_summary(&report);
    match report.status {
        RunStatus::Pass => 0,
        RunStatus::Fail => 1,
    }
}

fn print_run_summary(report: &FailuresReport) {
    for gate in &report.gates {
        let line = format!("{:<12} {:?} ({} ms)", gate.name.to_string(), gate.status, gate.duration_ms);
        println!("{line}");
    }
    match report.status {
        RunStatus::Pass => println!("{}", "All gates passed".green()),
        RunStatus::Fail => {
            println!(
                "{} {} finding(s), see .quick-gate/failures.json",
                "FAIL".red(),
                report.findings.len()
            );
        }
    }
}

// ============================================================================
// summarize
// ============================================================================

fn cmd_summarize(input: &std::path::Path) -> u8 {
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("{} {e}", "error:".red());
            return 1;
        }
    };

    let report = match FailuresReport::read(input) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{} {e}", "error:".red());
            return 1;
        }
    };

    let paths = ArtifactPaths::new(&cwd);
    match write_brief(&report, &paths) {
        Ok(()) => {
            println!(
                "Brief written to {} and {}",
                paths.agent_brief_json().display(),
                paths.agent_brief_md().display()
            );
            0
        }
        Err(e) => {
            eprintln!("{} {e}", "error:".red());
            1
        }
    }
}

// ============================================================================
// repair
// ============================================================================

async fn cmd_repair(input: &std::path::Path, options: RepairOptions) -> u8 {
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("{} {e}", "error:".red());
            return 1;
        }
    };

    if !input.exists() {
        let err = quick_gate::QuickGateError::usage(format!(
            "input report not found: {}",
            input.display()
        ));
        eprintln!("{} {err}", "error:".red());
        return 1;
    }

    let repair_loop = match RepairLoop::new(&cwd, options) {
        Ok(repair_loop) => repair_loop,
        Err(e) => {
            eprintln!("{} {e}", "error:".red());
            return 1;
        }
    };

    match repair_loop.run(input).await {
        Ok(outcome) => {
            match &outcome {
                RepairOutcome::Pass(report) => {
                    println!(
                        "{} after {} attempt(s)",
                        "Repaired".green(),
                        report.attempts.len()
                    );
                }
                RepairOutcome::Escalated(escalation) => {
                    println!(
                        "{} {:?}: {}",
                        "Escalated".yellow(),
                        escalation.reason_code,
                        escalation.message
                    );
                }
            }
            outcome.exit_code() as u8
        }
        Err(e) => {
            eprintln!("{} {e}", "error:".red());
            1
        }
    }
}
