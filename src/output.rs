// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use crate::flux::FluxReport;
use crate::ssh::CommandResult;
use serde::Serialize;
use std::time::Instant;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Instant,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: Instant::now(),
        }
    }

    /// Get elapsed time since this output was created.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print the verdict for one flow.
    pub fn report(&self, report: &FluxReport, as_expected: bool) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                let mark = if as_expected { "✓" } else { "✗" };
                println!("{mark} {report}");
            }
            OutputMode::Json => {
                let event = ReportEvent {
                    event: "flux",
                    as_expected,
                    report,
                };
                print_json(&event);
            }
        }
    }

    /// Print the captured output of an accepted command.
    pub fn command_result(&self, result: &CommandResult) {
        match self.mode {
            OutputMode::Normal => {
                if !result.stdout.is_empty() {
                    println!("{}", result.stdout);
                }
                if !result.stderr.is_empty() {
                    eprintln!("{}", result.stderr);
                }
                println!("exit status {} ({:.1}s)", result.exit_status, self.elapsed_secs());
            }
            OutputMode::Quiet => {
                if !result.stdout.is_empty() {
                    println!("{}", result.stdout);
                }
            }
            OutputMode::Json => {
                let event = CommandEvent {
                    event: "command",
                    exit_status: result.exit_status,
                    stdout: &result.stdout,
                    stderr: &result.stderr,
                    duration_secs: self.elapsed_secs(),
                };
                print_json(&event);
            }
        }
    }

    /// Print a success message with timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => println!("{message} ({:.1}s)", self.elapsed_secs()),
            OutputMode::Quiet => println!("{message}"),
            OutputMode::Json => print_json(&JsonEvent {
                event: "success",
                message,
                duration_secs: Some(self.elapsed_secs()),
            }),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => {
                let event = JsonEvent {
                    event: "error",
                    message,
                    duration_secs: Some(self.elapsed_secs()),
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }
}

fn print_json<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        println!("{json}");
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[derive(Serialize)]
struct ReportEvent<'a> {
    event: &'a str,
    as_expected: bool,
    #[serde(flatten)]
    report: &'a FluxReport,
}

#[derive(Serialize)]
struct CommandEvent<'a> {
    event: &'a str,
    exit_status: u32,
    stdout: &'a str,
    stderr: &'a str,
    duration_secs: f64,
}
