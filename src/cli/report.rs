//! Progress output
//!
//! Human-readable lines by default, one JSON object per line with `--json`.

use std::time::Duration;

use colored::Colorize;
use serde::Serialize;

use crate::common::Result;
use crate::scanner::{ScanOutcome, ScanResult};
use crate::testing::{CommandKind, CommandResult, RepeatSummary, RunObserver, TestRun};

/// Prints scan and run progress on stdout
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    json: bool,
}

#[derive(Serialize)]
struct Event<'a, T: Serialize> {
    event: &'a str,
    #[serde(flatten)]
    data: &'a T,
}

/// One JSON line for `event`
fn encode<T: Serialize>(event: &str, data: &T) -> Result<String> {
    Ok(serde_json::to_string(&Event { event, data })?)
}

impl Reporter {
    pub fn new(json: bool) -> Self {
        if json {
            colored::control::set_override(false);
        }
        Self { json }
    }

    fn emit<T: Serialize>(&self, event: &str, data: &T) {
        match encode(event, data) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Failed to serialize {} event: {}", event, e),
        }
    }

    pub fn scan_started(&self, filter: &str) {
        if self.json {
            self.emit("scan_started", &serde_json::json!({ "filter": filter }));
        } else {
            println!("Scanning for VISA resources matching \"{}\"...", filter);
        }
    }

    pub fn scan_result(&self, result: &ScanResult) {
        if self.json {
            self.emit("scan_result", result);
            return;
        }
        match &result.outcome {
            ScanOutcome::Skipped if result.address.starts_with("ASRL") => {
                println!("  Skipping serial port \"{}\"", result.address);
            }
            ScanOutcome::Skipped => println!("  Skipping \"{}\"", result.address),
            ScanOutcome::Identified { name } => println!(
                "{} Found \"{}\" on address \"{}\" {}",
                "✓".green(),
                name,
                result.address,
                format_elapsed(result.elapsed).dimmed()
            ),
            ScanOutcome::Unreachable { error } => println!(
                "{} Found unknown device on address \"{}\": {}",
                "✗".red(),
                result.address,
                error
            ),
        }
    }

    pub fn scan_finished(&self, results: &[ScanResult]) {
        let identified = results
            .iter()
            .filter(|r| matches!(r.outcome, ScanOutcome::Identified { .. }))
            .count();
        if self.json {
            self.emit(
                "scan_finished",
                &serde_json::json!({ "resources": results.len(), "identified": identified }),
            );
        } else {
            println!(
                "VISA resources found: {}, identified: {}",
                results.len(),
                identified
            );
        }
    }

    pub fn scan_skipped(&self) {
        if !self.json {
            println!("No scan for VISA resources.");
        }
    }

    pub fn repeat_finished(&self, summary: &RepeatSummary) {
        if self.json {
            self.emit("repeat_finished", summary);
        } else {
            println!(
                "Repeat finished: {} runs, {} completed, {} aborted in {}",
                summary.runs,
                summary.completed,
                summary.aborted,
                format_elapsed(summary.duration)
            );
        }
    }
}

impl RunObserver for Reporter {
    fn on_connecting(&mut self, address: &str) {
        if !self.json {
            println!("Connecting to '{}'", address);
        }
    }

    fn on_connected(&mut self, address: &str, elapsed: Duration) {
        if self.json {
            self.emit(
                "connected",
                &serde_json::json!({
                    "address": address,
                    "elapsed": elapsed.as_secs_f64() * 1000.0,
                }),
            );
        } else {
            println!("Connected. {}", format_elapsed(elapsed).dimmed());
        }
    }

    fn on_result(&mut self, result: &CommandResult) {
        if self.json {
            self.emit("command", result);
            return;
        }
        let elapsed = format_elapsed(result.elapsed).dimmed();
        match (&result.error, result.kind) {
            (Some(error), CommandKind::Query) => println!(
                "{} Query \"{}\" failed: {} {}",
                "✗".red(),
                result.command,
                error,
                elapsed
            ),
            (Some(error), CommandKind::Write) => println!(
                "{} Write \"{}\" failed: {} {}",
                "✗".red(),
                result.command,
                error,
                elapsed
            ),
            (None, CommandKind::Query) => println!(
                "Query \"{}\" reply: \"{}\" {}",
                result.command,
                result.reply.as_deref().unwrap_or_default(),
                elapsed
            ),
            (None, CommandKind::Write) => println!("Write \"{}\" {}", result.command, elapsed),
        }
    }

    fn on_pass_finished(&mut self, pass: u64, succeeded: bool) {
        tracing::debug!(pass, succeeded, "Pass finished");
    }

    fn on_run_finished(&mut self, run: &TestRun) {
        if self.json {
            self.emit("run", run);
            return;
        }
        if let Some(error) = &run.connect_error {
            println!("{} {}", "✗".red(), error);
            return;
        }
        let counts = format!(
            "{} passes, {}/{} commands ok ({:.1}%) in {}",
            run.passes,
            run.commands_run - run.commands_failed,
            run.commands_run,
            run.success_rate() * 100.0,
            format_elapsed(run.duration)
        );
        if run.outcome.is_aborted() {
            println!("{} Run aborted: {}", "✗".red(), counts);
        } else {
            println!("{} Run completed: {}", "✓".green(), counts);
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let ms = elapsed.as_secs_f64() * 1000.0;
    if ms >= 10_000.0 {
        format!("({:.2} s)", ms / 1000.0)
    } else {
        format!("({:.1} ms)", ms)
    }
}
