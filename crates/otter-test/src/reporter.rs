//! Runner events and reporters

use std::io::Write;
use std::path::{Path, PathBuf};

use colored::*;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::report::{FileResult, FileState, RunSummary, TestResult, TestState};

/// A test case about to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseInfo {
    pub file: PathBuf,
    pub id: u32,
    pub full_name: String,
}

/// Progress emitted by an execution context while it runs a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunnerEvent {
    FileStart { path: PathBuf },
    CaseStart(CaseInfo),
    CaseResult(TestResult),
}

/// Receives runner events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunnerEvent);
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<RunnerEvent> {
    fn emit(&self, event: RunnerEvent) {
        // A closed channel means nobody is listening any more.
        let _ = self.send(event);
    }
}

/// Discards events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: RunnerEvent) {}
}

/// Keeps every event, for inspection in tests.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<RunnerEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunnerEvent> {
        self.events.lock().clone()
    }

    /// Full names of started cases, in start order.
    pub fn started(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RunnerEvent::CaseStart(case) => Some(case.full_name.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: RunnerEvent) {
        self.events.lock().push(event);
    }
}

/// Observer of a whole run.
pub trait Reporter: Send {
    fn on_run_start(&mut self, _files: &[PathBuf]) {}
    fn on_file_start(&mut self, _path: &Path) {}
    fn on_case_start(&mut self, _case: &CaseInfo) {}
    fn on_case_result(&mut self, _result: &TestResult) {}
    fn on_file_end(&mut self, _result: &FileResult) {}
    fn on_run_end(&mut self, _summary: &RunSummary) {}

    /// Route a runner event to the matching callback.
    fn on_event(&mut self, event: &RunnerEvent) {
        match event {
            RunnerEvent::FileStart { path } => self.on_file_start(path),
            RunnerEvent::CaseStart(case) => self.on_case_start(case),
            RunnerEvent::CaseResult(result) => self.on_case_result(result),
        }
    }
}

/// Reporter that ignores everything.
#[derive(Debug, Default)]
pub struct SilentReporter;

impl Reporter for SilentReporter {}

/// Human-readable output: one line per test, then totals.
pub struct SummaryReporter {
    out: Box<dyn Write + Send>,
    verbose: bool,
}

impl Default for SummaryReporter {
    fn default() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl SummaryReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out, verbose: true }
    }

    /// Only print failures and the summary.
    pub fn quiet(mut self) -> Self {
        self.verbose = false;
        self
    }

    fn line(&mut self, text: impl std::fmt::Display) {
        // Reporter output is best effort.
        let _ = writeln!(self.out, "{text}");
    }
}

impl Reporter for SummaryReporter {
    fn on_case_result(&mut self, result: &TestResult) {
        let (mark, name) = match result.state {
            TestState::Passed => ("✓".green(), result.full_name.normal()),
            TestState::Failed => ("×".red(), result.full_name.red()),
            TestState::TimedOut => ("×".red(), format!("{} (timed out)", result.full_name).red()),
            TestState::Skipped => ("↓".yellow(), result.full_name.dimmed()),
            TestState::Todo => ("□".cyan(), result.full_name.dimmed()),
        };
        if !self.verbose && !result.state.is_failure() {
            return;
        }
        let retries = if result.retry_count > 0 {
            format!(" (retry x{})", result.retry_count)
        } else {
            String::new()
        };
        self.line(format!(
            "  {mark} {name} {}{retries}",
            format!("{}ms", result.duration_ms).dimmed()
        ));
        for error in &result.errors {
            self.line(format!("      {}: {}", error.name.red(), error.message));
            if let (Some(expected), Some(actual)) = (&error.expected, &error.actual) {
                self.line(format!("      {} {expected}", "- Expected".green()));
                self.line(format!("      {} {actual}", "+ Received".red()));
            }
        }
    }

    fn on_file_end(&mut self, result: &FileResult) {
        let label = match result.state {
            FileState::Passed => " PASS ".on_green().black(),
            FileState::Failed => " FAIL ".on_red().white(),
            FileState::Skipped => " SKIP ".on_yellow().black(),
        };
        self.line(format!("{label} {}", result.path.display()));
        if let Some(error) = &result.error {
            self.line(format!("  {}: {}", error.name.red().bold(), error.message));
        }
        for suite in &result.suites {
            for error in &suite.errors {
                self.line(format!(
                    "  {} {}: {}",
                    suite.full_name.bold(),
                    error.name.red(),
                    error.message
                ));
            }
        }
    }

    fn on_run_end(&mut self, summary: &RunSummary) {
        self.line("");
        let mut parts = vec![format!("{} passed", summary.passed).green().to_string()];
        if summary.failed > 0 {
            parts.push(format!("{} failed", summary.failed).red().to_string());
        }
        if summary.timed_out > 0 {
            parts.push(format!("{} timed out", summary.timed_out).red().to_string());
        }
        if summary.skipped > 0 {
            parts.push(format!("{} skipped", summary.skipped).yellow().to_string());
        }
        if summary.todo > 0 {
            parts.push(format!("{} todo", summary.todo).cyan().to_string());
        }
        self.line(format!(
            "{} {} ({} total)",
            " Tests ".bold(),
            parts.join(" | "),
            summary.total
        ));
        if summary.file_errors > 0 {
            self.line(format!(
                "{} {}",
                " Errors ".bold(),
                format!("{} file(s) failed outside of tests", summary.file_errors).red()
            ));
        }
        self.line(format!("{} {}ms", " Duration ".bold(), summary.duration_ms));
        let _ = self.out.flush();
    }
}

/// One JSON object per line for every event, for machine consumption.
pub struct JsonLinesReporter {
    out: Box<dyn Write + Send>,
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ReportLine<'a> {
    RunStart { files: &'a [PathBuf] },
    FileEnd { result: &'a FileResult },
    RunEnd { summary: &'a RunSummary },
}

impl JsonLinesReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }

    fn write(&mut self, line: &impl Serialize) {
        if let Ok(json) = serde_json::to_string(line) {
            let _ = writeln!(self.out, "{json}");
        }
    }
}

impl Reporter for JsonLinesReporter {
    fn on_run_start(&mut self, files: &[PathBuf]) {
        self.write(&ReportLine::RunStart { files });
    }

    fn on_event(&mut self, event: &RunnerEvent) {
        self.write(event);
    }

    fn on_file_end(&mut self, result: &FileResult) {
        self.write(&ReportLine::FileEnd { result });
    }

    fn on_run_end(&mut self, summary: &RunSummary) {
        self.write(&ReportLine::RunEnd { summary });
        let _ = self.out.flush();
    }
}
