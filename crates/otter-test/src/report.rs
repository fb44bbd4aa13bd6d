//! Test result aggregation

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorInfo;

/// Final state of a test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestState {
    Passed,
    Failed,
    Skipped,
    Todo,
    TimedOut,
}

impl TestState {
    pub fn is_failure(self) -> bool {
        matches!(self, TestState::Failed | TestState::TimedOut)
    }
}

/// Result for a single test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Declaration order within the file
    pub id: u32,
    pub name: String,
    /// Suite path and name, joined with " > "
    pub full_name: String,
    pub file: PathBuf,
    pub state: TestState,
    pub duration_ms: u64,
    /// Number of retries used
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorInfo>,
}

/// Errors raised by a suite's own `beforeAll`/`afterAll` hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub full_name: String,
    pub errors: Vec<ErrorInfo>,
}

/// Overall state of a test file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileState {
    Passed,
    Failed,
    Skipped,
}

/// Result for one test file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResult {
    pub path: PathBuf,
    pub state: FileState,
    pub duration_ms: u64,
    pub tests: Vec<TestResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suites: Vec<SuiteResult>,
    /// Collection, configuration, or worker error covering the whole file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl FileResult {
    /// Derive the file state from its tests and errors.
    pub fn new(
        path: &Path,
        mut tests: Vec<TestResult>,
        suites: Vec<SuiteResult>,
        error: Option<ErrorInfo>,
        duration_ms: u64,
    ) -> Self {
        tests.sort_by_key(|t| t.id);
        let failed = error.is_some()
            || !suites.is_empty()
            || tests.iter().any(|t| t.state.is_failure());
        let ran = tests
            .iter()
            .any(|t| !matches!(t.state, TestState::Skipped | TestState::Todo));
        let state = if failed {
            FileState::Failed
        } else if ran {
            FileState::Passed
        } else {
            FileState::Skipped
        };
        Self {
            path: path.to_path_buf(),
            state,
            duration_ms,
            tests,
            suites,
            error,
        }
    }

    /// A file that failed as a whole.
    pub fn errored(path: &Path, error: ErrorInfo) -> Self {
        Self::new(path, Vec::new(), Vec::new(), Some(error), 0)
    }

    /// A file that was never run.
    pub fn skipped(path: &Path) -> Self {
        Self::new(path, Vec::new(), Vec::new(), None, 0)
    }

    pub fn count(&self, state: TestState) -> usize {
        self.tests.iter().filter(|t| t.state == state).count()
    }

    pub fn failed_tests(&self) -> usize {
        self.tests.iter().filter(|t| t.state.is_failure()).count()
    }
}

/// Test run summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub todo: usize,
    pub timed_out: usize,
    /// Files that failed outside of any test (collection errors, worker faults)
    pub file_errors: usize,
    pub files: Vec<FileResult>,
}

impl RunSummary {
    /// Generate a summary from file results
    pub fn from_files(files: Vec<FileResult>, started_at: DateTime<Utc>, duration_ms: u64) -> Self {
        let tests = files.iter().flat_map(|f| f.tests.iter());
        let mut summary = Self {
            started_at,
            duration_ms,
            total: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            todo: 0,
            timed_out: 0,
            file_errors: files
                .iter()
                .filter(|f| f.error.is_some() || !f.suites.is_empty())
                .count(),
            files: Vec::new(),
        };
        for test in tests {
            summary.total += 1;
            match test.state {
                TestState::Passed => summary.passed += 1,
                TestState::Failed => summary.failed += 1,
                TestState::Skipped => summary.skipped += 1,
                TestState::Todo => summary.todo += 1,
                TestState::TimedOut => summary.timed_out += 1,
            }
        }
        summary.files = files;
        summary
    }

    /// No failed tests, timeouts, or file errors.
    pub fn success(&self) -> bool {
        self.failed == 0 && self.timed_out == 0 && self.file_errors == 0
    }

    pub fn file(&self, path: &Path) -> Option<&FileResult> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Find a test by full name across all files.
    pub fn test(&self, full_name: &str) -> Option<&TestResult> {
        self.files
            .iter()
            .flat_map(|f| f.tests.iter())
            .find(|t| t.full_name == full_name)
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: u32, state: TestState) -> TestResult {
        TestResult {
            id,
            name: format!("t{id}"),
            full_name: format!("suite > t{id}"),
            file: PathBuf::from("a.test.js"),
            state,
            duration_ms: 1,
            retry_count: 0,
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_file_state() {
        let path = Path::new("a.test.js");
        let passed = FileResult::new(
            path,
            vec![result(1, TestState::Skipped), result(0, TestState::Passed)],
            Vec::new(),
            None,
            3,
        );
        assert_eq!(passed.state, FileState::Passed);
        assert_eq!(passed.tests[0].id, 0);

        let skipped = FileResult::new(path, vec![result(0, TestState::Todo)], Vec::new(), None, 0);
        assert_eq!(skipped.state, FileState::Skipped);

        let failed = FileResult::new(path, vec![result(0, TestState::TimedOut)], Vec::new(), None, 0);
        assert_eq!(failed.state, FileState::Failed);

        let errored = FileResult::errored(path, ErrorInfo::new("CollectionError", "boom"));
        assert_eq!(errored.state, FileState::Failed);
    }

    #[test]
    fn test_summary_counts() {
        let files = vec![
            FileResult::new(
                Path::new("a.test.js"),
                vec![
                    result(0, TestState::Passed),
                    result(1, TestState::Failed),
                    result(2, TestState::Skipped),
                ],
                Vec::new(),
                None,
                5,
            ),
            FileResult::errored(Path::new("b.test.js"), ErrorInfo::new("WorkerFault", "died")),
        ];
        let summary = RunSummary::from_files(files, Utc::now(), 10);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.file_errors, 1);
        assert!(!summary.success());
        assert!(summary.test("suite > t1").is_some());
        assert!(summary.to_json().unwrap().contains("\"timed_out\": 0"));
    }
}
