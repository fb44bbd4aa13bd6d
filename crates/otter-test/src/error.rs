//! Error types for otter-test

use std::fmt;
use std::path::PathBuf;

use otter_test_mock::{ModuleError, MockUsageError, Thrown};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle hook kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookKind {
    BeforeAll,
    AfterAll,
    BeforeEach,
    AfterEach,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookKind::BeforeAll => "beforeAll",
            HookKind::AfterAll => "afterAll",
            HookKind::BeforeEach => "beforeEach",
            HookKind::AfterEach => "afterEach",
        })
    }
}

/// Why a test (or hook) did not pass.
#[derive(Debug, Clone, Error)]
pub enum TestError {
    /// An expectation did not hold.
    #[error("{message}")]
    Assertion {
        message: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// User code threw.
    #[error(transparent)]
    Thrown(#[from] Thrown),

    /// A lifecycle hook failed.
    #[error("{kind} hook failed: {source}")]
    Hook {
        kind: HookKind,
        #[source]
        source: Box<TestError>,
    },

    /// The body or hook did not settle in time.
    #[error("{what} timed out in {ms}ms.")]
    Timeout { what: &'static str, ms: u64 },

    /// Module import or mock usage failed.
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// The test skipped itself at runtime.
    #[error("skipped{}", .0.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Skipped(Option<String>),

    /// The worker running the test died.
    #[error("worker fault: {0}")]
    WorkerFault(String),
}

impl TestError {
    /// Assertion failure without expected/actual values.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn hook(kind: HookKind, source: TestError) -> Self {
        Self::Hook {
            kind,
            source: Box::new(source),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, TestError::Skipped(_))
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            TestError::Timeout { .. } => true,
            TestError::Hook { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

impl From<MockUsageError> for TestError {
    fn from(err: MockUsageError) -> Self {
        TestError::Module(err.into())
    }
}

/// Serializable view of an error, as reporters and workers see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            expected: None,
            actual: None,
            stack: None,
        }
    }
}

impl From<&TestError> for ErrorInfo {
    fn from(err: &TestError) -> Self {
        match err {
            TestError::Assertion {
                message,
                expected,
                actual,
            } => Self {
                expected: expected.clone(),
                actual: actual.clone(),
                ..Self::new("AssertionError", message.clone())
            },
            TestError::Thrown(thrown) => Self::new(thrown.name.clone(), thrown.message.clone()),
            TestError::Hook { source, .. } => {
                let inner = ErrorInfo::from(source.as_ref());
                Self {
                    message: err.to_string(),
                    ..inner
                }
            }
            TestError::Timeout { .. } => Self::new("TimeoutError", err.to_string()),
            TestError::Module(ModuleError::MockUsage(_)) => {
                Self::new("MockUsageError", err.to_string())
            }
            TestError::Module(_) => Self::new("ModuleError", err.to_string()),
            TestError::Skipped(_) => Self::new("Skipped", err.to_string()),
            TestError::WorkerFault(message) => Self::new("WorkerFault", message.clone()),
        }
    }
}

impl From<TestError> for ErrorInfo {
    fn from(err: TestError) -> Self {
        ErrorInfo::from(&err)
    }
}

/// A test file could not be collected.
#[derive(Debug, Clone, Error)]
pub enum CollectionError {
    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Thrown(#[from] Thrown),

    /// `.only` used while the configuration forbids it.
    #[error("Unexpected .only modifier on \"{name}\". Remove it or set allow_only = true")]
    OnlyNotAllowed { name: String },

    /// A hoisted initializer failed.
    #[error("failed to initialize hoisted value \"{name}\": {source}")]
    Hoisted {
        name: String,
        #[source]
        source: ModuleError,
    },

    /// No test file is registered at this path.
    #[error("no test file registered at {}", .0.display())]
    UnknownFile(PathBuf),

    #[error("{0}")]
    Message(String),
}

impl From<MockUsageError> for CollectionError {
    fn from(err: MockUsageError) -> Self {
        CollectionError::Module(err.into())
    }
}

impl From<&CollectionError> for ErrorInfo {
    fn from(err: &CollectionError) -> Self {
        let name = match err {
            CollectionError::Module(ModuleError::MockUsage(_)) => "MockUsageError",
            CollectionError::Hoisted { .. } => "MockUsageError",
            CollectionError::Thrown(thrown) => thrown.name.as_str(),
            _ => "CollectionError",
        };
        ErrorInfo::new(name, err.to_string())
    }
}

/// Worker lifecycle errors
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    /// The worker went away without finishing its request.
    #[error(
        "worker exited unexpectedly{}",
        .stderr.as_deref().map(|s| format!(":\n{s}")).unwrap_or_default()
    )]
    Died { stderr: Option<String> },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid test name pattern: {0}")]
    Pattern(#[from] regex::Error),
}
