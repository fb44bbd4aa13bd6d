//! Error types for otter-test-mock

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A value thrown by a module body, factory, or function implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct Thrown {
    /// Error class name (`Error`, `TypeError`, ...).
    pub name: String,
    /// Error message.
    pub message: String,
}

impl Thrown {
    /// Create a plain `Error`
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
        }
    }

    /// Create a `TypeError`
    pub fn type_error(message: impl Into<String>) -> Self {
        Self {
            name: "TypeError".to_string(),
            message: message.into(),
        }
    }
}

/// Incorrect use of the mocking API.
///
/// These are configuration mistakes in a test file, not test failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockUsageError {
    /// A mock factory returned something other than an object.
    #[error(
        "[vitest] vi.mock(\"{specifier}\", factory?) is not returning an object. Did you mean to return an object with a \"default\" key?"
    )]
    FactoryNotObject { specifier: String },

    /// Code read an export that the mock factory did not provide.
    #[error(
        "[vitest] No \"{export}\" export is defined on the \"{specifier}\" mock. Did you forget to return it from \"vi.mock\"?"
    )]
    MissingExport { specifier: String, export: String },

    /// A hoisted registration referenced a binding that is not available yet.
    #[error(
        "[vitest] There was an error when mocking a module. The factory of \"{specifier}\" references \"{name}\", which is not initialized at hoisting time. Wrap it in vi.hoisted() or import it inside the factory."
    )]
    NonHoistedReference { specifier: String, name: String },

    /// A hoisted registration arrived after the target was already evaluated.
    #[error("module \"{specifier}\" was imported before it was mocked")]
    MockedAfterImport { specifier: String },

    /// A factory asked for a hoisted value that was never declared.
    #[error("hoisted value \"{name}\" is not declared")]
    UnknownHoistedValue { name: String },
}

/// Module loading error
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    /// Nothing is registered or defined at the resolved path.
    #[error("Cannot find module '{specifier}' imported from '{referrer}'")]
    NotFound { specifier: String, referrer: String },

    /// The module graph contains a cycle.
    #[error("Circular dependency detected: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    /// A module body or mock factory threw.
    #[error("Error evaluating module '{specifier}': {source}")]
    Evaluation {
        specifier: String,
        #[source]
        source: Thrown,
    },

    /// A function exported by a module threw when called.
    #[error(transparent)]
    Thrown(#[from] Thrown),

    /// Incorrect use of the mocking API.
    #[error(transparent)]
    MockUsage(#[from] MockUsageError),
}

impl ModuleError {
    /// Create an evaluation error
    pub fn evaluation(specifier: impl Into<String>, source: Thrown) -> Self {
        Self::Evaluation {
            specifier: specifier.into(),
            source,
        }
    }

    /// Whether this error is a configuration mistake rather than a runtime failure
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::MockUsage(_))
    }
}

/// Result type using ModuleError
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Error raised by the mock hoisting pass
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HoistError {
    /// The source could not be parsed.
    #[error("Syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// The rewritten module could not be printed.
    #[error("Failed to emit hoisted module: {0}")]
    Codegen(String),

    /// A hoisted call referenced a binding that is initialized later.
    #[error("{source} (line {line})")]
    NonHoistedReference {
        line: usize,
        #[source]
        source: MockUsageError,
    },
}
