//! TOML configuration for the test runner

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Config file names searched for, nearest directory first.
pub const CONFIG_NAMES: &[&str] = &["otter-test.toml", ".otter-test.toml"];

/// Worker transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    /// One OS thread per worker, each with its own runtime
    #[default]
    Threads,
    /// One child process per worker
    Process,
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub kind: PoolKind,

    /// Upper bound on live workers. Defaults to the number of CPUs.
    pub max_workers: Option<usize>,

    /// Program started for each process worker, followed by `worker_args`.
    pub worker_command: Option<PathBuf>,

    pub worker_args: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            kind: PoolKind::Threads,
            max_workers: None,
            worker_command: None,
            worker_args: vec!["--worker".to_string()],
        }
    }
}

/// Defaults for suites that do not set a concurrency mode
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Run every suite concurrently unless marked sequential.
    pub concurrent: bool,
}

/// Module mocking settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Reject hoisted mocks of modules that were already imported.
    pub strict_order: bool,
}

/// Test runner configuration loaded from TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Glob-style patterns for test file discovery
    pub include: Vec<String>,

    /// Path fragments excluded from discovery
    pub exclude: Vec<String>,

    /// Default per-test timeout in milliseconds
    pub test_timeout_ms: u64,

    /// Default per-hook timeout in milliseconds
    pub hook_timeout_ms: u64,

    /// Default retry count for failing tests
    pub retry: u32,

    /// Maximum number of concurrently running tests
    pub max_concurrency: usize,

    /// Give every test file a fresh execution context
    pub isolate: bool,

    pub pool: PoolConfig,

    /// When false, `.only` is a collection error
    pub allow_only: bool,

    /// Only run tests whose full name matches this regex
    pub test_name_pattern: Option<String>,

    /// Stop scheduling new files after this many failed tests (0 = never)
    pub bail: usize,

    pub sequence: SequenceConfig,

    pub mock: MockConfig,

    /// Environment variables applied to every execution context
    pub env: BTreeMap<String, String>,

    /// Host variables copied into each context (`*`, `PREFIX*`, `*SUFFIX`)
    pub env_passthrough: Vec<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            include: vec![
                "**/*.test.*".to_string(),
                "**/*.spec.*".to_string(),
                "**/*_test.*".to_string(),
            ],
            exclude: vec!["node_modules".to_string(), "dist".to_string()],
            test_timeout_ms: 5_000,
            hook_timeout_ms: 10_000,
            retry: 0,
            max_concurrency: 5,
            isolate: true,
            pool: PoolConfig::default(),
            allow_only: true,
            test_name_pattern: None,
            bail: 0,
            sequence: SequenceConfig::default(),
            mock: MockConfig::default(),
            env: BTreeMap::new(),
            env_passthrough: vec!["*".to_string()],
        }
    }
}

impl TestConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Find the nearest config file from `start` upward.
    pub fn find(start: &Path) -> Option<PathBuf> {
        start.ancestors().find_map(|dir| {
            CONFIG_NAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| candidate.is_file())
        })
    }

    /// Load the nearest config file, or fall back to defaults when there is none.
    ///
    /// A config file that exists but cannot be read or parsed is logged and ignored.
    pub fn load_or_default(start: &Path) -> Self {
        match Self::find(start) {
            Some(path) => match Self::load(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("{e}");
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }

    /// Effective worker count.
    pub fn max_workers(&self) -> usize {
        self.pool.max_workers.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Compiled test name filter.
    pub fn name_filter(&self) -> Result<Option<Regex>, ConfigError> {
        self.test_name_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(ConfigError::from)
    }

    /// Check if a path matches any exclusion
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude
            .iter()
            .any(|pattern| path.contains(pattern.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TestConfig::default();
        assert_eq!(config.test_timeout_ms, 5_000);
        assert_eq!(config.hook_timeout_ms, 10_000);
        assert_eq!(config.max_concurrency, 5);
        assert!(config.isolate);
        assert!(config.allow_only);
        assert_eq!(config.pool.kind, PoolKind::Threads);
        assert_eq!(config.env_passthrough, vec!["*"]);
    }

    #[test]
    fn test_parse_partial() {
        let config = TestConfig::parse(
            r#"
test_timeout_ms = 100
retry = 2
bail = 1

[pool]
kind = "process"
max_workers = 3

[sequence]
concurrent = true

[env]
NODE_ENV = "test"
"#,
        )
        .unwrap();
        assert_eq!(config.test_timeout(), Duration::from_millis(100));
        assert_eq!(config.retry, 2);
        assert_eq!(config.pool.kind, PoolKind::Process);
        assert_eq!(config.max_workers(), 3);
        assert_eq!(config.pool.worker_args, vec!["--worker"]);
        assert!(config.sequence.concurrent);
        assert_eq!(config.env.get("NODE_ENV").map(String::as_str), Some("test"));
        // untouched fields keep their defaults
        assert_eq!(config.hook_timeout_ms, 10_000);
    }

    #[test]
    fn test_invalid_pattern() {
        let config = TestConfig {
            test_name_pattern: Some("(".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.name_filter(), Err(ConfigError::Pattern(_))));
    }

    #[test]
    fn test_find_walks_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join(".otter-test.toml"), "retry = 4\n").unwrap();

        let found = TestConfig::find(&nested).unwrap();
        assert_eq!(found, dir.path().join(".otter-test.toml"));
        assert_eq!(TestConfig::load_or_default(&nested).retry, 4);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("otter-test.toml");
        std::fs::write(&path, "retry = \"many\"\n").unwrap();
        assert!(matches!(
            TestConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert_eq!(TestConfig::load_or_default(dir.path()).retry, 0);
    }
}
