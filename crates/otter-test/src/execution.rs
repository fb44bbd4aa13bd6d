//! Execution contexts
//!
//! An execution context owns everything one worker mutates while running
//! files: the module registry (mock table plus module cache), the mock
//! tracker, and the environment store. Running a file goes through the
//! load phases in order: hoisted values, hoisted registrations, top-level
//! collection, mode interpretation, then the scheduler.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use otter_test_mock::{ModuleRegistry, RegistryOptions};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::collect::Collector;
use crate::config::TestConfig;
use crate::context::Mocker;
use crate::env::EnvStore;
use crate::error::{CollectionError, ConfigError, ErrorInfo};
use crate::file::{Bundle, TestFile};
use crate::hooks::panic_message;
use crate::modes::{ModeOptions, interpret_modes};
use crate::report::FileResult;
use crate::reporter::{EventSink, RunnerEvent};
use crate::scheduler::{FileRunner, RunSettings};
use crate::tree::Suite;

/// Settings an execution context derives from the configuration once.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub settings: RunSettings,
    pub modes: ModeOptions,
    pub strict_order: bool,
    pub max_concurrency: usize,
    pub env: BTreeMap<String, String>,
    pub env_passthrough: Vec<String>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            settings: RunSettings::default(),
            modes: ModeOptions {
                allow_only: true,
                ..Default::default()
            },
            strict_order: false,
            max_concurrency: 5,
            env: BTreeMap::new(),
            env_passthrough: Vec::new(),
        }
    }
}

impl ContextOptions {
    pub fn from_config(config: &TestConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            settings: RunSettings {
                test_timeout: config.test_timeout(),
                hook_timeout: config.hook_timeout(),
                retry: config.retry,
                concurrent: config.sequence.concurrent,
            },
            modes: ModeOptions {
                name_filter: config.name_filter()?,
                allow_only: config.allow_only,
            },
            strict_order: config.mock.strict_order,
            max_concurrency: config.max_concurrency.max(1),
            env: config.env.clone(),
            env_passthrough: config.env_passthrough.clone(),
        })
    }

    fn env_store(&self) -> EnvStore {
        let passthrough: Vec<&str> = self.env_passthrough.iter().map(String::as_str).collect();
        EnvStore::builder()
            .passthrough(&passthrough)
            .explicit_vars(self.env.clone())
            .build()
    }
}

/// Module state, mocks, and environment for a run of one or more files.
pub struct ExecutionContext {
    id: usize,
    bundle: Arc<Bundle>,
    options: Arc<ContextOptions>,
    registry: ModuleRegistry,
    env: Arc<EnvStore>,
    limiter: Arc<Semaphore>,
    files_run: usize,
}

impl ExecutionContext {
    /// Create a context. `limiter` caps concurrently running tests and may be
    /// shared with other contexts.
    pub fn new(
        id: usize,
        bundle: Arc<Bundle>,
        options: Arc<ContextOptions>,
        limiter: Arc<Semaphore>,
    ) -> Self {
        let registry = ModuleRegistry::new(
            bundle.modules().clone(),
            RegistryOptions {
                strict_order: options.strict_order,
            },
        );
        let env = Arc::new(options.env_store());
        debug!(context = id, "created execution context");
        Self {
            id,
            bundle,
            options,
            registry,
            env,
            limiter,
            files_run: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn env(&self) -> &Arc<EnvStore> {
        &self.env
    }

    /// Files run in this context so far.
    pub fn files_run(&self) -> usize {
        self.files_run
    }

    /// Load, collect, and run one file.
    pub async fn run_file(&mut self, path: &Path, sink: &dyn EventSink) -> FileResult {
        info!(context = self.id, file = %path.display(), "running file");
        sink.emit(RunnerEvent::FileStart {
            path: path.to_path_buf(),
        });
        let started = Instant::now();
        self.files_run += 1;

        let bundle = self.bundle.clone();
        let Some(file) = bundle.get(path) else {
            let error = CollectionError::UnknownFile(path.to_path_buf());
            warn!("{error}");
            return FileResult::errored(path, ErrorInfo::from(&error));
        };

        let mocker = Mocker::new(self.registry.clone(), self.env.clone(), &path.to_string_lossy());
        let root = match self.collect(file, mocker.clone()) {
            Ok(root) => root,
            Err(error) => {
                warn!(file = %path.display(), error = %error, "collection failed");
                return FileResult::new(
                    path,
                    Vec::new(),
                    Vec::new(),
                    Some(ErrorInfo::from(&error)),
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        let runner = FileRunner::new(
            path,
            mocker,
            sink,
            self.limiter.clone(),
            self.options.settings.clone(),
        );
        let (tests, suites) = runner.run(&root).await;
        let result = FileResult::new(path, tests, suites, None, started.elapsed().as_millis() as u64);
        debug!(
            file = %path.display(),
            state = ?result.state,
            tests = result.tests.len(),
            "file finished"
        );
        result
    }

    fn collect(&self, file: &TestFile, mocker: Mocker) -> Result<Suite, CollectionError> {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let hoisted = file.prepare(&self.registry)?;
            let mut collector = Collector::new(file.path(), mocker, hoisted);
            file.collect(&mut collector)?;
            collector.finish()
        }));
        let mut root = outcome.map_err(|panic| CollectionError::Message(panic_message(panic)))??;
        interpret_modes(&mut root, &self.options.modes)?;
        Ok(root)
    }

    /// Apply base environment changes. `None` removes a variable.
    pub fn apply_env(&self, changes: &BTreeMap<String, Option<String>>) {
        for (key, value) in changes {
            self.env.set(key, value.clone());
        }
    }

    /// Undo per-context side effects: stubs, spies, and the module cache.
    pub fn teardown(&self) {
        self.env.unstub_all_envs();
        self.env.unstub_all_globals();
        self.registry.tracker().restore_all();
        self.registry.tracker().release();
        self.registry.reset_modules();
        debug!(context = self.id, files = self.files_run, "execution context torn down");
    }
}
