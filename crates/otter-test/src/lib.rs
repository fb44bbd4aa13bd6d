//! # Otter Test
//!
//! Test execution engine for the Otter test runner.
//!
//! - [`collect`]: declarative `describe`/`it` calls build a suite tree
//! - [`modes`]: `.only`, skip/todo propagation, and name filtering
//! - [`hooks`]: `beforeAll`/`afterAll`/`beforeEach`/`afterEach` and settle listeners
//! - [`scheduler`]: concurrent and sequential execution with a concurrency cap
//! - [`execution`]: per-context module registry, mocks, and environment
//! - [`pool`]: thread and process workers driven by a coordinator
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use otter_test::{Bundle, Collector, Pool, SummaryReporter, TestConfig, TestFile};
//! use otter_test::expect::expect;
//! use otter_test_mock::ModuleSet;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let bundle = Bundle::new(ModuleSet::new()).file(TestFile::new("/math.test.js", |c: &mut Collector| {
//!     c.it("adds", |_ctx| async { expect(1 + 1).to_be(2) });
//! }));
//! let files = bundle.paths();
//! let pool = Pool::new(TestConfig::default(), Arc::new(bundle))?;
//! let summary = pool.run(files, &mut SummaryReporter::default()).await;
//! assert!(summary.success());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod collect;
pub mod config;
pub mod context;
pub mod discover;
pub mod each;
pub mod env;
pub mod error;
pub mod execution;
pub mod expect;
pub mod file;
pub mod hooks;
pub mod modes;
pub mod pool;
pub mod report;
pub mod reporter;
pub mod scheduler;
pub mod tree;

pub use collect::{Collector, SuiteBuilder, TestBuilder};
pub use config::{PoolKind, TestConfig};
pub use context::{Mocker, SuiteContext, TestContext};
pub use discover::discover_test_files;
pub use env::EnvStore;
pub use error::{CollectionError, ConfigError, ErrorInfo, HookKind, TestError, WorkerError};
pub use execution::{ContextOptions, ExecutionContext};
pub use file::{Bundle, HoistScope, TestFile};
pub use modes::{ModeOptions, interpret_modes};
pub use pool::{Pool, run_worker_stdio, serve_worker};
pub use report::{FileResult, FileState, RunSummary, SuiteResult, TestResult, TestState};
pub use reporter::{EventLog, EventSink, JsonLinesReporter, Reporter, RunnerEvent, SilentReporter, SummaryReporter};
pub use scheduler::{FileRunner, RunSettings};
pub use tree::{Concurrency, Mode, Suite, Task, Test};
