//! Concurrency scheduler
//!
//! Walks an interpreted suite tree and runs it:
//!
//! - In a sequential suite, children run one after another. A run of
//!   consecutive children marked concurrent starts together and is awaited
//!   as a batch before the next child.
//! - In a concurrent suite, unmarked children start together. Children
//!   explicitly marked sequential form one chain that runs in declaration
//!   order alongside them.
//!
//! Concurrent tests take a permit from the shared limiter for their whole
//! lifecycle, so at most `max_concurrency` are in flight; waiters start in
//! arrival order.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::context::{Mocker, SuiteContext, TestContext};
use crate::error::{ErrorInfo, TestError};
use crate::hooks;
use crate::report::{SuiteResult, TestResult, TestState};
use crate::reporter::{CaseInfo, EventSink, RunnerEvent};
use crate::tree::{Concurrency, Mode, Suite, Task, Test, is_concurrent};

/// Timing and concurrency defaults for one file run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub test_timeout: Duration,
    pub hook_timeout: Duration,
    pub retry: u32,
    /// Concurrency of suites that are not marked either way
    pub concurrent: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            test_timeout: Duration::from_millis(5_000),
            hook_timeout: Duration::from_millis(10_000),
            retry: 0,
            concurrent: false,
        }
    }
}

/// Runs one file's suite tree and gathers its results.
pub struct FileRunner<'a> {
    file: &'a Path,
    mocker: Mocker,
    sink: &'a dyn EventSink,
    limiter: Arc<Semaphore>,
    settings: RunSettings,
    tests: Mutex<Vec<TestResult>>,
    suites: Mutex<Vec<SuiteResult>>,
}

impl<'a> FileRunner<'a> {
    pub fn new(
        file: &'a Path,
        mocker: Mocker,
        sink: &'a dyn EventSink,
        limiter: Arc<Semaphore>,
        settings: RunSettings,
    ) -> Self {
        Self {
            file,
            mocker,
            sink,
            limiter,
            settings,
            tests: Mutex::new(Vec::new()),
            suites: Mutex::new(Vec::new()),
        }
    }

    /// Run the tree rooted at `root` and hand back test and suite results.
    pub async fn run(self, root: &Suite) -> (Vec<TestResult>, Vec<SuiteResult>) {
        let concurrent = is_concurrent(root.concurrency, self.settings.concurrent);
        self.run_suite(root, &[], concurrent).await;
        (self.tests.into_inner(), self.suites.into_inner())
    }

    fn run_task<'b>(&'b self, task: &'b Task, chain: &'b [&'b Suite], parent_concurrent: bool) -> BoxFuture<'b, ()> {
        let concurrent = is_concurrent(task.concurrency(), parent_concurrent);
        match task {
            Task::Suite(suite) => self.run_suite(suite, chain, concurrent),
            Task::Test(test) => Box::pin(self.run_test(test, chain, concurrent)),
        }
    }

    fn run_suite<'b>(&'b self, suite: &'b Suite, parents: &'b [&'b Suite], concurrent: bool) -> BoxFuture<'b, ()> {
        Box::pin(async move {
            if suite.mode != Mode::Run {
                self.skip_subtree(suite);
                return;
            }
            if suite.children.is_empty() {
                return;
            }

            let mut chain = parents.to_vec();
            chain.push(suite);
            let ctx = SuiteContext::new(&suite.name, &suite.full_name, self.mocker.clone());
            debug!(suite = %suite.full_name, concurrent, "running suite");

            match hooks::run_before_all(suite, &ctx, self.settings.hook_timeout).await {
                Ok(()) => self.run_children(suite, &chain, concurrent).await,
                Err(error) => {
                    self.fail_subtree(suite, &error);
                    self.suite_error(suite, error);
                }
            }

            for error in hooks::run_after_all(suite, &ctx, self.settings.hook_timeout).await {
                self.suite_error(suite, error);
            }
        })
    }

    async fn run_children(&self, suite: &Suite, chain: &[&Suite], concurrent: bool) {
        let children = &suite.children;

        if concurrent {
            let sequential: Vec<&Task> = children
                .iter()
                .filter(|c| c.concurrency() == Some(Concurrency::Sequential))
                .collect();
            let mut batch: Vec<BoxFuture<'_, ()>> = Vec::with_capacity(children.len());
            let mut chain_started = false;
            for child in children {
                if child.concurrency() == Some(Concurrency::Sequential) {
                    if !chain_started {
                        chain_started = true;
                        let sequential = sequential.clone();
                        batch.push(Box::pin(async move {
                            for task in sequential {
                                self.run_task(task, chain, true).await;
                            }
                        }));
                    }
                } else {
                    batch.push(self.run_task(child, chain, true));
                }
            }
            join_all(batch).await;
            return;
        }

        let mut index = 0;
        while index < children.len() {
            if is_concurrent(children[index].concurrency(), false) {
                let end = children[index..]
                    .iter()
                    .position(|c| !is_concurrent(c.concurrency(), false))
                    .map_or(children.len(), |offset| index + offset);
                let batch = children[index..end]
                    .iter()
                    .map(|child| self.run_task(child, chain, false));
                join_all(batch).await;
                index = end;
            } else {
                self.run_task(&children[index], chain, false).await;
                index += 1;
            }
        }
    }

    async fn run_test(&self, test: &Test, chain: &[&Suite], concurrent: bool) {
        match test.mode {
            Mode::Skip => return self.record(self.settled(test, TestState::Skipped, Vec::new(), 0, 0)),
            Mode::Todo => return self.record(self.settled(test, TestState::Todo, Vec::new(), 0, 0)),
            Mode::Run | Mode::Only => {}
        }

        // A closed limiter only happens on teardown; run unthrottled then.
        let _permit = if concurrent {
            self.limiter.clone().acquire_owned().await.ok()
        } else {
            None
        };

        self.sink.emit(RunnerEvent::CaseStart(CaseInfo {
            file: self.file.to_path_buf(),
            id: test.id,
            full_name: test.full_name.clone(),
        }));
        debug!(test = %test.full_name, concurrent, "running test");

        let started = Instant::now();
        let ctx = TestContext::new(&test.name, &test.full_name, self.file, self.mocker.clone());
        let hook_timeout = self.settings.hook_timeout;
        let mut errors = Vec::new();
        let mut body_error = None;
        let mut skipped = false;
        let mut retry_count = 0;

        match hooks::run_before_each(chain, &ctx, hook_timeout).await {
            Err(error) => errors.push(error),
            Ok(()) => {
                let retries = test.retry.unwrap_or(self.settings.retry);
                let timeout = test.timeout.unwrap_or(self.settings.test_timeout);
                for attempt in 0..=retries {
                    retry_count = attempt;
                    ctx.set_retry_count(attempt);
                    let outcome = match &test.body {
                        Some(body) => hooks::run_body(body, ctx.clone(), timeout).await,
                        None => Ok(()),
                    };
                    let outcome = if test.fails { expect_failure(outcome) } else { outcome };
                    match outcome {
                        Ok(()) => {
                            body_error = None;
                            break;
                        }
                        Err(error) if error.is_skip() => {
                            skipped = true;
                            break;
                        }
                        Err(error) => {
                            if error.is_timeout() {
                                warn!(test = %test.full_name, "{error}");
                            }
                            if attempt < retries {
                                debug!(test = %test.full_name, attempt = attempt + 1, "retrying");
                            }
                            body_error = Some(error);
                        }
                    }
                }
            }
        }

        errors.extend(hooks::run_after_each(chain, &ctx, hook_timeout).await);

        let timed_out = body_error.as_ref().is_some_and(TestError::is_timeout);
        errors.extend(body_error);
        let mut state = if timed_out {
            TestState::TimedOut
        } else if !errors.is_empty() {
            TestState::Failed
        } else if skipped {
            TestState::Skipped
        } else {
            TestState::Passed
        };

        let (on_failed, on_finished) = ctx.settle();
        let listener_errors = hooks::run_listeners(on_failed, on_finished, state, hook_timeout).await;
        if !listener_errors.is_empty() && !state.is_failure() {
            state = TestState::Failed;
        }
        errors.extend(listener_errors);

        let duration_ms = started.elapsed().as_millis() as u64;
        self.record(self.settled(test, state, errors, duration_ms, retry_count));
    }

    fn settled(
        &self,
        test: &Test,
        state: TestState,
        errors: Vec<TestError>,
        duration_ms: u64,
        retry_count: u32,
    ) -> TestResult {
        TestResult {
            id: test.id,
            name: test.name.clone(),
            full_name: test.full_name.clone(),
            file: self.file.to_path_buf(),
            state,
            duration_ms,
            retry_count,
            errors: errors.iter().map(ErrorInfo::from).collect(),
        }
    }

    fn record(&self, result: TestResult) {
        self.sink.emit(RunnerEvent::CaseResult(result.clone()));
        self.tests.lock().push(result);
    }

    fn suite_error(&self, suite: &Suite, error: TestError) {
        let info = ErrorInfo::from(&error);
        let mut suites = self.suites.lock();
        match suites.iter_mut().find(|s| s.full_name == suite.full_name) {
            Some(result) => result.errors.push(info),
            None => suites.push(SuiteResult {
                full_name: suite.full_name.clone(),
                errors: vec![info],
            }),
        }
    }

    /// Report every test below `suite` without running it.
    fn skip_subtree(&self, suite: &Suite) {
        suite.walk_tests(&mut |test| {
            let state = match test.mode {
                Mode::Todo => TestState::Todo,
                _ => TestState::Skipped,
            };
            self.record(self.settled(test, state, Vec::new(), 0, 0));
        });
    }

    /// A `beforeAll` failed: every runnable test below `suite` fails with it.
    fn fail_subtree(&self, suite: &Suite, error: &TestError) {
        suite.walk_tests(&mut |test| {
            let result = match test.mode {
                Mode::Run | Mode::Only => self.settled(test, TestState::Failed, vec![error.clone()], 0, 0),
                Mode::Todo => self.settled(test, TestState::Todo, Vec::new(), 0, 0),
                Mode::Skip => self.settled(test, TestState::Skipped, Vec::new(), 0, 0),
            };
            self.record(result);
        });
    }
}

/// Flip the outcome of a test marked `fails`. Timeouts and skips stay as they are.
fn expect_failure(outcome: Result<(), TestError>) -> Result<(), TestError> {
    match outcome {
        Ok(()) => Err(TestError::assertion("Expect test to fail")),
        Err(error) if error.is_timeout() || error.is_skip() => Err(error),
        Err(_) => Ok(()),
    }
}
