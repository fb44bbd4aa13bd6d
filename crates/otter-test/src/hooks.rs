//! Lifecycle hook engine
//!
//! Ordering for a test whose ancestors are `S0` (file) .. `Sn` (owning suite):
//!
//! - `beforeEach`: `S0` first, registration order within a suite; stops at the first failure
//! - `afterEach`: `Sn` first, reverse registration order within a suite; every hook runs
//! - `beforeAll` / `afterAll`: once per suite, same within-suite ordering as the `Each` hooks
//! - `onTestFailed` / `onTestFinished`: after the test settles, last registered first
//!
//! Every callback runs as its own task under a timeout. A callback that
//! times out is detached, not cancelled.

use std::any::Any;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinError;
use tracing::warn;

use crate::context::{Listener, SuiteContext, TestContext};
use crate::error::{HookKind, TestError};
use crate::report::TestState;
use crate::tree::{EachHookFn, Suite, SuiteHookFn, TestFn};

/// Spawn `fut` and wait for it for at most `limit`.
pub(crate) async fn run_detachable(
    fut: BoxFuture<'static, Result<(), TestError>>,
    limit: Duration,
    what: &'static str,
) -> Result<(), TestError> {
    let handle = tokio::spawn(fut);
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => Err(join_error(err)),
        Err(_) => Err(TestError::Timeout {
            what,
            ms: limit.as_millis() as u64,
        }),
    }
}

/// Run a test body.
pub(crate) async fn run_body(body: &TestFn, ctx: TestContext, limit: Duration) -> Result<(), TestError> {
    run_detachable((*body)(ctx), limit, "Test").await
}

fn join_error(err: JoinError) -> TestError {
    if err.is_panic() {
        TestError::assertion(panic_message(err.into_panic()))
    } else {
        TestError::WorkerFault("task was cancelled".to_string())
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "test panicked".to_string(),
        },
    }
}

/// `beforeEach` callbacks from the file-level suite down to `chain`'s last suite.
pub fn before_each_chain<'a>(chain: &[&'a Suite]) -> Vec<&'a EachHookFn> {
    chain
        .iter()
        .flat_map(|suite| suite.hooks.before_each.iter())
        .collect()
}

/// `afterEach` callbacks from `chain`'s last suite up to the file-level suite.
pub fn after_each_chain<'a>(chain: &[&'a Suite]) -> Vec<&'a EachHookFn> {
    chain
        .iter()
        .rev()
        .flat_map(|suite| suite.hooks.after_each.iter().rev())
        .collect()
}

/// Run the `beforeEach` chain, stopping at the first failure.
pub(crate) async fn run_before_each(
    chain: &[&Suite],
    ctx: &TestContext,
    limit: Duration,
) -> Result<(), TestError> {
    for hook in before_each_chain(chain) {
        run_detachable((*hook)(ctx.clone()), limit, "Hook")
            .await
            .map_err(|e| hook_failed(HookKind::BeforeEach, ctx.full_name(), e))?;
    }
    Ok(())
}

/// Run the whole `afterEach` chain, collecting every failure.
pub(crate) async fn run_after_each(
    chain: &[&Suite],
    ctx: &TestContext,
    limit: Duration,
) -> Vec<TestError> {
    let mut errors = Vec::new();
    for hook in after_each_chain(chain) {
        if let Err(e) = run_detachable((*hook)(ctx.clone()), limit, "Hook").await {
            errors.push(hook_failed(HookKind::AfterEach, ctx.full_name(), e));
        }
    }
    errors
}

/// Run a suite's own `beforeAll` hooks, stopping at the first failure.
pub(crate) async fn run_before_all(
    suite: &Suite,
    ctx: &SuiteContext,
    limit: Duration,
) -> Result<(), TestError> {
    for hook in &suite.hooks.before_all {
        run_suite_hook(hook, ctx, limit)
            .await
            .map_err(|e| hook_failed(HookKind::BeforeAll, &suite.full_name, e))?;
    }
    Ok(())
}

/// Run a suite's own `afterAll` hooks, collecting every failure.
pub(crate) async fn run_after_all(suite: &Suite, ctx: &SuiteContext, limit: Duration) -> Vec<TestError> {
    let mut errors = Vec::new();
    for hook in suite.hooks.after_all.iter().rev() {
        if let Err(e) = run_suite_hook(hook, ctx, limit).await {
            errors.push(hook_failed(HookKind::AfterAll, &suite.full_name, e));
        }
    }
    errors
}

async fn run_suite_hook(hook: &SuiteHookFn, ctx: &SuiteContext, limit: Duration) -> Result<(), TestError> {
    run_detachable((*hook)(ctx.clone()), limit, "Hook").await
}

/// Run settle listeners, newest first. Failure listeners only fire for failed tests.
pub(crate) async fn run_listeners(
    failed: Vec<Listener>,
    finished: Vec<Listener>,
    state: TestState,
    limit: Duration,
) -> Vec<TestError> {
    let mut errors = Vec::new();
    let failed = if state.is_failure() { failed } else { Vec::new() };
    for listener in failed.into_iter().rev().chain(finished.into_iter().rev()) {
        if let Err(e) = run_detachable(listener(state), limit, "Hook").await {
            errors.push(e);
        }
    }
    errors
}

fn hook_failed(kind: HookKind, owner: &str, error: TestError) -> TestError {
    warn!(hook = %kind, owner, error = %error, "hook failed");
    TestError::hook(kind, error)
}
