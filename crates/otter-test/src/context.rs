//! Handles given to test bodies, hooks, and collection code

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use futures::future::BoxFuture;
use otter_test_mock::{
    ModuleInstance, ModuleRegistry, ModuleResult, MockFn, MockSpec, Thrown, Value,
};
use parking_lot::Mutex;
use tracing::debug;

use crate::env::EnvStore;
use crate::error::TestError;
use crate::report::TestState;

/// Values a test body, hook, or listener may return.
pub trait IntoTestResult {
    fn into_test_result(self) -> Result<(), TestError>;
}

impl IntoTestResult for () {
    fn into_test_result(self) -> Result<(), TestError> {
        Ok(())
    }
}

impl<E: Into<TestError>> IntoTestResult for Result<(), E> {
    fn into_test_result(self) -> Result<(), TestError> {
        self.map_err(Into::into)
    }
}

/// Box an async callback into the shape stored in the suite tree.
pub(crate) fn boxed<C, F, Fut, R>(f: F) -> Arc<dyn Fn(C) -> BoxFuture<'static, Result<(), TestError>> + Send + Sync>
where
    C: Send + 'static,
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoTestResult,
{
    Arc::new(move |ctx: C| -> BoxFuture<'static, Result<(), TestError>> {
        let fut = f(ctx);
        Box::pin(async move { fut.await.into_test_result() })
    })
}

/// Mocking and stubbing surface for one test file in one execution context.
///
/// Relative specifiers resolve against the test file.
#[derive(Clone)]
pub struct Mocker {
    registry: ModuleRegistry,
    env: Arc<EnvStore>,
    referrer: Arc<str>,
}

impl Mocker {
    pub fn new(registry: ModuleRegistry, env: Arc<EnvStore>, referrer: &str) -> Self {
        Self {
            registry,
            env,
            referrer: Arc::from(referrer),
        }
    }

    fn referrer(&self) -> Option<&str> {
        Some(&self.referrer)
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn env(&self) -> &Arc<EnvStore> {
        &self.env
    }

    /// Register a mock as if hoisted to the top of the file.
    pub fn mock(&self, specifier: &str, spec: MockSpec) -> ModuleResult<()> {
        self.registry.mock(specifier, self.referrer(), spec)
    }

    /// Register a mock for subsequent imports only.
    pub fn do_mock(&self, specifier: &str, spec: MockSpec) {
        self.registry.do_mock(specifier, self.referrer(), spec)
    }

    pub fn unmock(&self, specifier: &str) {
        self.registry.unmock(specifier, self.referrer())
    }

    pub fn do_unmock(&self, specifier: &str) {
        self.registry.do_unmock(specifier, self.referrer())
    }

    pub fn is_mocked(&self, specifier: &str) -> bool {
        self.registry.is_mocked(specifier, self.referrer())
    }

    /// Drop cached module instances for the whole execution context.
    pub fn reset_modules(&self) {
        self.registry.reset_modules()
    }

    pub fn import(&self, specifier: &str) -> ModuleResult<Arc<ModuleInstance>> {
        self.registry.import(specifier, self.referrer())
    }

    pub async fn import_dynamic(&self, specifier: &str) -> ModuleResult<Arc<ModuleInstance>> {
        self.registry.import_dynamic(specifier, self.referrer()).await
    }

    pub fn import_actual(&self, specifier: &str) -> ModuleResult<Arc<ModuleInstance>> {
        self.registry.import_actual(specifier, self.referrer())
    }

    /// Create a tracked mock function.
    pub fn mock_fn(&self, name: Option<&str>) -> MockFn {
        self.registry.tracker().create(name)
    }

    /// Replace `object[key]` with a spy that calls through to the original.
    pub fn spy_on(&self, object: &mut Value, key: &str) -> Result<MockFn, Thrown> {
        self.registry.tracker().spy_on(object, key)
    }

    pub fn clear_all_mocks(&self) {
        self.registry.tracker().clear_all()
    }

    pub fn reset_all_mocks(&self) {
        self.registry.tracker().reset_all()
    }

    pub fn restore_all_mocks(&self) {
        self.registry.tracker().restore_all()
    }

    pub fn stub_env(&self, key: &str, value: Option<&str>) {
        self.env.stub_env(key, value)
    }

    pub fn unstub_all_envs(&self) {
        self.env.unstub_all_envs()
    }

    pub fn stub_global(&self, name: &str, value: impl Into<Value>) {
        self.env.stub_global(name, value.into())
    }

    pub fn unstub_all_globals(&self) {
        self.env.unstub_all_globals()
    }
}

/// Callback registered with `on_test_failed` / `on_test_finished`.
pub(crate) type Listener =
    Box<dyn FnOnce(TestState) -> BoxFuture<'static, Result<(), TestError>> + Send>;

fn listener<F, Fut, R>(f: F) -> Listener
where
    F: FnOnce(TestState) -> Fut + Send + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoTestResult,
{
    Box::new(move |state| -> BoxFuture<'static, Result<(), TestError>> {
        Box::pin(async move { f(state).await.into_test_result() })
    })
}

#[derive(Default)]
struct Listeners {
    settled: bool,
    failed: Vec<Listener>,
    finished: Vec<Listener>,
}

struct TestContextInner {
    name: String,
    full_name: String,
    file: PathBuf,
    mocker: Mocker,
    retry: AtomicU32,
    listeners: Mutex<Listeners>,
}

/// Handle passed to a test body and its `beforeEach` / `afterEach` hooks.
///
/// Cheap to clone. A body that outlives its timeout keeps a working handle,
/// but listeners it registers after the test settled are dropped.
#[derive(Clone)]
pub struct TestContext {
    inner: Arc<TestContextInner>,
}

impl TestContext {
    pub(crate) fn new(name: &str, full_name: &str, file: &Path, mocker: Mocker) -> Self {
        Self {
            inner: Arc::new(TestContextInner {
                name: name.to_string(),
                full_name: full_name.to_string(),
                file: file.to_path_buf(),
                mocker,
                retry: AtomicU32::new(0),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn full_name(&self) -> &str {
        &self.inner.full_name
    }

    pub fn file(&self) -> &Path {
        &self.inner.file
    }

    /// Which attempt is running: 0 for the first, 1 for the first retry.
    pub fn retry_count(&self) -> u32 {
        self.inner.retry.load(Ordering::SeqCst)
    }

    pub(crate) fn set_retry_count(&self, n: u32) {
        self.inner.retry.store(n, Ordering::SeqCst);
    }

    pub fn mocker(&self) -> &Mocker {
        &self.inner.mocker
    }

    pub fn env(&self) -> &EnvStore {
        &self.inner.mocker.env
    }

    /// Error that marks the running test as skipped: `return Err(ctx.skip("offline"))`.
    pub fn skip(&self, reason: &str) -> TestError {
        TestError::Skipped(Some(reason.to_string()))
    }

    pub fn import(&self, specifier: &str) -> ModuleResult<Arc<ModuleInstance>> {
        self.inner.mocker.import(specifier)
    }

    pub async fn import_dynamic(&self, specifier: &str) -> ModuleResult<Arc<ModuleInstance>> {
        self.inner.mocker.import_dynamic(specifier).await
    }

    /// Run `f` after the test settles, if it failed.
    pub fn on_test_failed<F, Fut, R>(&self, f: F)
    where
        F: FnOnce(TestState) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoTestResult,
    {
        self.push_listener(true, listener(f));
    }

    /// Run `f` after the test settles, whatever its outcome.
    pub fn on_test_finished<F, Fut, R>(&self, f: F)
    where
        F: FnOnce(TestState) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoTestResult,
    {
        self.push_listener(false, listener(f));
    }

    fn push_listener(&self, on_failure: bool, listener: Listener) {
        let mut listeners = self.inner.listeners.lock();
        if listeners.settled {
            debug!(test = %self.inner.full_name, "ignoring listener registered after the test settled");
            return;
        }
        if on_failure {
            listeners.failed.push(listener);
        } else {
            listeners.finished.push(listener);
        }
    }

    /// Close registration and hand back `(failed, finished)` listeners.
    pub(crate) fn settle(&self) -> (Vec<Listener>, Vec<Listener>) {
        let mut listeners = self.inner.listeners.lock();
        listeners.settled = true;
        (
            std::mem::take(&mut listeners.failed),
            std::mem::take(&mut listeners.finished),
        )
    }
}

/// Handle passed to `beforeAll` / `afterAll` hooks.
#[derive(Clone)]
pub struct SuiteContext {
    name: Arc<str>,
    full_name: Arc<str>,
    mocker: Mocker,
}

impl SuiteContext {
    pub(crate) fn new(name: &str, full_name: &str, mocker: Mocker) -> Self {
        Self {
            name: Arc::from(name),
            full_name: Arc::from(full_name),
            mocker,
        }
    }

    /// Empty for the file-level suite.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn mocker(&self) -> &Mocker {
        &self.mocker
    }

    pub fn env(&self) -> &EnvStore {
        &self.mocker.env
    }

    pub fn import(&self, specifier: &str) -> ModuleResult<Arc<ModuleInstance>> {
        self.mocker.import(specifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_test_mock::{ModuleSet, RegistryOptions};

    fn mocker() -> Mocker {
        let registry = ModuleRegistry::new(Arc::new(ModuleSet::new()), RegistryOptions::default());
        Mocker::new(registry, Arc::new(EnvStore::new()), "/t/a.test.js")
    }

    #[tokio::test]
    async fn test_listeners_after_settle_are_ignored() {
        let ctx = TestContext::new("a", "a", Path::new("/t/a.test.js"), mocker());
        ctx.on_test_finished(|_| async {});
        ctx.on_test_failed(|_| async {});

        let (failed, finished) = ctx.settle();
        assert_eq!(failed.len(), 1);
        assert_eq!(finished.len(), 1);

        ctx.on_test_finished(|_| async {});
        let (failed, finished) = ctx.settle();
        assert!(failed.is_empty());
        assert!(finished.is_empty());
    }

    #[test]
    fn test_into_test_result() {
        assert!(().into_test_result().is_ok());
        let err: Result<(), Thrown> = Err(Thrown::error("boom"));
        assert!(matches!(err.into_test_result(), Err(TestError::Thrown(_))));
    }

    #[test]
    fn test_mocker_stubs_go_through_env_store() {
        let mocker = mocker();
        mocker.stub_env("MODE", Some("test"));
        assert_eq!(mocker.env().get("MODE").as_deref(), Some("test"));
        mocker.unstub_all_envs();
        assert!(mocker.env().get("MODE").is_none());
    }
}
