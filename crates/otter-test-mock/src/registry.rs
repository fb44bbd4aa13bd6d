//! Per-context module registry
//!
//! Holds the mock registration table and the module cache of one execution
//! context. The two are independent: registering or removing a mock never
//! touches an instance that was already handed out, and clearing the cache
//! never removes registrations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::automock::{automock_exports, spy_exports};
use crate::error::{ModuleError, ModuleResult, MockUsageError};
use crate::mock_fn::MockTracker;
use crate::module::{ModuleFormat, ModuleInstance, ModuleOrigin, ModuleScope, ModuleSet};
use crate::value::{Object, Value};

/// Values produced by a test file's hoisted initializers, by name.
pub type HoistedValues = Arc<BTreeMap<String, Value>>;

/// A mock factory: produces the mocked module's exports.
pub type FactoryFn = dyn Fn(&FactoryScope<'_>) -> ModuleResult<Value> + Send + Sync;

/// Options form of a mock registration: `{ spy: true }` or `{ mock: true }`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockOptions {
    /// Keep real implementations but track calls.
    pub spy: bool,
    /// Automock. Also what an empty options object means.
    pub mock: bool,
}

/// What a registration replaces the module with.
#[derive(Clone)]
pub enum MockSpec {
    /// Every exported function becomes a no-op mock.
    Automock,
    /// Every exported function becomes a call-through spy.
    Spy,
    /// Exports come from a factory.
    Factory(Arc<FactoryFn>),
}

impl MockSpec {
    pub fn factory(
        f: impl Fn(&FactoryScope<'_>) -> ModuleResult<Value> + Send + Sync + 'static,
    ) -> Self {
        Self::Factory(Arc::new(f))
    }

    /// `{ mock: true }` and an empty options object both automock. `spy` wins
    /// when both flags are set.
    pub fn from_options(options: MockOptions) -> Self {
        if options.spy { Self::Spy } else { Self::Automock }
    }

    fn origin(&self) -> ModuleOrigin {
        match self {
            MockSpec::Automock => ModuleOrigin::Automock,
            MockSpec::Spy => ModuleOrigin::Spy,
            MockSpec::Factory(_) => ModuleOrigin::Factory,
        }
    }
}

impl std::fmt::Debug for MockSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockSpec::Automock => write!(f, "Automock"),
            MockSpec::Spy => write!(f, "Spy"),
            MockSpec::Factory(_) => write!(f, "Factory"),
        }
    }
}

/// Registry settings
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryOptions {
    /// Reject hoisted registrations for modules that were already evaluated.
    pub strict_order: bool,
}

struct MockEntry {
    spec: MockSpec,
    hoisted: HoistedValues,
    instance: Option<Arc<ModuleInstance>>,
}

#[derive(Default)]
struct RegistryState {
    mocks: HashMap<String, MockEntry>,
    cache: HashMap<String, Arc<ModuleInstance>>,
}

struct RegistryInner {
    modules: Arc<ModuleSet>,
    options: RegistryOptions,
    tracker: Arc<MockTracker>,
    state: Mutex<RegistryState>,
}

/// Mock registration table plus module cache for one execution context.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct ModuleRegistry {
    inner: Arc<RegistryInner>,
}

impl ModuleRegistry {
    pub fn new(modules: Arc<ModuleSet>, options: RegistryOptions) -> Self {
        Self::with_tracker(modules, options, Arc::new(MockTracker::new()))
    }

    /// Share a mock tracker with the caller so bulk mock operations cover module mocks.
    pub fn with_tracker(
        modules: Arc<ModuleSet>,
        options: RegistryOptions,
        tracker: Arc<MockTracker>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                modules,
                options,
                tracker,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    pub fn modules(&self) -> &ModuleSet {
        &self.inner.modules
    }

    pub fn tracker(&self) -> &Arc<MockTracker> {
        &self.inner.tracker
    }

    pub fn resolve(&self, specifier: &str, referrer: Option<&str>) -> String {
        self.inner.modules.resolve(specifier, referrer)
    }

    /// Hoisted registration.
    ///
    /// If the target was already evaluated in this context the registration
    /// still lands, but only fresh imports see it; with `strict_order` it is
    /// rejected instead.
    pub fn mock(&self, specifier: &str, referrer: Option<&str>, spec: MockSpec) -> ModuleResult<()> {
        self.mock_with_hoisted(specifier, referrer, spec, HoistedValues::default())
    }

    /// Hoisted registration whose factory can read `hoisted` values.
    pub fn mock_with_hoisted(
        &self,
        specifier: &str,
        referrer: Option<&str>,
        spec: MockSpec,
        hoisted: HoistedValues,
    ) -> ModuleResult<()> {
        let path = self.resolve(specifier, referrer);
        if self.inner.state.lock().cache.contains_key(&path) {
            if self.inner.options.strict_order {
                return Err(MockUsageError::MockedAfterImport {
                    specifier: specifier.to_string(),
                }
                .into());
            }
            warn!(
                module = %path,
                "module was imported before it was mocked; existing imports keep the real module"
            );
        }
        self.register(path, spec, hoisted);
        Ok(())
    }

    /// Registration that takes effect for the next import, wherever it is called.
    pub fn do_mock(&self, specifier: &str, referrer: Option<&str>, spec: MockSpec) {
        let path = self.resolve(specifier, referrer);
        self.register(path, spec, HoistedValues::default());
    }

    fn register(&self, path: String, spec: MockSpec, hoisted: HoistedValues) {
        debug!(module = %path, mode = ?spec, "registering mock");
        self.inner.state.lock().mocks.insert(
            path,
            MockEntry {
                spec,
                hoisted,
                instance: None,
            },
        );
    }

    /// Remove a registration. Already imported instances are unaffected.
    pub fn unmock(&self, specifier: &str, referrer: Option<&str>) {
        let path = self.resolve(specifier, referrer);
        debug!(module = %path, "removing mock");
        self.inner.state.lock().mocks.remove(&path);
    }

    /// Same as [`unmock`](Self::unmock); kept separate to mirror the non-hoisted API.
    pub fn do_unmock(&self, specifier: &str, referrer: Option<&str>) {
        self.unmock(specifier, referrer);
    }

    pub fn is_mocked(&self, specifier: &str, referrer: Option<&str>) -> bool {
        let path = self.resolve(specifier, referrer);
        self.inner.state.lock().mocks.contains_key(&path)
    }

    /// Number of registrations.
    pub fn mock_count(&self) -> usize {
        self.inner.state.lock().mocks.len()
    }

    /// Whether the real module at `specifier` has been evaluated in this context.
    pub fn is_cached(&self, specifier: &str, referrer: Option<&str>) -> bool {
        let path = self.resolve(specifier, referrer);
        self.inner.state.lock().cache.contains_key(&path)
    }

    /// Drop every cached instance, real and mocked. Registrations stay.
    pub fn reset_modules(&self) {
        let mut state = self.inner.state.lock();
        state.cache.clear();
        for entry in state.mocks.values_mut() {
            entry.instance = None;
        }
        debug!("module cache cleared");
    }

    /// Import a module, honoring mock registrations.
    pub fn import(&self, specifier: &str, referrer: Option<&str>) -> ModuleResult<Arc<ModuleInstance>> {
        self.import_with_chain(specifier, referrer, &[])
    }

    /// Dynamic import. Yields to the scheduler before resolving.
    pub async fn import_dynamic(
        &self,
        specifier: &str,
        referrer: Option<&str>,
    ) -> ModuleResult<Arc<ModuleInstance>> {
        tokio::task::yield_now().await;
        self.import(specifier, referrer)
    }

    /// Import the real module, bypassing any registration.
    pub fn import_actual(
        &self,
        specifier: &str,
        referrer: Option<&str>,
    ) -> ModuleResult<Arc<ModuleInstance>> {
        let path = self.resolve(specifier, referrer);
        self.load_actual(&path, specifier, referrer, &[])
    }

    pub(crate) fn import_with_chain(
        &self,
        specifier: &str,
        referrer: Option<&str>,
        chain: &[String],
    ) -> ModuleResult<Arc<ModuleInstance>> {
        let path = self.resolve(specifier, referrer);

        let registration = {
            let state = self.inner.state.lock();
            match state.mocks.get(&path) {
                Some(entry) => match &entry.instance {
                    Some(instance) => return Ok(instance.clone()),
                    None => Some((entry.spec.clone(), entry.hoisted.clone())),
                },
                None => None,
            }
        };

        match registration {
            Some((spec, hoisted)) => self.load_mock(&path, spec, hoisted, chain),
            None => self.load_actual(&path, specifier, referrer, chain),
        }
    }

    fn load_actual(
        &self,
        path: &str,
        specifier: &str,
        referrer: Option<&str>,
        chain: &[String],
    ) -> ModuleResult<Arc<ModuleInstance>> {
        if let Some(instance) = self.inner.state.lock().cache.get(path) {
            return Ok(instance.clone());
        }
        let chain = enter(chain, path)?;

        let def = self
            .inner
            .modules
            .get(path)
            .cloned()
            .ok_or_else(|| ModuleError::NotFound {
                specifier: specifier.to_string(),
                referrer: referrer.unwrap_or("<root>").to_string(),
            })?;

        debug!(module = %path, "evaluating module");
        let exports = def.evaluate(&ModuleScope {
            registry: self,
            path,
            chain: &chain,
        })?;

        let instance = Arc::new(ModuleInstance::new(path, ModuleOrigin::Actual, exports));
        let mut state = self.inner.state.lock();
        Ok(state
            .cache
            .entry(path.to_string())
            .or_insert(instance)
            .clone())
    }

    fn load_mock(
        &self,
        path: &str,
        spec: MockSpec,
        hoisted: HoistedValues,
        chain: &[String],
    ) -> ModuleResult<Arc<ModuleInstance>> {
        let chain = enter(chain, path)?;
        let tracker = &self.inner.tracker;

        let exports = match &spec {
            MockSpec::Automock => {
                let actual = self.load_actual(path, path, None, &chain)?;
                automock_exports(actual.exports(), tracker)
            }
            MockSpec::Spy => {
                let actual = self.load_actual(path, path, None, &chain)?;
                spy_exports(actual.exports(), tracker)
            }
            MockSpec::Factory(factory) => {
                let scope = FactoryScope {
                    registry: self,
                    path,
                    hoisted: &hoisted,
                    chain: &chain,
                };
                let produced = factory(&scope).map_err(|e| match e {
                    ModuleError::Thrown(thrown) => ModuleError::evaluation(path, thrown),
                    other => other,
                })?;
                self.interop_factory_exports(path, produced)?
            }
        };

        debug!(module = %path, mode = ?spec, "instantiated mock");
        let instance = Arc::new(ModuleInstance::new(path, spec.origin(), exports));

        // a concurrent import may have stored its instance first; that one wins
        let mut state = self.inner.state.lock();
        match state.mocks.get_mut(path) {
            Some(entry) => Ok(entry.instance.get_or_insert(instance).clone()),
            None => Ok(instance),
        }
    }

    /// Factories must return an object. A missing `default` is synthesized from
    /// the whole object when the real module is CommonJS or default-exporting.
    fn interop_factory_exports(&self, path: &str, produced: Value) -> ModuleResult<Object> {
        let Value::Object(mut exports) = produced else {
            return Err(MockUsageError::FactoryNotObject {
                specifier: path.to_string(),
            }
            .into());
        };
        let wants_default = self.inner.modules.get(path).is_some_and(|def| {
            def.format() == ModuleFormat::CommonJs || def.has_default_export()
        });
        if wants_default && !exports.contains_key("default") {
            let whole = Value::Object(exports.clone());
            exports.insert("default".to_string(), whole);
        }
        Ok(exports)
    }
}

fn enter(chain: &[String], path: &str) -> ModuleResult<Vec<String>> {
    let mut next = chain.to_vec();
    next.push(path.to_string());
    if chain.iter().any(|p| p == path) {
        return Err(ModuleError::Cycle { chain: next });
    }
    Ok(next)
}

/// Handle passed to a mock factory.
pub struct FactoryScope<'a> {
    registry: &'a ModuleRegistry,
    path: &'a str,
    hoisted: &'a HoistedValues,
    chain: &'a [String],
}

impl FactoryScope<'_> {
    /// Resolved path of the module being mocked.
    pub fn path(&self) -> &str {
        self.path
    }

    /// The real module this factory stands in for.
    pub fn import_actual(&self) -> ModuleResult<Arc<ModuleInstance>> {
        self.registry
            .load_actual(self.path, self.path, None, self.chain)
    }

    /// Import another module. Mock registrations apply.
    pub fn import(&self, specifier: &str) -> ModuleResult<Arc<ModuleInstance>> {
        self.registry
            .import_with_chain(specifier, Some(self.path), self.chain)
    }

    /// Read a value produced by the test file's hoisted initializers.
    pub fn hoisted(&self, name: &str) -> ModuleResult<Value> {
        self.hoisted.get(name).cloned().ok_or_else(|| {
            MockUsageError::UnknownHoistedValue {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Create a mock function tracked by the owning context.
    pub fn mock_fn(&self, name: &str) -> Value {
        Value::from(self.registry.tracker().create(Some(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleDef;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry_with(defs: Vec<ModuleDef>) -> ModuleRegistry {
        let mut set = ModuleSet::new();
        for def in defs {
            set.insert(def);
        }
        ModuleRegistry::new(Arc::new(set), RegistryOptions::default())
    }

    fn dep() -> ModuleDef {
        ModuleDef::esm("/src/dep.js", |_| {
            let Value::Object(exports) = Value::object([
                ("greet", Value::function("greet", |_| Ok("real".into()))),
                ("NAME", Value::from("dep")),
            ]) else {
                unreachable!()
            };
            Ok(exports)
        })
    }

    #[test]
    fn test_import_is_cached() {
        let registry = registry_with(vec![dep()]);
        let a = registry.import("./dep", Some("/src/a.test.js")).unwrap();
        let b = registry.import("/src/dep.js", None).unwrap();
        assert!(a.same_instance(&b));
        assert!(!a.is_mocked());
    }

    #[test]
    fn test_not_found() {
        let registry = registry_with(vec![]);
        let err = registry.import("./nope", Some("/src/a.js")).unwrap_err();
        assert!(matches!(err, ModuleError::NotFound { .. }));
    }

    #[test]
    fn test_factory_mock_and_missing_export() {
        let registry = registry_with(vec![dep()]);
        registry
            .mock(
                "./dep",
                Some("/src/a.test.js"),
                MockSpec::factory(|_| Ok(Value::object([("greet", Value::function("greet", |_| Ok("fake".into())))]))),
            )
            .unwrap();

        let module = registry.import("./dep", Some("/src/a.test.js")).unwrap();
        assert_eq!(module.call("greet", &[]).unwrap(), Value::from("fake"));
        let err = module.get("NAME").unwrap_err();
        assert!(matches!(
            err,
            ModuleError::MockUsage(MockUsageError::MissingExport { .. })
        ));
    }

    #[test]
    fn test_factory_not_object() {
        let registry = registry_with(vec![dep()]);
        registry
            .mock("/src/dep.js", None, MockSpec::factory(|_| Ok(Value::from(1))))
            .unwrap();
        let err = registry.import("/src/dep.js", None).unwrap_err();
        assert!(err.is_usage_error());
    }

    #[test]
    fn test_factory_runs_once_per_cache_lifetime() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = registry_with(vec![dep()]);
        registry
            .mock(
                "/src/dep.js",
                None,
                MockSpec::factory(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::object([("NAME", Value::from("mocked"))]))
                }),
            )
            .unwrap();

        registry.import("/src/dep.js", None).unwrap();
        registry.import("/src/dep.js", None).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        registry.reset_modules();
        registry.import("/src/dep.js", None).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_mock_options() {
        let explicit = MockOptions {
            mock: true,
            ..Default::default()
        };
        assert!(matches!(MockSpec::from_options(explicit), MockSpec::Automock));
        assert!(matches!(MockSpec::from_options(MockOptions::default()), MockSpec::Automock));
        let spy = MockOptions {
            spy: true,
            mock: true,
        };
        assert!(matches!(MockSpec::from_options(spy), MockSpec::Spy));
    }

    #[test]
    fn test_concurrent_first_imports_share_one_mock_instance() {
        let registry = registry_with(vec![dep()]);
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let gate = barrier.clone();
        registry
            .mock(
                "/src/dep.js",
                None,
                MockSpec::factory(move |_| {
                    // both imports are inside the factory before either stores its result
                    gate.wait();
                    Ok(Value::object([("greet", Value::from(1))]))
                }),
            )
            .unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.import("/src/dep.js", None).unwrap())
            })
            .collect();
        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(instances[0].same_instance(&instances[1]));
        let again = registry.import("/src/dep.js", None).unwrap();
        assert!(again.same_instance(&instances[0]));
    }

    #[test]
    fn test_automock_tracks_mocks() {
        let registry = registry_with(vec![dep()]);
        registry.mock("/src/dep.js", None, MockSpec::Automock).unwrap();
        let module = registry.import("/src/dep.js", None).unwrap();
        assert_eq!(module.call("greet", &[]).unwrap(), Value::Undefined);
        assert_eq!(module.get("NAME").unwrap(), Value::from("dep"));
        assert_eq!(registry.tracker().len(), 1);
    }

    #[test]
    fn test_cycle_detected() {
        let a = ModuleDef::esm("/a.js", |scope| {
            scope.import("./b.js")?;
            Ok(Object::new())
        });
        let b = ModuleDef::esm("/b.js", |scope| {
            scope.import("./a.js")?;
            Ok(Object::new())
        });
        let registry = registry_with(vec![a, b]);
        let err = registry.import("/a.js", None).unwrap_err();
        match err {
            ModuleError::Cycle { chain } => assert_eq!(chain, vec!["/a.js", "/b.js", "/a.js"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_strict_order_rejects_late_mock() {
        let set = Arc::new(ModuleSet::new().module(dep()));
        let registry = ModuleRegistry::new(set, RegistryOptions { strict_order: true });
        registry.import("/src/dep.js", None).unwrap();
        let err = registry
            .mock("/src/dep.js", None, MockSpec::Automock)
            .unwrap_err();
        assert!(matches!(
            err,
            ModuleError::MockUsage(MockUsageError::MockedAfterImport { .. })
        ));
    }
}
