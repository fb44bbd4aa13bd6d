//! Loadable test files and the bundle that holds them
//!
//! A [`TestFile`] is what the build step hands the runner: the file's hoisted
//! value initializers, its hoisted mock registrations, and its top-level
//! collection code. Loading a file runs them in that order, so every
//! registration exists before the first import the collection code performs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use otter_test_mock::{
    HoistOutput, HoistedKind, HoistedValues, MockTracker, ModuleRegistry, ModuleResult, ModuleSet,
    MockSpec, MockUsageError, Value,
};
use tracing::{debug, warn};

use crate::collect::{CollectOutcome, Collector};
use crate::error::CollectionError;

/// Hoisted value initializer.
pub type HoistedInit = dyn Fn(&HoistScope<'_>) -> ModuleResult<Value> + Send + Sync;

/// Top-level code of a test file.
pub type CollectFn = dyn Fn(&mut Collector) -> Result<(), CollectionError> + Send + Sync;

/// What a hoisted initializer can see.
pub struct HoistScope<'a> {
    values: &'a BTreeMap<String, Value>,
    tracker: &'a MockTracker,
}

impl HoistScope<'_> {
    /// A value produced by an earlier initializer.
    pub fn get(&self, name: &str) -> ModuleResult<Value> {
        self.values.get(name).cloned().ok_or_else(|| {
            MockUsageError::UnknownHoistedValue {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn mock_fn(&self, name: &str) -> Value {
        Value::from(self.tracker.create(Some(name)))
    }
}

#[derive(Clone)]
enum Registration {
    Mock { specifier: String, spec: MockSpec },
    Unmock { specifier: String },
}

/// One test file.
#[derive(Clone)]
pub struct TestFile {
    path: PathBuf,
    hoisted: Vec<(String, Arc<HoistedInit>)>,
    registrations: Vec<Registration>,
    collect: Arc<CollectFn>,
}

impl std::fmt::Debug for TestFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestFile")
            .field("path", &self.path)
            .field("hoisted", &self.hoisted.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("registrations", &self.registrations.len())
            .finish_non_exhaustive()
    }
}

impl TestFile {
    pub fn new<F, R>(path: impl Into<PathBuf>, collect: F) -> Self
    where
        F: Fn(&mut Collector) -> R + Send + Sync + 'static,
        R: CollectOutcome,
    {
        Self {
            path: path.into(),
            hoisted: Vec::new(),
            registrations: Vec::new(),
            collect: Arc::new(move |c: &mut Collector| collect(c).into_collect_result()),
        }
    }

    /// Add a hoisted value. Initializers run in declaration order before any registration.
    pub fn hoisted(
        mut self,
        name: &str,
        init: impl Fn(&HoistScope<'_>) -> ModuleResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.hoisted.push((name.to_string(), Arc::new(init)));
        self
    }

    /// Add a hoisted mock registration.
    pub fn mock(mut self, specifier: &str, spec: MockSpec) -> Self {
        self.registrations.push(Registration::Mock {
            specifier: specifier.to_string(),
            spec,
        });
        self
    }

    /// Add a hoisted unmock.
    pub fn unmock(mut self, specifier: &str) -> Self {
        self.registrations.push(Registration::Unmock {
            specifier: specifier.to_string(),
        });
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check this file's hoisted registrations against what the hoisting pass
    /// found in its source: same kinds and specifiers, in the same order.
    pub fn matches_hoisted(&self, output: &HoistOutput) -> bool {
        let calls: Vec<(HoistedKind, &str)> = output
            .hoisted
            .iter()
            .filter(|call| call.kind != HoistedKind::Hoisted)
            .map(|call| (call.kind, call.specifier.as_deref().unwrap_or_default()))
            .collect();
        let ours: Vec<(HoistedKind, &str)> = self
            .registrations
            .iter()
            .map(|r| match r {
                Registration::Mock { specifier, .. } => (HoistedKind::Mock, specifier.as_str()),
                Registration::Unmock { specifier } => (HoistedKind::Unmock, specifier.as_str()),
            })
            .collect();
        calls == ours
    }

    fn referrer(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Phase 0 and 1: evaluate hoisted values, then install registrations.
    pub(crate) fn prepare(&self, registry: &ModuleRegistry) -> Result<HoistedValues, CollectionError> {
        let mut values = BTreeMap::new();
        for (name, init) in &self.hoisted {
            let scope = HoistScope {
                values: &values,
                tracker: registry.tracker(),
            };
            let value = init(&scope).map_err(|source| CollectionError::Hoisted {
                name: name.clone(),
                source,
            })?;
            values.insert(name.clone(), value);
        }
        let hoisted: HoistedValues = Arc::new(values);

        let referrer = self.referrer();
        for registration in &self.registrations {
            match registration {
                Registration::Mock { specifier, spec } => {
                    registry.mock_with_hoisted(specifier, Some(&referrer), spec.clone(), hoisted.clone())?;
                }
                Registration::Unmock { specifier } => registry.unmock(specifier, Some(&referrer)),
            }
        }
        debug!(
            file = %self.path.display(),
            hoisted = hoisted.len(),
            registrations = self.registrations.len(),
            "prepared test file"
        );
        Ok(hoisted)
    }

    /// Phase 2: run the file's top-level code.
    pub(crate) fn collect(&self, collector: &mut Collector) -> Result<(), CollectionError> {
        (self.collect)(collector)
    }
}

/// Everything a worker can run: shared source modules plus test files by path.
#[derive(Clone, Default)]
pub struct Bundle {
    modules: Arc<ModuleSet>,
    files: BTreeMap<PathBuf, TestFile>,
}

impl Bundle {
    pub fn new(modules: ModuleSet) -> Self {
        Self {
            modules: Arc::new(modules),
            files: BTreeMap::new(),
        }
    }

    pub fn file(mut self, file: TestFile) -> Self {
        self.insert(file);
        self
    }

    pub fn insert(&mut self, file: TestFile) {
        if self.files.contains_key(file.path()) {
            warn!(file = %file.path.display(), "replacing test file");
        }
        self.files.insert(file.path.clone(), file);
    }

    pub fn get(&self, path: &Path) -> Option<&TestFile> {
        self.files.get(path)
    }

    /// Registered test file paths in sorted order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }

    pub fn modules(&self) -> &Arc<ModuleSet> {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
