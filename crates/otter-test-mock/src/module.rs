//! Module definitions and evaluated module instances

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ModuleError, ModuleResult, MockUsageError, Thrown};
use crate::registry::ModuleRegistry;
use crate::resolve::{Resolver, ResolverConfig};
use crate::value::{Object, Value};

/// Module system a definition was authored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleFormat {
    #[default]
    Esm,
    CommonJs,
}

/// Module body: evaluates the module and returns its exports.
pub type ModuleBody = dyn Fn(&ModuleScope<'_>) -> ModuleResult<Object> + Send + Sync;

/// A module that can be evaluated by a [`ModuleRegistry`].
#[derive(Clone)]
pub struct ModuleDef {
    path: String,
    format: ModuleFormat,
    has_default_export: bool,
    body: Arc<ModuleBody>,
}

impl ModuleDef {
    /// An ES module at `path`.
    pub fn esm(
        path: impl Into<String>,
        body: impl Fn(&ModuleScope<'_>) -> ModuleResult<Object> + Send + Sync + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            format: ModuleFormat::Esm,
            has_default_export: false,
            body: Arc::new(body),
        }
    }

    /// A CommonJS module at `path`. Its exports object doubles as its default export.
    pub fn commonjs(
        path: impl Into<String>,
        body: impl Fn(&ModuleScope<'_>) -> ModuleResult<Object> + Send + Sync + 'static,
    ) -> Self {
        Self {
            format: ModuleFormat::CommonJs,
            has_default_export: true,
            ..Self::esm(path, body)
        }
    }

    /// Mark an ES module as having a default export.
    pub fn with_default_export(mut self) -> Self {
        self.has_default_export = true;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn format(&self) -> ModuleFormat {
        self.format
    }

    pub fn has_default_export(&self) -> bool {
        self.has_default_export
    }

    pub(crate) fn evaluate(&self, scope: &ModuleScope<'_>) -> ModuleResult<Object> {
        (self.body)(scope).map_err(|e| match e {
            ModuleError::Thrown(thrown) => ModuleError::evaluation(&self.path, thrown),
            other => other,
        })
    }
}

impl std::fmt::Debug for ModuleDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDef")
            .field("path", &self.path)
            .field("format", &self.format)
            .finish()
    }
}

/// The set of modules a run can import, plus how specifiers resolve to them.
#[derive(Debug, Default, Clone)]
pub struct ModuleSet {
    modules: HashMap<String, Arc<ModuleDef>>,
    resolver: Resolver,
}

impl ModuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(config: ResolverConfig) -> Self {
        Self {
            modules: HashMap::new(),
            resolver: Resolver::new(config),
        }
    }

    /// Add a module definition.
    pub fn module(mut self, def: ModuleDef) -> Self {
        self.insert(def);
        self
    }

    pub fn insert(&mut self, def: ModuleDef) {
        self.modules.insert(def.path.clone(), Arc::new(def));
    }

    pub fn get(&self, path: &str) -> Option<&Arc<ModuleDef>> {
        self.modules.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.modules.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Resolve a specifier to its canonical path.
    pub fn resolve(&self, specifier: &str, referrer: Option<&str>) -> String {
        self.resolver
            .resolve(specifier, referrer, |candidate| self.contains(candidate))
    }
}

/// How an instance came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleOrigin {
    Actual,
    Factory,
    Automock,
    Spy,
}

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// An evaluated module. Two imports observe the same instance iff their ids match.
#[derive(Debug)]
pub struct ModuleInstance {
    id: u64,
    path: String,
    origin: ModuleOrigin,
    exports: Object,
}

impl ModuleInstance {
    pub(crate) fn new(path: &str, origin: ModuleOrigin, exports: Object) -> Self {
        Self {
            id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            path: path.to_string(),
            origin,
            exports,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn origin(&self) -> ModuleOrigin {
        self.origin
    }

    pub fn is_mocked(&self) -> bool {
        self.origin != ModuleOrigin::Actual
    }

    pub fn exports(&self) -> &Object {
        &self.exports
    }

    /// Read a named export.
    ///
    /// Reading an export a mock factory did not provide is a usage error;
    /// anywhere else a missing export reads as `undefined`.
    pub fn get(&self, name: &str) -> ModuleResult<Value> {
        match self.exports.get(name) {
            Some(value) => Ok(value.clone()),
            None if self.origin == ModuleOrigin::Factory => {
                Err(MockUsageError::MissingExport {
                    specifier: self.path.clone(),
                    export: name.to_string(),
                }
                .into())
            }
            None => Ok(Value::Undefined),
        }
    }

    /// The default export.
    pub fn default_export(&self) -> ModuleResult<Value> {
        self.get("default")
    }

    /// Call an exported function.
    pub fn call(&self, name: &str, args: &[Value]) -> ModuleResult<Value> {
        Ok(self.get(name)?.call(args)?)
    }

    /// Same instance (module identity).
    pub fn same_instance(&self, other: &ModuleInstance) -> bool {
        self.id == other.id
    }
}

/// Handle passed to a module body while it evaluates.
pub struct ModuleScope<'a> {
    pub(crate) registry: &'a ModuleRegistry,
    pub(crate) path: &'a str,
    pub(crate) chain: &'a [String],
}

impl ModuleScope<'_> {
    /// Path of the module being evaluated.
    pub fn path(&self) -> &str {
        self.path
    }

    /// Import a dependency. Mock registrations apply.
    pub fn import(&self, specifier: &str) -> ModuleResult<Arc<ModuleInstance>> {
        self.registry
            .import_with_chain(specifier, Some(self.path), self.chain)
    }

    /// Throw from the module body.
    pub fn throw(&self, message: impl Into<String>) -> ModuleError {
        ModuleError::Thrown(Thrown::error(message))
    }
}
