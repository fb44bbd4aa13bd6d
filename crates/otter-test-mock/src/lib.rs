//! # Otter Test Mock
//!
//! Module mocking for the Otter test runner.
//!
//! - [`ModuleRegistry`]: per-context mock registration table and module cache
//! - [`MockFn`]: mock functions with call tracking
//! - [`hoist_mocks`]: source pass that moves mock registrations above imports
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use otter_test_mock::{ModuleDef, ModuleRegistry, ModuleSet, MockSpec, RegistryOptions, Value};
//!
//! let modules = ModuleSet::new().module(ModuleDef::esm("/src/math.js", |_| {
//!     let mut exports = otter_test_mock::Object::new();
//!     exports.insert("add".into(), Value::function("add", |_| Ok(Value::from(3))));
//!     Ok(exports)
//! }));
//! let registry = ModuleRegistry::new(Arc::new(modules), RegistryOptions::default());
//! registry.mock("./math", Some("/src/math.test.js"), MockSpec::Automock)?;
//!
//! let math = registry.import("./math", Some("/src/math.test.js"))?;
//! assert_eq!(math.call("add", &[])?, Value::Undefined);
//! # Ok::<(), otter_test_mock::ModuleError>(())
//! ```

#![warn(clippy::all)]

pub mod automock;
pub mod error;
pub mod hoist;
pub mod mock_fn;
pub mod module;
pub mod registry;
pub mod resolve;
pub mod value;

pub use error::{HoistError, ModuleError, ModuleResult, MockUsageError, Thrown};
pub use hoist::{HoistOptions, HoistOutput, HoistedCall, HoistedKind, hoist_mocks};
pub use mock_fn::{MockCall, MockFn, MockResult, MockTracker};
pub use module::{ModuleDef, ModuleFormat, ModuleInstance, ModuleOrigin, ModuleScope, ModuleSet};
pub use registry::{
    FactoryFn, FactoryScope, HoistedValues, MockOptions, MockSpec, ModuleRegistry,
    RegistryOptions,
};
pub use resolve::{Resolver, ResolverConfig};
pub use value::{Function, NativeFn, Object, Value};
