//! Derive mocked exports from a module's real exports.

use crate::mock_fn::{MockFn, MockTracker};
use crate::value::{Object, Value};

/// Replace every function with a no-op mock, recursing into objects.
///
/// Arrays are emptied and primitives are kept as they are.
pub fn automock_exports(exports: &Object, tracker: &MockTracker) -> Object {
    exports
        .iter()
        .map(|(key, value)| (key.clone(), automock_value(value, tracker)))
        .collect()
}

fn automock_value(value: &Value, tracker: &MockTracker) -> Value {
    match value {
        Value::Function(f) => Value::from(tracker.track(MockFn::with_name(f.name()))),
        Value::Object(props) => Value::Object(automock_exports(props, tracker)),
        Value::Array(_) => Value::Array(Vec::new()),
        other => other.clone(),
    }
}

/// Wrap every function in a call-through spy, recursing into objects and arrays.
pub fn spy_exports(exports: &Object, tracker: &MockTracker) -> Object {
    exports
        .iter()
        .map(|(key, value)| (key.clone(), spy_value(value, tracker)))
        .collect()
}

fn spy_value(value: &Value, tracker: &MockTracker) -> Value {
    match value {
        Value::Function(f) => Value::from(tracker.track(MockFn::spy(f.clone()))),
        Value::Object(props) => Value::Object(spy_exports(props, tracker)),
        Value::Array(items) => Value::Array(items.iter().map(|v| spy_value(v, tracker)).collect()),
        other => other.clone(),
    }
}
