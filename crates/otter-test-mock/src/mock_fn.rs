//! Mock functions with call tracking and configurable behavior.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::Thrown;
use crate::value::{Function, NativeFn, Value};

/// A call record for a mock function.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    /// Arguments passed to the call.
    pub args: Vec<Value>,
    /// Timestamp of the call.
    pub timestamp_ms: u64,
}

/// Outcome of a recorded call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockResult {
    Return(Value),
    Throw(Thrown),
}

#[derive(Clone)]
enum Behavior {
    Return(Value),
    Implementation(Arc<NativeFn>),
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    results: Vec<MockResult>,
    once: VecDeque<Behavior>,
    persistent: Option<Behavior>,
    /// Original implementation (for spies).
    original: Option<Function>,
    restored: bool,
}

/// A mock function that tracks calls and can be configured.
///
/// `MockFn` is a handle: clones share the same call log and behavior.
#[derive(Clone)]
pub struct MockFn {
    name: Arc<str>,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockFn {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFn {
    /// Create a new mock function that returns `undefined`.
    pub fn new() -> Self {
        Self::with_name("vi.fn()")
    }

    /// Create a named mock function.
    pub fn with_name(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Create a mock with a persistent implementation.
    pub fn with_implementation(
        name: &str,
        f: impl Fn(&[Value]) -> Result<Value, Thrown> + Send + Sync + 'static,
    ) -> Self {
        let mock = Self::with_name(name);
        mock.mock_implementation(f);
        mock
    }

    /// Create a spy that calls through to `original` until told otherwise.
    pub fn spy(original: Function) -> Self {
        let mock = Self::with_name(original.name());
        mock.state.lock().original = Some(original);
        mock
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ptr_eq(&self, other: &MockFn) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Invoke the mock.
    ///
    /// Queued one-shot behaviors win, then the persistent one, then the
    /// spied original, then `undefined`.
    pub fn call(&self, args: &[Value]) -> Result<Value, Thrown> {
        let behavior = {
            let mut state = self.state.lock();
            state.calls.push(MockCall {
                args: args.to_vec(),
                timestamp_ms: now_ms(),
            });
            if state.restored {
                None
            } else {
                state.once.pop_front().or_else(|| state.persistent.clone())
            }
        };

        // The lock is released here so implementations may call back into the mock.
        let outcome = match behavior {
            Some(Behavior::Return(value)) => Ok(value),
            Some(Behavior::Implementation(f)) => f(args),
            None => {
                let original = self.state.lock().original.clone();
                match original {
                    Some(original) => original.call(args),
                    None => Ok(Value::Undefined),
                }
            }
        };

        self.state.lock().results.push(match &outcome {
            Ok(value) => MockResult::Return(value.clone()),
            Err(thrown) => MockResult::Throw(thrown.clone()),
        });
        outcome
    }

    /// Always return `value`.
    pub fn mock_return_value(&self, value: impl Into<Value>) -> &Self {
        self.state.lock().persistent = Some(Behavior::Return(value.into()));
        self
    }

    /// Return `value` for the next call only.
    pub fn mock_return_value_once(&self, value: impl Into<Value>) -> &Self {
        self.state
            .lock()
            .once
            .push_back(Behavior::Return(value.into()));
        self
    }

    /// Replace the implementation.
    pub fn mock_implementation(
        &self,
        f: impl Fn(&[Value]) -> Result<Value, Thrown> + Send + Sync + 'static,
    ) -> &Self {
        self.state.lock().persistent = Some(Behavior::Implementation(Arc::new(f)));
        self
    }

    /// Replace the implementation for the next call only.
    pub fn mock_implementation_once(
        &self,
        f: impl Fn(&[Value]) -> Result<Value, Thrown> + Send + Sync + 'static,
    ) -> &Self {
        self.state
            .lock()
            .once
            .push_back(Behavior::Implementation(Arc::new(f)));
        self
    }

    /// Throw `thrown` on every call.
    pub fn mock_throw(&self, thrown: Thrown) -> &Self {
        self.mock_implementation(move |_| Err(thrown.clone()))
    }

    /// Forget recorded calls and results.
    pub fn mock_clear(&self) {
        let mut state = self.state.lock();
        state.calls.clear();
        state.results.clear();
    }

    /// Clear calls and drop every configured behavior.
    ///
    /// Spies go back to calling through.
    pub fn mock_reset(&self) {
        let mut state = self.state.lock();
        state.calls.clear();
        state.results.clear();
        state.once.clear();
        state.persistent = None;
    }

    /// Reset, and for spies hand back the original implementation.
    ///
    /// A restored spy keeps recording calls but forwards straight to the
    /// original, ignoring any behavior configured afterwards.
    pub fn mock_restore(&self) -> Option<Function> {
        self.mock_reset();
        let mut state = self.state.lock();
        if state.original.is_some() {
            state.restored = true;
        }
        state.original.clone()
    }

    /// Whether this mock wraps an original implementation.
    pub fn is_spy(&self) -> bool {
        self.state.lock().original.is_some()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn was_called(&self) -> bool {
        self.call_count() > 0
    }

    pub fn was_called_times(&self, n: usize) -> bool {
        self.call_count() == n
    }

    pub fn was_called_with(&self, args: &[Value]) -> bool {
        self.state.lock().calls.iter().any(|c| c.args == args)
    }

    pub fn last_call_args(&self) -> Option<Vec<Value>> {
        self.state.lock().calls.last().map(|c| c.args.clone())
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn results(&self) -> Vec<MockResult> {
        self.state.lock().results.clone()
    }
}

impl fmt::Debug for MockFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockFn")
            .field("name", &self.name)
            .field("calls", &self.call_count())
            .finish()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Weak entry in a [`MockTracker`]. Dropping the last handle drops the mock.
#[derive(Debug)]
struct Tracked {
    name: Arc<str>,
    state: Weak<Mutex<MockState>>,
}

impl Tracked {
    fn upgrade(&self) -> Option<MockFn> {
        self.state.upgrade().map(|state| MockFn {
            name: self.name.clone(),
            state,
        })
    }
}

/// Mocks created within one execution context, for bulk clear/reset/restore.
///
/// Entries are weak: a mock nobody references any more (for example an
/// automocked export of a module dropped by `reset_modules`) is pruned on the
/// next registration.
#[derive(Debug, Default)]
pub struct MockTracker {
    mocks: Mutex<Vec<Tracked>>,
}

impl MockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `mock` and hand it back.
    pub fn track(&self, mock: MockFn) -> MockFn {
        let mut mocks = self.mocks.lock();
        mocks.retain(|m| m.state.strong_count() > 0);
        mocks.push(Tracked {
            name: mock.name.clone(),
            state: Arc::downgrade(&mock.state),
        });
        mock
    }

    fn live(&self) -> Vec<MockFn> {
        self.mocks.lock().iter().filter_map(Tracked::upgrade).collect()
    }

    /// Create a tracked mock.
    pub fn create(&self, name: Option<&str>) -> MockFn {
        self.track(match name {
            Some(n) => MockFn::with_name(n),
            None => MockFn::new(),
        })
    }

    /// Replace `object[key]` with a tracked spy around the current value.
    pub fn spy_on(&self, object: &mut Value, key: &str) -> Result<MockFn, Thrown> {
        let Value::Object(props) = object else {
            return Err(Thrown::type_error(format!(
                "cannot spy on property \"{key}\" of {}",
                object.type_name()
            )));
        };
        let original = match props.get(key) {
            Some(Value::Function(f)) => f.clone(),
            _ => {
                return Err(Thrown::type_error(format!(
                    "\"{key}\" is not a function"
                )));
            }
        };
        let spy = self.track(MockFn::spy(original));
        props.insert(key.to_string(), Value::from(spy.clone()));
        Ok(spy)
    }

    /// Number of tracked mocks still alive.
    pub fn len(&self) -> usize {
        self.mocks.lock().iter().filter(|m| m.state.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear_all(&self) {
        for mock in self.live() {
            mock.mock_clear();
        }
    }

    pub fn reset_all(&self) {
        for mock in self.live() {
            mock.mock_reset();
        }
    }

    /// Restore every spy. Plain mocks are reset.
    pub fn restore_all(&self) {
        for mock in self.live() {
            mock.mock_restore();
        }
    }

    /// Forget every tracked mock.
    pub fn release(&self) {
        self.mocks.lock().clear();
    }
}
