//! Collected suite tree
//!
//! The tree is built once per file by the [`Collector`](crate::collect::Collector),
//! rewritten once by mode interpretation, and then only read.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::context::{SuiteContext, TestContext};
use crate::error::TestError;

/// Separator between suite names in a full test name.
pub const NAME_SEPARATOR: &str = " > ";

/// Test or suite body.
pub type TestFn = Arc<dyn Fn(TestContext) -> BoxFuture<'static, Result<(), TestError>> + Send + Sync>;

/// `beforeEach` / `afterEach` callback.
pub type EachHookFn = TestFn;

/// `beforeAll` / `afterAll` callback.
pub type SuiteHookFn =
    Arc<dyn Fn(SuiteContext) -> BoxFuture<'static, Result<(), TestError>> + Send + Sync>;

/// Run mode of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Run,
    Skip,
    Only,
    Todo,
}

/// Explicit concurrency marker. Unmarked nodes inherit from their parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Concurrent,
    Sequential,
}

/// Resolve a node's effective concurrency from its marker and its parent's.
pub fn is_concurrent(marker: Option<Concurrency>, parent_concurrent: bool) -> bool {
    match marker {
        Some(Concurrency::Concurrent) => true,
        Some(Concurrency::Sequential) => false,
        None => parent_concurrent,
    }
}

/// Lifecycle hooks registered directly on one suite, in registration order.
#[derive(Default, Clone)]
pub struct Hooks {
    pub before_all: Vec<SuiteHookFn>,
    pub after_all: Vec<SuiteHookFn>,
    pub before_each: Vec<EachHookFn>,
    pub after_each: Vec<EachHookFn>,
}

impl Hooks {
    pub fn is_empty(&self) -> bool {
        self.before_all.is_empty()
            && self.after_all.is_empty()
            && self.before_each.is_empty()
            && self.after_each.is_empty()
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_all", &self.before_all.len())
            .field("after_all", &self.after_all.len())
            .field("before_each", &self.before_each.len())
            .field("after_each", &self.after_each.len())
            .finish()
    }
}

/// A test case.
#[derive(Clone)]
pub struct Test {
    /// Declaration order within the file
    pub id: u32,
    pub name: String,
    pub full_name: String,
    pub mode: Mode,
    pub concurrency: Option<Concurrency>,
    /// Expected to fail
    pub fails: bool,
    pub timeout: Option<Duration>,
    pub retry: Option<u32>,
    /// `None` only for todo tests declared without a body
    pub body: Option<TestFn>,
}

impl fmt::Debug for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Test")
            .field("id", &self.id)
            .field("full_name", &self.full_name)
            .field("mode", &self.mode)
            .field("concurrency", &self.concurrency)
            .field("fails", &self.fails)
            .finish_non_exhaustive()
    }
}

/// A named group of tests and suites.
#[derive(Debug, Clone, Default)]
pub struct Suite {
    /// Empty for the file-level root suite
    pub name: String,
    pub full_name: String,
    pub mode: Mode,
    pub concurrency: Option<Concurrency>,
    pub hooks: Hooks,
    pub children: Vec<Task>,
}

/// Child of a suite.
#[derive(Debug, Clone)]
pub enum Task {
    Suite(Suite),
    Test(Test),
}

impl Task {
    pub fn mode(&self) -> Mode {
        match self {
            Task::Suite(s) => s.mode,
            Task::Test(t) => t.mode,
        }
    }

    pub fn set_mode(&mut self, mode: Mode) {
        match self {
            Task::Suite(s) => s.mode = mode,
            Task::Test(t) => t.mode = mode,
        }
    }

    pub fn concurrency(&self) -> Option<Concurrency> {
        match self {
            Task::Suite(s) => s.concurrency,
            Task::Test(t) => t.concurrency,
        }
    }

    pub fn full_name(&self) -> &str {
        match self {
            Task::Suite(s) => &s.full_name,
            Task::Test(t) => &t.full_name,
        }
    }
}

impl Suite {
    /// The implicit file-level suite.
    pub fn root() -> Self {
        Self::default()
    }

    /// Join a child name onto this suite's full name.
    pub fn child_name(&self, name: &str) -> String {
        if self.full_name.is_empty() {
            name.to_string()
        } else {
            format!("{}{NAME_SEPARATOR}{name}", self.full_name)
        }
    }

    /// Every test in the subtree, depth first in declaration order.
    pub fn tests(&self) -> Vec<&Test> {
        let mut out = Vec::new();
        self.walk_tests(&mut |t| out.push(t));
        out
    }

    pub fn walk_tests<'a>(&'a self, f: &mut impl FnMut(&'a Test)) {
        for child in &self.children {
            match child {
                Task::Test(t) => f(t),
                Task::Suite(s) => s.walk_tests(f),
            }
        }
    }

    /// Find a direct or nested suite by full name.
    pub fn find_suite(&self, full_name: &str) -> Option<&Suite> {
        if self.full_name == full_name {
            return Some(self);
        }
        self.children.iter().find_map(|c| match c {
            Task::Suite(s) => s.find_suite(full_name),
            Task::Test(_) => None,
        })
    }

    /// Whether any node below this suite is marked only.
    pub fn has_only(&self) -> bool {
        self.children.iter().any(|c| match c {
            Task::Test(t) => t.mode == Mode::Only,
            Task::Suite(s) => s.mode == Mode::Only || s.has_only(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test(id: u32, full_name: &str, mode: Mode) -> Task {
        Task::Test(Test {
            id,
            name: full_name.rsplit(NAME_SEPARATOR).next().unwrap_or_default().to_string(),
            full_name: full_name.to_string(),
            mode,
            concurrency: None,
            fails: false,
            timeout: None,
            retry: None,
            body: None,
        })
    }

    #[test]
    fn test_child_name() {
        let root = Suite::root();
        assert_eq!(root.child_name("a"), "a");
        let suite = Suite {
            name: "a".to_string(),
            full_name: "a".to_string(),
            ..Default::default()
        };
        assert_eq!(suite.child_name("b"), "a > b");
    }

    #[test]
    fn test_walk_and_only() {
        let inner = Suite {
            name: "inner".to_string(),
            full_name: "inner".to_string(),
            children: vec![test(1, "inner > b", Mode::Only)],
            ..Default::default()
        };
        let root = Suite {
            children: vec![test(0, "a", Mode::Run), Task::Suite(inner)],
            ..Suite::root()
        };
        let names: Vec<_> = root.tests().iter().map(|t| t.full_name.as_str()).collect();
        assert_eq!(names, vec!["a", "inner > b"]);
        assert!(root.has_only());
        assert!(root.find_suite("inner").is_some());
    }

    #[test]
    fn test_is_concurrent() {
        assert!(is_concurrent(None, true));
        assert!(!is_concurrent(Some(Concurrency::Sequential), true));
        assert!(is_concurrent(Some(Concurrency::Concurrent), false));
    }
}
