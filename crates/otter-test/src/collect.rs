//! Collection pass: declarative calls build the suite tree
//!
//! ```no_run
//! # use otter_test::collect::Collector;
//! # use otter_test::expect::expect;
//! # fn file(c: &mut Collector) {
//! c.describe("math", |c| {
//!     c.before_each(|_ctx| async {});
//!     c.it("adds", |_ctx| async { expect(1 + 1).to_be(2) });
//!     c.test("add %i + %i = %i")
//!         .concurrent()
//!         .each(vec![serde_json::json!([1, 2, 3])], |_ctx, args| async move {
//!             let sum = args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0);
//!             expect(sum).to_be(args[2].as_i64().unwrap_or(0))
//!         });
//!     c.todo("subtracts");
//! });
//! # }
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use otter_test_mock::{HoistedValues, ModuleInstance, ModuleResult, Value};
use serde_json::Value as Json;
use tracing::trace;

use crate::context::{IntoTestResult, Mocker, SuiteContext, TestContext, boxed};
use crate::each::{format_name, row_args};
use crate::error::CollectionError;
use crate::tree::{Concurrency, Mode, Suite, Task, Test, TestFn};

/// Values a suite callback may return.
pub trait CollectOutcome {
    fn into_collect_result(self) -> Result<(), CollectionError>;
}

impl CollectOutcome for () {
    fn into_collect_result(self) -> Result<(), CollectionError> {
        Ok(())
    }
}

impl<E: Into<CollectionError>> CollectOutcome for Result<(), E> {
    fn into_collect_result(self) -> Result<(), CollectionError> {
        self.map_err(Into::into)
    }
}

/// Modifiers shared by test and suite builders.
#[derive(Debug, Clone, Default)]
struct TaskOptions {
    only: bool,
    skip: bool,
    todo: bool,
    concurrency: Option<Concurrency>,
    fails: bool,
    timeout: Option<Duration>,
    retry: Option<u32>,
}

impl TaskOptions {
    fn mode(&self) -> Mode {
        if self.only {
            Mode::Only
        } else if self.skip {
            Mode::Skip
        } else if self.todo {
            Mode::Todo
        } else {
            Mode::Run
        }
    }
}

/// Timeout and retry a suite hands down to the tests declared in it.
#[derive(Debug, Clone, Copy, Default)]
struct Inherited {
    timeout: Option<Duration>,
    retry: Option<u32>,
}

/// Builds the suite tree for one file.
pub struct Collector {
    file: PathBuf,
    mocker: Mocker,
    hoisted: HoistedValues,
    /// Open suites; index 0 is the file-level root
    stack: Vec<(Suite, Inherited)>,
    next_id: u32,
    error: Option<CollectionError>,
}

impl Collector {
    pub(crate) fn new(file: &Path, mocker: Mocker, hoisted: HoistedValues) -> Self {
        Self {
            file: file.to_path_buf(),
            mocker,
            hoisted,
            stack: vec![(Suite::root(), Inherited::default())],
            next_id: 0,
            error: None,
        }
    }

    /// Close collection. The first error recorded by a suite callback wins.
    pub(crate) fn finish(mut self) -> Result<Suite, CollectionError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        // Unbalanced stacks cannot happen: every push is paired with a pop.
        while self.stack.len() > 1 {
            self.close_suite();
        }
        match self.stack.pop() {
            Some((root, _)) => Ok(root),
            None => Err(CollectionError::Message("suite stack underflow".to_string())),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn mocker(&self) -> &Mocker {
        &self.mocker
    }

    /// Value produced by one of the file's hoisted initializers.
    pub fn hoisted(&self, name: &str) -> Result<Value, CollectionError> {
        self.hoisted.get(name).cloned().ok_or_else(|| {
            otter_test_mock::MockUsageError::UnknownHoistedValue {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn import(&self, specifier: &str) -> ModuleResult<Arc<ModuleInstance>> {
        self.mocker.import(specifier)
    }

    pub fn import_actual(&self, specifier: &str) -> ModuleResult<Arc<ModuleInstance>> {
        self.mocker.import_actual(specifier)
    }

    /// Declare a suite.
    pub fn describe<F, R>(&mut self, name: &str, f: F)
    where
        F: FnOnce(&mut Collector) -> R,
        R: CollectOutcome,
    {
        self.suite(name).run(f)
    }

    pub fn suite(&mut self, name: &str) -> SuiteBuilder<'_> {
        SuiteBuilder {
            collector: self,
            name: name.to_string(),
            options: TaskOptions::default(),
        }
    }

    /// Declare a test.
    pub fn it<F, Fut, R>(&mut self, name: &str, f: F)
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoTestResult,
    {
        self.test(name).run(f)
    }

    pub fn test(&mut self, name: &str) -> TestBuilder<'_> {
        TestBuilder {
            collector: self,
            name: name.to_string(),
            options: TaskOptions::default(),
        }
    }

    /// Declare a test that is not written yet.
    pub fn todo(&mut self, name: &str) {
        let options = TaskOptions {
            todo: true,
            ..Default::default()
        };
        self.push_test(name.to_string(), &options, None);
    }

    pub fn before_all<F, Fut, R>(&mut self, f: F)
    where
        F: Fn(SuiteContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoTestResult,
    {
        self.current().hooks.before_all.push(boxed(f));
    }

    pub fn after_all<F, Fut, R>(&mut self, f: F)
    where
        F: Fn(SuiteContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoTestResult,
    {
        self.current().hooks.after_all.push(boxed(f));
    }

    pub fn before_each<F, Fut, R>(&mut self, f: F)
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoTestResult,
    {
        self.current().hooks.before_each.push(boxed(f));
    }

    pub fn after_each<F, Fut, R>(&mut self, f: F)
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoTestResult,
    {
        self.current().hooks.after_each.push(boxed(f));
    }

    fn current(&mut self) -> &mut Suite {
        let last = self.stack.len() - 1;
        &mut self.stack[last].0
    }

    fn inherited(&self) -> Inherited {
        self.stack.last().map(|(_, i)| *i).unwrap_or_default()
    }

    fn push_test(&mut self, name: String, options: &TaskOptions, body: Option<TestFn>) {
        let inherited = self.inherited();
        let id = self.next_id;
        self.next_id += 1;
        let parent = self.current();
        let full_name = parent.child_name(&name);
        trace!(test = %full_name, id, "collected test");
        parent.children.push(Task::Test(Test {
            id,
            name,
            full_name,
            mode: options.mode(),
            concurrency: options.concurrency,
            fails: options.fails,
            timeout: options.timeout.or(inherited.timeout),
            retry: options.retry.or(inherited.retry),
            body,
        }));
    }

    fn open_suite(&mut self, name: String, options: &TaskOptions) {
        let parent_inherited = self.inherited();
        let full_name = self.current().child_name(&name);
        let suite = Suite {
            name,
            full_name,
            mode: options.mode(),
            concurrency: options.concurrency,
            ..Default::default()
        };
        let inherited = Inherited {
            timeout: options.timeout.or(parent_inherited.timeout),
            retry: options.retry.or(parent_inherited.retry),
        };
        self.stack.push((suite, inherited));
    }

    fn close_suite(&mut self) {
        if self.stack.len() < 2 {
            return;
        }
        if let Some((suite, _)) = self.stack.pop() {
            trace!(suite = %suite.full_name, children = suite.children.len(), "collected suite");
            self.current().children.push(Task::Suite(suite));
        }
    }

    fn run_suite_body<R: CollectOutcome>(
        &mut self,
        name: String,
        options: &TaskOptions,
        body: impl FnOnce(&mut Collector) -> R,
    ) {
        self.open_suite(name, options);
        let outcome = body(self).into_collect_result();
        self.close_suite();
        if let Err(error) = outcome {
            self.error.get_or_insert(error);
        }
    }
}

macro_rules! modifiers {
    () => {
        pub fn skip(mut self) -> Self {
            self.options.skip = true;
            self
        }

        pub fn only(mut self) -> Self {
            self.options.only = true;
            self
        }

        pub fn todo(mut self) -> Self {
            self.options.todo = true;
            self
        }

        pub fn concurrent(mut self) -> Self {
            self.options.concurrency = Some(Concurrency::Concurrent);
            self
        }

        pub fn sequential(mut self) -> Self {
            self.options.concurrency = Some(Concurrency::Sequential);
            self
        }

        /// Skip when `condition` holds. Evaluated now, not at run time.
        pub fn skip_if(mut self, condition: bool) -> Self {
            self.options.skip |= condition;
            self
        }

        /// Skip unless `condition` holds. Evaluated now, not at run time.
        pub fn run_if(mut self, condition: bool) -> Self {
            self.options.skip |= !condition;
            self
        }

        pub fn timeout(mut self, ms: u64) -> Self {
            self.options.timeout = Some(Duration::from_millis(ms));
            self
        }

        pub fn retry(mut self, times: u32) -> Self {
            self.options.retry = Some(times);
            self
        }
    };
}

/// Modifier chain for a test declaration.
pub struct TestBuilder<'c> {
    collector: &'c mut Collector,
    name: String,
    options: TaskOptions,
}

impl TestBuilder<'_> {
    modifiers!();

    /// The test passes only if its body fails.
    pub fn fails(mut self) -> Self {
        self.options.fails = true;
        self
    }

    pub fn run<F, Fut, R>(self, f: F)
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoTestResult,
    {
        self.collector
            .push_test(self.name, &self.options, Some(boxed(f)));
    }

    /// One test per row; array rows are spread into the argument list.
    pub fn each<F, Fut, R>(self, rows: impl IntoIterator<Item = Json>, f: F)
    where
        F: Fn(TestContext, Vec<Json>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoTestResult,
    {
        let f = Arc::new(f);
        for (index, row) in rows.into_iter().enumerate() {
            let name = format_name(&self.name, &row, index);
            let args = row_args(&row);
            let f = f.clone();
            let body = boxed(move |ctx: TestContext| (*f)(ctx, args.clone()));
            self.collector.push_test(name, &self.options, Some(body));
        }
    }

    /// One test per row; the row is passed whole.
    pub fn for_each<F, Fut, R>(self, rows: impl IntoIterator<Item = Json>, f: F)
    where
        F: Fn(TestContext, Json) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoTestResult,
    {
        let f = Arc::new(f);
        for (index, row) in rows.into_iter().enumerate() {
            let name = format_name(&self.name, &row, index);
            let f = f.clone();
            let body = boxed(move |ctx: TestContext| (*f)(ctx, row.clone()));
            self.collector.push_test(name, &self.options, Some(body));
        }
    }
}

/// Modifier chain for a suite declaration.
pub struct SuiteBuilder<'c> {
    collector: &'c mut Collector,
    name: String,
    options: TaskOptions,
}

impl SuiteBuilder<'_> {
    modifiers!();

    pub fn run<F, R>(self, f: F)
    where
        F: FnOnce(&mut Collector) -> R,
        R: CollectOutcome,
    {
        self.collector.run_suite_body(self.name, &self.options, f);
    }

    /// One suite per row; array rows are spread into the argument list.
    pub fn each<F, R>(self, rows: impl IntoIterator<Item = Json>, f: F)
    where
        F: Fn(&mut Collector, Vec<Json>) -> R,
        R: CollectOutcome,
    {
        for (index, row) in rows.into_iter().enumerate() {
            let name = format_name(&self.name, &row, index);
            let args = row_args(&row);
            self.collector
                .run_suite_body(name, &self.options, |c| f(c, args));
        }
    }

    /// One suite per row; the row is passed whole.
    pub fn for_each<F, R>(self, rows: impl IntoIterator<Item = Json>, f: F)
    where
        F: Fn(&mut Collector, Json) -> R,
        R: CollectOutcome,
    {
        for (index, row) in rows.into_iter().enumerate() {
            let name = format_name(&self.name, &row, index);
            self.collector
                .run_suite_body(name, &self.options, |c| f(c, row));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvStore;
    use otter_test_mock::{ModuleRegistry, ModuleSet, RegistryOptions, Thrown};
    use serde_json::json;

    fn collector() -> Collector {
        let registry = ModuleRegistry::new(Arc::new(ModuleSet::new()), RegistryOptions::default());
        let mocker = Mocker::new(registry, Arc::new(EnvStore::new()), "/t/a.test.js");
        Collector::new(Path::new("/t/a.test.js"), mocker, HoistedValues::default())
    }

    fn names(suite: &Suite) -> Vec<String> {
        suite.tests().iter().map(|t| t.full_name.clone()).collect()
    }

    #[test]
    fn test_nested_names_and_ids() {
        let mut c = collector();
        c.it("top", |_| async {});
        c.describe("outer", |c| {
            c.describe("inner", |c| {
                c.it("deep", |_| async {});
            });
            c.it("shallow", |_| async {});
        });
        let root = c.finish().unwrap();
        assert_eq!(names(&root), vec!["top", "outer > inner > deep", "outer > shallow"]);
        let ids: Vec<u32> = root.tests().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_modifiers() {
        let mut c = collector();
        c.test("skipped").skip_if(true).run(|_| async {});
        c.test("kept").run_if(true).run(|_| async {});
        c.test("only").only().concurrent().run(|_| async {});
        c.test("failing").fails().retry(2).timeout(50).run(|_| async {});
        c.todo("later");
        let root = c.finish().unwrap();
        let tests = root.tests();
        assert_eq!(tests[0].mode, Mode::Skip);
        assert_eq!(tests[1].mode, Mode::Run);
        assert_eq!(tests[2].mode, Mode::Only);
        assert_eq!(tests[2].concurrency, Some(Concurrency::Concurrent));
        assert!(tests[3].fails);
        assert_eq!(tests[3].retry, Some(2));
        assert_eq!(tests[3].timeout, Some(Duration::from_millis(50)));
        assert_eq!(tests[4].mode, Mode::Todo);
        assert!(tests[4].body.is_none());
    }

    #[test]
    fn test_suite_options_inherited_by_tests() {
        let mut c = collector();
        c.suite("slow").timeout(1000).retry(1).run(|c| {
            c.it("a", |_| async {});
            c.test("b").timeout(10).run(|_| async {});
        });
        let root = c.finish().unwrap();
        let tests = root.tests();
        assert_eq!(tests[0].timeout, Some(Duration::from_millis(1000)));
        assert_eq!(tests[0].retry, Some(1));
        assert_eq!(tests[1].timeout, Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_each_expands_rows() {
        let mut c = collector();
        c.test("%i + %i")
            .each(vec![json!([1, 2]), json!([3, 4])], |_, _args| async {});
        c.suite("add").each(vec![json!({"a": 1, "b": 1, "expected": 2})], |c, args| {
            let expected = args[0]["expected"].as_i64().unwrap_or(0);
            c.it(&format!("={expected}"), |_| async {});
        });
        let root = c.finish().unwrap();
        assert_eq!(names(&root), vec!["1 + 2", "3 + 4", "add > =2"]);
    }

    #[test]
    fn test_suite_error_aborts_collection() {
        let mut c = collector();
        c.it("registered first", |_| async {});
        c.describe("broken", |_| Err::<(), _>(Thrown::error("boom")));
        let err = c.finish().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_hooks_land_on_current_suite() {
        let mut c = collector();
        c.before_all(|_| async {});
        c.describe("inner", |c| {
            c.before_each(|_| async {});
            c.after_each(|_| async {});
            c.it("x", |_| async {});
        });
        let root = c.finish().unwrap();
        assert_eq!(root.hooks.before_all.len(), 1);
        let inner = root.find_suite("inner").unwrap();
        assert_eq!(inner.hooks.before_each.len(), 1);
        assert_eq!(inner.hooks.after_each.len(), 1);
        assert!(inner.hooks.before_all.is_empty());
    }
}
