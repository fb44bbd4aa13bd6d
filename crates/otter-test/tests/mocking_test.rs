mod common;

use std::path::Path;

use common::{context, find};
use otter_test::expect::expect;
use otter_test::{Collector, ContextOptions, EventLog, FileState, TestError, TestFile, TestState};
use otter_test_mock::{HoistOptions, MockSpec, ModuleDef, ModuleSet, Object, Value, hoist_mocks};

fn modules() -> ModuleSet {
    ModuleSet::new()
        .module(ModuleDef::esm("/src/math.js", |_| {
            let mut exports = Object::new();
            exports.insert(
                "add".into(),
                Value::function("add", |args| {
                    Ok(Value::from(args.iter().filter_map(Value::as_f64).sum::<f64>()))
                }),
            );
            Ok(exports)
        }))
        .module(ModuleDef::esm("/src/calc.js", |scope| {
            let math = scope.import("./math")?;
            let mut exports = Object::new();
            exports.insert(
                "double".into(),
                Value::function("double", move |args| {
                    let x = args.first().cloned().unwrap_or_default();
                    math.call("add", &[x.clone(), x])
                        .map_err(|e| otter_test_mock::Thrown::error(e.to_string()))
                }),
            );
            Ok(exports)
        }))
}

const SOURCE: &str = "\
import { double } from './calc'
import { add } from './math'
import { vi, test, expect } from 'vitest'

vi.mock('./math', () => ({ add: () => 42 }))

test('double', () => expect(double(1)).toBe(42))
";

fn mocked_math_file() -> TestFile {
    TestFile::new("/src/calc.test.js", |c: &mut Collector| {
        c.it("transitive import sees the mock", |ctx| async move {
            let calc = ctx.import("./calc")?;
            expect(calc.call("double", &[Value::from(1)])?).to_be(Value::from(42))
        });
        c.it("import_actual bypasses the mock", |ctx| async move {
            let math = ctx.mocker().import_actual("./math")?;
            expect(math.call("add", &[Value::from(1), Value::from(2)])?).to_be(Value::from(3))
        });
    })
    .mock(
        "./math",
        MockSpec::factory(|_| {
            Ok(Value::object([(
                "add",
                Value::function("add", |_| Ok(Value::from(42))),
            )]))
        }),
    )
}

#[tokio::test]
async fn test_hoisted_mock_applies_before_first_import() {
    let output = hoist_mocks(SOURCE, &HoistOptions::default()).unwrap();
    let file = mocked_math_file();
    assert!(file.matches_hoisted(&output));
    // the printer is free to pick quotes and spacing
    let code: String = output.code.split_whitespace().collect::<String>().replace('\'', "\"");
    let registration = code.find("vi.mock(\"./math\"").unwrap();
    let first_import = code.find("awaitimport(\"./calc\")").unwrap();
    assert!(registration < first_import);

    let mut ctx = context(modules(), vec![file], ContextOptions::default());
    let result = ctx.run_file(Path::new("/src/calc.test.js"), &EventLog::new()).await;
    assert_eq!(result.state, FileState::Passed, "{:?}", result.tests);
}

#[tokio::test]
async fn test_reset_modules_gives_fresh_instances() {
    let file = TestFile::new("/src/reset.test.js", |c: &mut Collector| {
        c.it("reset", |ctx| async move {
            let first = ctx.import("./math")?;
            let again = ctx.import("./math")?;
            expect(first.same_instance(&again)).to_be(true)?;

            ctx.mocker().reset_modules();
            let fresh = ctx.import("./math")?;
            expect(first.same_instance(&fresh)).to_be(false)
        });
    });
    let mut ctx = context(modules(), vec![file], ContextOptions::default());
    let result = ctx.run_file(Path::new("/src/reset.test.js"), &EventLog::new()).await;
    assert_eq!(find(&result, "reset").state, TestState::Passed, "{:?}", result.tests);
}

#[tokio::test]
async fn test_do_mock_affects_later_imports_only() {
    let file = TestFile::new("/src/dynamic.test.js", |c: &mut Collector| {
        c.it("do_mock", |ctx| async move {
            let before = ctx.import_dynamic("./math").await?;
            ctx.mocker().do_mock("./math", MockSpec::Automock);
            expect(ctx.mocker().is_mocked("./math")).to_be(true)?;
            let after = ctx.import_dynamic("./math").await?;

            expect(before.call("add", &[Value::from(2), Value::from(2)])?).to_be(Value::from(4))?;
            expect(after.call("add", &[Value::from(2), Value::from(2)])?).to_be(Value::Undefined)?;

            ctx.mocker().do_unmock("./math");
            ctx.mocker().reset_modules();
            let restored = ctx.import_dynamic("./math").await?;
            expect(restored.is_mocked()).to_be(false)
        });
    });
    let mut ctx = context(modules(), vec![file], ContextOptions::default());
    let result = ctx.run_file(Path::new("/src/dynamic.test.js"), &EventLog::new()).await;
    assert_eq!(find(&result, "do_mock").state, TestState::Passed, "{:?}", result.tests);
}

#[tokio::test]
async fn test_registrations_persist_without_isolation() {
    let reader = TestFile::new("/src/reader.test.js", |c: &mut Collector| {
        c.it("sees leftover mock", |ctx| async move {
            let math = ctx.import("./math")?;
            expect(math.is_mocked()).to_be(true)
        });
    });
    let mut ctx = context(modules(), vec![mocked_math_file(), reader], ContextOptions::default());
    let events = EventLog::new();

    let first = ctx.run_file(Path::new("/src/calc.test.js"), &events).await;
    assert_eq!(first.state, FileState::Passed);
    let second = ctx.run_file(Path::new("/src/reader.test.js"), &events).await;
    assert_eq!(second.state, FileState::Passed, "{:?}", second.tests);
    assert_eq!(ctx.files_run(), 2);
}

#[tokio::test]
async fn test_spies_and_stubs_restored_on_teardown() {
    let file = TestFile::new("/src/stubs.test.js", |c: &mut Collector| {
        c.it("stubs", |ctx| async move {
            let mocker = ctx.mocker();
            mocker.stub_env("API_URL", Some("http://mock"));
            mocker.stub_global("fetch", "mocked");

            let mut target = Value::object([("now", Value::function("now", |_| Ok(Value::from(1))))]);
            let spy = mocker.spy_on(&mut target, "now")?;
            spy.mock_return_value(99);
            expect(target.get("now").call(&[])?).to_be(Value::from(99))?;
            expect(&spy).to_have_been_called_times(1)?;

            expect(ctx.env().get("API_URL")).to_be(Some("http://mock".to_string()))
        });
    });
    let mut ctx = context(modules(), vec![file], ContextOptions::default());
    let result = ctx.run_file(Path::new("/src/stubs.test.js"), &EventLog::new()).await;
    assert_eq!(result.state, FileState::Passed, "{:?}", result.tests);

    assert!(ctx.env().has_stubs());
    ctx.teardown();
    assert!(ctx.env().get("API_URL").is_none());
    assert!(ctx.env().global("fetch").is_none());
    // a second unstub is a no-op
    ctx.env().unstub_all_envs();
    assert!(!ctx.env().has_stubs());
}

#[tokio::test]
async fn test_missing_export_on_factory_mock_fails_the_test() {
    let file = TestFile::new("/src/partial.test.js", |c: &mut Collector| {
        c.it("reads a missing export", |ctx| async move {
            let math = ctx.import("./math")?;
            math.get("subtract")?;
            Ok::<(), TestError>(())
        });
    })
    .mock("./math", MockSpec::factory(|_| Ok(Value::object([("add", Value::from(1))]))));
    let mut ctx = context(modules(), vec![file], ContextOptions::default());
    let result = ctx.run_file(Path::new("/src/partial.test.js"), &EventLog::new()).await;
    let test = find(&result, "reads a missing export");
    assert_eq!(test.state, TestState::Failed);
    assert_eq!(test.errors[0].name, "MockUsageError");
    assert!(test.errors[0].message.contains("subtract"));
}

#[tokio::test]
async fn test_tracked_mocks_do_not_pile_up_in_a_shared_context() {
    let automocked = |path: &'static str| {
        TestFile::new(path, |c: &mut Collector| {
            c.it("fresh automock", |ctx| async move {
                ctx.mocker().reset_modules();
                let math = ctx.import("./math")?;
                expect(math.is_mocked()).to_be(true)
            });
        })
        .mock("./math", MockSpec::Automock)
    };
    let paths = ["/src/a.test.js", "/src/b.test.js", "/src/c.test.js"];
    let mut ctx = context(
        modules(),
        paths.iter().map(|p| automocked(p)).collect(),
        ContextOptions::default(),
    );
    let events = EventLog::new();

    for path in paths {
        let result = ctx.run_file(Path::new(path), &events).await;
        assert_eq!(result.state, FileState::Passed, "{:?}", result.tests);
        // only the cached instance's `add` is still alive
        assert_eq!(ctx.registry().tracker().len(), 1);
    }

    ctx.teardown();
    assert!(ctx.registry().tracker().is_empty());
}
