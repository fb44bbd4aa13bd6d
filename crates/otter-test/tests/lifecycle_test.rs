#[macro_use]
mod common;

use std::time::Duration;

use common::{find, log, run_file};
use otter_test::expect::expect;
use otter_test::{Collector, FileState, TestError, TestFile, TestState};
use otter_test_mock::Thrown;
use serde_json::json;

#[tokio::test]
async fn test_hook_order_across_nested_suites() {
    let log = log();
    let l = log.clone();
    let file = TestFile::new("/order.test.js", move |c: &mut Collector| {
        c.before_all(record!(l, "beforeAll root"));
        c.after_all(record!(l, "afterAll root"));
        c.before_each(record!(l, "beforeEach root"));
        c.after_each(record!(l, "afterEach root"));

        let l = l.clone();
        c.describe("outer", move |c| {
            c.before_all(record!(l, "beforeAll outer"));
            c.after_all(record!(l, "afterAll outer"));
            c.before_each(record!(l, "beforeEach outer"));
            c.after_each(record!(l, "afterEach outer 1"));
            c.after_each(record!(l, "afterEach outer 2"));

            let body = l.clone();
            c.it("a", move |ctx| {
                let log = body.clone();
                async move {
                    log.lock().push("test a".to_string());
                    let finished = log.clone();
                    ctx.on_test_finished(move |state| async move {
                        finished.lock().push(format!("finished a ({state:?})"));
                    });
                }
            });

            let l = l.clone();
            c.describe("inner", move |c| {
                c.before_each(record!(l, "beforeEach inner"));
                c.after_each(record!(l, "afterEach inner"));
                c.it("b", record!(l, "test b"));
            });
        });
    });

    let (result, _) = run_file(file).await;
    assert_eq!(result.state, FileState::Passed);
    assert_eq!(
        *log.lock(),
        vec![
            "beforeAll root",
            "beforeAll outer",
            "beforeEach root",
            "beforeEach outer",
            "test a",
            "afterEach outer 2",
            "afterEach outer 1",
            "afterEach root",
            "finished a (Passed)",
            "beforeEach root",
            "beforeEach outer",
            "beforeEach inner",
            "test b",
            "afterEach inner",
            "afterEach outer 2",
            "afterEach outer 1",
            "afterEach root",
            "afterAll outer",
            "afterAll root",
        ]
    );
}

#[tokio::test]
async fn test_before_all_failure_fails_subtree() {
    let log = log();
    let l = log.clone();
    let file = TestFile::new("/broken.test.js", move |c: &mut Collector| {
        let l = l.clone();
        c.describe("broken", move |c| {
            c.before_all(|_| async { Err::<(), _>(Thrown::error("db down")) });
            c.after_all(record!(l, "afterAll"));
            c.it("first", record!(l, "first"));
            c.describe("nested", |c| {
                c.it("second", |_| async {});
            });
            c.todo("later");
        });
        c.it("outside", |_| async {});
    });

    let (result, _) = run_file(file).await;
    assert_eq!(*log.lock(), vec!["afterAll"]);

    for name in ["broken > first", "broken > nested > second"] {
        let test = find(&result, name);
        assert_eq!(test.state, TestState::Failed);
        assert_eq!(test.errors[0].message, "beforeAll hook failed: Error: db down");
    }
    assert_eq!(find(&result, "broken > later").state, TestState::Todo);
    assert_eq!(find(&result, "outside").state, TestState::Passed);
    assert_eq!(result.suites.len(), 1);
    assert_eq!(result.suites[0].full_name, "broken");
    assert_eq!(result.state, FileState::Failed);
}

#[tokio::test]
async fn test_before_each_failure_skips_body_but_runs_after_each() {
    let log = log();
    let l = log.clone();
    let file = TestFile::new("/each.test.js", move |c: &mut Collector| {
        c.before_each(|_| async { Err::<(), _>(Thrown::type_error("no fixture")) });
        c.before_each(record!(l, "second beforeEach"));
        c.after_each(record!(l, "afterEach"));
        c.it("body", record!(l, "body"));
    });

    let (result, _) = run_file(file).await;
    assert_eq!(*log.lock(), vec!["afterEach"]);
    let test = find(&result, "body");
    assert_eq!(test.state, TestState::Failed);
    assert_eq!(test.errors[0].name, "TypeError");
    assert_eq!(test.errors[0].message, "beforeEach hook failed: TypeError: no fixture");
}

#[tokio::test]
async fn test_after_all_errors_do_not_change_test_results() {
    let file = TestFile::new("/after.test.js", |c: &mut Collector| {
        c.describe("s", |c| {
            c.after_all(|_| async { Err::<(), _>(Thrown::error("cleanup failed")) });
            c.it("passes", |_| async {});
        });
    });
    let (result, _) = run_file(file).await;
    assert_eq!(find(&result, "s > passes").state, TestState::Passed);
    assert_eq!(result.suites[0].errors[0].message, "afterAll hook failed: Error: cleanup failed");
    assert_eq!(result.state, FileState::Failed);
}

#[tokio::test]
async fn test_after_each_failure_still_runs_remaining_hooks() {
    let log = log();
    let l = log.clone();
    let file = TestFile::new("/after_each.test.js", move |c: &mut Collector| {
        c.after_each(record!(l, "release db"));
        c.after_each(|_| async { Err::<(), _>(Thrown::error("cleanup broke")) });
        c.it("passes", record!(l, "body"));
    });

    let (result, _) = run_file(file).await;
    // afterEach hooks run newest first, so the failing one goes before the recorder
    assert_eq!(*log.lock(), vec!["body", "release db"]);
    let test = find(&result, "passes");
    assert_eq!(test.state, TestState::Failed);
    assert_eq!(test.errors.len(), 1);
    assert_eq!(test.errors[0].name, "Error");
    assert_eq!(test.errors[0].message, "afterEach hook failed: Error: cleanup broke");
}

#[tokio::test]
async fn test_throwing_listener_fails_test_and_others_still_run() {
    let log = log();
    let l = log.clone();
    let file = TestFile::new("/listener_error.test.js", move |c: &mut Collector| {
        let log = l.clone();
        c.it("passes", move |ctx| {
            let log = log.clone();
            async move {
                ctx.on_test_finished(move |state| async move {
                    log.lock().push(format!("first listener ({state:?})"));
                });
                ctx.on_test_finished(|_| async { Err::<(), _>(Thrown::error("listener broke")) });
            }
        });
    });

    let (result, _) = run_file(file).await;
    assert_eq!(*log.lock(), vec!["first listener (Passed)"]);
    let test = find(&result, "passes");
    assert_eq!(test.state, TestState::Failed);
    assert_eq!(test.errors.len(), 1);
    assert_eq!(test.errors[0].name, "Error");
    assert_eq!(test.errors[0].message, "listener broke");
}

#[tokio::test(start_paused = true)]
async fn test_outcomes() {
    let file = TestFile::new("/outcomes.test.js", |c: &mut Collector| {
        c.test("flaky").retry(2).run(|ctx| async move {
            if ctx.retry_count() < 2 {
                return Err(TestError::assertion("not yet"));
            }
            Ok(())
        });
        c.test("expected failure").fails().run(|_| async { expect(1).to_be(2) });
        c.test("unexpected pass").fails().run(|_| async {});
        c.it("skips itself", |ctx| async move { Err::<(), _>(ctx.skip("offline")) });
        c.test("hangs").timeout(50).run(|_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        c.test("hangs even when expected to fail").fails().timeout(50).run(|_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        c.it("panics", |_| async {
            let empty: Vec<i32> = Vec::new();
            assert!(!empty.is_empty(), "list was empty");
        });
    });

    let (result, _) = run_file(file).await;

    let flaky = find(&result, "flaky");
    assert_eq!(flaky.state, TestState::Passed);
    assert_eq!(flaky.retry_count, 2);

    assert_eq!(find(&result, "expected failure").state, TestState::Passed);
    let unexpected = find(&result, "unexpected pass");
    assert_eq!(unexpected.state, TestState::Failed);
    assert_eq!(unexpected.errors[0].message, "Expect test to fail");

    assert_eq!(find(&result, "skips itself").state, TestState::Skipped);

    let hangs = find(&result, "hangs");
    assert_eq!(hangs.state, TestState::TimedOut);
    assert_eq!(hangs.errors[0].message, "Test timed out in 50ms.");
    assert_eq!(find(&result, "hangs even when expected to fail").state, TestState::TimedOut);

    let panics = find(&result, "panics");
    assert_eq!(panics.state, TestState::Failed);
    assert_eq!(panics.errors[0].name, "AssertionError");
    assert_eq!(panics.errors[0].message, "list was empty");
}

#[tokio::test]
async fn test_failure_listeners_only_fire_on_failure() {
    let log = log();
    let l = log.clone();
    let file = TestFile::new("/listeners.test.js", move |c: &mut Collector| {
        for (name, pass) in [("ok", true), ("bad", false)] {
            let log = l.clone();
            c.it(name, move |ctx| {
                let log = log.clone();
                async move {
                    let failed = log.clone();
                    ctx.on_test_failed(move |state| async move {
                        failed.lock().push(format!("{name} failed ({state:?})"));
                    });
                    let finished = log.clone();
                    ctx.on_test_finished(move |_| async move {
                        finished.lock().push(format!("{name} finished"));
                    });
                    if pass { Ok(()) } else { Err(TestError::assertion("boom")) }
                }
            });
        }
    });

    run_file(file).await;
    assert_eq!(
        *log.lock(),
        vec!["ok finished", "bad failed (Failed)", "bad finished"]
    );
}

#[tokio::test]
async fn test_describe_each_and_test_each() {
    let file = TestFile::new("/table.test.js", |c: &mut Collector| {
        c.suite("add $a + $b").each(
            vec![json!({"a": 1, "b": 2, "expected": 3}), json!({"a": 2, "b": 2, "expected": 5})],
            |c, args| {
                let row = args[0].clone();
                let expected = row["expected"].clone();
                c.it(&format!("returns {expected}"), move |_| {
                    let row = row.clone();
                    async move {
                        let sum = row["a"].as_i64().unwrap_or(0) + row["b"].as_i64().unwrap_or(0);
                        expect(sum).to_be(row["expected"].as_i64().unwrap_or(0))
                    }
                });
            },
        );
        c.test("%s is %s")
            .each(vec![json!(["a", "a"]), json!(["a", "b"])], |_, args| async move {
                expect(args[0].clone()).to_be(args[1].clone())
            });
    });

    let (result, events) = run_file(file).await;
    assert_eq!(find(&result, "add 1 + 2 > returns 3").state, TestState::Passed);
    assert_eq!(find(&result, "add 2 + 2 > returns 5").state, TestState::Failed);
    assert_eq!(find(&result, "a is a").state, TestState::Passed);
    assert_eq!(find(&result, "a is b").state, TestState::Failed);
    assert_eq!(
        events.started(),
        vec!["add 1 + 2 > returns 3", "add 2 + 2 > returns 5", "a is a", "a is b"]
    );
}

#[tokio::test]
async fn test_collection_error_reports_file_without_running() {
    let log = log();
    let l = log.clone();
    let file = TestFile::new("/throws.test.js", move |c: &mut Collector| {
        c.it("registered first", record!(l, "ran"));
        Err::<(), _>(Thrown {
            name: "ReferenceError".to_string(),
            message: "helper is not defined".to_string(),
        })
    });

    let (result, events) = run_file(file).await;
    assert!(log.lock().is_empty());
    assert!(result.tests.is_empty());
    assert!(events.started().is_empty());
    let error = result.error.expect("file error");
    assert_eq!(error.name, "ReferenceError");
    assert_eq!(result.state, FileState::Failed);
}
