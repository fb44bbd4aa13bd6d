mod common;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{Log, log};
use otter_test::expect::expect;
use otter_test::{
    Bundle, Collector, FileState, Pool, PoolKind, SilentReporter, TestConfig, TestError, TestFile, TestState,
};
use otter_test_mock::{MockSpec, ModuleDef, ModuleSet, Object};

fn modules() -> ModuleSet {
    ModuleSet::new().module(ModuleDef::esm("/src/db.js", |_| Ok(Object::new())))
}

fn passing(path: &str) -> TestFile {
    TestFile::new(path, |c: &mut Collector| {
        c.it("passes", |_| async {});
    })
}

fn thread_config(workers: usize) -> TestConfig {
    let mut config = TestConfig::default();
    config.pool.kind = PoolKind::Threads;
    config.pool.max_workers = Some(workers);
    config
}

async fn run(config: TestConfig, bundle: Bundle) -> otter_test::RunSummary {
    let files = bundle.paths();
    let pool = Pool::new(config, Arc::new(bundle)).unwrap();
    pool.run(files, &mut SilentReporter).await
}

#[tokio::test]
async fn test_thread_pool_runs_every_file() {
    let failing = TestFile::new("/c.test.js", |c: &mut Collector| {
        c.it("fails", |_| async { expect(1).to_be(2) });
        c.todo("later");
    });
    let bundle = Bundle::new(modules())
        .file(passing("/a.test.js"))
        .file(passing("/b.test.js"))
        .file(failing);

    let summary = run(thread_config(2), bundle).await;
    assert_eq!(summary.total, 4);
    assert_eq!(summary.passed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.todo, 1);
    assert!(!summary.success());
    let paths: Vec<_> = summary.files.iter().map(|f| f.path.clone()).collect();
    assert_eq!(
        paths,
        vec![PathBuf::from("/a.test.js"), PathBuf::from("/b.test.js"), PathBuf::from("/c.test.js")]
    );
}

#[tokio::test]
async fn test_bail_skips_remaining_files() {
    let failing = TestFile::new("/a.test.js", |c: &mut Collector| {
        c.it("fails", |_| async { Err::<(), _>(TestError::assertion("boom")) });
    });
    let bundle = Bundle::new(modules())
        .file(failing)
        .file(passing("/b.test.js"))
        .file(passing("/c.test.js"));
    let mut config = thread_config(1);
    config.bail = 1;

    let summary = run(config, bundle).await;
    assert_eq!(summary.file(Path::new("/a.test.js")).unwrap().state, FileState::Failed);
    for path in ["/b.test.js", "/c.test.js"] {
        let file = summary.file(Path::new(path)).unwrap();
        assert_eq!(file.state, FileState::Skipped);
        assert!(file.tests.is_empty());
    }
}

fn leaky_bundle(seen: &Log) -> Bundle {
    let writer = TestFile::new("/a.test.js", |c: &mut Collector| {
        c.it("mocks the db", |ctx| async move {
            ctx.mocker().do_mock("./src/db", MockSpec::Automock);
        });
    });
    let seen = seen.clone();
    let reader = TestFile::new("/b.test.js", move |c: &mut Collector| {
        let seen = seen.clone();
        c.it("checks the db", move |ctx| {
            let seen = seen.clone();
            async move {
                let mocked = ctx.mocker().is_mocked("./src/db");
                seen.lock().push(format!("mocked={mocked}"));
            }
        });
    });
    Bundle::new(modules()).file(writer).file(reader)
}

#[tokio::test]
async fn test_isolation_gives_each_file_a_fresh_context() {
    let seen = log();
    let summary = run(thread_config(1), leaky_bundle(&seen)).await;
    assert!(summary.success());
    assert_eq!(*seen.lock(), vec!["mocked=false"]);

    let seen = log();
    let mut config = thread_config(1);
    config.isolate = false;
    let summary = run(config, leaky_bundle(&seen)).await;
    assert!(summary.success());
    assert_eq!(*seen.lock(), vec!["mocked=true"]);
}

#[tokio::test]
async fn test_pool_env_reaches_every_worker() {
    let seen = log();
    let s = seen.clone();
    let file = TestFile::new("/env.test.js", move |c: &mut Collector| {
        let seen = s.clone();
        c.it("reads env", move |ctx| {
            let seen = seen.clone();
            async move {
                seen.lock().push(ctx.env().get("OTTER_POOL_MODE").unwrap_or_default());
            }
        });
    });
    let bundle = Arc::new(Bundle::new(modules()).file(file));
    let pool = Pool::new(thread_config(1), bundle.clone())
        .unwrap()
        .env(BTreeMap::from([("OTTER_POOL_MODE".to_string(), Some("ci".to_string()))]));

    let summary = pool.run(bundle.paths(), &mut SilentReporter).await;
    assert!(summary.success());
    assert_eq!(*seen.lock(), vec!["ci"]);
}

fn process_config(args: &[&str]) -> TestConfig {
    let mut config = TestConfig::default();
    config.pool.kind = PoolKind::Process;
    config.pool.max_workers = Some(1);
    config.pool.worker_command = Some(PathBuf::from(env!("CARGO_BIN_EXE_otter-test-demo")));
    config.pool.worker_args = args.iter().map(|a| a.to_string()).collect();
    config
}

#[tokio::test]
async fn test_process_pool_runs_worker_bundle() {
    let pool = Pool::new(process_config(&["--worker"]), Arc::new(Bundle::new(ModuleSet::new()))).unwrap();
    let files = vec![
        PathBuf::from("/demo/math.test.js"),
        PathBuf::from("/demo/greet.test.js"),
    ];

    let summary = pool.run(files, &mut SilentReporter).await;
    assert!(summary.success(), "{:?}", summary.files);
    assert_eq!(summary.test("math > adds").unwrap().state, TestState::Passed);
    assert_eq!(summary.test("math > divides").unwrap().state, TestState::Todo);
    assert_eq!(summary.test("greets the mocked user").unwrap().state, TestState::Passed);
}

#[tokio::test]
async fn test_worker_crash_fails_in_flight_test_and_respawns() {
    let pool = Pool::new(
        process_config(&["--worker", "--with-crash"]),
        Arc::new(Bundle::new(ModuleSet::new())),
    )
    .unwrap();
    let files = vec![
        PathBuf::from("/demo/crash.test.js"),
        PathBuf::from("/demo/math.test.js"),
    ];

    let summary = pool.run(files, &mut SilentReporter).await;
    let crash = summary.file(Path::new("/demo/crash.test.js")).unwrap();
    assert_eq!(crash.state, FileState::Failed);
    assert_eq!(crash.error.as_ref().unwrap().name, "WorkerFault");
    assert_eq!(summary.test("runs before the crash").unwrap().state, TestState::Passed);
    let aborted = summary.test("aborts the worker").unwrap();
    assert_eq!(aborted.state, TestState::Failed);
    assert_eq!(aborted.errors[0].name, "WorkerFault");

    let math = summary.file(Path::new("/demo/math.test.js")).unwrap();
    assert_eq!(math.state, FileState::Passed);
}
