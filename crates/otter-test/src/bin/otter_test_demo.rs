//! Demo runner for the otter-test engine.
//!
//! Runs a built-in bundle of test files. With `--worker` it instead serves
//! as a process worker for a coordinator, speaking framed JSON on stdio.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::filter::EnvFilter;

use otter_test::expect::expect;
use otter_test::{
    Bundle, Collector, JsonLinesReporter, Pool, PoolKind, Reporter, SummaryReporter, TestConfig, TestError,
    TestFile,
};
use otter_test_mock::{MockSpec, ModuleDef, ModuleSet, Object, Thrown, Value};

#[derive(Parser, Debug)]
#[command(name = "otter-test-demo")]
#[command(about = "Run the built-in otter-test demo suite")]
struct Args {
    /// Serve as a process worker on stdin/stdout
    #[arg(long)]
    worker: bool,

    /// Include a file whose test aborts its worker
    #[arg(long)]
    with_crash: bool,

    /// Worker transport
    #[arg(long, value_parser = ["threads", "process"])]
    pool: Option<String>,

    /// Maximum number of workers
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Reuse one execution context for every file a worker runs
    #[arg(long)]
    no_isolate: bool,

    /// Only run tests whose full name matches this regex
    #[arg(short = 't', long)]
    test_name_pattern: Option<String>,

    /// Stop after this many failures
    #[arg(long)]
    bail: Option<usize>,

    /// Config file (defaults to the nearest otter-test.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit JSON lines instead of the summary
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // stdout carries the worker protocol, so logs always go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_env("OTTER_TEST_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let bundle = demo_bundle(args.with_crash);
    if args.worker {
        otter_test::run_worker_stdio(bundle)?;
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => TestConfig::load(path)?,
        None => TestConfig::load_or_default(&std::env::current_dir()?),
    };
    if let Some(pool) = &args.pool {
        config.pool.kind = if pool == "process" { PoolKind::Process } else { PoolKind::Threads };
    }
    if config.pool.kind == PoolKind::Process && args.with_crash {
        config.pool.worker_args.push("--with-crash".to_string());
    }
    if let Some(workers) = args.workers {
        config.pool.max_workers = Some(workers);
    }
    if args.no_isolate {
        config.isolate = false;
    }
    if let Some(pattern) = args.test_name_pattern {
        config.test_name_pattern = Some(pattern);
    }
    if let Some(bail) = args.bail {
        config.bail = bail;
    }

    let mut reporter: Box<dyn Reporter> = if args.json {
        Box::new(JsonLinesReporter::new(Box::new(std::io::stdout())))
    } else {
        Box::new(SummaryReporter::default())
    };

    let files = bundle.paths();
    let pool = Pool::new(config, Arc::new(bundle))?;
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let summary = runtime.block_on(pool.run(files, reporter.as_mut()));

    if !summary.success() {
        std::process::exit(1);
    }
    Ok(())
}

fn modules() -> ModuleSet {
    ModuleSet::new()
        .module(ModuleDef::esm("/demo/src/math.js", |_| {
            let mut exports = Object::new();
            exports.insert(
                "add".into(),
                Value::function("add", |args| {
                    let sum: f64 = args.iter().filter_map(Value::as_f64).sum();
                    Ok(Value::from(sum))
                }),
            );
            Ok(exports)
        }))
        .module(ModuleDef::esm("/demo/src/api.js", |_| {
            let mut exports = Object::new();
            exports.insert(
                "fetchUser".into(),
                Value::function("fetchUser", |_| Err(Thrown::error("network disabled in tests"))),
            );
            Ok(exports)
        }))
        .module(ModuleDef::esm("/demo/src/greet.js", |scope| {
            let api = scope.import("./api")?;
            let mut exports = Object::new();
            exports.insert(
                "greet".into(),
                Value::function("greet", move |args| {
                    let user = api.call("fetchUser", args).map_err(|e| Thrown::error(e.to_string()))?;
                    Ok(Value::from(format!("hello {}", user.get("name"))))
                }),
            );
            Ok(exports)
        }))
}

fn number(value: Value) -> f64 {
    value.as_f64().unwrap_or(f64::NAN)
}

fn demo_bundle(with_crash: bool) -> Bundle {
    let math = TestFile::new("/demo/math.test.js", |c: &mut Collector| {
        c.describe("math", |c| {
            c.before_each(|ctx| async move {
                ctx.mocker().stub_env("PRECISION", Some("2"));
            });
            c.after_each(|ctx| async move {
                ctx.mocker().unstub_all_envs();
            });

            c.it("adds", |ctx| async move {
                let math = ctx.import("./src/math")?;
                expect(number(math.call("add", &[Value::from(1), Value::from(2)])?)).to_be(3.0)
            });
            c.test("add(%i, %i) -> %i")
                .concurrent()
                .each(vec![json!([1, 1, 2]), json!([2, 3, 5])], |ctx, args| async move {
                    let math = ctx.import("./src/math")?;
                    let sum = math.call("add", &[Value::from(args[0].clone()), Value::from(args[1].clone())])?;
                    expect(number(sum)).to_be(args[2].as_f64().unwrap_or(0.0))
                });
            c.it("sees stubbed env", |ctx| async move {
                expect(ctx.env().get("PRECISION").unwrap_or_default()).to_be("2".to_string())
            });
            c.todo("divides");
        });
    });

    let greet = TestFile::new("/demo/greet.test.js", |c: &mut Collector| {
        c.it("greets the mocked user", |ctx| async move {
            let greet = ctx.import("./src/greet")?;
            expect(greet.call("greet", &[])?).to_be(Value::from("hello ada"))
        });
        c.it("records calls on the hoisted mock", |ctx| async move {
            let api = ctx.import("./src/api")?;
            let fetch = api.get("fetchUser")?;
            let mock = fetch
                .as_function()
                .and_then(|f| f.as_mock())
                .ok_or_else(|| TestError::assertion("fetchUser is not a mock"))?;
            mock.call(&[Value::from(7)])?;
            expect(mock).to_have_been_called_with(&[Value::from(7)])
        });
    })
    .hoisted("fetchUser", |scope| Ok(scope.mock_fn("fetchUser")))
    .mock(
        "./src/api",
        MockSpec::factory(|scope| {
            let fetch = scope.hoisted("fetchUser")?;
            if let Some(mock) = fetch.as_function().and_then(|f| f.as_mock()) {
                mock.mock_return_value(Value::object([("name", Value::from("ada"))]));
            }
            Ok(Value::object([("fetchUser", fetch)]))
        }),
    );

    let slow = TestFile::new("/demo/slow.test.js", |c: &mut Collector| {
        c.suite("timing").concurrent().run(|c| {
            c.test("finishes within its timeout").timeout(500).run(|_| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
            });
            c.test("retries until it passes").retry(2).run(|ctx| async move {
                if ctx.retry_count() < 2 {
                    return Err(TestError::assertion("not yet"));
                }
                Ok(())
            });
        });
    });

    let mut bundle = Bundle::new(modules()).file(math).file(greet).file(slow);
    if with_crash {
        bundle.insert(TestFile::new("/demo/crash.test.js", |c: &mut Collector| {
            c.it("runs before the crash", |_| async {});
            c.it::<_, _, ()>("aborts the worker", |_| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                std::process::abort();
            });
        }));
    }
    bundle
}
