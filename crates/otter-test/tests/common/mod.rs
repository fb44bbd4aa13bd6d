#![allow(dead_code, unused_macros)]

use std::sync::Arc;

use otter_test::{Bundle, ContextOptions, EventLog, ExecutionContext, FileResult, TestFile, TestResult};
use otter_test_mock::ModuleSet;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// A hook or body that appends `label` to a log.
macro_rules! record {
    ($log:expr, $label:expr) => {{
        let log = $log.clone();
        move |_| {
            let log = log.clone();
            async move {
                log.lock().push($label.to_string());
            }
        }
    }};
}

pub fn context(modules: ModuleSet, files: Vec<TestFile>, options: ContextOptions) -> ExecutionContext {
    let mut bundle = Bundle::new(modules);
    for file in files {
        bundle.insert(file);
    }
    ExecutionContext::new(0, Arc::new(bundle), Arc::new(options), Arc::new(Semaphore::new(5)))
}

pub async fn run_file(file: TestFile) -> (FileResult, EventLog) {
    run_file_with(file, ContextOptions::default()).await
}

pub async fn run_file_with(file: TestFile, options: ContextOptions) -> (FileResult, EventLog) {
    let path = file.path().to_path_buf();
    let mut ctx = context(ModuleSet::new(), vec![file], options);
    let events = EventLog::new();
    let result = ctx.run_file(&path, &events).await;
    (result, events)
}

pub fn find<'a>(result: &'a FileResult, full_name: &str) -> &'a TestResult {
    result
        .tests
        .iter()
        .find(|t| t.full_name == full_name)
        .unwrap_or_else(|| panic!("no test named {full_name:?} in {:?}", result.tests))
}
