//! Worker pool and run coordinator
//!
//! The coordinator hands files to up to `max_workers` workers, one file per
//! worker at a time, and forwards their events to the reporter in arrival
//! order. A worker that dies is reported as a fault on the file it was
//! running; a replacement is spawned only if files remain.

pub mod ipc;
pub mod protocol;
mod process;
pub mod serve;
mod thread;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::config::{PoolKind, TestConfig};
use crate::error::{ConfigError, ErrorInfo, TestError, WorkerError};
use crate::file::Bundle;
use crate::report::{FileResult, RunSummary, TestResult, TestState};
use crate::reporter::{Reporter, RunnerEvent};

use self::process::ProcessWorker;
use self::protocol::{Request, Response};
use self::thread::ThreadWorker;

pub use self::serve::{run_worker_stdio, serve_worker};

enum Worker {
    Thread(ThreadWorker),
    Process(ProcessWorker),
}

impl Worker {
    fn id(&self) -> usize {
        match self {
            Worker::Thread(w) => w.id(),
            Worker::Process(w) => w.id(),
        }
    }

    async fn send(&mut self, request: Request) -> Result<(), WorkerError> {
        match self {
            Worker::Thread(w) => w.send(request),
            Worker::Process(w) => w.send(&request).await,
        }
    }

    async fn recv(&mut self) -> Result<Response, WorkerError> {
        match self {
            Worker::Thread(w) => w.recv().await,
            Worker::Process(w) => w.recv().await,
        }
    }

    /// Send a request that is answered with a bare acknowledgement.
    async fn call(&mut self, request: Request) -> Result<(), WorkerError> {
        self.send(request).await?;
        match self.recv().await? {
            Response::Ack => Ok(()),
            Response::Error { message } => Err(WorkerError::Protocol(message)),
            other => Err(WorkerError::Protocol(format!("unexpected response: {other:?}"))),
        }
    }

    async fn shutdown(mut self) {
        let id = self.id();
        if let Err(e) = self.call(Request::Shutdown).await {
            debug!(worker = id, "shutdown not acknowledged: {e}");
        }
        if let Worker::Process(process) = self {
            process.wait().await;
        }
    }
}

enum Progress {
    Event(RunnerEvent),
    FileDone(FileResult),
}

/// Runs files on a pool of workers.
pub struct Pool {
    config: Arc<TestConfig>,
    bundle: Arc<Bundle>,
    env: BTreeMap<String, Option<String>>,
}

impl Pool {
    /// `bundle` is what thread workers run; process workers load their own.
    pub fn new(config: TestConfig, bundle: Arc<Bundle>) -> Result<Self, ConfigError> {
        // Reject a bad name filter before any worker sees it.
        config.name_filter()?;
        Ok(Self {
            config: Arc::new(config),
            bundle,
            env: BTreeMap::new(),
        })
    }

    /// Environment changes sent to every worker after it starts.
    pub fn env(mut self, changes: BTreeMap<String, Option<String>>) -> Self {
        self.env.extend(changes);
        self
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Run `files` and report progress to `reporter`.
    pub async fn run(&self, files: Vec<PathBuf>, reporter: &mut dyn Reporter) -> RunSummary {
        let started_at = Utc::now();
        let started = Instant::now();
        reporter.on_run_start(&files);

        let workers = self.config.max_workers().min(files.len()).max(1);
        info!(files = files.len(), workers, kind = ?self.config.pool.kind, "starting run");

        let queue = Mutex::new(files.iter().cloned().collect::<VecDeque<_>>());
        let run = RunState {
            queue,
            failed: AtomicUsize::new(0),
            bailed: AtomicBool::new(false),
            limiter: Arc::new(Semaphore::new(self.config.max_concurrency.max(1))),
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<Progress>();

        let slots = async {
            let slots = (0..workers).map(|id| self.drive_slot(id, &run, tx.clone()));
            join_all(slots).await;
            drop(tx);
        };
        let report = async {
            let mut done = HashMap::new();
            while let Some(progress) = rx.recv().await {
                match progress {
                    Progress::Event(event) => reporter.on_event(&event),
                    Progress::FileDone(result) => {
                        reporter.on_file_end(&result);
                        done.insert(result.path.clone(), result);
                    }
                }
            }
            done
        };
        let ((), mut done) = tokio::join!(slots, report);

        let mut results = Vec::with_capacity(files.len());
        for path in &files {
            match done.remove(path) {
                Some(result) => results.push(result),
                None => {
                    let skipped = FileResult::skipped(path);
                    reporter.on_file_end(&skipped);
                    results.push(skipped);
                }
            }
        }
        if run.bailed.load(Ordering::SeqCst) {
            warn!(bail = self.config.bail, "bail threshold reached; remaining files skipped");
        }

        let summary = RunSummary::from_files(results, started_at, started.elapsed().as_millis() as u64);
        reporter.on_run_end(&summary);
        summary
    }

    async fn spawn_worker(&self, id: usize, limiter: &Arc<Semaphore>) -> Result<Worker, WorkerError> {
        let mut worker = match self.config.pool.kind {
            PoolKind::Threads => Worker::Thread(ThreadWorker::spawn(id, self.bundle.clone(), limiter.clone())?),
            PoolKind::Process => {
                let program = match &self.config.pool.worker_command {
                    Some(program) => program.clone(),
                    None => std::env::current_exe()?,
                };
                Worker::Process(ProcessWorker::spawn(id, &program, &self.config.pool.worker_args)?)
            }
        };
        worker
            .call(Request::Init {
                config: Box::new(TestConfig::clone(&self.config)),
            })
            .await?;
        if !self.env.is_empty() {
            worker
                .call(Request::ApplyEnv {
                    changes: self.env.clone(),
                })
                .await?;
        }
        Ok(worker)
    }

    async fn drive_slot(&self, id: usize, run: &RunState, tx: UnboundedSender<Progress>) {
        let mut worker: Option<Worker> = None;
        loop {
            if run.bailed.load(Ordering::SeqCst) {
                break;
            }
            let Some(path) = run.queue.lock().pop_front() else {
                break;
            };

            if worker.is_none() {
                match self.spawn_worker(id, &run.limiter).await {
                    Ok(spawned) => worker = Some(spawned),
                    Err(e) => {
                        error!(worker = id, "{e}");
                        let result = FileResult::errored(&path, fault_info(&e));
                        run.finish(&result, self.config.bail);
                        let _ = tx.send(Progress::FileDone(result));
                        continue;
                    }
                }
            }
            let Some(active) = worker.as_mut() else {
                continue;
            };

            let result = match run_on(active, &path, self.config.isolate, &tx).await {
                Ok(result) => result,
                Err((e, in_flight)) => {
                    error!(worker = id, file = %path.display(), "{e}");
                    worker = None;
                    in_flight.into_fault(&path, &e)
                }
            };
            run.finish(&result, self.config.bail);
            let _ = tx.send(Progress::FileDone(result));
        }

        if let Some(worker) = worker {
            worker.shutdown().await;
        }
    }
}

struct RunState {
    queue: Mutex<VecDeque<PathBuf>>,
    failed: AtomicUsize,
    bailed: AtomicBool,
    /// Run-wide cap on concurrent tests for thread workers
    limiter: Arc<Semaphore>,
}

impl RunState {
    fn finish(&self, result: &FileResult, bail: usize) {
        let failures = result.failed_tests() + usize::from(result.error.is_some());
        let total = self.failed.fetch_add(failures, Ordering::SeqCst) + failures;
        if bail > 0 && total >= bail && !self.bailed.swap(true, Ordering::SeqCst) {
            info!(failed = total, "bailing out");
        }
    }
}

/// What the coordinator saw of a file before its worker died.
#[derive(Default)]
struct InFlight {
    started: Vec<(u32, String)>,
    finished: Vec<TestResult>,
}

impl InFlight {
    fn observe(&mut self, event: &RunnerEvent) {
        match event {
            RunnerEvent::CaseStart(case) => self.started.push((case.id, case.full_name.clone())),
            RunnerEvent::CaseResult(result) => self.finished.push(result.clone()),
            RunnerEvent::FileStart { .. } => {}
        }
    }

    /// Keep finished tests and fail the ones still running with one worker fault.
    fn into_fault(self, path: &Path, error: &WorkerError) -> FileResult {
        let fault = fault_info(error);
        let mut tests = self.finished;
        for (id, full_name) in self.started {
            if tests.iter().any(|t| t.id == id) {
                continue;
            }
            let name = full_name
                .rsplit(crate::tree::NAME_SEPARATOR)
                .next()
                .unwrap_or(&full_name)
                .to_string();
            tests.push(TestResult {
                id,
                name,
                full_name,
                file: path.to_path_buf(),
                state: TestState::Failed,
                duration_ms: 0,
                retry_count: 0,
                errors: vec![fault.clone()],
            });
        }
        FileResult::new(path, tests, Vec::new(), Some(fault), 0)
    }
}

fn fault_info(error: &WorkerError) -> ErrorInfo {
    ErrorInfo::from(&TestError::WorkerFault(error.to_string()))
}

async fn run_on(
    worker: &mut Worker,
    path: &Path,
    fresh: bool,
    tx: &UnboundedSender<Progress>,
) -> Result<FileResult, (WorkerError, InFlight)> {
    let mut in_flight = InFlight::default();
    let request = Request::RunFile {
        path: path.to_path_buf(),
        fresh,
    };
    if let Err(e) = worker.send(request).await {
        return Err((e, in_flight));
    }
    loop {
        match worker.recv().await {
            Ok(Response::Event { event }) => {
                in_flight.observe(&event);
                let _ = tx.send(Progress::Event(event));
            }
            Ok(Response::FileDone { result }) => return Ok(result),
            Ok(Response::Error { message }) => return Err((WorkerError::Protocol(message), in_flight)),
            Ok(Response::Ack) => {
                warn!(worker = worker.id(), "unexpected acknowledgement while running a file");
            }
            Err(e) => return Err((e, in_flight)),
        }
    }
}
