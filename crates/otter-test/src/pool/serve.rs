//! Worker side of the pool
//!
//! A worker holds at most one execution context and answers requests in
//! order. Runner events are forwarded while a file runs, so the coordinator
//! knows which tests were in flight if the worker dies.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, warn};

use crate::config::TestConfig;
use crate::error::WorkerError;
use crate::execution::{ContextOptions, ExecutionContext};
use crate::file::Bundle;
use crate::pool::ipc;
use crate::pool::protocol::{Request, Response};
use crate::reporter::{EventSink, RunnerEvent};

/// Environment variable carrying a process worker's id.
pub const WORKER_ID_ENV: &str = "OTTER_TEST_WORKER_ID";

struct Forward<'a>(&'a UnboundedSender<Response>);

impl EventSink for Forward<'_> {
    fn emit(&self, event: RunnerEvent) {
        let _ = self.0.send(Response::Event { event });
    }
}

/// State of one worker between requests.
pub(crate) struct WorkerState {
    id: usize,
    bundle: Arc<Bundle>,
    options: Arc<ContextOptions>,
    /// Run-wide limiter handed in by a thread pool
    shared_limiter: Option<Arc<Semaphore>>,
    limiter: Arc<Semaphore>,
    env: BTreeMap<String, Option<String>>,
    context: Option<ExecutionContext>,
}

impl WorkerState {
    pub(crate) fn new(id: usize, bundle: Arc<Bundle>, shared_limiter: Option<Arc<Semaphore>>) -> Self {
        let options = ContextOptions::default();
        let limiter = shared_limiter
            .clone()
            .unwrap_or_else(|| Arc::new(Semaphore::new(options.max_concurrency)));
        Self {
            id,
            bundle,
            options: Arc::new(options),
            shared_limiter,
            limiter,
            env: BTreeMap::new(),
            context: None,
        }
    }

    fn init(&mut self, config: &TestConfig) -> Result<(), String> {
        let options = ContextOptions::from_config(config).map_err(|e| e.to_string())?;
        self.limiter = self
            .shared_limiter
            .clone()
            .unwrap_or_else(|| Arc::new(Semaphore::new(options.max_concurrency)));
        self.options = Arc::new(options);
        self.teardown();
        Ok(())
    }

    fn context(&mut self, fresh: bool) -> &mut ExecutionContext {
        if fresh {
            self.teardown();
        }
        let (id, bundle, options, limiter) = (self.id, &self.bundle, &self.options, &self.limiter);
        let env = &self.env;
        self.context.get_or_insert_with(|| {
            let context = ExecutionContext::new(id, bundle.clone(), options.clone(), limiter.clone());
            context.apply_env(env);
            context
        })
    }

    pub(crate) fn teardown(&mut self) {
        if let Some(context) = self.context.take() {
            context.teardown();
        }
    }

    /// Handle one request. Returns false once the worker should stop.
    pub(crate) async fn handle(&mut self, request: Request, out: &UnboundedSender<Response>) -> bool {
        let response = match request {
            Request::Init { config } => match self.init(&config) {
                Ok(()) => Response::Ack,
                Err(message) => Response::Error { message },
            },
            Request::RunFile { path, fresh } => {
                let context = self.context(fresh);
                let result = context.run_file(&path, &Forward(out)).await;
                Response::FileDone { result }
            }
            Request::ApplyEnv { changes } => {
                if let Some(context) = &self.context {
                    context.apply_env(&changes);
                }
                self.env.extend(changes);
                Response::Ack
            }
            Request::Teardown => {
                self.teardown();
                Response::Ack
            }
            Request::Shutdown => {
                self.teardown();
                let _ = out.send(Response::Ack);
                debug!(worker = self.id, "worker shutting down");
                return false;
            }
        };
        out.send(response).is_ok()
    }
}

/// Serve requests from `reader`, writing responses to `writer`, until the
/// stream closes or a shutdown arrives.
pub async fn serve_worker<R, W>(mut reader: R, mut writer: W, bundle: Arc<Bundle>) -> Result<(), WorkerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let id = std::env::var(WORKER_ID_ENV)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();
    let writer_task = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            ipc::write_frame(&mut writer, &response).await?;
        }
        Ok::<(), io::Error>(())
    });

    let mut state = WorkerState::new(id, bundle, None);
    let outcome = async {
        while let Some(request) = ipc::read_frame::<_, Request>(&mut reader).await? {
            if !state.handle(request, &tx).await {
                break;
            }
        }
        Ok::<(), WorkerError>(())
    }
    .await;
    state.teardown();
    drop(tx);

    match writer_task.await {
        Ok(written) => written?,
        Err(e) => return Err(WorkerError::Protocol(e.to_string())),
    }
    if let Err(e) = &outcome {
        warn!(worker = id, "worker stopped: {e}");
    }
    outcome
}

/// Entry point for a process worker: serve over stdin/stdout on a fresh
/// single-threaded runtime.
pub fn run_worker_stdio(bundle: Bundle) -> Result<(), WorkerError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve_worker(tokio::io::stdin(), tokio::io::stdout(), Arc::new(bundle)))
}
