//! Thread transport: one OS thread per worker, each with its own
//! single-threaded runtime.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, error};

use crate::error::WorkerError;
use crate::file::Bundle;
use crate::hooks::panic_message;
use crate::pool::protocol::{Request, Response};
use crate::pool::serve::WorkerState;

pub(crate) struct ThreadWorker {
    id: usize,
    requests: Sender<Request>,
    responses: UnboundedReceiver<Response>,
    /// Set when the worker thread panicked
    fault: Arc<Mutex<Option<String>>>,
}

impl ThreadWorker {
    pub(crate) fn spawn(id: usize, bundle: Arc<Bundle>, limiter: Arc<Semaphore>) -> Result<Self, WorkerError> {
        let (request_tx, request_rx) = unbounded::<Request>();
        let (response_tx, response_rx) = mpsc::unbounded_channel::<Response>();
        let fault = Arc::new(Mutex::new(None));
        let thread_fault = fault.clone();

        std::thread::Builder::new()
            .name(format!("otter-test-worker-{id}"))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                        Ok(runtime) => runtime,
                        Err(e) => {
                            error!(worker = id, "failed to build worker runtime: {e}");
                            return;
                        }
                    };
                    let mut state = WorkerState::new(id, bundle, Some(limiter));
                    for request in &request_rx {
                        if !runtime.block_on(state.handle(request, &response_tx)) {
                            break;
                        }
                    }
                    state.teardown();
                }));
                if let Err(panic) = outcome {
                    let message = panic_message(panic);
                    error!(worker = id, "worker thread panicked: {message}");
                    *thread_fault.lock() = Some(message);
                }
                debug!(worker = id, "worker thread exited");
            })
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;

        Ok(Self {
            id,
            requests: request_tx,
            responses: response_rx,
            fault,
        })
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn send(&self, request: Request) -> Result<(), WorkerError> {
        self.requests.send(request).map_err(|_| self.died())
    }

    pub(crate) async fn recv(&mut self) -> Result<Response, WorkerError> {
        match self.responses.recv().await {
            Some(response) => Ok(response),
            None => Err(self.died()),
        }
    }

    fn died(&self) -> WorkerError {
        WorkerError::Died {
            stderr: self.fault.lock().clone(),
        }
    }
}
