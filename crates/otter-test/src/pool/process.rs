//! Process transport: each worker is a child process speaking framed JSON
//! over its stdin and stdout. Stderr is kept for crash reports.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::WorkerError;
use crate::pool::ipc;
use crate::pool::protocol::{Request, Response};
use crate::pool::serve::WORKER_ID_ENV;

/// Stderr lines kept per worker.
const STDERR_TAIL_LINES: usize = 50;

pub(crate) struct ProcessWorker {
    id: usize,
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ProcessWorker {
    pub(crate) fn spawn(id: usize, program: &Path, args: &[String]) -> Result<Self, WorkerError> {
        let mut child = Command::new(program)
            .args(args)
            .env(WORKER_ID_ENV, id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::Spawn(format!("{}: {e}", program.display())))?;

        let missing = |what: &str| WorkerError::Spawn(format!("worker {what} is not piped"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        let tail = stderr_tail.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(worker = id, "stderr: {line}");
                let mut tail = tail.lock();
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        });

        debug!(worker = id, pid = ?child.id(), "spawned process worker");
        Ok(Self {
            id,
            child,
            stdin,
            stdout,
            stderr_tail,
            stderr_task: Some(stderr_task),
        })
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) async fn send(&mut self, request: &Request) -> Result<(), WorkerError> {
        match ipc::write_frame(&mut self.stdin, request).await {
            Ok(()) => Ok(()),
            Err(_) => Err(self.died().await),
        }
    }

    pub(crate) async fn recv(&mut self) -> Result<Response, WorkerError> {
        match ipc::read_frame(&mut self.stdout).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(self.died().await),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                Err(WorkerError::Protocol(e.to_string()))
            }
            Err(_) => Err(self.died().await),
        }
    }

    /// Collect what the dead worker left on stderr.
    async fn died(&mut self) -> WorkerError {
        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(Duration::from_millis(500), task).await;
        }
        let status = tokio::time::timeout(Duration::from_millis(500), self.child.wait()).await;
        debug!(worker = self.id, status = ?status, "process worker died");

        let tail = self.stderr_tail.lock();
        let stderr = (!tail.is_empty()).then(|| tail.iter().cloned().collect::<Vec<_>>().join("\n"));
        WorkerError::Died { stderr }
    }

    /// Wait for a worker that acknowledged shutdown to exit.
    pub(crate) async fn wait(mut self) {
        if tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await.is_err() {
            let _ = self.child.kill().await;
        }
    }
}
