//! Isolated-process pool for CPU-bound conversion jobs.
//!
//! The driver keeps one bounded job FIFO and one bounded result FIFO shared
//! by every worker process. Jobs cross the boundary as [`JobDescriptor`]
//! lines on a worker's stdin; results come back as [`ResultFrame`] lines on
//! its stdout. An idle worker pulls the next descriptor from the shared FIFO
//! only after its previous result has been accepted into the result FIFO, so
//! queued jobs are never hoarded by a busy worker. A single reconciler task
//! matches result frames to the pending completion handles by id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context as _;
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::job::{Completion, Job};
use crate::proto::{JobDescriptor, ResultFrame};

/// Default capacity of the cross-process job FIFO.
pub const JOB_QUEUE_MAX_SIZE: usize = 10;
/// Default capacity of the cross-process result FIFO.
pub const RESULT_QUEUE_MAX_SIZE: usize = 10;

/// Errors surfaced by [`ProcessManager::enqueue`].
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    /// The job FIFO is at capacity; the caller should shed load.
    #[error("process job queue full (capacity {0})")]
    QueueFull(usize),
    /// A handle with the same id is already pending. Job ids are unique, so
    /// this is an invariant breach; it marks the manager unhealthy.
    #[error("duplicate handle id {0}")]
    DuplicateHandle(String),
    /// An earlier invariant breach poisoned the manager; no further jobs are
    /// accepted.
    #[error("pending registry invariant breached, refusing new jobs")]
    Unhealthy,
}

/// Command line used to launch one worker process. The manager appends the
/// per-worker name as the final argument.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Program to execute (normally the server binary itself).
    pub program: PathBuf,
    /// Arguments selecting the worker entry point.
    pub args: Vec<String>,
}

type Pending = Arc<Mutex<HashMap<String, Completion>>>;
type SharedJobs = Arc<tokio::sync::Mutex<mpsc::Receiver<JobDescriptor>>>;

/// Driver-side handle to the isolated worker processes.
pub struct ProcessManager {
    name: String,
    job_tx: mpsc::Sender<JobDescriptor>,
    // Keeps the shared FIFO alive independently of the feeder tasks.
    _job_rx: SharedJobs,
    pending: Pending,
    healthy: AtomicBool,
    children: Mutex<Vec<(String, Child)>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessManager {
    /// Spawn `worker_count` worker processes named `procWorker{N}` and the
    /// reconciler. Workers die with the driver (`kill_on_drop`). Must run
    /// inside a tokio runtime.
    pub fn start(
        name: impl Into<String>,
        worker_count: usize,
        command: &WorkerCommand,
    ) -> anyhow::Result<Self> {
        let name = name.into();
        let (job_tx, job_rx) = mpsc::channel::<JobDescriptor>(JOB_QUEUE_MAX_SIZE);
        let (result_tx, result_rx) = mpsc::channel::<ResultFrame>(RESULT_QUEUE_MAX_SIZE);
        let shared_jobs: SharedJobs = Arc::new(tokio::sync::Mutex::new(job_rx));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let mut children = Vec::with_capacity(worker_count);
        let mut tasks = Vec::new();
        for i in 0..worker_count {
            let worker_name = format!("procWorker{}", i + 1);
            let mut child = Command::new(&command.program)
                .args(&command.args)
                .arg(&worker_name)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("spawn worker process {worker_name}"))?;
            let stdin = child
                .stdin
                .take()
                .with_context(|| format!("{worker_name} stdin not piped"))?;
            let stdout = child
                .stdout
                .take()
                .with_context(|| format!("{worker_name} stdout not piped"))?;

            let (ack_tx, ack_rx) = mpsc::channel::<()>(1);
            tasks.push(tokio::spawn(feed_worker(
                worker_name.clone(),
                shared_jobs.clone(),
                stdin,
                ack_rx,
            )));
            tasks.push(tokio::spawn(read_worker(
                worker_name.clone(),
                stdout,
                result_tx.clone(),
                ack_tx,
            )));
            children.push((worker_name, child));
        }
        // The reconciler ends once every reader task is gone.
        drop(result_tx);
        tasks.push(tokio::spawn(reconcile(
            name.clone(),
            result_rx,
            pending.clone(),
        )));

        Ok(Self {
            name,
            job_tx,
            _job_rx: shared_jobs,
            pending,
            healthy: AtomicBool::new(true),
            children: Mutex::new(children),
            tasks: Mutex::new(tasks),
        })
    }

    /// Publish `job` to the worker processes and register its completion
    /// handle under the job id. Non-blocking: a full job FIFO is reported as
    /// [`EnqueueError::QueueFull`]. Abandoned pending entries are reaped
    /// opportunistically on every call.
    pub fn enqueue(&self, job: Job) -> Result<(), EnqueueError> {
        if !self.is_healthy() {
            return Err(EnqueueError::Unhealthy);
        }
        let mut pending = lock(&self.pending);

        let handle_id = job.id().to_string();
        if pending.contains_key(&handle_id) {
            // A registry collision means handle reconciliation can no longer
            // be trusted; latch unhealthy so further traffic is refused.
            self.healthy.store(false, Ordering::SeqCst);
            error!(
                "{} handle[{handle_id}] already pending, marking manager unhealthy",
                self.name
            );
            return Err(EnqueueError::DuplicateHandle(handle_id));
        }

        let descriptor = JobDescriptor::from_job(&job);
        let completion = job.into_completion();
        if self.job_tx.try_send(descriptor).is_err() {
            return Err(EnqueueError::QueueFull(JOB_QUEUE_MAX_SIZE));
        }
        pending.insert(handle_id, completion);

        // Reap entries whose consumer gave up before a worker got to them.
        pending.retain(|id, completion| {
            let keep = !completion.is_abandoned();
            if !keep {
                debug!("{} pending handle[{id}] removed (abandoned)", self.name);
            }
            keep
        });
        Ok(())
    }

    /// Number of registered, not yet reconciled completion handles.
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    /// False once an invariant breach has been observed; the manager then
    /// refuses every further enqueue.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Terminate and wait for every worker process, then tear down the pump
    /// tasks. Idempotent: a second call finds nothing to stop.
    pub async fn stop(&self) {
        let mut children: Vec<(String, Child)> = {
            let mut slot = match self.children.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.drain(..).collect()
        };
        if children.is_empty() {
            return;
        }

        for (worker_name, child) in &mut children {
            warn!("{} stopping worker process[{worker_name}]...", self.name);
            if child.start_kill().is_err() {
                debug!("{} worker process[{worker_name}] already exited", self.name);
            }
        }
        for (worker_name, child) in &mut children {
            if let Err(err) = child.wait().await {
                error!("{} wait for worker process[{worker_name}]: {err}", self.name);
            }
        }

        let tasks: Vec<JoinHandle<()>> = {
            let mut slot = match self.tasks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.drain(..).collect()
        };
        for task in tasks {
            task.abort();
        }
        warn!("{} all worker processes stopped", self.name);
    }
}

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<String, Completion>> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn feed_worker(
    worker_name: String,
    shared_jobs: SharedJobs,
    mut stdin: ChildStdin,
    mut ack_rx: mpsc::Receiver<()>,
) {
    loop {
        // Holding the FIFO lock while waiting is what makes this a shared
        // queue: exactly one idle worker pulls each descriptor.
        let descriptor = { shared_jobs.lock().await.recv().await };
        let Some(descriptor) = descriptor else { break };

        let mut line = match serde_json::to_string(&descriptor) {
            Ok(line) => line,
            Err(err) => {
                error!("{worker_name} encode job descriptor: {err}");
                continue;
            }
        };
        line.push('\n');
        if stdin.write_all(line.as_bytes()).await.is_err() {
            // The worker died with a job committed to it; the submitter's
            // deadline covers the loss.
            error!("{worker_name} job pipe closed, dropping job[{}]", descriptor.id);
            break;
        }

        if ack_rx.recv().await.is_none() {
            break;
        }
    }
}

async fn read_worker(
    worker_name: String,
    stdout: ChildStdout,
    result_tx: mpsc::Sender<ResultFrame>,
    ack_tx: mpsc::Sender<()>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ResultFrame>(&line) {
                    Ok(frame) => {
                        // Result first, idle ack second: the worker counts as
                        // free only once its result is in the result FIFO.
                        if result_tx.send(frame).await.is_err() {
                            break;
                        }
                        if ack_tx.send(()).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => error!("{worker_name} bad result frame: {err}"),
                }
            }
            Ok(None) => break,
            Err(err) => {
                error!("{worker_name} read result frame: {err}");
                break;
            }
        }
    }
    debug!("{worker_name} result pipe closed");
}

async fn reconcile(manager_name: String, mut result_rx: mpsc::Receiver<ResultFrame>, pending: Pending) {
    debug!("{manager_name} reconciler running...");
    while let Some(frame) = result_rx.recv().await {
        debug!("{manager_name} result for handle[{}]", frame.handle_id);
        let completion = { lock(&pending).remove(&frame.handle_id) };
        match completion {
            None => error!(
                "{manager_name} handle[{}] not found in pending registry",
                frame.handle_id
            ),
            Some(completion) => {
                if completion.fulfill(frame.result).is_err() {
                    debug!("{manager_name} handle[{}] already done", frame.handle_id);
                }
            }
        }
    }
    debug!("{manager_name} reconciler stopped");
}
