//! Long-lived worker threads consuming one job queue each.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use dispatchd_core::clock::epoch_ms;

use crate::job::{Job, JobPayload, JobResult};
use crate::queue::JobQueue;
use crate::render::PdfRenderer;

/// How long a worker waits on its queue before looping.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);
/// Idle interval between "alive" heartbeat logs.
const HEARTBEAT_INTERVAL_MS: i64 = 5 * 60 * 1000;
/// Parallel-conversion hint handed to the PDF renderer.
const PDF_THREAD_HINT: usize = 4;
/// Default capacity of a worker's private queue.
pub const QUEUE_MAX_SIZE: usize = 10;

/// Options for spawning a [`QueueWorker`].
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Capacity of the private queue built when `queue` is not supplied.
    pub queue_max_size: usize,
    /// Existing queue to consume (shared-queue topology). `None` gives the
    /// worker a private queue.
    pub queue: Option<JobQueue>,
    /// Root directory for job outputs; rendered pages land under
    /// `<out_dir>/pdf2image/<jobId>/`.
    pub out_dir: PathBuf,
    /// Sleep for the short variant of the simulated message load.
    pub message_short_task: Duration,
    /// Sleep for the long variant (`random_no >= 8`).
    pub message_long_task: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            queue_max_size: QUEUE_MAX_SIZE,
            queue: None,
            out_dir: PathBuf::from("./out"),
            message_short_task: Duration::from_secs(3),
            message_long_task: Duration::from_secs(10),
        }
    }
}

/// Handle to a worker thread. The thread signals readiness once it enters its
/// loop, then runs one job at a time until [`QueueWorker::stop`] is observed.
pub struct QueueWorker {
    name: String,
    queue: JobQueue,
    running_job: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Fulfilled exactly once, when the worker thread enters its loop.
pub type ReadySignal = oneshot::Receiver<()>;

impl QueueWorker {
    /// Spawn a worker thread named `name`. The returned [`ReadySignal`]
    /// resolves once the loop is live; await it before routing traffic.
    pub fn spawn(
        name: impl Into<String>,
        opts: WorkerOptions,
        renderer: Arc<dyn PdfRenderer>,
    ) -> anyhow::Result<(Self, ReadySignal)> {
        let name = name.into();
        let queue = opts
            .queue
            .clone()
            .unwrap_or_else(|| JobQueue::bounded(opts.queue_max_size));
        let running_job = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn({
                let name = name.clone();
                let queue = queue.clone();
                let running_job = running_job.clone();
                let stop = stop.clone();
                move || worker_loop(&name, &opts, &queue, &running_job, &stop, &renderer, ready_tx)
            })
            .with_context(|| format!("spawn worker thread {name}"))?;

        let worker = Self {
            name,
            queue,
            running_job,
            stop,
            handle: Mutex::new(Some(handle)),
        };
        Ok((worker, ready_rx))
    }

    /// Worker name, as reported in results and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The queue this worker consumes.
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Whether a job is currently executing. Written only by the worker
    /// thread; readers treat it as advisory.
    pub fn is_running_job(&self) -> bool {
        self.running_job.load(Ordering::Relaxed)
    }

    /// Request the loop to exit after the current job. Idempotent.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Wait for the worker thread to exit. A no-op when already joined.
    pub fn join(&self) {
        if let Some(handle) = self.handle_slot().take()
            && handle.join().is_err()
        {
            error!("{} worker thread panicked", self.name);
        }
    }

    fn handle_slot(&self) -> MutexGuard<'_, Option<thread::JoinHandle<()>>> {
        // Poisoning only happens if a joiner panicked; the slot is still sound.
        match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn worker_loop(
    name: &str,
    opts: &WorkerOptions,
    queue: &JobQueue,
    running_job: &AtomicBool,
    stop: &AtomicBool,
    renderer: &Arc<dyn PdfRenderer>,
    ready_tx: oneshot::Sender<()>,
) {
    let _ = ready_tx.send(());
    info!("{name} running... maxQueueSize={}", queue.capacity());

    let mut last_alive_epms = epoch_ms();
    while !stop.load(Ordering::Relaxed) {
        running_job.store(false, Ordering::Relaxed);

        let now_epms = epoch_ms();
        if now_epms - last_alive_epms >= HEARTBEAT_INTERVAL_MS {
            debug!("{name} alive...");
            last_alive_epms = now_epms;
        }

        let Some(job) = queue.poll(POLL_TIMEOUT) else {
            continue;
        };

        running_job.store(true, Ordering::Relaxed);
        // A panicking job body must not take the loop down with it.
        if catch_unwind(AssertUnwindSafe(|| run_job(name, opts, job, renderer.as_ref()))).is_err() {
            error!("{name} job handler panicked");
        }
        running_job.store(false, Ordering::Relaxed);
    }
    info!("{name} stopped");
}

fn run_job(worker_name: &str, opts: &WorkerOptions, job: Job, renderer: &dyn PdfRenderer) {
    let job_id = job.id().to_string();
    warn!("{worker_name} job[{job_id}] kind={} picked up", job.kind());

    if job.is_abandoned() {
        debug!("{worker_name} job[{job_id}] no need to process (already canceled)");
        return;
    }

    let result = execute_job(
        worker_name,
        &job_id,
        job.create_epoch_ms(),
        job.payload(),
        opts,
        renderer,
    );
    let failed = result.is_err();
    let err = result.err.clone();

    if job.complete(result).is_err() {
        debug!("{worker_name} job[{job_id}] promise already done, result dropped");
    }
    if failed {
        error!("{worker_name} job[{job_id}] {err}");
    }
}

/// Run the job body and populate a complete [`JobResult`], including the
/// timing counters. Shared with the isolated-process worker loop.
pub(crate) fn execute_job(
    worker_name: &str,
    job_id: &str,
    create_epoch_ms: i64,
    payload: &JobPayload,
    opts: &WorkerOptions,
    renderer: &dyn PdfRenderer,
) -> JobResult {
    let mut result = JobResult::empty(worker_name);
    let dequeue_epms = epoch_ms();
    result.dequeue_elapsed_ms = dequeue_epms - create_epoch_ms;

    let process_epms = epoch_ms();
    let body = match payload {
        JobPayload::Message { random_no, .. } => run_message_job(*random_no, opts),
        JobPayload::Pdf2Image { pdf_file_path } => {
            run_pdf_job(renderer, opts, job_id, pdf_file_path)
        }
    };
    let finish_epms = epoch_ms();

    match body {
        Ok(data) => {
            result.data = data;
            result.process_elapsed_ms = finish_epms - process_epms;
            result.total_elapsed_ms = finish_epms - create_epoch_ms;
        }
        Err(err) => {
            error!("{worker_name} job[{job_id}] {err:#}");
            result.err_code = "err".to_string();
            result.err = "error processing job request".to_string();
        }
    }
    result
}

fn run_message_job(random_no: u8, opts: &WorkerOptions) -> anyhow::Result<String> {
    // Simulated bimodal CPU load.
    if random_no >= 8 {
        warn!("simulating a CPU intensive task that runs for an unexpected long time!");
        thread::sleep(opts.message_long_task);
    } else {
        thread::sleep(opts.message_short_task);
    }
    Ok(format!("message job finished ({})", epoch_ms()))
}

fn run_pdf_job(
    renderer: &dyn PdfRenderer,
    opts: &WorkerOptions,
    job_id: &str,
    pdf_file_path: &str,
) -> anyhow::Result<String> {
    let out_dir = opts.out_dir.join("pdf2image").join(job_id);
    let pages = renderer.render(Path::new(pdf_file_path), &out_dir, PDF_THREAD_HINT)?;
    Ok(format!("job[pdf2image] finished ({}), nPages={pages}", epoch_ms()))
}
