//! Worker pools and the least-busy queue router.

use std::sync::Arc;

use tracing::debug;

use crate::queue::JobQueue;
use crate::render::PdfRenderer;
use crate::worker::{QueueWorker, ReadySignal, WorkerOptions};

/// Read-only view the router needs from a worker.
pub trait WorkerLike {
    /// Worker name, for diagnostics.
    fn name(&self) -> &str;
    /// The physical queue this worker consumes.
    fn queue(&self) -> &JobQueue;
    /// Whether a job is currently executing. Advisory: a torn read only skews
    /// the load estimate.
    fn is_running_job(&self) -> bool;
}

impl WorkerLike for QueueWorker {
    fn name(&self) -> &str {
        QueueWorker::name(self)
    }

    fn queue(&self) -> &JobQueue {
        QueueWorker::queue(self)
    }

    fn is_running_job(&self) -> bool {
        QueueWorker::is_running_job(self)
    }
}

/// Pick the destination queue with the least effective load.
///
/// Workers may share one physical queue, so workers are first folded into
/// queue groups. A group's load is `queue.len()` plus one per worker of the
/// group currently running a job; the minimum wins and ties resolve to the
/// first group encountered. Returns `None` only for an empty worker slice.
pub fn least_busy_queue<W: WorkerLike>(workers: &[W]) -> Option<JobQueue> {
    let mut groups: Vec<(JobQueue, usize, Vec<&str>)> = Vec::new();
    for worker in workers {
        let running = usize::from(worker.is_running_job());
        match groups
            .iter_mut()
            .find(|(queue, _, _)| queue.same_queue(worker.queue()))
        {
            Some((_, group_running, names)) => {
                *group_running += running;
                names.push(worker.name());
            }
            None => groups.push((worker.queue().clone(), running, vec![worker.name()])),
        }
    }

    debug!(
        "leastBusyQueue unique queues={}, workers={:?}",
        groups.len(),
        groups.iter().map(|(_, _, names)| names).collect::<Vec<_>>()
    );

    groups
        .into_iter()
        .min_by_key(|(queue, running, _)| queue.len() + running)
        .map(|(queue, _, _)| queue)
}

/// Spawn `count` workers named `{prefix}{i}` (1-based) from an options
/// template. With `single_queue` every worker fans out from one shared queue
/// of `opts.queue_max_size`; otherwise each worker gets a private queue of
/// that capacity.
pub fn spawn_pool(
    prefix: &str,
    count: usize,
    single_queue: bool,
    opts: &WorkerOptions,
    renderer: &Arc<dyn PdfRenderer>,
) -> anyhow::Result<(Vec<QueueWorker>, Vec<ReadySignal>)> {
    let shared = single_queue.then(|| JobQueue::bounded(opts.queue_max_size));
    let mut workers = Vec::with_capacity(count);
    let mut ready = Vec::with_capacity(count);
    for i in 0..count {
        let mut worker_opts = opts.clone();
        worker_opts.queue = shared.clone();
        let (worker, signal) =
            QueueWorker::spawn(format!("{prefix}{}", i + 1), worker_opts, renderer.clone())?;
        workers.push(worker);
        ready.push(signal);
    }
    Ok((workers, ready))
}
