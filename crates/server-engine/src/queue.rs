//! Bounded FIFO between request handlers and workers.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

use crate::job::Job;

/// Error returned by [`JobQueue::offer`] when the queue is at capacity. The
/// rejected job is handed back untouched.
#[derive(Debug, thiserror::Error)]
#[error("job queue full (capacity {capacity})")]
pub struct QueueFull {
    /// Capacity of the rejecting queue.
    pub capacity: usize,
    /// The job that was not accepted.
    pub job: Job,
}

/// Bounded multi-producer / multi-consumer job FIFO.
///
/// Clones share the same underlying channel; use [`JobQueue::same_queue`] to
/// tell whether two handles refer to one physical queue (workers in a pool may
/// fan out from a single queue).
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: Sender<Job>,
    rx: Receiver<Job>,
    capacity: usize,
}

impl JobQueue {
    /// A new empty queue holding at most `capacity` jobs.
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Non-blocking enqueue. Fails fast with [`QueueFull`] when `len() ==
    /// capacity()`, leaving the queue untouched.
    pub fn offer(&self, job: Job) -> Result<(), QueueFull> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            // Disconnection cannot happen while both halves live in self, but
            // treat it as saturation rather than panicking.
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => Err(QueueFull {
                capacity: self.capacity,
                job,
            }),
        }
    }

    /// Dequeue the head, waiting at most `timeout`. Returns `None` when the
    /// queue stayed empty.
    pub fn poll(&self, timeout: Duration) -> Option<Job> {
        match self.rx.recv_timeout(timeout) {
            Ok(job) => Some(job),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Number of jobs currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue holds no jobs.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Whether the queue is at capacity.
    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    /// Maximum number of queued jobs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `self` and `other` are handles onto one physical queue.
    pub fn same_queue(&self, other: &JobQueue) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;

    fn job(id: &str) -> Job {
        Job::message(id.to_string(), 1, "t".to_string()).0
    }

    #[test]
    fn offer_fails_fast_at_capacity() {
        let q = JobQueue::bounded(2);
        q.offer(job("a")).unwrap();
        q.offer(job("b")).unwrap();
        assert!(q.is_full());

        let err = q.offer(job("c")).unwrap_err();
        assert_eq!(err.capacity, 2);
        assert_eq!(err.job.id(), "c");
        // The failed offer must not disturb the queue.
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn poll_is_fifo() {
        let q = JobQueue::bounded(4);
        for id in ["1", "2", "3"] {
            q.offer(job(id)).unwrap();
        }
        let t = Duration::from_millis(10);
        assert_eq!(q.poll(t).unwrap().id(), "1");
        assert_eq!(q.poll(t).unwrap().id(), "2");
        assert_eq!(q.poll(t).unwrap().id(), "3");
    }

    #[test]
    fn poll_times_out_on_empty_queue() {
        let q = JobQueue::bounded(1);
        assert!(q.poll(Duration::from_millis(20)).is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn clones_share_the_physical_queue() {
        let q = JobQueue::bounded(3);
        let q2 = q.clone();
        let other = JobQueue::bounded(3);

        assert!(q.same_queue(&q2));
        assert!(!q.same_queue(&other));

        q.offer(job("x")).unwrap();
        assert_eq!(q2.len(), 1);
        assert_eq!(q2.poll(Duration::from_millis(10)).unwrap().id(), "x");
    }
}
