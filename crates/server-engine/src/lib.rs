#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Job-dispatch engine for `dispatchd`: bounded queues, worker-thread pools
//! with least-busy routing, and an isolated-process pool for conversion work.

/// Job, result and completion-handle types.
pub mod job;
/// Worker pools and the least-busy router.
pub mod pool;
/// Isolated-process pool driver.
pub mod process;
/// Worker-process entry point.
pub mod process_worker;
/// Cross-process wire records.
pub mod proto;
/// Bounded job FIFO.
pub mod queue;
/// PDF rendering seam.
pub mod render;
/// Queue worker threads.
pub mod worker;

pub use job::{Completion, CompletionWaiter, Job, JobKind, JobPayload, JobResult, completion};
pub use pool::{WorkerLike, least_busy_queue, spawn_pool};
pub use process::{EnqueueError, ProcessManager, WorkerCommand};
pub use process_worker::run_process_worker;
pub use queue::{JobQueue, QueueFull};
pub use render::{PdfRenderer, PopplerRenderer};
pub use worker::{QUEUE_MAX_SIZE, QueueWorker, ReadySignal, WorkerOptions};
