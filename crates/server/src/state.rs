use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use tracing::{error, warn};

use dispatchd_core::settings::ServerSettings;
use dispatchd_engine::{
    PdfRenderer, ProcessManager, QueueWorker, WorkerCommand, WorkerOptions, spawn_pool,
};

/// Process-wide dispatch state: the message worker, the PDF worker pool and
/// the optional isolated-process pool. Built once at startup, handed to every
/// request handler by reference.
pub struct AppState {
    pub settings: ServerSettings,
    pub message_worker: QueueWorker,
    pub pdf_workers: Vec<QueueWorker>,
    pub process_manager: Option<ProcessManager>,
    unhealthy: AtomicBool,
    stopped: AtomicBool,
}

impl AppState {
    /// Start every worker and wait for each readiness signal before
    /// returning, so no request can race a half-started pool.
    pub async fn init(
        settings: ServerSettings,
        renderer: Arc<dyn PdfRenderer>,
    ) -> anyhow::Result<Arc<Self>> {
        let out_dir = PathBuf::from(&settings.out_dir);
        let (message_worker, message_ready) = QueueWorker::spawn(
            "messageWorker",
            WorkerOptions {
                queue_max_size: settings.message_queue_size,
                out_dir: out_dir.clone(),
                message_short_task: Duration::from_millis(settings.message_task_short_ms),
                message_long_task: Duration::from_millis(settings.message_task_long_ms),
                ..WorkerOptions::default()
            },
            renderer.clone(),
        )?;

        if settings.pdf_single_queue {
            warn!("Use single queue for pdf workers!");
        }
        let (pdf_workers, pdf_ready) = spawn_pool(
            "pdfWorker",
            settings.pdf_worker_count,
            settings.pdf_single_queue,
            &WorkerOptions {
                queue_max_size: settings.pdf_queue_size,
                out_dir,
                ..WorkerOptions::default()
            },
            &renderer,
        )?;

        message_ready.await.context("message worker readiness")?;
        for ready in pdf_ready {
            ready.await.context("pdf worker readiness")?;
        }

        let process_manager = if settings.process_pool {
            let program = std::env::current_exe().context("locate server binary")?;
            let command = WorkerCommand {
                program,
                args: vec!["pdf-worker".to_string()],
            };
            Some(
                ProcessManager::start("mpMgr", settings.process_worker_count, &command)
                    .context("start process pool")?,
            )
        } else {
            None
        };

        Ok(Arc::new(Self {
            settings,
            message_worker,
            pdf_workers,
            process_manager,
            unhealthy: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }))
    }

    /// Latch the server unhealthy after an invariant breach. One-way; only a
    /// restart clears it.
    pub fn mark_unhealthy(&self) {
        if !self.unhealthy.swap(true, Ordering::SeqCst) {
            error!("invariant breach observed, refusing further dispatch traffic");
        }
    }

    /// Whether dispatch traffic may still be accepted. False once this state
    /// or the process manager has seen an invariant breach.
    pub fn is_healthy(&self) -> bool {
        if self.unhealthy.load(Ordering::SeqCst) {
            return false;
        }
        self.process_manager
            .as_ref()
            .is_none_or(ProcessManager::is_healthy)
    }

    /// Stop every pool and wait for it. Safe to call from both the signal
    /// path and the server-drain path: only the first call does work.
    pub async fn stop_all(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(manager) = &self.process_manager {
            manager.stop().await;
        }

        warn!("stopping all multi-thread workers...");
        for worker in self.thread_workers() {
            worker.stop();
        }
        tokio::task::block_in_place(|| {
            for worker in self.thread_workers() {
                worker.join();
            }
        });
        warn!("all multi-thread workers stopped");
    }

    fn thread_workers(&self) -> impl Iterator<Item = &QueueWorker> {
        std::iter::once(&self.message_worker).chain(self.pdf_workers.iter())
    }
}
