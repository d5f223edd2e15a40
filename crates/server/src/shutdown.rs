use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::oneshot;
use tracing::warn;

/// Counts stop requests so a second CTRL+C can escalate to an immediate exit.
#[derive(Debug)]
pub struct ShutdownController {
    forced: AtomicU8,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            forced: AtomicU8::new(0),
        }
    }

    pub fn bump_forced(&self) -> u8 {
        self.forced.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the CTRL+C handler. The returned receiver resolves on the first
/// signal (graceful drain); a second signal exits the process immediately.
pub fn spawn_ctrl_c_handler(shutdown: Arc<ShutdownController>) -> oneshot::Receiver<()> {
    let (graceful_tx, graceful_rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut graceful_tx = Some(graceful_tx);
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let n = shutdown.bump_forced();
            if n == 1 {
                warn!(
                    "Stop requested — finishing in-flight jobs before exiting \
                     (press CTRL+C again to exit immediately)."
                );
                if let Some(tx) = graceful_tx.take() {
                    let _ = tx.send(());
                }
            } else {
                warn!("Stop requested again — exiting immediately.");
                std::process::exit(130);
            }
        }
    });
    graceful_rx
}
