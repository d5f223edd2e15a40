//! Loop run inside an isolated worker process.
//!
//! The driver writes [`JobDescriptor`] lines to our stdin and reads
//! [`ResultFrame`] lines from our stdout; stderr stays free for logs. The
//! loop exits when the driver closes the pipe.

use std::io::{self, BufRead as _, Write as _};

use anyhow::Context as _;
use tracing::{error, info, warn};

use crate::job::{JobKind, JobResult};
use crate::proto::{JobDescriptor, ResultFrame};
use crate::render::PdfRenderer;
use crate::worker::{WorkerOptions, execute_job};

/// Consume job descriptors from stdin until EOF, publishing one result frame
/// per job on stdout.
pub fn run_process_worker(worker_name: &str, renderer: &dyn PdfRenderer) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    info!("{worker_name}[{}] running...", std::process::id());

    for line in stdin.lock().lines() {
        let line = line.context("read job descriptor")?;
        if line.trim().is_empty() {
            continue;
        }
        let desc: JobDescriptor = match serde_json::from_str(&line) {
            Ok(desc) => desc,
            Err(err) => {
                error!("{worker_name} bad job descriptor: {err}");
                continue;
            }
        };

        let frame = ResultFrame {
            handle_id: desc.handle_id.clone(),
            result: process_descriptor(worker_name, &desc, renderer),
        };
        serde_json::to_writer(&mut stdout, &frame).context("encode result frame")?;
        stdout.write_all(b"\n").context("write result frame")?;
        stdout.flush().context("flush result frame")?;
    }

    info!("{worker_name} job pipe closed, exiting");
    Ok(())
}

fn process_descriptor(
    worker_name: &str,
    desc: &JobDescriptor,
    renderer: &dyn PdfRenderer,
) -> JobResult {
    warn!("{worker_name} job[{}] kind={} picked up", desc.id, desc.kind);
    match desc.kind {
        JobKind::Pdf2Image => execute_job(
            worker_name,
            &desc.id,
            desc.create_epoch_ms,
            &desc.payload,
            &WorkerOptions::default(),
            renderer,
        ),
        // Only CPU-isolated conversion work belongs here.
        JobKind::Message => {
            error!("{worker_name} job[{}] invalid job kind for process worker", desc.id);
            let mut result = JobResult::empty(worker_name);
            result.err_code = "err".to_string();
            result.err = "error processing job request".to_string();
            result
        }
    }
}
