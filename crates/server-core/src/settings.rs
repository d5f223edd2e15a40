use std::path::Path;

use serde::{Deserialize, Serialize};

/// Server configuration. Every field is immutable after startup; the CLI may
/// override the port before the server is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// HTTP listen port.
    pub port: u16,
    /// Capacity of the single message worker's queue.
    pub message_queue_size: usize,
    /// Number of PDF worker threads.
    pub pdf_worker_count: usize,
    /// Capacity of each PDF worker queue (or of the shared queue).
    pub pdf_queue_size: usize,
    /// One shared queue fanning out to all PDF workers instead of a private
    /// queue per worker.
    pub pdf_single_queue: bool,
    /// Route PDF jobs to the isolated worker processes instead of the
    /// in-process pool.
    pub pdf_isolation: bool,
    /// Start the isolated-process pool at boot.
    pub process_pool: bool,
    /// Number of isolated worker processes.
    pub process_worker_count: usize,
    /// Sleep for the short variant of the simulated message load.
    pub message_task_short_ms: u64,
    /// Sleep for the long variant of the simulated message load.
    pub message_task_long_ms: u64,
    /// PDF file converted by `pdf2image` jobs.
    pub pdf_sample_path: String,
    /// Root directory for job outputs (uploads, rendered pages).
    pub out_dir: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 5000,
            message_queue_size: 10,
            pdf_worker_count: 8,
            pdf_queue_size: 10,
            pdf_single_queue: true,
            pdf_isolation: false,
            process_pool: true,
            process_worker_count: 8,
            message_task_short_ms: 3_000,
            message_task_long_ms: 10_000,
            pdf_sample_path: "./data/sample-17pages.pdf".to_string(),
            out_dir: "./out".to_string(),
        }
    }
}

impl ServerSettings {
    /// Load settings from a JSON file. Unknown fields are ignored and missing
    /// fields fall back to the defaults above.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("read settings {}: {err}", path.display()))?;
        let settings: Self = serde_json::from_str(&raw)
            .map_err(|err| anyhow::anyhow!("parse settings {}: {err}", path.display()))?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_startup_contract() {
        let s = ServerSettings::default();
        assert_eq!(s.message_queue_size, 10);
        assert_eq!(s.pdf_worker_count, 8);
        assert_eq!(s.pdf_queue_size, 10);
        assert!(s.pdf_single_queue);
        assert_eq!(s.process_worker_count, 8);
        assert!(!s.pdf_isolation);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let s: ServerSettings =
            serde_json::from_str(r#"{"port": 8123, "pdf_single_queue": false}"#).unwrap();
        assert_eq!(s.port, 8123);
        assert!(!s.pdf_single_queue);
        assert_eq!(s.message_queue_size, 10);
    }
}
