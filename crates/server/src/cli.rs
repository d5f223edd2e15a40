use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "dispatchd", version, about = "Job dispatch HTTP server")]
pub struct Cli {
    /// Listen port (overrides the settings file).
    #[arg(short, long, env = "DISPATCHD_PORT")]
    pub port: Option<u16>,

    /// Path to a JSON settings file.
    #[arg(long, env = "DISPATCHD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, env = "DISPATCHD_LOG", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run as an isolated PDF worker process. Spawned by the server itself;
    /// not part of the public interface.
    #[command(hide = true)]
    PdfWorker {
        /// Worker name used in logs and results.
        name: String,
    },
}
