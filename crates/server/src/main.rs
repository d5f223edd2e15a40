use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use dispatchd::cli::{Cli, Command};
use dispatchd::routes;
use dispatchd::shutdown::{ShutdownController, spawn_ctrl_c_handler};
use dispatchd::state::AppState;
use dispatchd_core::settings::ServerSettings;
use dispatchd_engine::{PdfRenderer, PopplerRenderer, run_process_worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    // Worker-process mode: stdin/stdout belong to the job pipes, logs go to
    // stderr through the subscriber above.
    if let Some(Command::PdfWorker { name }) = &cli.command {
        return run_process_worker(name, &PopplerRenderer);
    }

    let mut settings = match &cli.config {
        Some(path) => ServerSettings::load(path)?,
        None => ServerSettings::default(),
    };
    if let Some(port) = cli.port {
        settings.port = port;
    }

    info!(
        "dispatchd {} pid={} port={}",
        env!("CARGO_PKG_VERSION"),
        std::process::id(),
        settings.port
    );

    let renderer: Arc<dyn PdfRenderer> = Arc::new(PopplerRenderer);
    let state = AppState::init(settings.clone(), renderer).await?;

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.port))
        .await
        .with_context(|| format!("bind port {}", settings.port))?;
    info!("listening on {}", listener.local_addr()?);

    let controller = Arc::new(ShutdownController::new());
    let graceful = spawn_ctrl_c_handler(controller);

    axum::serve(listener, routes::router(state.clone()))
        .with_graceful_shutdown(async move {
            let _ = graceful.await;
        })
        .await
        .context("http server")?;

    state.stop_all().await;
    info!("shutdown complete");
    // Hard exit: lingering connection tasks in the HTTP stack would otherwise
    // log noisily while unwinding. This server owns no durable state, so
    // skipping destructors is safe.
    std::process::exit(0)
}
