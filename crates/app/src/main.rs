mod annotation;
mod batch;
mod cli;
mod config;
mod realtime;
mod server;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use inference_core::{AnomalyEngine, OnnxEngine};
use tracing::info;

use crate::realtime::{CleanupQueue, SessionRegistry, spawn_cleanup_worker};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli = cli::CliArgs::parse(&args)?;

    telemetry::init_tracing(cli.verbose);
    let _ = telemetry::init_metrics_recorder();

    let mut config = match &cli.config_path {
        Some(path) => config::AppConfig::load(path)?,
        None => config::AppConfig::default(),
    };
    if let Some(listen_addr) = cli.listen_addr {
        config.server.listen_addr = listen_addr;
    }

    let engine = Arc::new(
        OnnxEngine::load(config.engine.clone()).context("failed to load inference models")?,
    );

    let capture_size = (config.server.capture_width, config.server.capture_height);
    let registry = Arc::new(SessionRegistry::new(
        engine.clone() as Arc<dyn AnomalyEngine>,
        config.intervals(),
        config.windows(),
        Box::new(move |descriptor| video_ingest::open_source(descriptor, capture_size)),
    ));

    let cleanup = Arc::new(CleanupQueue::new());
    let cleanup_worker = spawn_cleanup_worker(cleanup.clone(), config.remove_interval());

    let state = server::AppState {
        config,
        registry: registry.clone(),
        cleanup,
        engine,
    };
    let served = actix_web::rt::System::new().block_on(server::run(state));

    info!("shutting down");
    registry.shutdown();
    cleanup_worker.stop();
    served
}
