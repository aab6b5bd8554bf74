//! docflow CLI: start a worker pool or execute a run.
//!
//! `docflow run` executes the configured connectors and exits 0 iff every
//! document (and every child discovered mid-run) was indexed successfully.
//! `docflow worker` starts a worker pool for a named pipeline and runs until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use docflow_core::connector::build_connector;
use docflow_core::indexer::MemorySink;
use docflow_core::message::LocalBroker;
use docflow_core::pipeline::Pipeline;
use docflow_core::worker::{spawn_watchdog, MemoryRetryCounter, RetryCounter, Worker, WorkerPool};
use docflow_core::{run_local, Settings};

#[derive(Parser)]
#[command(name = "docflow")]
#[command(version, about = "Document-enrichment pipeline", long_about = None)]
struct Cli {
    /// Configuration file path.
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a worker pool for a named pipeline and run until interrupted.
    Worker {
        /// Pipeline to execute; defaults to `worker.pipeline` from the config.
        #[arg(short, long)]
        pipeline: Option<String>,
    },

    /// Execute the configured connectors as a run, then exit.
    ///
    /// Exit code 0 on successful reconciliation, non-zero if any document
    /// ended in FAIL or a connector errored.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let settings = Settings::load(&cli.config)?;

    match cli.command {
        Commands::Worker { pipeline } => start_workers(settings, pipeline).await,
        Commands::Run => start_run(settings).await,
    }
}

async fn start_workers(settings: Settings, pipeline: Option<String>) -> Result<()> {
    let pipeline_name = pipeline
        .or_else(|| settings.worker.pipeline.clone())
        .ok_or_else(|| eyre!("no pipeline selected: pass --pipeline or set worker.pipeline"))?;
    info!(pipeline = %pipeline_name, workers = settings.worker.threads, "starting workers");

    let broker = LocalBroker::new(&pipeline_name);
    let retry_counter: Option<Arc<dyn RetryCounter>> = settings
        .worker
        .max_retries
        .map(|max| Arc::new(MemoryRetryCounter::new(max)) as Arc<dyn RetryCounter>);

    let mut poll_handles = Vec::new();
    let pool = WorkerPool::start(settings.worker.threads, |running| {
        let pipeline = Pipeline::from_config(&settings, &pipeline_name)?;
        let mut worker =
            Worker::new(broker.worker_messenger(), pipeline).with_shared_stop(running);
        if let Some(counter) = &retry_counter {
            worker = worker.with_retry_counter(Arc::clone(counter));
        }
        poll_handles.push(worker.last_poll_handle());
        Ok(worker)
    })?;

    let watchdogs: Vec<_> = settings
        .worker
        .max_processing_secs
        .map(|secs| {
            poll_handles
                .into_iter()
                .map(|handle| spawn_watchdog(handle, Duration::from_secs(secs)))
                .collect()
        })
        .unwrap_or_default();

    tokio::signal::ctrl_c().await?;
    info!("workers shutting down");
    pool.stop();
    pool.join().await?;
    for watchdog in watchdogs {
        watchdog.abort();
    }
    Ok(())
}

async fn start_run(settings: Settings) -> Result<()> {
    let mut connectors = Vec::with_capacity(settings.connectors.len());
    for config in &settings.connectors {
        connectors.push(build_connector(config)?);
    }
    if connectors.is_empty() {
        return Err(eyre!("no connectors configured"));
    }

    let sink = MemorySink::new();
    let result = run_local(&settings, connectors, sink).await?;

    info!(
        run_id = %result.run_id,
        published = result.num_published,
        succeeded = result.num_succeeded,
        failed = result.num_failed,
        "run finished"
    );
    if result.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}
