//! Ankadepth grid worker.
//!
//! Speaks the line protocol on stdin/stdout; diagnostics go to stderr.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ankadepth_proto::{read_messages, write_messages, Addressing};
use ankadepth_reconstruct::ReconstructionEngine;
use ankadepth_worker::{
    Config, CoordinatorConfig, PatchCache, PgPatchSourceFactory, WorkerCoordinator,
};
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Buffer of the inbound, outbound and runner event channels.
const CHANNEL_CAPACITY: usize = 1024;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing; stdout carries the protocol.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.as_str().into()))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!(
        version = ankadepth_proto::VERSION,
        worker_id = ?config.worker_id,
        parallelism = config.parallelism,
        "Starting ankadepth worker"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let reader_handle = tokio::spawn(read_messages(
        BufReader::new(tokio::io::stdin()),
        Addressing::Unaddressed,
        inbound_tx,
        shutdown_rx.clone(),
    ));
    let writer_handle = tokio::spawn(write_messages(tokio::io::stdout(), outbound_rx));

    let coordinator = Arc::new(WorkerCoordinator::new(
        CoordinatorConfig {
            worker_id: config.worker_id.clone(),
            parallelism: config.parallelism,
            poll_interval: config.poll_interval,
            shutdown_grace: config.shutdown_grace,
        },
        Arc::new(PatchCache::new(config.parallelism)),
        Arc::new(PgPatchSourceFactory::default()),
        ReconstructionEngine::default(),
        outbound_tx,
        event_tx,
    ));
    let mut coordinator_handle = tokio::spawn(coordinator.run(inbound_rx, event_rx, shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            if let Err(e) = (&mut coordinator_handle).await {
                error!(error = %e, "Coordinator task panicked");
            }
        }
        result = &mut coordinator_handle => {
            if let Err(e) = result {
                error!(error = %e, "Coordinator task panicked");
            }
            let _ = shutdown_tx.send(true);
        }
    }

    // The writer ends once the last outbound sender is gone.
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_handle).await {
        Ok(Ok(Err(e))) => error!(error = %e, "Protocol writer failed"),
        Ok(Err(e)) => error!(error = %e, "Protocol writer panicked"),
        Err(_) => warn!("Protocol writer did not drain in time"),
        Ok(Ok(Ok(()))) => {}
    }
    reader_handle.abort();

    info!("Worker shutdown complete");
    // A pending stdin read would hold the runtime open.
    std::process::exit(0)
}
