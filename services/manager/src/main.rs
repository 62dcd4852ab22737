//! Ankadepth grid manager.
//!
//! Speaks the line protocol on stdin/stdout; diagnostics go to stderr.

use std::time::Duration;

use anyhow::Result;
use ankadepth_db::DbConfig;
use ankadepth_manager::{
    load_backlog, load_depth_config, Config, Console, FatalError, ManagerService, PgRegionSource,
    StopReason, TaskLedger,
};
use ankadepth_proto::{read_messages, write_messages, Addressing};
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Buffer of the inbound and outbound channels.
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
        config_path = %config.config_path.display(),
        "Starting ankadepth manager"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let writer_handle = tokio::spawn(write_messages(tokio::io::stdout(), outbound_rx));
    let console = Console::new(outbound_tx);

    let service = match prepare(&config, &console).await {
        Ok(service) => service,
        Err(e) => {
            console.error(e.to_string()).await;
            console.warning("Process is exiting...").await;
            drop(console);
            drain_writer(writer_handle).await;
            std::process::exit(e.exit_code());
        }
    };
    drop(console);

    let reader_handle = tokio::spawn(read_messages(
        BufReader::new(tokio::io::stdin()),
        Addressing::Addressed,
        inbound_tx,
        shutdown_rx.clone(),
    ));

    let reason = {
        let run = service.run(inbound_rx, shutdown_rx);
        tokio::pin!(run);
        tokio::select! {
            reason = &mut run => reason,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                let _ = shutdown_tx.send(true);
                run.await
            }
        }
    };
    info!(?reason, "Grid scheduler stopped");
    if reason == StopReason::InputClosed {
        warn!("Supervisor input closed before the job finished");
    }

    drop(service);
    drain_writer(writer_handle).await;
    reader_handle.abort();

    info!("Manager shutdown complete");
    // A pending stdin read would hold the runtime open.
    std::process::exit(0)
}

/// Read the job configuration and build the backlog.
async fn prepare(config: &Config, console: &Console) -> Result<ManagerService, FatalError> {
    let depth = load_depth_config(&config.config_path)?;
    let ledger = TaskLedger::new(config.completed_log.clone(), config.failed_log.clone());
    let source = PgRegionSource::new(depth.region_db.clone(), DbConfig::default());

    let grid = load_backlog(&depth, &source, &ledger, config.task_timeout, console).await?;

    Ok(ManagerService::new(
        depth,
        grid,
        ledger,
        console.clone(),
        config.tick_interval,
    ))
}

/// Wait for the writer to flush what is queued. It ends once the last
/// outbound sender is gone.
async fn drain_writer(handle: JoinHandle<std::io::Result<()>>) {
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, handle).await {
        Ok(Ok(Err(e))) => error!(error = %e, "Protocol writer failed"),
        Ok(Err(e)) => error!(error = %e, "Protocol writer panicked"),
        Err(_) => warn!("Protocol writer did not drain in time"),
        Ok(Ok(Ok(()))) => {}
    }
}
