//! Order event ingestion service entry point.
//!
//! Loads configuration, wires the pipeline, and runs it until SIGINT or
//! SIGTERM. Exits non-zero on a startup failure or if every partition failed.

use anyhow::{Context, Result, bail};
use order_processing::{Config, bootstrap};
use orderflow_runtime::metrics::MetricsServer;
use orderflow_runtime::shutdown::cancel_on_signal;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SINK_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    bootstrap::init_tracing(&config.service)?;

    info!(service = %config.service.name, "Starting order processing");
    info!(?config, "Configuration loaded");

    let _metrics = if config.service.metrics_enabled {
        let mut server = MetricsServer::new(config.service.metrics_addr);
        server.start().context("Failed to start metrics server")?;
        Some(server)
    } else {
        None
    };

    let services = bootstrap::build(&config).await?;

    let shutdown = CancellationToken::new();
    let signals = cancel_on_signal(shutdown.clone());

    let report = services.pipeline.run(shutdown.clone()).await?;

    // Ends the signal watcher if the pipeline stopped on its own
    shutdown.cancel();
    let _ = signals.await;

    if let Err(e) = services.sink.flush(SINK_FLUSH_TIMEOUT).await {
        warn!(error = %e, "Acknowledgements still in flight at exit");
    }

    info!(
        handled = report.dispatch.handled,
        drained = report.dispatch.drained,
        publish_failures = report.dispatch.publish_failures,
        drain_timed_out = report.dispatch.drain_timed_out,
        "Order processing stopped"
    );

    if report.all_partitions_failed() {
        bail!("every partition failed; see the logs for the causes");
    }
    Ok(())
}
