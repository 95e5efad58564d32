//! Prometheus metrics for the pipeline.
//!
//! Metrics are recorded through the `metrics` facade (see
//! [`Telemetry`](crate::telemetry::Telemetry)); without an installed recorder
//! every call is a no-op. [`MetricsServer`] installs a Prometheus recorder
//! and serves it over HTTP.
//!
//! # Example
//!
//! ```rust,no_run
//! use orderflow_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Records received from the stream, labelled by partition.
pub const MESSAGES_RECEIVED: &str = "orderflow_messages_received_total";
/// Messages handed to the dispatch channel, labelled by partition.
pub const MESSAGES_FORWARDED: &str = "orderflow_messages_forwarded_total";
/// Records that failed to decode, labelled by partition.
pub const DECODE_FAILURES: &str = "orderflow_decode_failures_total";
/// Checkpoint advances, labelled by partition.
pub const CHECKPOINT_ADVANCES: &str = "orderflow_checkpoint_advances_total";
/// Repository operations, labelled by operation and outcome.
pub const REPOSITORY_OPERATIONS: &str = "orderflow_repository_operations_total";
/// Repository operation latency, labelled by operation.
pub const REPOSITORY_DURATION: &str = "orderflow_repository_duration_seconds";
/// Acknowledgements published, labelled by status.
pub const ACKS_PUBLISHED: &str = "orderflow_acknowledgements_published_total";
/// Acknowledgements that could not be published.
pub const ACKS_FAILED: &str = "orderflow_acknowledgements_failed_total";
/// Partition worker restarts, labelled by partition.
pub const WORKER_RESTARTS: &str = "orderflow_worker_restarts_total";
/// Partition health (0=healthy, 1=unhealthy, 2=failed, 3=stopped).
pub const PARTITION_HEALTH: &str = "orderflow_partition_health";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the Prometheus recorder and start the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be built (for
    /// example, the address cannot be bound) and [`MetricsError::Install`] if
    /// another recorder is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = builder()?
            .with_http_listener(self.addr)
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;

        tokio::spawn(async move {
            // `ExporterError` implements neither `Debug` nor `Display` in
            // metrics-exporter-prometheus 0.15, so it cannot be logged.
            if let Err(_e) = exporter.await {
                tracing::error!("Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Exporter builder with the pipeline's histogram buckets.
///
/// # Errors
///
/// Returns [`MetricsError::Build`] if the bucket configuration is rejected.
pub fn builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Partition workers
    describe_counter!(MESSAGES_RECEIVED, "Records received from the inbound stream");
    describe_counter!(MESSAGES_FORWARDED, "Messages handed to the dispatch loop");
    describe_counter!(DECODE_FAILURES, "Records whose body could not be decoded");
    describe_counter!(CHECKPOINT_ADVANCES, "Checkpoint advances after a handed-off batch");
    describe_counter!(WORKER_RESTARTS, "Partition worker restarts after a failure");
    describe_gauge!(
        PARTITION_HEALTH,
        "Partition health (0=healthy, 1=unhealthy, 2=failed, 3=stopped)"
    );

    // Dispatch loop
    describe_counter!(REPOSITORY_OPERATIONS, "Repository operations by outcome");
    describe_histogram!(REPOSITORY_DURATION, "Time taken by repository operations");

    // Publisher
    describe_counter!(ACKS_PUBLISHED, "Acknowledgements published by status");
    describe_counter!(ACKS_FAILED, "Acknowledgements that could not be published");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::supervisor::PartitionHealth;
    use crate::telemetry::Telemetry;
    use orderflow_core::acknowledgement::AckStatus;
    use std::time::Duration;

    #[test]
    fn server_starts_without_handle() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn telemetry_records_pipeline_metrics() {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            register_metrics();
            let telemetry = Telemetry::new("order-processing");
            telemetry.record_received("0", 3);
            telemetry.record_forwarded("0");
            telemetry.record_checkpoint("0");
            telemetry.record_repository("create_order", true, Duration::from_millis(4));
            telemetry.record_ack_published(AckStatus::Processed);
            telemetry.record_partition_health("0", PartitionHealth::Unhealthy { restarts: 1 });
        });

        let rendered = handle.render();
        assert!(rendered.contains(MESSAGES_RECEIVED));
        assert!(rendered.contains(MESSAGES_FORWARDED));
        assert!(rendered.contains(CHECKPOINT_ADVANCES));
        assert!(rendered.contains(REPOSITORY_DURATION));
        assert!(rendered.contains("status=\"Processed\""));
        assert!(rendered.contains("partition_id=\"0\""));
        assert!(rendered.contains(PARTITION_HEALTH));
    }
}
