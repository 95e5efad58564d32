//! Telemetry handle passed to every pipeline component.
//!
//! Components receive a [`Telemetry`] in their constructor and use it for
//! spans and metrics; nothing is looked up from ambient context at runtime.

use crate::metrics::{
    ACKS_FAILED, ACKS_PUBLISHED, CHECKPOINT_ADVANCES, DECODE_FAILURES, MESSAGES_FORWARDED,
    MESSAGES_RECEIVED, PARTITION_HEALTH, REPOSITORY_DURATION, REPOSITORY_OPERATIONS,
    WORKER_RESTARTS,
};
use crate::supervisor::PartitionHealth;
use metrics::{counter, gauge, histogram};
use orderflow_core::acknowledgement::AckStatus;
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

/// Cheaply cloneable handle for spans and metrics, labelled with the
/// service name.
#[derive(Debug, Clone)]
pub struct Telemetry {
    service: Arc<str>,
}

impl Telemetry {
    /// Create a handle for `service`.
    #[must_use]
    pub fn new(service: impl AsRef<str>) -> Self {
        Self {
            service: Arc::from(service.as_ref()),
        }
    }

    /// The service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    fn service_label(&self) -> String {
        self.service.to_string()
    }

    /// Span covering one partition worker.
    #[must_use]
    pub fn partition_span(&self, partition_id: &str) -> Span {
        tracing::info_span!("partition", service = %self.service, partition_id = %partition_id)
    }

    /// Span covering the dispatch loop.
    #[must_use]
    pub fn dispatch_span(&self) -> Span {
        tracing::info_span!("dispatch", service = %self.service)
    }

    /// A batch of `count` records was received.
    pub fn record_received(&self, partition_id: &str, count: usize) {
        counter!(MESSAGES_RECEIVED, "service" => self.service_label(), "partition_id" => partition_id.to_string())
            .increment(count as u64);
    }

    /// One message was handed to the dispatch channel.
    pub fn record_forwarded(&self, partition_id: &str) {
        counter!(MESSAGES_FORWARDED, "service" => self.service_label(), "partition_id" => partition_id.to_string())
            .increment(1);
    }

    /// One record failed to decode.
    pub fn record_decode_failure(&self, partition_id: &str) {
        counter!(DECODE_FAILURES, "service" => self.service_label(), "partition_id" => partition_id.to_string())
            .increment(1);
    }

    /// A checkpoint was advanced.
    pub fn record_checkpoint(&self, partition_id: &str) {
        counter!(CHECKPOINT_ADVANCES, "service" => self.service_label(), "partition_id" => partition_id.to_string())
            .increment(1);
    }

    /// A repository operation finished.
    pub fn record_repository(&self, operation: &str, succeeded: bool, elapsed: Duration) {
        let outcome = if succeeded { "ok" } else { "error" };
        counter!(
            REPOSITORY_OPERATIONS,
            "service" => self.service_label(),
            "operation" => operation.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!(REPOSITORY_DURATION, "service" => self.service_label(), "operation" => operation.to_string())
            .record(elapsed.as_secs_f64());
    }

    /// An acknowledgement was published.
    pub fn record_ack_published(&self, status: AckStatus) {
        counter!(ACKS_PUBLISHED, "service" => self.service_label(), "status" => status.to_string())
            .increment(1);
    }

    /// An acknowledgement could not be published.
    pub fn record_ack_failed(&self) {
        counter!(ACKS_FAILED, "service" => self.service_label()).increment(1);
    }

    /// A partition worker is being restarted.
    pub fn record_worker_restart(&self, partition_id: &str) {
        counter!(WORKER_RESTARTS, "service" => self.service_label(), "partition_id" => partition_id.to_string())
            .increment(1);
    }

    /// A partition changed health.
    pub fn record_partition_health(&self, partition_id: &str, health: PartitionHealth) {
        gauge!(PARTITION_HEALTH, "service" => self.service_label(), "partition_id" => partition_id.to_string())
            .set(health.code());
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new("orderflow")
    }
}
