//! Serializes outbound payloads and sends them through an [`EventSink`].
//!
//! Records are grouped into batches that fit the sink's batch limit and sent
//! one batch at a time. A single record larger than the sink's message limit
//! is a permanent failure for that record: it is reported and dropped, never
//! retried as is. Send failures are returned to the caller, not retried.

use crate::telemetry::Telemetry;
use orderflow_core::acknowledgement::Acknowledgement;
use orderflow_core::sink::{EventSink, OutboundRecord, PublishError, SinkError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of publishing a group of records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Records sent.
    pub sent: usize,
    /// Batches sent.
    pub batches: usize,
    /// Records dropped for exceeding the message limit.
    pub dropped: Vec<PublishError>,
}

/// Publishes acknowledgements and other outbound payloads.
#[derive(Clone)]
pub struct Publisher {
    sink: Arc<dyn EventSink>,
    telemetry: Telemetry,
}

impl Publisher {
    /// Create a publisher over `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>, telemetry: Telemetry) -> Self {
        Self { sink, telemetry }
    }

    /// Publish one acknowledgement, keyed by its event id.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::MessageTooLarge`] if the acknowledgement is over
    /// the sink's limit (it is dropped) and [`PublishError::Send`] if the sink
    /// fails.
    pub async fn publish(&self, ack: &Acknowledgement) -> Result<(), PublishError> {
        let result = self.publish_one(ack).await;
        match &result {
            Ok(()) => self.telemetry.record_ack_published(ack.status),
            Err(_) => self.telemetry.record_ack_failed(),
        }
        result
    }

    async fn publish_one(&self, ack: &Acknowledgement) -> Result<(), PublishError> {
        let record = Self::record(Some(ack.event_id.clone()), ack)?;
        let report = self.publish_records(vec![record]).await?;
        match report.dropped.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Publish pre-built records, batching them to the sink's limits.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Send`] if a batch fails; earlier batches stay
    /// sent.
    pub async fn publish_records(&self, records: Vec<OutboundRecord>) -> Result<PublishReport, PublishError> {
        let max_message = self.sink.max_message_bytes();
        let max_batch = self.sink.max_batch_bytes().max(max_message);
        let mut report = PublishReport::default();
        let mut batch: Vec<OutboundRecord> = Vec::new();
        let mut batch_bytes = 0;

        for record in records {
            let size = record.size();
            if size > max_message {
                warn!(size, limit = max_message, "Outbound record exceeds transport limit; dropping");
                report.dropped.push(PublishError::MessageTooLarge {
                    size,
                    limit: max_message,
                });
                continue;
            }
            if !batch.is_empty() && batch_bytes + size > max_batch {
                self.flush(&mut batch, &mut report).await?;
                batch_bytes = 0;
            }
            batch_bytes += size;
            batch.push(record);
        }

        if !batch.is_empty() {
            self.flush(&mut batch, &mut report).await?;
        }
        Ok(report)
    }

    async fn flush(&self, batch: &mut Vec<OutboundRecord>, report: &mut PublishReport) -> Result<(), PublishError> {
        let records = std::mem::take(batch);
        let count = records.len();
        match self.sink.send_batch(records).await {
            Ok(()) => {
                report.sent += count;
                report.batches += 1;
                debug!(count, "Published batch");
                Ok(())
            }
            Err(SinkError::MessageTooLarge { size, limit }) => {
                warn!(size, limit, count, "Sink rejected batch as too large; dropping");
                report.dropped.push(PublishError::MessageTooLarge { size, limit });
                Ok(())
            }
            Err(err) => Err(PublishError::Send(err)),
        }
    }

    fn record<T: Serialize + ?Sized>(key: Option<String>, payload: &T) -> Result<OutboundRecord, PublishError> {
        let bytes = serde_json::to_vec(payload).map_err(|e| PublishError::Serialization(e.to_string()))?;
        Ok(OutboundRecord::new(key, bytes))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use orderflow_testing::InMemoryEventSink;

    fn publisher(sink: &InMemoryEventSink) -> Publisher {
        Publisher::new(Arc::new(sink.clone()), Telemetry::new("test"))
    }

    fn records(payloads: &[&str]) -> Vec<OutboundRecord> {
        payloads
            .iter()
            .map(|payload| Publisher::record(None, payload).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn acknowledgement_is_keyed_by_event_id() {
        let sink = InMemoryEventSink::new();
        let ack = Acknowledgement::processed("evt-9");

        publisher(&sink).publish(&ack).await.unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.as_deref(), Some("evt-9"));
        assert_eq!(sink.acknowledgements(), vec![ack]);
    }

    #[tokio::test]
    async fn oversized_acknowledgement_is_dropped_not_sent() {
        let sink = InMemoryEventSink::new().with_limits(16, 16);
        let ack = Acknowledgement::failed("evt-1", "x".repeat(64));

        let result = publisher(&sink).publish(&ack).await;

        assert!(matches!(result, Err(PublishError::MessageTooLarge { limit: 16, .. })));
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn records_are_split_into_batches_within_the_limit() {
        // Each payload serializes to 7 bytes: "aaaaa" plus quotes.
        let sink = InMemoryEventSink::new().with_limits(10, 15);
        let records = records(&["aaaaa"; 5]);

        let report = publisher(&sink).publish_records(records).await.unwrap();

        assert_eq!(report.sent, 5);
        assert_eq!(report.batches, 3);
        assert_eq!(sink.batch_sizes(), vec![2, 2, 1]);
        assert!(report.dropped.is_empty());
    }

    #[tokio::test]
    async fn oversized_record_does_not_block_the_rest() {
        let sink = InMemoryEventSink::new().with_limits(10, 100);
        let records = records(&["ok", "this one is far too long", "ok"]);

        let report = publisher(&sink).publish_records(records).await.unwrap();

        assert_eq!(report.sent, 2);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(sink.records().len(), 2);
    }

    #[tokio::test]
    async fn send_failure_is_returned() {
        let sink = InMemoryEventSink::new();
        sink.set_fail_sends(true);

        let result = publisher(&sink).publish(&Acknowledgement::processed("e")).await;

        assert!(matches!(result, Err(PublishError::Send(SinkError::SendFailed(_)))));
    }
}
