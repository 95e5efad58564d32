//! Capturing event sink.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only panics on a poisoned lock

use futures::future::BoxFuture;
use orderflow_core::acknowledgement::Acknowledgement;
use orderflow_core::sink::{EventSink, OutboundRecord, SinkError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Notify;

/// Default per-record limit, matching a common broker default of 1 MiB.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// [`EventSink`] that keeps every record it is asked to send.
#[derive(Clone, Debug)]
pub struct InMemoryEventSink {
    records: Arc<RwLock<Vec<OutboundRecord>>>,
    batches: Arc<RwLock<Vec<usize>>>,
    fail_sends: Arc<AtomicBool>,
    notify: Arc<Notify>,
    max_message_bytes: usize,
    max_batch_bytes: usize,
}

impl Default for InMemoryEventSink {
    fn default() -> Self {
        Self {
            records: Arc::default(),
            batches: Arc::default(),
            fail_sends: Arc::default(),
            notify: Arc::default(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_batch_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl InMemoryEventSink {
    /// Create a sink with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the per-record and per-batch limits.
    #[must_use]
    pub const fn with_limits(mut self, max_message_bytes: usize, max_batch_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self.max_batch_bytes = max_batch_bytes;
        self
    }

    /// Make every subsequent send fail (or succeed again).
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Every record sent so far.
    #[must_use]
    pub fn records(&self) -> Vec<OutboundRecord> {
        self.records.read().unwrap().clone()
    }

    /// Size (in records) of every successful batch, in order.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.read().unwrap().clone()
    }

    /// Sent records decoded as acknowledgements. Undecodable records are skipped.
    #[must_use]
    pub fn acknowledgements(&self) -> Vec<Acknowledgement> {
        self.records
            .read()
            .unwrap()
            .iter()
            .filter_map(|r| serde_json::from_slice(&r.payload).ok())
            .collect()
    }

    /// Wait until at least `count` acknowledgements were sent, or `timeout` elapses.
    ///
    /// Returns whatever was sent by then.
    pub async fn wait_for_acknowledgements(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Vec<Acknowledgement> {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.records.read().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        };
        let _ = tokio::time::timeout(timeout, wait).await;
        self.acknowledgements()
    }
}

impl EventSink for InMemoryEventSink {
    fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }

    fn send_batch(&self, records: Vec<OutboundRecord>) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(SinkError::SendFailed("injected failure".to_string()));
            }
            if let Some(too_large) = records.iter().find(|r| r.size() > self.max_message_bytes) {
                return Err(SinkError::MessageTooLarge {
                    size: too_large.size(),
                    limit: self.max_message_bytes,
                });
            }

            self.batches.write().unwrap().push(records.len());
            self.records.write().unwrap().extend(records);
            self.notify.notify_waiters();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_and_decodes_acknowledgements() {
        let sink = InMemoryEventSink::new();
        let ack = Acknowledgement::processed("evt-1");
        let payload = serde_json::to_vec(&ack).unwrap();

        sink.send_batch(vec![OutboundRecord::new(None, payload)]).await.unwrap();

        assert_eq!(sink.acknowledgements(), vec![ack]);
        assert_eq!(sink.batch_sizes(), vec![1]);
    }

    #[tokio::test]
    async fn rejects_oversized_records() {
        let sink = InMemoryEventSink::new().with_limits(4, 4);
        let result = sink
            .send_batch(vec![OutboundRecord::new(None, b"12345".to_vec())])
            .await;
        assert_eq!(result, Err(SinkError::MessageTooLarge { size: 5, limit: 4 }));
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn injected_failure_drops_the_batch() {
        let sink = InMemoryEventSink::new();
        sink.set_fail_sends(true);
        let result = sink.send_batch(vec![OutboundRecord::new(None, b"{}".to_vec())]).await;
        assert!(matches!(result, Err(SinkError::SendFailed(_))));
        assert!(sink.records().is_empty());
    }
}
