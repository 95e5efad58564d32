//! Outbound transport for acknowledgements.

use futures::future::BoxFuture;
use thiserror::Error;

/// Errors returned by an [`EventSink`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// A single record exceeds the transport limit. Permanent for that record.
    #[error("Record of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge {
        /// Record size in bytes
        size: usize,
        /// Transport limit in bytes
        limit: usize,
    },

    /// The transport rejected or failed to deliver the batch.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The sink has been closed.
    #[error("Sink closed")]
    Closed,
}

/// Errors surfaced by the acknowledgement publisher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The payload could not be serialized.
    #[error("Failed to serialize payload: {0}")]
    Serialization(String),

    /// The serialized payload exceeds the transport limit; it was dropped.
    #[error("Payload of {size} bytes exceeds the {limit} byte limit and was dropped")]
    MessageTooLarge {
        /// Payload size in bytes
        size: usize,
        /// Transport limit in bytes
        limit: usize,
    },

    /// Sending failed.
    #[error("Failed to send: {0}")]
    Send(#[from] SinkError),
}

/// One outbound record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    /// Partitioning key, if any.
    pub key: Option<String>,
    /// Serialized payload.
    pub payload: Vec<u8>,
}

impl OutboundRecord {
    /// Create a record.
    #[must_use]
    pub const fn new(key: Option<String>, payload: Vec<u8>) -> Self {
        Self { key, payload }
    }

    /// Size counted against the transport limit.
    #[must_use]
    pub fn size(&self) -> usize {
        self.payload.len() + self.key.as_ref().map_or(0, String::len)
    }
}

/// Batch-oriented outbound transport.
pub trait EventSink: Send + Sync {
    /// Largest single record the transport accepts, in bytes.
    fn max_message_bytes(&self) -> usize;

    /// Largest total size of one batch, in bytes.
    fn max_batch_bytes(&self) -> usize {
        self.max_message_bytes()
    }

    /// Send a batch of records.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::MessageTooLarge`] if a record is over the limit and
    /// [`SinkError::SendFailed`] if delivery fails.
    fn send_batch(&self, records: Vec<OutboundRecord>) -> BoxFuture<'_, Result<(), SinkError>>;
}
