//! Partitioned inbound event stream abstraction.
//!
//! A stream is a fixed set of independently ordered partitions. The pipeline
//! opens one [`PartitionClient`] per partition and pulls bounded batches from
//! it, so implementations only need to support serial, single-owner access
//! to each partition.
//!
//! # Implementations
//!
//! - `RedpandaEventStream` in `orderflow-redpanda` - Kafka protocol (production)
//! - `InMemoryEventStream` in `orderflow-testing` - scripted batches (tests)

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;

/// Identifier of one partition of the inbound stream.
pub type PartitionId = String;

/// Errors that can occur while talking to the inbound stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Failed to connect to the stream.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The receive window elapsed with no messages. Not a failure.
    #[error("Receive timed out")]
    ReceiveTimeout,

    /// Receiving from a partition failed.
    #[error("Receive failed on partition '{partition_id}': {reason}")]
    ReceiveFailed {
        /// The partition that failed
        partition_id: PartitionId,
        /// The reason for failure
        reason: String,
    },

    /// The requested partition does not exist.
    #[error("Unknown partition: {0}")]
    UnknownPartition(PartitionId),

    /// The stream connection has been closed.
    #[error("Stream closed")]
    Closed,

    /// Generic error for other failures.
    #[error("Stream error: {0}")]
    Other(String),
}

impl StreamError {
    /// Whether this error only means "nothing arrived in time".
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::ReceiveTimeout)
    }
}

/// One record as received from a partition, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Partition the record was read from.
    pub partition_id: PartitionId,
    /// Position within the partition; strictly increasing.
    pub sequence: i64,
    /// Transport message id, if the producer set one.
    pub message_id: Option<String>,
    /// When the broker accepted the record, if known.
    pub enqueued_at: Option<DateTime<Utc>>,
    /// Opaque record body.
    pub body: Vec<u8>,
}

impl RawMessage {
    /// Create a record with just a position and a body.
    #[must_use]
    pub fn new(partition_id: impl Into<PartitionId>, sequence: i64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            partition_id: partition_id.into(),
            sequence,
            message_id: None,
            enqueued_at: None,
            body: body.into(),
        }
    }
}

/// Serial, single-owner reader for one partition.
pub trait PartitionClient: Send {
    /// The partition this client reads.
    fn partition_id(&self) -> &str;

    /// Receive up to `max_messages` records, waiting at most `timeout`.
    ///
    /// Returns early once at least one record is available and no more
    /// arrive promptly. An elapsed timeout with nothing received may be
    /// reported as `Ok(vec![])` or as [`StreamError::ReceiveTimeout`];
    /// callers treat both as "try again".
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ReceiveFailed`] if the partition cannot be read.
    fn receive_batch(
        &mut self,
        max_messages: usize,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Vec<RawMessage>, StreamError>>;
}

/// Connection to a partitioned inbound stream.
///
/// # Dyn Compatibility
///
/// Uses [`BoxFuture`] returns so the pipeline can hold an `Arc<dyn EventStream>`.
pub trait EventStream: Send + Sync {
    /// List the partitions of the stream. Fixed for the lifetime of the connection.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConnectionFailed`] if the topology cannot be read.
    fn partitions(&self) -> BoxFuture<'_, Result<Vec<PartitionId>, StreamError>>;

    /// Open a reader for one partition.
    ///
    /// `resume_after` is the last sequence already processed; reading starts
    /// at the next record. `None` starts from the stream's configured default.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownPartition`] or
    /// [`StreamError::ConnectionFailed`] if the reader cannot be created, and
    /// [`StreamError::Closed`] after [`EventStream::close`].
    fn open_partition(
        &self,
        partition_id: &str,
        resume_after: Option<i64>,
    ) -> BoxFuture<'_, Result<Box<dyn PartitionClient>, StreamError>>;

    /// Close the connection. Calling it more than once is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Other`] if releasing resources fails.
    fn close(&self) -> BoxFuture<'_, Result<(), StreamError>>;
}
