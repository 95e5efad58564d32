//! The receive loop of one partition.
//!
//! A worker repeats, strictly in this order:
//!
//! 1. receive up to `batch_size` records, waiting at most `receive_timeout`
//! 2. decode each record and hand it to the dispatch channel (blocks while
//!    the dispatch loop is busy; this is the pipeline's backpressure)
//! 3. advance the checkpoint to the last record of the batch
//!
//! An empty receive window is not an error. A receive or checkpoint failure
//! ends the run with an error; restarting is the supervisor's job. The
//! worker never holds two batches at once, so per-partition order is kept
//! from the stream to the channel.
//!
//! Cancellation is observed between receives and while blocked on the
//! channel. A batch interrupted by cancellation is not checkpointed and will
//! be received again after restart.

use crate::supervisor::{PartitionHealth, PartitionHealthMap};
use crate::telemetry::Telemetry;
use orderflow_core::checkpoint::{CheckpointError, CheckpointStore};
use orderflow_core::message::InboundMessage;
use orderflow_core::stream::{EventStream, PartitionClient, PartitionId, RawMessage, StreamError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

/// Default maximum records per receive call.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default receive window.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(20);

/// Errors that end a worker run.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The partition could not be opened.
    #[error("Failed to open partition: {0}")]
    Open(#[source] StreamError),

    /// Receiving a batch failed.
    #[error("Failed to receive batch: {0}")]
    Receive(#[source] StreamError),

    /// Loading or advancing the checkpoint failed.
    #[error("Checkpoint failure: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Receive settings of a partition worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Maximum records per receive call.
    pub batch_size: usize,
    /// How long one receive call may wait.
    pub receive_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }
}

impl WorkerConfig {
    /// Set the batch size (at least 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the receive window.
    #[must_use]
    pub const fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }
}

enum Handoff {
    Delivered,
    Cancelled,
    ChannelClosed,
}

/// Consumes one partition into the dispatch channel.
///
/// [`PartitionWorker::run`] borrows the worker, so a supervisor can run the
/// same worker again after a failure.
pub struct PartitionWorker {
    partition_id: PartitionId,
    stream: Arc<dyn EventStream>,
    checkpoints: Arc<dyn CheckpointStore>,
    sender: mpsc::Sender<InboundMessage>,
    config: WorkerConfig,
    telemetry: Telemetry,
    health: PartitionHealthMap,
}

impl PartitionWorker {
    /// Create a worker for `partition_id`.
    #[must_use]
    pub fn new(
        partition_id: impl Into<PartitionId>,
        stream: Arc<dyn EventStream>,
        checkpoints: Arc<dyn CheckpointStore>,
        sender: mpsc::Sender<InboundMessage>,
        config: WorkerConfig,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            partition_id: partition_id.into(),
            stream,
            checkpoints,
            sender,
            config,
            telemetry,
            health: PartitionHealthMap::new(),
        }
    }

    /// Report progress into a shared health map.
    #[must_use]
    pub fn with_health(mut self, health: PartitionHealthMap) -> Self {
        self.health = health;
        self
    }

    /// The partition this worker consumes.
    #[must_use]
    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    /// Consume the partition until cancelled or the dispatch channel closes.
    ///
    /// Resumes right after the stored checkpoint, if any.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Open`] or [`WorkerError::Receive`] if the stream
    /// fails and [`WorkerError::Checkpoint`] if the checkpoint cannot be
    /// loaded or advanced.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        let span = self.telemetry.partition_span(&self.partition_id);
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        let resume_after = self
            .checkpoints
            .load(&self.partition_id)
            .await?
            .map(|checkpoint| checkpoint.sequence);

        let mut client = self
            .stream
            .open_partition(&self.partition_id, resume_after)
            .await
            .map_err(WorkerError::Open)?;

        info!(resume_after = ?resume_after, "Partition worker started");

        loop {
            if cancel.is_cancelled() {
                info!("Partition worker cancelled");
                return Ok(());
            }

            let Some(batch) = self.receive(client.as_mut(), cancel).await? else {
                info!("Partition worker cancelled while receiving");
                return Ok(());
            };
            self.mark_healthy();

            let Some(last) = batch.last().map(|record| record.sequence) else {
                continue;
            };
            self.telemetry.record_received(&self.partition_id, batch.len());
            debug!(count = batch.len(), last_sequence = last, "Received batch");

            for record in &batch {
                match self.forward(record, cancel).await {
                    Handoff::Delivered => {}
                    Handoff::Cancelled => {
                        info!(sequence = record.sequence, "Cancelled mid-batch; batch will be redelivered");
                        return Ok(());
                    }
                    Handoff::ChannelClosed => {
                        info!("Dispatch channel closed; stopping");
                        return Ok(());
                    }
                }
            }

            self.checkpoints.advance(&self.partition_id, last).await?;
            self.telemetry.record_checkpoint(&self.partition_id);
            debug!(sequence = last, "Checkpoint advanced");
        }
    }

    /// A completed receive window, empty or not, proves the partition is reachable.
    fn mark_healthy(&self) {
        if self.health.get(&self.partition_id) != Some(PartitionHealth::Healthy) {
            self.health.set(&self.partition_id, PartitionHealth::Healthy);
            self.telemetry
                .record_partition_health(&self.partition_id, PartitionHealth::Healthy);
        }
    }

    /// One receive call. `Ok(None)` means cancelled; a timeout is an empty batch.
    async fn receive(
        &self,
        client: &mut dyn PartitionClient,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<RawMessage>>, WorkerError> {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(None),
            result = client.receive_batch(self.config.batch_size, self.config.receive_timeout) => result,
        };

        match result {
            Ok(batch) => Ok(Some(batch)),
            Err(err) if err.is_timeout() => Ok(Some(Vec::new())),
            Err(err) => Err(WorkerError::Receive(err)),
        }
    }

    async fn forward(&self, record: &RawMessage, cancel: &CancellationToken) -> Handoff {
        let message = InboundMessage::decode(record);
        if let Some(error) = message.decode_error() {
            warn!(
                sequence = record.sequence,
                operation_id = %message.operation_id,
                error = %error,
                "Failed to decode record; forwarding for failure acknowledgement"
            );
            self.telemetry.record_decode_failure(&self.partition_id);
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => Handoff::Cancelled,
            sent = self.sender.send(message) => match sent {
                Ok(()) => {
                    self.telemetry.record_forwarded(&self.partition_id);
                    Handoff::Delivered
                }
                Err(_) => Handoff::ChannelClosed,
            },
        }
    }
}
