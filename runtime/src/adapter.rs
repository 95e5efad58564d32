//! Fan-out of partition workers into one merged channel.
//!
//! [`StreamAdapter::start`] reads the partition set once, spawns one
//! supervised [`PartitionWorker`] per partition and returns the receiving
//! end of a single bounded channel all of them write into, together with an
//! [`AdapterHandle`] for cancellation, health and close.
//!
//! The channel has no sender outside the workers, so it reports closed only
//! after every worker has exited.

use crate::error::PipelineError;
use crate::partition_worker::{PartitionWorker, WorkerConfig};
use crate::supervisor::{PartitionHealth, PartitionHealthMap, RestartPolicy, Supervisor};
use crate::telemetry::Telemetry;
use futures::future::join_all;
use orderflow_core::checkpoint::CheckpointStore;
use orderflow_core::message::InboundMessage;
use orderflow_core::stream::{EventStream, PartitionId, StreamError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default capacity of the merged channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1;

/// Settings of the stream adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterConfig {
    /// Capacity of the merged channel. Small, so a slow dispatch loop
    /// backpressures the workers.
    pub channel_capacity: usize,
    /// Receive settings of every worker.
    pub worker: WorkerConfig,
    /// Restart policy of every worker.
    pub restart: RestartPolicy,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            worker: WorkerConfig::default(),
            restart: RestartPolicy::default(),
        }
    }
}

/// Owns the partition workers of one stream connection.
pub struct StreamAdapter {
    stream: Arc<dyn EventStream>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: AdapterConfig,
    telemetry: Telemetry,
}

impl StreamAdapter {
    /// Create an adapter.
    #[must_use]
    pub fn new(
        stream: Arc<dyn EventStream>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: AdapterConfig,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            stream,
            checkpoints,
            config,
            telemetry,
        }
    }

    /// Spawn one supervised worker per partition.
    ///
    /// Workers stop when `parent` or the returned handle is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Stream`] if the partition set cannot be read
    /// and [`PipelineError::NoPartitions`] if it is empty. Nothing is spawned
    /// in either case.
    pub async fn start(
        &self,
        parent: &CancellationToken,
    ) -> Result<(mpsc::Receiver<InboundMessage>, AdapterHandle), PipelineError> {
        let partitions = self.stream.partitions().await?;
        if partitions.is_empty() {
            return Err(PipelineError::NoPartitions);
        }

        let cancel = parent.child_token();
        let health = PartitionHealthMap::new();
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));

        let tasks = partitions
            .iter()
            .map(|partition_id| {
                let worker = PartitionWorker::new(
                    partition_id.clone(),
                    Arc::clone(&self.stream),
                    Arc::clone(&self.checkpoints),
                    tx.clone(),
                    self.config.worker,
                    self.telemetry.clone(),
                )
                .with_health(health.clone());
                let supervisor = Supervisor::new(
                    self.config.restart.clone(),
                    health.clone(),
                    self.telemetry.clone(),
                );
                let cancel = cancel.clone();
                tokio::spawn(async move { supervisor.supervise(worker, cancel).await })
            })
            .collect();
        drop(tx);

        info!(
            partition_count = partitions.len(),
            channel_capacity = self.config.channel_capacity.max(1),
            "Stream adapter started"
        );

        Ok((
            rx,
            AdapterHandle {
                cancel,
                tasks: Mutex::new(tasks),
                health,
                partitions,
                stream: Arc::clone(&self.stream),
                closed: AtomicBool::new(false),
            },
        ))
    }
}

/// Control handle of a started adapter.
pub struct AdapterHandle {
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    health: PartitionHealthMap,
    partitions: Vec<PartitionId>,
    stream: Arc<dyn EventStream>,
    closed: AtomicBool,
}

impl AdapterHandle {
    /// Ask every worker to stop. Workers blocked in a receive unblock at once.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the workers were asked to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The partitions being consumed.
    #[must_use]
    pub fn partitions(&self) -> &[PartitionId] {
        &self.partitions
    }

    /// Health of every partition.
    #[must_use]
    pub fn health(&self) -> BTreeMap<PartitionId, PartitionHealth> {
        self.health.snapshot()
    }

    /// Health of one partition.
    #[must_use]
    pub fn partition_health(&self, partition_id: &str) -> Option<PartitionHealth> {
        self.health.get(partition_id)
    }

    /// Stop every worker, wait for all of them to exit, then close the
    /// stream connection.
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns the stream's error if closing the connection fails.
    pub async fn close(&self) -> Result<(), StreamError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for (index, joined) in join_all(tasks).await.into_iter().enumerate() {
            if let Err(e) = joined {
                warn!(worker = index, error = %e, "Partition worker task failed");
            }
        }

        self.stream.close().await?;
        info!("Stream adapter closed");
        Ok(())
    }
}
