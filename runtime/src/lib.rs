//! # Orderflow Runtime
//!
//! The order event ingestion pipeline.
//!
//! ## Core Components
//!
//! - **Partition Worker** ([`partition_worker`]): one per partition; receives
//!   bounded batches, forwards decoded messages, advances the checkpoint
//! - **Supervisor** ([`supervisor`]): restarts failed workers with backoff and
//!   tracks partition health
//! - **Stream Adapter** ([`adapter`]): spawns the workers and owns the single
//!   merged, bounded channel they write into
//! - **Dispatch Loop** ([`dispatch`]): the only consumer of that channel and the
//!   only caller of the order repository; acknowledges every message
//! - **Publisher** ([`publisher`]): batches and sends outbound payloads
//! - **Pipeline** ([`pipeline`]): wires the above together
//!
//! ## Concurrency Model
//!
//! ```text
//! partition 0 ─┐
//! partition 1 ─┼─▶ bounded mpsc ─▶ dispatch loop ─▶ repository
//! partition N ─┘   (capacity 1)          │
//!                                        └────────▶ publisher ─▶ sink
//! ```
//!
//! A slow dispatch loop blocks the workers' channel sends, which in turn
//! delays their checkpoints. This is the pipeline's only flow control.
//! Order is preserved within a partition; partitions interleave freely.
//!
//! ## Delivery Semantics
//!
//! Checkpoints advance once a batch is in the channel, not once it is applied.
//! Delivery is therefore at-least-once up to the hand-off and at-most-once
//! after it. See [`orderflow_core::checkpoint`].
//!
//! ## Shutdown
//!
//! One [`CancellationToken`](tokio_util::sync::CancellationToken) (usually fed
//! by [`shutdown::cancel_on_signal`]) reaches both the workers and the
//! dispatch loop. The loop drains the channel for a bounded grace period,
//! closes the adapter (which waits for every worker before closing the
//! stream) and returns.

/// Fan-out of partition workers into one merged channel
pub mod adapter;

/// Single-threaded routing of messages to the repository
pub mod dispatch;

/// Prometheus metrics for observability
pub mod metrics;

/// Receive loop of one partition
pub mod partition_worker;

/// End-to-end wiring
pub mod pipeline;

/// Outbound batching
pub mod publisher;

/// Process signals to cancellation
pub mod shutdown;

/// Restart policy and partition health
pub mod supervisor;

/// Injected spans and metrics
pub mod telemetry;

/// Error types for the pipeline runtime
pub mod error {
    use orderflow_core::checkpoint::CheckpointError;
    use orderflow_core::stream::StreamError;
    use thiserror::Error;

    /// Errors that prevent the pipeline from starting.
    ///
    /// Once running, the pipeline contains every per-message and
    /// per-partition failure; none of them surface here.
    #[derive(Error, Debug)]
    pub enum PipelineError {
        /// The stream topology could not be read.
        #[error("Failed to read stream topology: {0}")]
        Stream(#[from] StreamError),

        /// The stream has no partitions to consume.
        #[error("Stream has no partitions")]
        NoPartitions,

        /// The checkpoint store could not be reached.
        #[error("Checkpoint store unavailable: {0}")]
        Checkpoint(#[from] CheckpointError),

        /// The pipeline was built without a required part.
        #[error("Invalid pipeline configuration: {0}")]
        Configuration(String),
    }
}

pub use adapter::{AdapterConfig, AdapterHandle, StreamAdapter};
pub use dispatch::{DispatchState, DispatchSummary, Dispatcher};
pub use error::PipelineError;
pub use partition_worker::{PartitionWorker, WorkerConfig, WorkerError};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineConfig, PipelineReport};
pub use publisher::{PublishReport, Publisher};
pub use supervisor::{PartitionHealth, PartitionHealthMap, RestartPolicy, Supervisor};
pub use telemetry::Telemetry;
