//! Wires the adapter, dispatch loop and publisher into one runnable unit.
//!
//! # Example
//!
//! ```rust,no_run
//! use orderflow_runtime::pipeline::{Pipeline, PipelineConfig};
//! use orderflow_testing::{
//!     InMemoryCheckpointStore, InMemoryEventSink, InMemoryEventStream, InMemoryOrderRepository,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), orderflow_runtime::PipelineError> {
//! let pipeline = Pipeline::builder()
//!     .stream(Arc::new(InMemoryEventStream::new().with_partition("0", vec![])))
//!     .checkpoints(Arc::new(InMemoryCheckpointStore::new()))
//!     .repository(Arc::new(InMemoryOrderRepository::new()))
//!     .sink(Arc::new(InMemoryEventSink::new()))
//!     .config(PipelineConfig::default())
//!     .build()?;
//!
//! let shutdown = CancellationToken::new();
//! let report = pipeline.run(shutdown).await?;
//! # Ok(())
//! # }
//! ```

use crate::adapter::{AdapterConfig, StreamAdapter};
use crate::dispatch::{DEFAULT_DRAIN_GRACE, DispatchSummary, Dispatcher};
use crate::error::PipelineError;
use crate::publisher::Publisher;
use crate::supervisor::PartitionHealth;
use crate::telemetry::Telemetry;
use orderflow_core::checkpoint::CheckpointStore;
use orderflow_core::repository::OrderRepository;
use orderflow_core::sink::EventSink;
use orderflow_core::stream::{EventStream, PartitionId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Settings of the whole pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Channel, worker and restart settings.
    pub adapter: AdapterConfig,
    /// How long to drain the channel after cancellation.
    pub drain_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterConfig::default(),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    /// Dispatch loop counters.
    pub dispatch: DispatchSummary,
    /// Final health of every partition.
    pub health: BTreeMap<PartitionId, PartitionHealth>,
}

impl PipelineReport {
    /// Whether every partition ended up failed.
    #[must_use]
    pub fn all_partitions_failed(&self) -> bool {
        !self.health.is_empty() && self.health.values().all(|h| *h == PartitionHealth::Failed)
    }
}

/// A fully wired pipeline, ready to run.
pub struct Pipeline {
    stream: Arc<dyn EventStream>,
    checkpoints: Arc<dyn CheckpointStore>,
    repository: Arc<dyn OrderRepository>,
    sink: Arc<dyn EventSink>,
    config: PipelineConfig,
    telemetry: Telemetry,
}

impl Pipeline {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Start the partition workers and run the dispatch loop until `shutdown`
    /// is cancelled (or every worker has exited), then drain and close.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] only for startup failures; once running,
    /// per-message and per-partition failures are contained and reported.
    pub async fn run(self, shutdown: CancellationToken) -> Result<PipelineReport, PipelineError> {
        let adapter = StreamAdapter::new(
            Arc::clone(&self.stream),
            Arc::clone(&self.checkpoints),
            self.config.adapter.clone(),
            self.telemetry.clone(),
        );
        let (messages, handle) = adapter.start(&shutdown).await?;

        let publisher = Publisher::new(Arc::clone(&self.sink), self.telemetry.clone());
        let mut dispatcher = Dispatcher::new(Arc::clone(&self.repository), publisher, self.telemetry.clone())
            .with_drain_grace(self.config.drain_grace);

        info!(
            service = self.telemetry.service(),
            partitions = handle.partitions().len(),
            "Pipeline running"
        );
        let dispatch = dispatcher.run(messages, &handle, shutdown).await;

        Ok(PipelineReport {
            dispatch,
            health: handle.health(),
        })
    }
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stream: Option<Arc<dyn EventStream>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    repository: Option<Arc<dyn OrderRepository>>,
    sink: Option<Arc<dyn EventSink>>,
    config: Option<PipelineConfig>,
    telemetry: Option<Telemetry>,
}

impl PipelineBuilder {
    /// Set the inbound stream.
    #[must_use]
    pub fn stream(mut self, stream: Arc<dyn EventStream>) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Set the checkpoint store.
    #[must_use]
    pub fn checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Set the order repository.
    #[must_use]
    pub fn repository(mut self, repository: Arc<dyn OrderRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Set the acknowledgement sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the pipeline settings (default: [`PipelineConfig::default`]).
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the telemetry handle (default: service name `orderflow`).
    #[must_use]
    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Build the [`Pipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] if a capability is missing.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        fn required<T>(value: Option<T>, name: &str) -> Result<T, PipelineError> {
            value.ok_or_else(|| PipelineError::Configuration(format!("{name} is required")))
        }

        Ok(Pipeline {
            stream: required(self.stream, "stream")?,
            checkpoints: required(self.checkpoints, "checkpoint store")?,
            repository: required(self.repository, "repository")?,
            sink: required(self.sink, "sink")?,
            config: self.config.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
        })
    }
}
