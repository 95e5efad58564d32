//! Partitioned inbound stream over a Kafka topic.

use crate::{RedpandaError, SecurityConfig, base_config, required};
use chrono::DateTime;
use futures::future::BoxFuture;
use orderflow_core::stream::{EventStream, PartitionClient, PartitionId, RawMessage, StreamError};
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;

/// How long to keep collecting once a batch has its first record.
const BATCH_LINGER: Duration = Duration::from_millis(50);

/// Kafka-protocol [`EventStream`].
///
/// Partitions come from the topic metadata and are cached for the lifetime
/// of the stream. Every [`open_partition`](EventStream::open_partition) call
/// creates a dedicated consumer manually assigned to that one partition, so
/// partitions never share a consumer and never rebalance.
///
/// # Example
///
/// ```no_run
/// use orderflow_redpanda::RedpandaEventStream;
///
/// # fn example() -> Result<(), orderflow_redpanda::RedpandaError> {
/// let stream = RedpandaEventStream::builder()
///     .brokers("localhost:9092")
///     .topic("orders")
///     .consumer_group("order-processing")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventStream {
    brokers: String,
    topic: String,
    consumer_group: String,
    auto_offset_reset: String,
    security: Option<SecurityConfig>,
    metadata_timeout: Duration,
    metadata: Arc<BaseConsumer>,
    partitions: OnceLock<Vec<PartitionId>>,
    closed: Arc<AtomicBool>,
}

impl RedpandaEventStream {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaEventStreamBuilder {
        RedpandaEventStreamBuilder::default()
    }

    /// The topic this stream reads.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn consumer(&self) -> Result<StreamConsumer, StreamError> {
        base_config(&self.brokers, self.security.as_ref())
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .create()
            .map_err(|e| StreamError::ConnectionFailed(format!("Failed to create consumer: {e}")))
    }

    async fn fetch_partitions(&self) -> Result<Vec<PartitionId>, StreamError> {
        let metadata = Arc::clone(&self.metadata);
        let topic = self.topic.clone();
        let timeout = self.metadata_timeout;

        // fetch_metadata blocks the calling thread
        let mut ids = tokio::task::spawn_blocking(move || -> Result<Vec<i32>, StreamError> {
            let metadata = metadata
                .fetch_metadata(Some(&topic), Timeout::After(timeout))
                .map_err(|e| StreamError::ConnectionFailed(format!("Failed to fetch metadata: {e}")))?;

            let topic_metadata = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .ok_or_else(|| StreamError::ConnectionFailed(format!("Topic '{topic}' not found")))?;

            if let Some(error) = topic_metadata.error() {
                return Err(StreamError::ConnectionFailed(format!(
                    "Topic '{topic}' unavailable: {error:?}"
                )));
            }
            Ok(topic_metadata.partitions().iter().map(|p| p.id()).collect())
        })
        .await
        .map_err(|e| StreamError::Other(format!("Metadata task failed: {e}")))??;

        ids.sort_unstable();
        Ok(ids.into_iter().map(|id| id.to_string()).collect())
    }
}

impl EventStream for RedpandaEventStream {
    fn partitions(&self) -> BoxFuture<'_, Result<Vec<PartitionId>, StreamError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(StreamError::Closed);
            }
            if let Some(partitions) = self.partitions.get() {
                return Ok(partitions.clone());
            }

            let partitions = self.fetch_partitions().await?;
            tracing::info!(
                topic = %self.topic,
                partitions = partitions.len(),
                "Fetched stream topology"
            );
            Ok(self.partitions.get_or_init(|| partitions).clone())
        })
    }

    fn open_partition(
        &self,
        partition_id: &str,
        resume_after: Option<i64>,
    ) -> BoxFuture<'_, Result<Box<dyn PartitionClient>, StreamError>> {
        let partition_id = partition_id.to_string();
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(StreamError::Closed);
            }
            let known = self.partitions.get().is_none_or(|p| p.contains(&partition_id));
            let partition = parse_partition(&partition_id).filter(|_| known).ok_or_else(|| {
                StreamError::UnknownPartition(partition_id.clone())
            })?;

            let offset = start_offset(resume_after, &self.auto_offset_reset);
            let mut assignment = TopicPartitionList::new();
            assignment
                .add_partition_offset(&self.topic, partition, offset)
                .map_err(|e| StreamError::ConnectionFailed(e.to_string()))?;

            let consumer = self.consumer()?;
            consumer
                .assign(&assignment)
                .map_err(|e| StreamError::ConnectionFailed(format!("Failed to assign partition: {e}")))?;

            tracing::info!(
                topic = %self.topic,
                partition_id = %partition_id,
                ?offset,
                "Partition opened"
            );

            Ok(Box::new(RedpandaPartitionClient {
                partition_id,
                consumer,
                closed: Arc::clone(&self.closed),
                pending_error: None,
            }) as Box<dyn PartitionClient>)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), StreamError>> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::AcqRel) {
                tracing::info!(topic = %self.topic, "Stream closed");
            }
            Ok(())
        })
    }
}

/// Consumer assigned to exactly one partition.
struct RedpandaPartitionClient {
    partition_id: PartitionId,
    consumer: StreamConsumer,
    closed: Arc<AtomicBool>,
    pending_error: Option<StreamError>,
}

impl PartitionClient for RedpandaPartitionClient {
    fn partition_id(&self) -> &str {
        &self.partition_id
    }

    fn receive_batch(
        &mut self,
        max_messages: usize,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Vec<RawMessage>, StreamError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(StreamError::Closed);
            }

            if let Some(error) = self.pending_error.take() {
                return Err(error);
            }

            let deadline = Instant::now() + timeout;
            let mut batch = Vec::with_capacity(max_messages);
            let mut failure = None;
            while batch.len() < max_messages {
                let now = Instant::now();
                let wait = if batch.is_empty() {
                    deadline.saturating_duration_since(now)
                } else {
                    BATCH_LINGER.min(deadline.saturating_duration_since(now))
                };

                match tokio::time::timeout(wait, self.consumer.recv()).await {
                    Err(_) => break,
                    Ok(Ok(message)) => batch.push(to_raw(&self.partition_id, &message)),
                    Ok(Err(e)) => {
                        failure = Some(StreamError::ReceiveFailed {
                            partition_id: self.partition_id.clone(),
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
            }

            if failure.is_some() && !batch.is_empty() {
                tracing::warn!(
                    partition_id = %self.partition_id,
                    records = batch.len(),
                    "Receive error after partial batch, reporting it on the next call"
                );
            }
            finish_batch(batch, failure, &mut self.pending_error)
        })
    }
}

/// Resolve one receive window.
///
/// Records already taken off the consumer are returned before an error that
/// cut the window short; rdkafka yields that error only once, so it is parked
/// in `pending` and reported by the next call.
fn finish_batch(
    batch: Vec<RawMessage>,
    failure: Option<StreamError>,
    pending: &mut Option<StreamError>,
) -> Result<Vec<RawMessage>, StreamError> {
    match failure {
        Some(error) if batch.is_empty() => Err(error),
        Some(error) => {
            *pending = Some(error);
            Ok(batch)
        }
        None if batch.is_empty() => Err(StreamError::ReceiveTimeout),
        None => Ok(batch),
    }
}

/// Builder for [`RedpandaEventStream`].
#[derive(Default)]
pub struct RedpandaEventStreamBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
    security: Option<SecurityConfig>,
    metadata_timeout: Option<Duration>,
}

impl RedpandaEventStreamBuilder {
    /// Set the broker addresses (comma separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the inbound topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the consumer group id.
    ///
    /// Offsets are never committed, so the group only identifies the
    /// consumers to the broker.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Where a partition without a checkpoint starts: `"earliest"` or
    /// `"latest"` (default: `"earliest"`).
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Authenticate with SASL.
    #[must_use]
    pub fn security(mut self, security: SecurityConfig) -> Self {
        self.security = Some(security);
        self
    }

    /// Timeout for the topology request (default: 10 seconds).
    #[must_use]
    pub const fn metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaEventStream`].
    ///
    /// No connection is made until the partitions are listed.
    ///
    /// # Errors
    ///
    /// Returns [`RedpandaError::MissingSetting`] if brokers, topic or consumer
    /// group are missing, [`RedpandaError::InvalidSetting`] for an unknown
    /// offset reset policy, and [`RedpandaError::Client`] if rdkafka rejects
    /// the configuration.
    pub fn build(self) -> Result<RedpandaEventStream, RedpandaError> {
        let brokers = required(self.brokers, "brokers")?;
        let topic = required(self.topic, "topic")?;
        let consumer_group = required(self.consumer_group, "consumer_group")?;
        let auto_offset_reset = self.auto_offset_reset.unwrap_or_else(|| "earliest".to_string());
        if !matches!(auto_offset_reset.as_str(), "earliest" | "latest") {
            return Err(RedpandaError::InvalidSetting {
                name: "auto_offset_reset",
                reason: format!("expected 'earliest' or 'latest', got '{auto_offset_reset}'"),
            });
        }

        let metadata: BaseConsumer = base_config(&brokers, self.security.as_ref())
            .set("group.id", &consumer_group)
            .set("enable.auto.commit", "false")
            .create()?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            consumer_group = %consumer_group,
            auto_offset_reset = %auto_offset_reset,
            sasl = self.security.is_some(),
            "RedpandaEventStream created"
        );

        Ok(RedpandaEventStream {
            brokers,
            topic,
            consumer_group,
            auto_offset_reset,
            security: self.security,
            metadata_timeout: self.metadata_timeout.unwrap_or(Duration::from_secs(10)),
            metadata: Arc::new(metadata),
            partitions: OnceLock::new(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

fn parse_partition(partition_id: &str) -> Option<i32> {
    partition_id.parse::<i32>().ok().filter(|p| *p >= 0)
}

/// The offset to assign a partition at: right after the checkpoint, or the
/// configured default when there is none.
fn start_offset(resume_after: Option<i64>, auto_offset_reset: &str) -> Offset {
    match resume_after {
        Some(sequence) => Offset::Offset(sequence + 1),
        None if auto_offset_reset == "latest" => Offset::End,
        None => Offset::Beginning,
    }
}

fn to_raw<M: Message>(partition_id: &str, message: &M) -> RawMessage {
    let mut raw = RawMessage::new(
        partition_id,
        message.offset(),
        message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    );
    raw.message_id = message.key().map(|key| String::from_utf8_lossy(key).into_owned());
    raw.enqueued_at = message
        .timestamp()
        .to_millis()
        .and_then(DateTime::from_timestamp_millis);
    raw
}
