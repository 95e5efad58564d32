//! Acknowledgement sink over a Kafka topic.

use crate::{RedpandaError, SecurityConfig, base_config, required};
use futures::future::{BoxFuture, join_all};
use orderflow_core::sink::{EventSink, OutboundRecord, SinkError};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Default per-record limit; matches the broker's default `message.max.bytes`.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1_000_000;

/// Kafka-protocol [`EventSink`].
///
/// A batch is enqueued in order and then awaited as a whole, so records of
/// one batch keep their relative order on the partition chosen by their key.
///
/// # Example
///
/// ```no_run
/// use orderflow_redpanda::RedpandaEventSink;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), orderflow_redpanda::RedpandaError> {
/// let sink = RedpandaEventSink::builder()
///     .brokers("localhost:9092")
///     .topic("order-acks")
///     .producer_acks("all")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventSink {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
    max_message_bytes: usize,
}

impl RedpandaEventSink {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaEventSinkBuilder {
        RedpandaEventSinkBuilder::default()
    }

    /// The topic acknowledgements are written to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for every in-flight record to be delivered.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::SendFailed`] if records are still queued when
    /// `timeout` elapses.
    pub async fn flush(&self, timeout: Duration) -> Result<(), SinkError> {
        let producer = self.producer.clone();
        // Producer::flush blocks the calling thread
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| SinkError::SendFailed(format!("Flush task failed: {e}")))?
            .map_err(|e| SinkError::SendFailed(format!("Flush failed: {e}")))
    }
}

impl EventSink for RedpandaEventSink {
    fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    fn send_batch(&self, records: Vec<OutboundRecord>) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            if let Some(record) = records.iter().find(|r| r.size() > self.max_message_bytes) {
                return Err(SinkError::MessageTooLarge {
                    size: record.size(),
                    limit: self.max_message_bytes,
                });
            }

            let deliveries = records.iter().map(|record| {
                let mut message = FutureRecord::<str, [u8]>::to(&self.topic).payload(&record.payload);
                if let Some(key) = &record.key {
                    message = message.key(key.as_str());
                }
                self.producer.send(message, Timeout::After(self.timeout))
            });

            let mut failures = join_all(deliveries)
                .await
                .into_iter()
                .filter_map(Result::err)
                .map(|(error, _)| error);

            match failures.next() {
                None => {
                    tracing::debug!(topic = %self.topic, records = records.len(), "Batch delivered");
                    Ok(())
                }
                Some(first) => {
                    let failed = 1 + failures.count();
                    tracing::error!(
                        topic = %self.topic,
                        records = records.len(),
                        failed,
                        error = %first,
                        "Batch delivery failed"
                    );
                    Err(SinkError::SendFailed(format!(
                        "{failed} of {} records failed: {first}",
                        records.len()
                    )))
                }
            }
        })
    }
}

/// Builder for [`RedpandaEventSink`].
#[derive(Default)]
pub struct RedpandaEventSinkBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    max_message_bytes: Option<usize>,
    security: Option<SecurityConfig>,
}

impl RedpandaEventSinkBuilder {
    /// Set the broker addresses (comma separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the outbound topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the delivery timeout per record.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the per-record size limit.
    ///
    /// Default: [`DEFAULT_MAX_MESSAGE_BYTES`]
    #[must_use]
    pub const fn max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = Some(bytes);
        self
    }

    /// Authenticate with SASL.
    #[must_use]
    pub fn security(mut self, security: SecurityConfig) -> Self {
        self.security = Some(security);
        self
    }

    /// Build the [`RedpandaEventSink`].
    ///
    /// # Errors
    ///
    /// Returns [`RedpandaError::MissingSetting`] if brokers or topic are
    /// missing, [`RedpandaError::InvalidSetting`] for a zero size limit, and
    /// [`RedpandaError::Client`] if the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventSink, RedpandaError> {
        let brokers = required(self.brokers, "brokers")?;
        let topic = required(self.topic, "topic")?;
        let max_message_bytes = self.max_message_bytes.unwrap_or(DEFAULT_MAX_MESSAGE_BYTES);
        if max_message_bytes == 0 {
            return Err(RedpandaError::InvalidSetting {
                name: "max_message_bytes",
                reason: "must be greater than 0".to_string(),
            });
        }
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = base_config(&brokers, self.security.as_ref())
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            acks,
            compression,
            max_message_bytes,
            "RedpandaEventSink created"
        );

        Ok(RedpandaEventSink {
            producer,
            topic,
            timeout,
            max_message_bytes,
        })
    }
}
