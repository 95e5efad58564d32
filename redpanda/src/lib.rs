//! Kafka-protocol transport for the order ingestion pipeline.
//!
//! This crate implements the pipeline's inbound [`EventStream`] and outbound
//! [`EventSink`] on top of rdkafka, so it works against Redpanda, Apache Kafka,
//! or any Kafka-compatible endpoint (Azure Event Hubs included, via SASL).
//!
//! # Architecture
//!
//! ```text
//!            ┌───────────────────────┐
//!            │  RedpandaEventStream  │── metadata ──▶ partition list
//!            └──────────┬────────────┘
//!                       │ open_partition (one consumer per partition,
//!                       │ manually assigned at checkpoint + 1)
//!            ┌──────────┼──────────┐
//!            ▼          ▼          ▼
//!      partition 0  partition 1  partition N  ──▶ pipeline workers
//!
//!   dispatch loop ──▶ RedpandaEventSink ──▶ acknowledgement topic
//! ```
//!
//! # Offsets
//!
//! The stream never commits offsets to the broker. The pipeline's
//! [`CheckpointStore`](orderflow_core::checkpoint::CheckpointStore) is the only
//! record of progress, and each partition consumer is assigned explicitly at
//! the offset after its checkpoint. A Kafka offset is used directly as the
//! message sequence.
//!
//! # Example
//!
//! ```no_run
//! use orderflow_redpanda::{RedpandaEventSink, RedpandaEventStream};
//!
//! # fn example() -> Result<(), orderflow_redpanda::RedpandaError> {
//! let stream = RedpandaEventStream::builder()
//!     .brokers("localhost:9092")
//!     .topic("orders")
//!     .consumer_group("order-processing")
//!     .auto_offset_reset("earliest")
//!     .build()?;
//!
//! let sink = RedpandaEventSink::builder()
//!     .brokers("localhost:9092")
//!     .topic("order-acks")
//!     .producer_acks("all")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use thiserror::Error;

mod sink;
mod stream;

pub use sink::{DEFAULT_MAX_MESSAGE_BYTES, RedpandaEventSink, RedpandaEventSinkBuilder};
pub use stream::{RedpandaEventStream, RedpandaEventStreamBuilder};

#[doc(no_inline)]
pub use orderflow_core::sink::EventSink;
#[doc(no_inline)]
pub use orderflow_core::stream::EventStream;

/// Errors raised while building a stream or sink.
#[derive(Error, Debug)]
pub enum RedpandaError {
    /// A required setting was not provided.
    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),

    /// A setting has a value the client cannot use.
    #[error("Invalid setting '{name}': {reason}")]
    InvalidSetting {
        /// The setting
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// rdkafka refused to create the client.
    #[error("Failed to create Kafka client: {0}")]
    Client(#[from] KafkaError),
}

/// SASL settings for authenticated clusters.
///
/// For Azure Event Hubs use `SASL_SSL`, mechanism `PLAIN`, username
/// `$ConnectionString` and the namespace connection string as the password.
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityConfig {
    /// `security.protocol`, e.g. `SASL_SSL`.
    pub protocol: String,
    /// `sasl.mechanisms`, e.g. `PLAIN` or `SCRAM-SHA-256`.
    pub mechanism: String,
    /// `sasl.username`.
    pub username: String,
    /// `sasl.password`.
    pub password: String,
}

impl SecurityConfig {
    fn apply(&self, config: &mut ClientConfig) {
        config
            .set("security.protocol", &self.protocol)
            .set("sasl.mechanisms", &self.mechanism)
            .set("sasl.username", &self.username)
            .set("sasl.password", &self.password);
    }
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("protocol", &self.protocol)
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Base client configuration shared by consumers and producers.
fn base_config(brokers: &str, security: Option<&SecurityConfig>) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", brokers);
    if let Some(security) = security {
        security.apply(&mut config);
    }
    config
}

fn required(value: Option<String>, name: &'static str) -> Result<String, RedpandaError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(RedpandaError::MissingSetting(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_settings_are_applied() {
        let security = SecurityConfig {
            protocol: "SASL_SSL".to_string(),
            mechanism: "PLAIN".to_string(),
            username: "$ConnectionString".to_string(),
            password: "Endpoint=sb://example/".to_string(),
        };
        let config = base_config("example:9093", Some(&security));

        assert_eq!(config.get("bootstrap.servers"), Some("example:9093"));
        assert_eq!(config.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(config.get("sasl.username"), Some("$ConnectionString"));
    }

    #[test]
    fn password_is_not_printed() {
        let security = SecurityConfig {
            protocol: "SASL_SSL".to_string(),
            mechanism: "PLAIN".to_string(),
            username: "user".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{security:?}").contains("hunter2"));
    }

    #[test]
    fn blank_required_setting_is_missing() {
        assert!(matches!(
            required(Some("  ".to_string()), "topic"),
            Err(RedpandaError::MissingSetting("topic"))
        ));
        assert!(matches!(required(None, "brokers"), Err(RedpandaError::MissingSetting("brokers"))));
    }
}
