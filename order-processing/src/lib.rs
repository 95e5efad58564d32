//! Order event ingestion service.
//!
//! Reads order events from a Kafka-protocol topic, applies them to order
//! documents in `PostgreSQL`, and publishes an acknowledgement for every
//! event to a second topic. See `orderflow_runtime` for the pipeline itself;
//! this crate only loads configuration and wires the production
//! implementations together.

pub mod bootstrap;
pub mod config;

pub use config::{Config, ConfigError};
