//! Process setup: logging and dependency wiring.
//!
//! Every external dependency is created up front. If any of them cannot be
//! created the process exits before a single record is read.

use crate::config::{Config, ServiceConfig, StreamConfig};
use anyhow::{Context, Result, anyhow};
use orderflow_postgres::{PostgresCheckpointStore, PostgresOrderRepository, connect};
use orderflow_redpanda::{RedpandaEventSink, RedpandaEventStream, SecurityConfig};
use orderflow_runtime::{Pipeline, Telemetry};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured log level when set.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init_tracing(service: &ServiceConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&service.log_level));

    let installed = if service.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };
    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))
}

/// The wired service.
pub struct Services {
    /// The ready-to-run pipeline.
    pub pipeline: Pipeline,
    /// Outbound sink, kept to flush it on shutdown.
    pub sink: Arc<RedpandaEventSink>,
}

/// Create every dependency and build the pipeline.
///
/// # Errors
///
/// Returns an error naming the dependency that could not be created.
pub async fn build(config: &Config) -> Result<Services> {
    let security = security(&config.stream);

    let mut stream = RedpandaEventStream::builder()
        .brokers(&config.stream.brokers)
        .topic(&config.stream.topic)
        .consumer_group(&config.stream.consumer_group)
        .auto_offset_reset(&config.stream.auto_offset_reset);
    let mut sink = RedpandaEventSink::builder()
        .brokers(&config.stream.brokers)
        .topic(&config.stream.ack_topic)
        .producer_acks(&config.stream.producer_acks)
        .max_message_bytes(config.stream.max_message_bytes);
    if let Some(security) = security {
        stream = stream.security(security.clone());
        sink = sink.security(security);
    }
    let stream = Arc::new(stream.build().context("Failed to create event stream")?);
    let sink = Arc::new(sink.build().context("Failed to create acknowledgement sink")?);

    let max_connections = config.repository.max_connections;
    let repository_pool = connect(&config.repository.database_url, max_connections)
        .await
        .context("Failed to connect to the order database")?;
    let checkpoint_pool = if config.checkpoint.database_url == config.repository.database_url {
        repository_pool.clone()
    } else {
        connect(&config.checkpoint.database_url, max_connections)
            .await
            .context("Failed to connect to the checkpoint database")?
    };

    let repository = PostgresOrderRepository::new(repository_pool, &config.repository.table)
        .context("Failed to create order repository")?;
    repository
        .migrate()
        .await
        .context("Failed to prepare the order table")?;

    let checkpoints = PostgresCheckpointStore::new(checkpoint_pool, &config.checkpoint.scope);
    checkpoints
        .migrate()
        .await
        .context("Failed to prepare the checkpoint table")?;

    info!(
        topic = %config.stream.topic,
        ack_topic = %config.stream.ack_topic,
        table = repository.table_name(),
        checkpoint_scope = checkpoints.scope(),
        "Dependencies ready"
    );

    let pipeline = Pipeline::builder()
        .stream(stream)
        .checkpoints(Arc::new(checkpoints))
        .repository(Arc::new(repository))
        .sink(sink.clone())
        .config(config.pipeline_config())
        .telemetry(Telemetry::new(&config.service.name))
        .build()?;

    Ok(Services { pipeline, sink })
}

fn security(stream: &StreamConfig) -> Option<SecurityConfig> {
    let protocol = stream.security_protocol.clone()?;
    Some(SecurityConfig {
        protocol,
        mechanism: stream.sasl_mechanism.clone(),
        username: stream.sasl_username.clone().unwrap_or_default(),
        password: stream.sasl_password.clone().unwrap_or_default(),
    })
}
