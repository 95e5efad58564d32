//! Configuration management for the order processing service.
//!
//! Loads configuration from environment variables (and a `.env` file, if
//! present) with defaults for everything but the connection settings.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `STREAM_BROKERS` | required |
//! | `STREAM_TOPIC` | required |
//! | `STREAM_ACK_TOPIC` | required |
//! | `STREAM_CONSUMER_GROUP` | `order-processing` |
//! | `STREAM_AUTO_OFFSET_RESET` | `earliest` |
//! | `STREAM_SECURITY_PROTOCOL` | unset (plaintext) |
//! | `STREAM_SASL_MECHANISM` | `PLAIN` |
//! | `STREAM_SASL_USERNAME` / `STREAM_SASL_PASSWORD` | required with a `SASL_*` protocol |
//! | `STREAM_BATCH_SIZE` | `10` |
//! | `STREAM_RECEIVE_TIMEOUT_SECS` | `20` |
//! | `STREAM_MAX_MESSAGE_BYTES` | `1000000` |
//! | `STREAM_PRODUCER_ACKS` | `all` |
//! | `CHECKPOINT_DATABASE_URL` | `DATABASE_URL` |
//! | `CHECKPOINT_SCOPE` | `<topic>/<consumer group>` |
//! | `REPOSITORY_DATABASE_URL` | `DATABASE_URL` |
//! | `REPOSITORY_TABLE` | `orders` |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `PIPELINE_CHANNEL_CAPACITY` | `1` |
//! | `PIPELINE_DRAIN_GRACE_SECS` | `5` |
//! | `RESTART_MAX_RESTARTS` | `5` |
//! | `RESTART_INITIAL_DELAY_MS` | `1000` |
//! | `RESTART_MAX_DELAY_SECS` | `60` (at most `3600`) |
//! | `RESTART_MULTIPLIER` | `2.0` |
//! | `RESTART_JITTER` | `0.1` |
//! | `SERVICE_NAME` | `order-processing` |
//! | `LOG_LEVEL` | `info` |
//! | `LOG_JSON` | `false` |
//! | `METRICS_ENABLED` | `false` |
//! | `METRICS_ADDR` | `0.0.0.0:9090` |

use orderflow_runtime::adapter::AdapterConfig;
use orderflow_runtime::partition_worker::WorkerConfig;
use orderflow_runtime::pipeline::PipelineConfig;
use orderflow_runtime::supervisor::RestartPolicy;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for the restart backoff settings.
const MAX_RESTART_DELAY: Duration = Duration::from_secs(3600);

/// Errors found while loading or validating configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset or blank.
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    /// A variable is set to something unusable.
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        /// The variable
        key: &'static str,
        /// Its value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Inbound and outbound stream settings
    pub stream: StreamConfig,
    /// Checkpoint store settings
    pub checkpoint: CheckpointConfig,
    /// Document store settings
    pub repository: RepositoryConfig,
    /// Pipeline tuning
    pub pipeline: PipelineSettings,
    /// Service identity and observability
    pub service: ServiceConfig,
}

/// Kafka-protocol stream configuration.
#[derive(Clone, PartialEq)]
pub struct StreamConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Topic carrying order events
    pub topic: String,
    /// Topic acknowledgements are published to
    pub ack_topic: String,
    /// Consumer group id
    pub consumer_group: String,
    /// Start position of partitions without a checkpoint: `earliest` or `latest`
    pub auto_offset_reset: String,
    /// `security.protocol`, e.g. `SASL_SSL`
    pub security_protocol: Option<String>,
    /// SASL mechanism
    pub sasl_mechanism: String,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Maximum records per receive
    pub batch_size: usize,
    /// Receive window per batch
    pub receive_timeout: Duration,
    /// Largest acknowledgement record the producer sends
    pub max_message_bytes: usize,
    /// Producer acks: `0`, `1` or `all`
    pub producer_acks: String,
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("brokers", &self.brokers)
            .field("topic", &self.topic)
            .field("ack_topic", &self.ack_topic)
            .field("consumer_group", &self.consumer_group)
            .field("auto_offset_reset", &self.auto_offset_reset)
            .field("security_protocol", &self.security_protocol)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("sasl_username", &self.sasl_username)
            .field("sasl_password", &self.sasl_password.as_ref().map(|_| "<redacted>"))
            .field("batch_size", &self.batch_size)
            .field("receive_timeout", &self.receive_timeout)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("producer_acks", &self.producer_acks)
            .finish()
    }
}

impl StreamConfig {
    /// Whether the protocol requires SASL credentials.
    #[must_use]
    pub fn uses_sasl(&self) -> bool {
        self.security_protocol
            .as_deref()
            .is_some_and(|p| p.to_ascii_uppercase().starts_with("SASL"))
    }
}

/// Checkpoint store configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// `PostgreSQL` connection URL
    pub database_url: String,
    /// Namespace the checkpoints are written under
    pub scope: String,
}

/// Document store configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// `PostgreSQL` connection URL
    pub database_url: String,
    /// Table holding the order documents
    pub table: String,
    /// Maximum number of connections per pool
    pub max_connections: u32,
}

// Connection URLs can carry passwords
impl fmt::Debug for CheckpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointConfig")
            .field("database_url", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

impl fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryConfig")
            .field("database_url", &"<redacted>")
            .field("table", &self.table)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Capacity of the merged channel
    pub channel_capacity: usize,
    /// How long to drain after shutdown is requested
    pub drain_grace: Duration,
    /// Partition worker restart policy
    pub restart: RestartPolicy,
}

/// Service identity and observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Service name used on spans and logs
    pub name: String,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON log lines
    pub json_logs: bool,
    /// Serve Prometheus metrics
    pub metrics_enabled: bool,
    /// Metrics listener address
    pub metrics_addr: SocketAddr,
}

impl Config {
    /// Load configuration from the process environment, reading `.env` first.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a required variable is missing or any
    /// variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a required key is missing, a value cannot
    /// be parsed, or [`Config::validate`] rejects the result.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let topic = vars.required("STREAM_TOPIC")?;
        let consumer_group = vars.string("STREAM_CONSUMER_GROUP", "order-processing");
        let database_url = vars.optional("DATABASE_URL");

        let config = Self {
            checkpoint: CheckpointConfig {
                database_url: vars
                    .optional("CHECKPOINT_DATABASE_URL")
                    .or_else(|| database_url.clone())
                    .ok_or(ConfigError::Missing("CHECKPOINT_DATABASE_URL"))?,
                scope: vars.string("CHECKPOINT_SCOPE", &format!("{topic}/{consumer_group}")),
            },
            repository: RepositoryConfig {
                database_url: vars
                    .optional("REPOSITORY_DATABASE_URL")
                    .or(database_url)
                    .ok_or(ConfigError::Missing("REPOSITORY_DATABASE_URL"))?,
                table: vars.string("REPOSITORY_TABLE", "orders"),
                max_connections: vars.parse("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            stream: StreamConfig {
                brokers: vars.required("STREAM_BROKERS")?,
                ack_topic: vars.required("STREAM_ACK_TOPIC")?,
                topic,
                consumer_group,
                auto_offset_reset: vars.string("STREAM_AUTO_OFFSET_RESET", "earliest"),
                security_protocol: vars.optional("STREAM_SECURITY_PROTOCOL"),
                sasl_mechanism: vars.string("STREAM_SASL_MECHANISM", "PLAIN"),
                sasl_username: vars.optional("STREAM_SASL_USERNAME"),
                sasl_password: vars.optional("STREAM_SASL_PASSWORD"),
                batch_size: vars.parse("STREAM_BATCH_SIZE", 10)?,
                receive_timeout: Duration::from_secs(vars.parse("STREAM_RECEIVE_TIMEOUT_SECS", 20)?),
                max_message_bytes: vars.parse("STREAM_MAX_MESSAGE_BYTES", 1_000_000)?,
                producer_acks: vars.string("STREAM_PRODUCER_ACKS", "all"),
            },
            pipeline: PipelineSettings {
                channel_capacity: vars.parse("PIPELINE_CHANNEL_CAPACITY", 1)?,
                drain_grace: Duration::from_secs(vars.parse("PIPELINE_DRAIN_GRACE_SECS", 5)?),
                restart: RestartPolicy::builder()
                    .max_restarts(vars.parse("RESTART_MAX_RESTARTS", 5)?)
                    .initial_delay(Duration::from_millis(vars.parse("RESTART_INITIAL_DELAY_MS", 1000)?))
                    .max_delay(Duration::from_secs(vars.parse("RESTART_MAX_DELAY_SECS", 60)?))
                    .multiplier(vars.parse("RESTART_MULTIPLIER", 2.0)?)
                    .jitter(vars.parse("RESTART_JITTER", 0.1)?)
                    .build(),
            },
            service: ServiceConfig {
                name: vars.string("SERVICE_NAME", "order-processing"),
                log_level: vars.string("LOG_LEVEL", "info"),
                json_logs: vars.flag("LOG_JSON")?,
                metrics_enabled: vars.flag("METRICS_ENABLED")?,
                metrics_addr: vars.parse("METRICS_ADDR", SocketAddr::from(([0, 0, 0, 0], 9090)))?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(key: &'static str, value: usize) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                    reason: "must be greater than 0".to_string(),
                });
            }
            Ok(())
        }

        positive("STREAM_BATCH_SIZE", self.stream.batch_size)?;
        positive("STREAM_MAX_MESSAGE_BYTES", self.stream.max_message_bytes)?;
        positive("PIPELINE_CHANNEL_CAPACITY", self.pipeline.channel_capacity)?;

        if self.stream.receive_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "STREAM_RECEIVE_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if !matches!(self.stream.auto_offset_reset.as_str(), "earliest" | "latest") {
            return Err(ConfigError::Invalid {
                key: "STREAM_AUTO_OFFSET_RESET",
                value: self.stream.auto_offset_reset.clone(),
                reason: "expected 'earliest' or 'latest'".to_string(),
            });
        }

        if !self.pipeline.restart.multiplier.is_finite() || self.pipeline.restart.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                key: "RESTART_MULTIPLIER",
                value: self.pipeline.restart.multiplier.to_string(),
                reason: "must be a finite number of at least 1.0".to_string(),
            });
        }
        if self.pipeline.restart.max_delay > MAX_RESTART_DELAY {
            return Err(ConfigError::Invalid {
                key: "RESTART_MAX_DELAY_SECS",
                value: self.pipeline.restart.max_delay.as_secs().to_string(),
                reason: format!("must be at most {}", MAX_RESTART_DELAY.as_secs()),
            });
        }
        if self.pipeline.restart.initial_delay > MAX_RESTART_DELAY {
            return Err(ConfigError::Invalid {
                key: "RESTART_INITIAL_DELAY_MS",
                value: self.pipeline.restart.initial_delay.as_millis().to_string(),
                reason: format!("must be at most {}", MAX_RESTART_DELAY.as_millis()),
            });
        }
        if !(0.0..=1.0).contains(&self.pipeline.restart.jitter) {
            return Err(ConfigError::Invalid {
                key: "RESTART_JITTER",
                value: self.pipeline.restart.jitter.to_string(),
                reason: "must be between 0.0 and 1.0".to_string(),
            });
        }

        if self.stream.uses_sasl() {
            if self.stream.sasl_username.is_none() {
                return Err(ConfigError::Missing("STREAM_SASL_USERNAME"));
            }
            if self.stream.sasl_password.is_none() {
                return Err(ConfigError::Missing("STREAM_SASL_PASSWORD"));
            }
        }

        Ok(())
    }

    /// The runtime's view of the pipeline settings.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            adapter: AdapterConfig {
                channel_capacity: self.pipeline.channel_capacity,
                worker: WorkerConfig::default()
                    .with_batch_size(self.stream.batch_size)
                    .with_receive_timeout(self.stream.receive_timeout),
                restart: self.pipeline.restart.clone(),
            },
            drain_grace: self.pipeline.drain_grace,
        }
    }
}

/// Typed access to a key lookup. Blank values count as unset.
struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => {
                let parsed = value.trim().parse::<T>();
                parsed.map_err(|e| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                    value,
                })
            }
        }
    }

    fn flag(&self, key: &'static str) -> Result<bool, ConfigError> {
        match self.optional(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(value) => Err(ConfigError::Invalid {
                key,
                value,
                reason: "expected true or false".to_string(),
            }),
        }
    }
}
