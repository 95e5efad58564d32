//! `PostgreSQL` storage for the order ingestion pipeline.
//!
//! This crate provides the two durable capabilities the pipeline needs:
//!
//! - [`PostgresCheckpointStore`]: per-partition progress, written at batch
//!   boundaries and never moved backward
//! - [`PostgresOrderRepository`]: order documents stored as `JSONB`, keyed by
//!   `(partition_key, id)` where the partition key is the product category
//!
//! Both share a [`PgPool`] created with [`connect`] and create their tables
//! with `migrate()`.
//!
//! # Example
//!
//! ```no_run
//! use orderflow_postgres::{PostgresCheckpointStore, PostgresOrderRepository, connect};
//!
//! # async fn example() -> Result<(), orderflow_postgres::PostgresError> {
//! let pool = connect("postgres://localhost/orders", 10).await?;
//!
//! let checkpoints = PostgresCheckpointStore::new(pool.clone(), "orders-ingest");
//! checkpoints.migrate().await?;
//!
//! let repository = PostgresOrderRepository::new(pool, "orders")?;
//! repository.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

mod checkpoint;
mod orders;

pub use checkpoint::PostgresCheckpointStore;
pub use orders::PostgresOrderRepository;

/// Errors raised while setting up the `PostgreSQL` stores.
///
/// Per-operation failures are reported through the capability error types
/// (`CheckpointError`, `RepositoryError`) instead.
#[derive(Error, Debug)]
pub enum PostgresError {
    /// The database could not be reached.
    #[error("Failed to connect to PostgreSQL: {0}")]
    Connect(String),

    /// Creating the schema failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// The configured table name is not a plain SQL identifier.
    #[error("Invalid table name '{0}': expected [schema.]name of letters, digits and underscores")]
    InvalidTableName(String),
}

/// Open a connection pool and verify it with a round trip.
///
/// # Errors
///
/// Returns [`PostgresError::Connect`] if the pool cannot be created or the
/// database does not answer.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, PostgresError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| PostgresError::Connect(e.to_string()))?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| PostgresError::Connect(e.to_string()))?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Table names are interpolated into SQL, so only `[schema.]name` made of
/// ASCII letters, digits and underscores (not starting with a digit) is allowed.
pub(crate) fn validate_table_name(name: &str) -> Result<(), PostgresError> {
    fn is_identifier(part: &str) -> bool {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() <= 2 && parts.iter().all(|part| is_identifier(part)) {
        Ok(())
    } else {
        Err(PostgresError::InvalidTableName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_schema_qualified_names_are_accepted() {
        assert!(validate_table_name("orders").is_ok());
        assert!(validate_table_name("_orders_v2").is_ok());
        assert!(validate_table_name("ingest.orders").is_ok());
    }

    #[test]
    fn names_that_could_inject_sql_are_rejected() {
        for name in ["", "2orders", "orders; DROP TABLE x", "a.b.c", "orders-v2", "\"orders\""] {
            assert!(
                matches!(validate_table_name(name), Err(PostgresError::InvalidTableName(_))),
                "{name:?} should be rejected"
            );
        }
    }
}
