//! Durable partition checkpoints.

use crate::PostgresError;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use orderflow_core::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use sqlx::PgPool;

const CREATE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS partition_checkpoints (
    scope TEXT NOT NULL,
    partition_id TEXT NOT NULL,
    sequence BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (scope, partition_id)
)
";

/// `PostgreSQL`-backed [`CheckpointStore`].
///
/// Checkpoints are scoped (typically by topic and consumer group) so several
/// pipelines can share one table.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE partition_checkpoints (
///     scope TEXT NOT NULL,
///     partition_id TEXT NOT NULL,
///     sequence BIGINT NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL,
///     PRIMARY KEY (scope, partition_id)
/// );
/// ```
///
/// # Monotonicity
///
/// The upsert only overwrites a row whose stored sequence is lower, so a
/// stale writer (for example a worker restarted mid-batch) can never move a
/// partition backward.
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
    scope: String,
}

impl PostgresCheckpointStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool, scope: impl Into<String>) -> Self {
        Self {
            pool,
            scope: scope.into(),
        }
    }

    /// Create the checkpoint table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::Migration`] if the DDL fails.
    pub async fn migrate(&self) -> Result<(), PostgresError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| PostgresError::Migration(e.to_string()))?;
        Ok(())
    }

    /// The scope checkpoints are written under.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    fn advance<'a>(
        &'a self,
        partition_id: &'a str,
        sequence: i64,
    ) -> BoxFuture<'a, Result<(), CheckpointError>> {
        Box::pin(async move {
            let result = sqlx::query(
                "INSERT INTO partition_checkpoints (scope, partition_id, sequence, updated_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (scope, partition_id) DO UPDATE
                 SET sequence = EXCLUDED.sequence, updated_at = now()
                 WHERE partition_checkpoints.sequence < EXCLUDED.sequence",
            )
            .bind(&self.scope)
            .bind(partition_id)
            .bind(sequence)
            .execute(&self.pool)
            .await
            .map_err(|e| CheckpointError::WriteFailed {
                partition_id: partition_id.to_string(),
                reason: e.to_string(),
            })?;

            if result.rows_affected() == 0 {
                tracing::debug!(
                    scope = %self.scope,
                    partition_id,
                    sequence,
                    "Stale checkpoint ignored"
                );
            }
            Ok(())
        })
    }

    fn load<'a>(
        &'a self,
        partition_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Checkpoint>, CheckpointError>> {
        Box::pin(async move {
            let row: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
                "SELECT sequence, updated_at
                 FROM partition_checkpoints
                 WHERE scope = $1 AND partition_id = $2",
            )
            .bind(&self.scope)
            .bind(partition_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CheckpointError::ReadFailed {
                partition_id: partition_id.to_string(),
                reason: e.to_string(),
            })?;

            Ok(row.map(|(sequence, updated_at)| Checkpoint {
                partition_id: partition_id.to_string(),
                sequence,
                updated_at,
            }))
        })
    }
}
