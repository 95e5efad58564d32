//! Order documents as `JSONB` rows.

use crate::{PostgresError, validate_table_name};
use futures::future::BoxFuture;
use orderflow_core::order::{Order, OrderKey};
use orderflow_core::repository::{OrderRepository, RepositoryError};
use sqlx::PgPool;
use sqlx::types::Json;

/// `PostgreSQL`-backed [`OrderRepository`].
///
/// # Schema
///
/// ```sql
/// CREATE TABLE orders (
///     partition_key TEXT NOT NULL,
///     id TEXT NOT NULL,
///     document JSONB NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL,
///     PRIMARY KEY (partition_key, id)
/// );
/// ```
///
/// The document is the order exactly as it arrived on the wire, so its
/// field names (`ProductCategory`, `productId`, ...) are preserved.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
    table_name: String,
}

impl PostgresOrderRepository {
    /// Create a repository over an existing pool.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::InvalidTableName`] if `table_name` is not a
    /// plain identifier.
    pub fn new(pool: PgPool, table_name: impl Into<String>) -> Result<Self, PostgresError> {
        let table_name = table_name.into();
        validate_table_name(&table_name)?;
        Ok(Self { pool, table_name })
    }

    /// Create the order table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::Migration`] if the DDL fails.
    pub async fn migrate(&self) -> Result<(), PostgresError> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                partition_key TEXT NOT NULL,
                id TEXT NOT NULL,
                document JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (partition_key, id)
            )",
            self.table_name
        );

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| PostgresError::Migration(e.to_string()))?;
        Ok(())
    }

    /// Get the table name for this repository.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn backend(e: &sqlx::Error) -> RepositoryError {
        RepositoryError::Backend(e.to_string())
    }

    fn not_found(key: OrderKey<'_>) -> RepositoryError {
        RepositoryError::NotFound {
            id: key.id().to_string(),
            partition_key: key.partition_key().to_string(),
        }
    }
}

impl OrderRepository for PostgresOrderRepository {
    fn create_order<'a>(&'a self, order: &'a Order) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(async move {
            let key = order.key()?;
            // Upsert: a redelivered create overwrites instead of conflicting
            let query = format!(
                "INSERT INTO {} (partition_key, id, document, updated_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (partition_key, id) DO UPDATE
                 SET document = EXCLUDED.document, updated_at = now()",
                self.table_name
            );

            sqlx::query(&query)
                .bind(key.partition_key())
                .bind(key.id())
                .bind(Json(order))
                .execute(&self.pool)
                .await
                .map_err(|e| Self::backend(&e))?;

            tracing::debug!(order = %key, "Order created");
            Ok(())
        })
    }

    fn update_order<'a>(&'a self, order: &'a Order) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(async move {
            let key = order.key()?;
            let query = format!(
                "UPDATE {} SET document = $3, updated_at = now()
                 WHERE partition_key = $1 AND id = $2",
                self.table_name
            );

            let result = sqlx::query(&query)
                .bind(key.partition_key())
                .bind(key.id())
                .bind(Json(order))
                .execute(&self.pool)
                .await
                .map_err(|e| Self::backend(&e))?;

            if result.rows_affected() == 0 {
                return Err(Self::not_found(key));
            }
            tracing::debug!(order = %key, "Order updated");
            Ok(())
        })
    }

    fn delete_order<'a>(
        &'a self,
        id: &'a str,
        partition_key: &'a str,
    ) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(async move {
            let key = OrderKey::new(id, partition_key)?;
            let query = format!(
                "DELETE FROM {} WHERE partition_key = $1 AND id = $2",
                self.table_name
            );

            let result = sqlx::query(&query)
                .bind(key.partition_key())
                .bind(key.id())
                .execute(&self.pool)
                .await
                .map_err(|e| Self::backend(&e))?;

            if result.rows_affected() == 0 {
                return Err(Self::not_found(key));
            }
            tracing::debug!(order = %key, "Order deleted");
            Ok(())
        })
    }

    fn get_order<'a>(
        &'a self,
        id: &'a str,
        partition_key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Order>, RepositoryError>> {
        Box::pin(async move {
            let key = OrderKey::new(id, partition_key)?;
            let query = format!(
                "SELECT document FROM {} WHERE partition_key = $1 AND id = $2",
                self.table_name
            );

            let row: Option<(Json<Order>,)> = sqlx::query_as(&query)
                .bind(key.partition_key())
                .bind(key.id())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Self::backend(&e))?;

            Ok(row.map(|(Json(order),)| order))
        })
    }
}
