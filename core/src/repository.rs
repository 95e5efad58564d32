//! Document store access for orders.
//!
//! Orders live in a document store keyed by (partition key, id), where the
//! partition key is the product category. The pipeline only ever calls the
//! repository from its single dispatch loop, so implementations need not be
//! safe against concurrent writers from the pipeline itself.
//!
//! # Idempotency
//!
//! Inbound delivery is at-least-once up to the point a batch is handed to the
//! dispatch loop, so the same event may be applied twice after a restart.
//! `create_order` is therefore an upsert, and `update_order` replaces the
//! whole document.

use crate::order::Order;
use futures::future::BoxFuture;
use thiserror::Error;

/// Errors returned by an [`OrderRepository`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The order carries no partition key (product category).
    #[error("Order '{id}' has no partition key")]
    MissingPartitionKey {
        /// Id of the offending order (may be empty)
        id: String,
    },

    /// The order carries no id.
    #[error("Order has no id")]
    MissingId,

    /// No document exists for the key.
    #[error("Order '{partition_key}/{id}' not found")]
    NotFound {
        /// Order id
        id: String,
        /// Partition key
        partition_key: String,
    },

    /// The write conflicted with the current document state.
    #[error("Conflict writing order '{0}'")]
    Conflict(String),

    /// The document store could not be reached or rejected the request.
    #[error("Document store error: {0}")]
    Backend(String),
}

impl RepositoryError {
    /// Whether the error comes from the order itself rather than the store.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::MissingPartitionKey { .. } | Self::MissingId)
    }
}

/// CRUD access to order documents.
///
/// # Dyn Compatibility
///
/// Uses [`BoxFuture`] returns so it can be injected as `Arc<dyn OrderRepository>`.
pub trait OrderRepository: Send + Sync {
    /// Create (or overwrite) an order document.
    ///
    /// # Errors
    ///
    /// Validation errors if the order has no key; [`RepositoryError::Backend`]
    /// if the write fails.
    fn create_order<'a>(&'a self, order: &'a Order) -> BoxFuture<'a, Result<(), RepositoryError>>;

    /// Replace an existing order document.
    ///
    /// # Errors
    ///
    /// Validation errors if the order has no key; [`RepositoryError::NotFound`]
    /// if no document exists; [`RepositoryError::Backend`] if the write fails.
    fn update_order<'a>(&'a self, order: &'a Order) -> BoxFuture<'a, Result<(), RepositoryError>>;

    /// Delete an order document.
    ///
    /// # Errors
    ///
    /// Validation errors for an empty id or partition key;
    /// [`RepositoryError::NotFound`] if no document exists.
    fn delete_order<'a>(
        &'a self,
        id: &'a str,
        partition_key: &'a str,
    ) -> BoxFuture<'a, Result<(), RepositoryError>>;

    /// Read an order document.
    ///
    /// # Errors
    ///
    /// Validation errors for an empty id or partition key;
    /// [`RepositoryError::Backend`] if the read fails.
    fn get_order<'a>(
        &'a self,
        id: &'a str,
        partition_key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Order>, RepositoryError>>;
}
