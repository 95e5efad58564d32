//! In-memory order repository.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only panics on a poisoned lock

use futures::future::BoxFuture;
use orderflow_core::order::{Order, OrderKey};
use orderflow_core::repository::{OrderRepository, RepositoryError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// One recorded repository call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryCall {
    /// `create_order`
    Create {
        /// Order id
        id: String,
        /// Partition key
        partition_key: String,
    },
    /// `update_order`
    Update {
        /// Order id
        id: String,
        /// Partition key
        partition_key: String,
    },
    /// `delete_order`
    Delete {
        /// Order id
        id: String,
        /// Partition key
        partition_key: String,
    },
    /// `get_order`
    Get {
        /// Order id
        id: String,
        /// Partition key
        partition_key: String,
    },
}

impl RepositoryCall {
    /// Id of the order the call addressed.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Create { id, .. }
            | Self::Update { id, .. }
            | Self::Delete { id, .. }
            | Self::Get { id, .. } => id,
        }
    }
}

/// `HashMap`-backed [`OrderRepository`] that records every call.
///
/// Documents are keyed by `(partition_key, id)`. `update_order` and
/// `delete_order` report [`RepositoryError::NotFound`] for absent documents,
/// like the real document store.
///
/// The repository also tracks how many calls are in flight at once, so tests
/// can assert that the pipeline never overlaps repository work.
#[derive(Clone, Debug, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<(String, String), Order>>>,
    calls: Arc<RwLock<Vec<RepositoryCall>>>,
    failures: Arc<RwLock<HashMap<String, RepositoryError>>>,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl InMemoryOrderRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `delay`.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Seed an order.
    #[must_use]
    pub fn with_order(self, order: Order) -> Self {
        self.orders.write().unwrap().insert(
            (order.product_category.clone(), order.id.clone()),
            order,
        );
        self
    }

    /// Fail every call addressing `id` with `error`.
    pub fn fail_on(&self, id: &str, error: RepositoryError) {
        self.failures.write().unwrap().insert(id.to_string(), error);
    }

    /// Stored order, if any.
    #[must_use]
    pub fn order(&self, id: &str, partition_key: &str) -> Option<Order> {
        self.orders
            .read()
            .unwrap()
            .get(&(partition_key.to_string(), id.to_string()))
            .cloned()
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.read().unwrap().len()
    }

    /// Whether no orders are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.read().unwrap().is_empty()
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RepositoryCall> {
        self.calls.read().unwrap().clone()
    }

    /// Highest number of calls that were ever in flight at the same time.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: RepositoryCall) -> Result<(), RepositoryError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let failure = self.failures.read().unwrap().get(call.id()).cloned();
        self.calls.write().unwrap().push(call);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        failure.map_or(Ok(()), Err)
    }

    fn key_of(key: OrderKey<'_>) -> (String, String) {
        (key.partition_key().to_string(), key.id().to_string())
    }
}

impl OrderRepository for InMemoryOrderRepository {
    fn create_order<'a>(&'a self, order: &'a Order) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(async move {
            let key = order.key()?;
            self.enter(RepositoryCall::Create {
                id: key.id().to_string(),
                partition_key: key.partition_key().to_string(),
            })
            .await?;
            self.orders
                .write()
                .unwrap()
                .insert(Self::key_of(key), order.clone());
            Ok(())
        })
    }

    fn update_order<'a>(&'a self, order: &'a Order) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(async move {
            let key = order.key()?;
            self.enter(RepositoryCall::Update {
                id: key.id().to_string(),
                partition_key: key.partition_key().to_string(),
            })
            .await?;
            let mut orders = self.orders.write().unwrap();
            match orders.get_mut(&Self::key_of(key)) {
                Some(existing) => {
                    *existing = order.clone();
                    Ok(())
                }
                None => Err(RepositoryError::NotFound {
                    id: key.id().to_string(),
                    partition_key: key.partition_key().to_string(),
                }),
            }
        })
    }

    fn delete_order<'a>(
        &'a self,
        id: &'a str,
        partition_key: &'a str,
    ) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(async move {
            let key = OrderKey::new(id, partition_key)?;
            self.enter(RepositoryCall::Delete {
                id: id.to_string(),
                partition_key: partition_key.to_string(),
            })
            .await?;
            self.orders
                .write()
                .unwrap()
                .remove(&Self::key_of(key))
                .map(|_| ())
                .ok_or_else(|| RepositoryError::NotFound {
                    id: id.to_string(),
                    partition_key: partition_key.to_string(),
                })
        })
    }

    fn get_order<'a>(
        &'a self,
        id: &'a str,
        partition_key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Order>, RepositoryError>> {
        Box::pin(async move {
            let key = OrderKey::new(id, partition_key)?;
            self.enter(RepositoryCall::Get {
                id: id.to_string(),
                partition_key: partition_key.to_string(),
            })
            .await?;
            Ok(self.orders.read().unwrap().get(&Self::key_of(key)).cloned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_core::order::status;

    fn order(id: &str, state: &str) -> Order {
        Order::new(id, "books", "p-1", "c-1", state)
    }

    #[tokio::test]
    async fn create_update_delete_lifecycle() {
        let repo = InMemoryOrderRepository::new();

        repo.create_order(&order("A", status::PENDING)).await.unwrap();
        repo.update_order(&order("A", status::SHIPPED)).await.unwrap();
        assert_eq!(repo.order("A", "books").unwrap().status, status::SHIPPED);

        repo.delete_order("A", "books").await.unwrap();
        assert!(repo.is_empty());
        assert_eq!(repo.calls().len(), 3);
    }

    #[tokio::test]
    async fn update_of_missing_order_is_not_found() {
        let repo = InMemoryOrderRepository::new();
        let result = repo.update_order(&order("X", status::SHIPPED)).await;
        assert!(matches!(result, Err(RepositoryError::NotFound { id, .. }) if id == "X"));
    }

    #[tokio::test]
    async fn missing_partition_key_is_rejected_before_any_call() {
        let repo = InMemoryOrderRepository::new();
        let result = repo.create_order(&Order::new("A", "", "p", "c", "s")).await;
        assert!(matches!(result, Err(RepositoryError::MissingPartitionKey { .. })));
        assert!(repo.calls().is_empty());
    }

    #[tokio::test]
    async fn injected_failure_is_returned() {
        let repo = InMemoryOrderRepository::new();
        repo.fail_on("A", RepositoryError::Backend("down".to_string()));

        let result = repo.create_order(&order("A", status::PENDING)).await;

        assert_eq!(result, Err(RepositoryError::Backend("down".to_string())));
        assert!(repo.is_empty());
    }
}
