//! The order document.
//!
//! Orders are stored in a document store partitioned by product category.
//! The field names on the wire are fixed by upstream producers, which is why
//! they mix casing (`ProductCategory` next to `productId`).

use crate::repository::RepositoryError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known order status values.
///
/// Status is free-form on the wire; these are the values the upstream
/// order flows are known to produce.
pub mod status {
    /// Order accepted but not yet fulfilled.
    pub const PENDING: &str = "Pending";
    /// Order handed to the carrier.
    pub const SHIPPED: &str = "Shipped";
    /// Order received by the customer.
    pub const DELIVERED: &str = "Delivered";
    /// Order cancelled before fulfilment.
    pub const CANCELLED: &str = "Cancelled";
}

/// An order document.
///
/// Absent payload fields decode to the empty string. Whether that is
/// acceptable is decided where the order meets the document store
/// (see [`Order::key`]), not at decode time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier, unique within its partition.
    #[serde(default)]
    pub id: String,

    /// Product category; the document store partition key.
    #[serde(rename = "ProductCategory", default)]
    pub product_category: String,

    /// Ordered product.
    #[serde(rename = "productId", default)]
    pub product_id: String,

    /// Ordering customer.
    #[serde(rename = "customerId", default)]
    pub customer_id: String,

    /// Order status (see [`status`]).
    #[serde(default)]
    pub status: String,
}

impl Order {
    /// Create a new order.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        product_category: impl Into<String>,
        product_id: impl Into<String>,
        customer_id: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            product_category: product_category.into(),
            product_id: product_id.into(),
            customer_id: customer_id.into(),
            status: status.into(),
        }
    }

    /// The document store key for this order.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::MissingPartitionKey`] if the product category
    /// is empty and [`RepositoryError::MissingId`] if the id is empty.
    pub fn key(&self) -> Result<OrderKey<'_>, RepositoryError> {
        OrderKey::new(&self.id, &self.product_category)
    }
}

/// Borrowed (id, partition key) pair addressing one order document.
///
/// Both parts are guaranteed non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderKey<'a> {
    id: &'a str,
    partition_key: &'a str,
}

impl<'a> OrderKey<'a> {
    /// Validate and build a key.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::MissingPartitionKey`] for an empty partition
    /// key and [`RepositoryError::MissingId`] for an empty id.
    pub fn new(id: &'a str, partition_key: &'a str) -> Result<Self, RepositoryError> {
        if partition_key.trim().is_empty() {
            return Err(RepositoryError::MissingPartitionKey {
                id: id.to_string(),
            });
        }
        if id.trim().is_empty() {
            return Err(RepositoryError::MissingId);
        }
        Ok(Self { id, partition_key })
    }

    /// Order id.
    #[must_use]
    pub const fn id(&self) -> &'a str {
        self.id
    }

    /// Partition key (product category).
    #[must_use]
    pub const fn partition_key(&self) -> &'a str {
        self.partition_key
    }
}

impl fmt::Display for OrderKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition_key, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_requires_partition_key() {
        let order = Order::new("A", "", "p-1", "c-1", status::PENDING);
        assert!(matches!(
            order.key(),
            Err(RepositoryError::MissingPartitionKey { id }) if id == "A"
        ));
    }

    #[test]
    fn key_requires_id() {
        let order = Order::new("  ", "books", "p-1", "c-1", status::PENDING);
        assert!(matches!(order.key(), Err(RepositoryError::MissingId)));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn key_exposes_parts() {
        let order = Order::new("A", "books", "p-1", "c-1", status::PENDING);
        let key = order.key().unwrap();
        assert_eq!(key.id(), "A");
        assert_eq!(key.partition_key(), "books");
        assert_eq!(key.to_string(), "books/A");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn wire_field_names_are_preserved() {
        let order = Order::new("A", "books", "p-1", "c-1", status::SHIPPED);
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["id"], "A");
        assert_eq!(json["ProductCategory"], "books");
        assert_eq!(json["productId"], "p-1");
        assert_eq!(json["customerId"], "c-1");
        assert_eq!(json["status"], "Shipped");
    }
}
