//! The inbound event envelope.
//!
//! Every record on the inbound stream is a JSON object:
//!
//! ```json
//! {
//!   "Type": "create_order",
//!   "EventID": "evt-42",
//!   "Timestamp": "2024-05-01T10:00:00Z",
//!   "OrderPayload": {
//!     "id": "A",
//!     "ProductCategory": "books",
//!     "productId": "p-1",
//!     "customerId": "c-1",
//!     "status": "Pending"
//!   }
//! }
//! ```
//!
//! Decoding is strict about the envelope (all four fields must be present and
//! well-typed) and lenient about the order payload. An unknown `Type` is not a
//! decode failure; it decodes to [`EventType::Unrecognized`].
//!
//! # Example
//!
//! ```
//! use orderflow_core::event::{EventType, OrderEvent};
//!
//! let body = br#"{
//!     "Type": "delete_order",
//!     "EventID": "evt-1",
//!     "Timestamp": "2024-05-01T10:00:00Z",
//!     "OrderPayload": { "id": "A", "ProductCategory": "books" }
//! }"#;
//!
//! let event = OrderEvent::decode(body).unwrap();
//! assert_eq!(event.event_type, EventType::DeleteOrder);
//! assert_eq!(event.order.id, "A");
//! ```

use crate::order::Order;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error types for envelope encoding and decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The record body is not a valid event envelope.
    #[error("Failed to decode event: {0}")]
    Decode(String),

    /// The record has no body at all.
    #[error("Message has no payload")]
    EmptyPayload,

    /// Failed to encode an envelope.
    #[error("Failed to encode event: {0}")]
    Encode(String),
}

/// The operation an event asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// `create_order`
    CreateOrder,
    /// `update_order`
    UpdateOrder,
    /// `delete_order`
    DeleteOrder,
    /// Any other value, kept verbatim.
    Unrecognized(String),
}

impl EventType {
    /// Wire name of this event type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreateOrder => "create_order",
            Self::UpdateOrder => "update_order",
            Self::DeleteOrder => "delete_order",
            Self::Unrecognized(name) => name,
        }
    }

    /// Whether this is one of the three supported operations.
    #[must_use]
    pub const fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "create_order" => Self::CreateOrder,
            "update_order" => Self::UpdateOrder,
            "delete_order" => Self::DeleteOrder,
            _ => Self::Unrecognized(value),
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        match value {
            EventType::Unrecognized(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order event envelope, the unit of serialization on the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Requested operation.
    #[serde(rename = "Type")]
    pub event_type: EventType,

    /// Producer-assigned event identifier, echoed in the acknowledgement.
    #[serde(rename = "EventID")]
    pub event_id: String,

    /// When the producer emitted the event (RFC 3339 on the wire).
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,

    /// The order the operation applies to.
    #[serde(rename = "OrderPayload")]
    pub order: Order,
}

impl OrderEvent {
    /// Create a new envelope.
    #[must_use]
    pub fn new(
        event_type: impl Into<EventType>,
        event_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        order: Order,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            event_id: event_id.into(),
            timestamp,
            order,
        }
    }

    /// Decode an envelope from a raw record body.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::EmptyPayload`] for an empty body and
    /// [`EventError::Decode`] if the body is not a well-formed envelope.
    pub fn decode(body: &[u8]) -> Result<Self, EventError> {
        if body.is_empty() {
            return Err(EventError::EmptyPayload);
        }
        serde_json::from_slice(body).map_err(|e| EventError::Decode(e.to_string()))
    }

    /// Encode this envelope to its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::Encode(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::order::status;
    use proptest::prelude::*;

    fn body(event_type: &str) -> String {
        format!(
            r#"{{
                "Type": "{event_type}",
                "EventID": "evt-1",
                "Timestamp": "2024-05-01T10:00:00.123456789+02:00",
                "OrderPayload": {{
                    "id": "A",
                    "ProductCategory": "books",
                    "productId": "p-1",
                    "customerId": "c-1",
                    "status": "Pending"
                }}
            }}"#
        )
    }

    #[test]
    fn decodes_all_known_types() {
        for (name, expected) in [
            ("create_order", EventType::CreateOrder),
            ("update_order", EventType::UpdateOrder),
            ("delete_order", EventType::DeleteOrder),
        ] {
            let event = OrderEvent::decode(body(name).as_bytes()).unwrap();
            assert_eq!(event.event_type, expected);
            assert_eq!(event.event_id, "evt-1");
            assert_eq!(event.order, Order::new("A", "books", "p-1", "c-1", status::PENDING));
        }
    }

    #[test]
    fn timestamp_offset_is_normalized_to_utc() {
        let event = OrderEvent::decode(body("create_order").as_bytes()).unwrap();
        assert_eq!(event.timestamp.to_rfc3339(), "2024-05-01T08:00:00.123456789+00:00");
    }

    #[test]
    fn unknown_type_is_not_a_decode_error() {
        let event = OrderEvent::decode(body("archive_order").as_bytes()).unwrap();
        assert_eq!(event.event_type, EventType::Unrecognized("archive_order".to_string()));
        assert!(!event.event_type.is_recognized());
    }

    #[test]
    fn non_json_body_fails() {
        let err = OrderEvent::decode(b"not-json").unwrap_err();
        assert!(matches!(err, EventError::Decode(_)));
    }

    #[test]
    fn empty_body_fails() {
        assert_eq!(OrderEvent::decode(b"").unwrap_err(), EventError::EmptyPayload);
    }

    #[test]
    fn missing_envelope_field_fails() {
        let body = br#"{"Type": "create_order", "Timestamp": "2024-05-01T10:00:00Z", "OrderPayload": {}}"#;
        assert!(matches!(OrderEvent::decode(body), Err(EventError::Decode(_))));
    }

    #[test]
    fn bad_timestamp_fails() {
        let body = br#"{"Type": "create_order", "EventID": "e", "Timestamp": "yesterday", "OrderPayload": {}}"#;
        assert!(matches!(OrderEvent::decode(body), Err(EventError::Decode(_))));
    }

    #[test]
    fn missing_payload_fields_default_to_empty() {
        let body = br#"{"Type": "delete_order", "EventID": "e", "Timestamp": "2024-05-01T10:00:00Z", "OrderPayload": {"id": "A"}}"#;
        let event = OrderEvent::decode(body).unwrap();
        assert_eq!(event.order.id, "A");
        assert!(event.order.product_category.is_empty());
    }

    #[test]
    fn encode_uses_wire_names() {
        let event = OrderEvent::decode(body("update_order").as_bytes()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();
        assert_eq!(json["Type"], "update_order");
        assert_eq!(json["EventID"], "evt-1");
        assert_eq!(json["OrderPayload"]["ProductCategory"], "books");
    }

    proptest! {
        #[test]
        fn event_type_name_survives_string_conversion(name in "[a-z_]{1,24}") {
            let parsed = EventType::from(name.clone());
            prop_assert_eq!(String::from(parsed), name);
        }
    }
}
