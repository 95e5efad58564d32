//! Builders for inbound record bodies.

use chrono::{DateTime, Utc};
use orderflow_core::event::{EventType, OrderEvent};
use orderflow_core::order::Order;
use orderflow_core::stream::RawMessage;

/// Fixed timestamp used by every fixture (2025-01-01 00:00:00 UTC).
#[must_use]
pub fn fixed_timestamp() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

/// Encode an envelope of any type.
#[must_use]
pub fn event_body(event_type: impl Into<EventType>, event_id: &str, order: &Order) -> Vec<u8> {
    OrderEvent::new(event_type, event_id, fixed_timestamp(), order.clone())
        .encode()
        .unwrap_or_default()
}

/// `create_order` body.
#[must_use]
pub fn create_order(event_id: &str, order: &Order) -> Vec<u8> {
    event_body(EventType::CreateOrder, event_id, order)
}

/// `update_order` body.
#[must_use]
pub fn update_order(event_id: &str, order: &Order) -> Vec<u8> {
    event_body(EventType::UpdateOrder, event_id, order)
}

/// `delete_order` body.
#[must_use]
pub fn delete_order(event_id: &str, order: &Order) -> Vec<u8> {
    event_body(EventType::DeleteOrder, event_id, order)
}

/// Turn bodies into raw records of one partition, numbered from `first_sequence`.
#[must_use]
pub fn records(partition_id: &str, first_sequence: i64, bodies: Vec<Vec<u8>>) -> Vec<RawMessage> {
    bodies
        .into_iter()
        .zip(first_sequence..)
        .map(|(body, sequence)| RawMessage::new(partition_id, sequence, body))
        .collect()
}
