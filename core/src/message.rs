//! The unit handed from partition workers to the dispatch loop.

use crate::event::{EventError, OrderEvent};
use crate::stream::{PartitionId, RawMessage};
use uuid::Uuid;

/// One received record, decoded or not.
///
/// Created by a partition worker and consumed exactly once by the dispatch
/// loop. A record that fails to decode still becomes an `InboundMessage`
/// carrying the error, so it is acknowledged as failed instead of vanishing.
///
/// `partition_id` and `sequence` are carried for log correlation only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Correlation id for tracing this record end to end.
    pub operation_id: String,
    /// Partition the record came from.
    pub partition_id: PartitionId,
    /// Position of the record in its partition.
    pub sequence: i64,
    /// The decoded event, or why it could not be decoded.
    pub event: Result<OrderEvent, EventError>,
}

impl InboundMessage {
    /// Decode a raw record and assign it a fresh operation id.
    #[must_use]
    pub fn decode(raw: &RawMessage) -> Self {
        Self {
            operation_id: Uuid::new_v4().to_string(),
            partition_id: raw.partition_id.clone(),
            sequence: raw.sequence,
            event: OrderEvent::decode(&raw.body),
        }
    }

    /// The decode error, if decoding failed.
    #[must_use]
    pub fn decode_error(&self) -> Option<&EventError> {
        self.event.as_ref().err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undecodable_record_keeps_its_error() {
        let msg = InboundMessage::decode(&RawMessage::new("0", 7, "not-json"));
        assert_eq!(msg.partition_id, "0");
        assert_eq!(msg.sequence, 7);
        assert!(matches!(msg.decode_error(), Some(EventError::Decode(_))));
    }

    #[test]
    fn operation_ids_are_unique() {
        let raw = RawMessage::new("0", 1, "not-json");
        let a = InboundMessage::decode(&raw);
        let b = InboundMessage::decode(&raw);
        assert_ne!(a.operation_id, b.operation_id);
    }
}
