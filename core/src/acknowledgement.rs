//! Outbound acknowledgement events.
//!
//! One acknowledgement is published for every inbound message the dispatch
//! loop handles, whatever the outcome:
//!
//! ```json
//! { "message_id": "…uuid…", "event_id": "evt-42", "error": null, "status": "Processed" }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Outcome carried by an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckStatus {
    /// The repository operation succeeded.
    Processed,
    /// Decoding or the repository operation failed.
    Failed,
    /// The event type is not one the pipeline handles.
    Unsupported,
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Processed => "Processed",
            Self::Failed => "Failed",
            Self::Unsupported => "Unsupported",
        };
        f.write_str(s)
    }
}

/// Confirmation (successful or not) that an inbound event was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// Fresh id of this acknowledgement message.
    pub message_id: String,
    /// Id of the event being acknowledged.
    pub event_id: String,
    /// Failure detail; `None` when processed.
    pub error: Option<String>,
    /// Outcome.
    pub status: AckStatus,
}

impl Acknowledgement {
    fn new(event_id: impl Into<String>, status: AckStatus, error: Option<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            event_id: event_id.into(),
            error,
            status,
        }
    }

    /// The event was applied.
    #[must_use]
    pub fn processed(event_id: impl Into<String>) -> Self {
        Self::new(event_id, AckStatus::Processed, None)
    }

    /// The event could not be decoded or applied.
    #[must_use]
    pub fn failed(event_id: impl Into<String>, error: impl fmt::Display) -> Self {
        Self::new(event_id, AckStatus::Failed, Some(error.to_string()))
    }

    /// The event type is not handled.
    #[must_use]
    pub fn unsupported(event_id: impl Into<String>, event_type: &str) -> Self {
        Self::new(
            event_id,
            AckStatus::Unsupported,
            Some(format!("Unsupported event type '{event_type}'")),
        )
    }

    /// Whether this acknowledgement reports success.
    #[must_use]
    pub const fn is_processed(&self) -> bool {
        matches!(self.status, AckStatus::Processed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn processed_serializes_null_error() {
        let ack = Acknowledgement::processed("evt-1");
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["event_id"], "evt-1");
        assert_eq!(json["status"], "Processed");
        assert!(json["error"].is_null());
        assert!(Uuid::parse_str(json["message_id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn failed_carries_detail() {
        let ack = Acknowledgement::failed("evt-2", "boom");
        assert_eq!(ack.status, AckStatus::Failed);
        assert_eq!(ack.error.as_deref(), Some("boom"));
        assert!(!ack.is_processed());
    }

    #[test]
    fn unsupported_names_the_type() {
        let ack = Acknowledgement::unsupported("evt-3", "archive_order");
        assert_eq!(ack.status.to_string(), "Unsupported");
        assert!(ack.error.unwrap().contains("archive_order"));
    }
}
