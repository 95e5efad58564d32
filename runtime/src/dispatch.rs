//! The single consumer of the merged channel.
//!
//! The dispatch loop is the only caller of the [`OrderRepository`]. For every
//! message it routes the event to one repository method (or none), then
//! publishes exactly one [`Acknowledgement`] carrying the outcome:
//!
//! | Message                 | Repository call       | Acknowledgement |
//! |-------------------------|-----------------------|-----------------|
//! | decode error            | none                  | `Failed`        |
//! | `create_order`          | `create_order(order)` | `Processed` / `Failed` |
//! | `update_order`          | `update_order(order)` | `Processed` / `Failed` |
//! | `delete_order`          | `delete_order(id, pk)`| `Processed` / `Failed` |
//! | anything else           | none                  | `Unsupported`   |
//!
//! Nothing is retried and no single message can stop the loop.
//!
//! # Shutdown
//!
//! Cancellation is checked between messages, never during one. Once
//! cancelled the loop stops the adapter's workers, keeps handling whatever is
//! already in the channel for up to the drain grace period, then closes the
//! adapter and returns.

use crate::adapter::AdapterHandle;
use crate::publisher::Publisher;
use crate::telemetry::Telemetry;
use orderflow_core::acknowledgement::Acknowledgement;
use orderflow_core::event::EventType;
use orderflow_core::message::InboundMessage;
use orderflow_core::repository::OrderRepository;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Default time allowed for draining the channel after cancellation.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Where the dispatch loop is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Waiting for the next message.
    Listening,
    /// Applying a message to the repository.
    Routing,
    /// Publishing the acknowledgement.
    Acknowledging,
    /// Cancelled; handling what is left in the channel.
    Draining,
    /// Adapter closed; the loop has returned.
    Terminated,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Listening => "listening",
            Self::Routing => "routing",
            Self::Acknowledging => "acknowledging",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Counters of one dispatch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Messages handled before cancellation.
    pub handled: u64,
    /// Messages handled while draining.
    pub drained: u64,
    /// Acknowledgements that could not be published.
    pub publish_failures: u64,
    /// Whether the drain grace period ran out with messages possibly left.
    pub drain_timed_out: bool,
}

/// Routes inbound messages to the repository and acknowledges them.
pub struct Dispatcher {
    repository: Arc<dyn OrderRepository>,
    publisher: Publisher,
    telemetry: Telemetry,
    drain_grace: Duration,
    state: DispatchState,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(repository: Arc<dyn OrderRepository>, publisher: Publisher, telemetry: Telemetry) -> Self {
        Self {
            repository,
            publisher,
            telemetry,
            drain_grace: DEFAULT_DRAIN_GRACE,
            state: DispatchState::Listening,
        }
    }

    /// Set how long to keep draining the channel after cancellation.
    #[must_use]
    pub const fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> DispatchState {
        self.state
    }

    fn transition(&mut self, next: DispatchState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Dispatch state change");
            self.state = next;
        }
    }

    /// Consume `messages` until `cancel` fires or the channel closes, then
    /// drain and close the adapter.
    pub async fn run(
        &mut self,
        mut messages: mpsc::Receiver<InboundMessage>,
        adapter: &AdapterHandle,
        cancel: CancellationToken,
    ) -> DispatchSummary {
        let span = self.telemetry.dispatch_span();
        async {
            let mut summary = DispatchSummary::default();
            info!("Dispatch loop listening");

            loop {
                self.transition(DispatchState::Listening);
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        info!("Dispatch loop received shutdown");
                        break;
                    }
                    next = messages.recv() => next,
                };
                let Some(message) = next else {
                    warn!("Dispatch channel closed; all partition workers have exited");
                    break;
                };
                if !self.process(message).await {
                    summary.publish_failures += 1;
                }
                summary.handled += 1;
            }

            self.transition(DispatchState::Draining);
            adapter.cancel();
            let deadline = tokio::time::sleep(self.drain_grace);
            tokio::pin!(deadline);
            loop {
                let next = tokio::select! {
                    biased;
                    next = messages.recv() => next,
                    () = &mut deadline => {
                        warn!(grace_ms = self.drain_grace.as_millis(), "Drain grace period elapsed");
                        summary.drain_timed_out = true;
                        break;
                    }
                };
                let Some(message) = next else {
                    break;
                };
                if !self.process(message).await {
                    summary.publish_failures += 1;
                }
                summary.drained += 1;
            }
            drop(messages);

            if let Err(e) = adapter.close().await {
                error!(error = %e, "Failed to close stream adapter");
            }
            self.transition(DispatchState::Terminated);
            info!(
                handled = summary.handled,
                drained = summary.drained,
                publish_failures = summary.publish_failures,
                "Dispatch loop terminated"
            );
            summary
        }
        .instrument(span)
        .await
    }

    /// Route one message and publish its acknowledgement.
    ///
    /// Returns whether the acknowledgement was published.
    pub async fn process(&mut self, message: InboundMessage) -> bool {
        let span = info_span!(
            "message",
            operation_id = %message.operation_id,
            partition_id = %message.partition_id,
            sequence = message.sequence,
        );
        async {
            let previous = self.state;
            self.transition(DispatchState::Routing);
            let ack = self.route(&message).await;

            self.transition(DispatchState::Acknowledging);
            let published = match self.publisher.publish(&ack).await {
                Ok(()) => true,
                Err(e) => {
                    error!(event_id = %ack.event_id, status = %ack.status, error = %e, "Failed to publish acknowledgement");
                    false
                }
            };
            self.transition(previous);
            published
        }
        .instrument(span)
        .await
    }

    /// Apply one message to the repository and build its acknowledgement.
    pub async fn route(&self, message: &InboundMessage) -> Acknowledgement {
        let event = match &message.event {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "Acknowledging undecodable record as failed");
                return Acknowledgement::failed(&message.operation_id, err);
            }
        };

        let order = &event.order;
        let started = Instant::now();
        let result = match &event.event_type {
            EventType::CreateOrder => self.repository.create_order(order).await,
            EventType::UpdateOrder => self.repository.update_order(order).await,
            EventType::DeleteOrder => {
                self.repository
                    .delete_order(&order.id, &order.product_category)
                    .await
            }
            EventType::Unrecognized(name) => {
                warn!(event_id = %event.event_id, event_type = %name, "Unsupported event type");
                return Acknowledgement::unsupported(&event.event_id, name);
            }
        };
        let elapsed = started.elapsed();
        let operation = event.event_type.as_str();
        self.telemetry.record_repository(operation, result.is_ok(), elapsed);

        match result {
            Ok(()) => {
                debug!(
                    event_id = %event.event_id,
                    event_type = operation,
                    order_id = %order.id,
                    elapsed_ms = elapsed.as_millis(),
                    "Event applied"
                );
                Acknowledgement::processed(&event.event_id)
            }
            Err(err) => {
                error!(
                    event_id = %event.event_id,
                    event_type = operation,
                    order_id = %order.id,
                    error = %err,
                    "Repository operation failed"
                );
                Acknowledgement::failed(&event.event_id, err)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use orderflow_core::acknowledgement::AckStatus;
    use orderflow_core::event::OrderEvent;
    use orderflow_core::order::Order;
    use orderflow_core::repository::RepositoryError;
    use orderflow_core::stream::RawMessage;
    use orderflow_testing::{InMemoryEventSink, InMemoryOrderRepository, RepositoryCall, fixtures};

    fn dispatcher(repo: &InMemoryOrderRepository, sink: &InMemoryEventSink) -> Dispatcher {
        let telemetry = Telemetry::new("test");
        Dispatcher::new(
            Arc::new(repo.clone()),
            Publisher::new(Arc::new(sink.clone()), telemetry.clone()),
            telemetry,
        )
    }

    fn message(body: Vec<u8>) -> InboundMessage {
        InboundMessage::decode(&RawMessage::new("0", 1, body))
    }

    fn order(id: &str) -> Order {
        Order::new(id, "books", "p-1", "c-1", "Pending")
    }

    #[tokio::test]
    async fn create_calls_repository_with_exact_payload() {
        let repo = InMemoryOrderRepository::new();
        let sink = InMemoryEventSink::new();
        let mut dispatcher = dispatcher(&repo, &sink);

        assert!(dispatcher.process(message(fixtures::create_order("e1", &order("A")))).await);

        assert_eq!(repo.order("A", "books"), Some(order("A")));
        let acks = sink.acknowledgements();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].event_id, "e1");
        assert_eq!(acks[0].status, AckStatus::Processed);
        assert_eq!(acks[0].error, None);
        assert_eq!(dispatcher.state(), DispatchState::Listening);
    }

    #[tokio::test]
    async fn delete_uses_id_and_product_category() {
        let repo = InMemoryOrderRepository::new().with_order(order("A"));
        let sink = InMemoryEventSink::new();
        let mut dispatcher = dispatcher(&repo, &sink);

        dispatcher.process(message(fixtures::delete_order("e1", &order("A")))).await;

        assert_eq!(
            repo.calls(),
            vec![RepositoryCall::Delete {
                id: "A".to_string(),
                partition_key: "books".to_string()
            }]
        );
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn decode_failure_never_reaches_repository() {
        let repo = InMemoryOrderRepository::new();
        let sink = InMemoryEventSink::new();
        let mut dispatcher = dispatcher(&repo, &sink);
        let msg = message(b"not-json".to_vec());
        let operation_id = msg.operation_id.clone();

        dispatcher.process(msg).await;

        assert!(repo.calls().is_empty());
        let acks = sink.acknowledgements();
        assert_eq!(acks[0].status, AckStatus::Failed);
        assert_eq!(acks[0].event_id, operation_id);
        assert!(acks[0].error.is_some());
    }

    #[tokio::test]
    async fn unrecognized_type_is_acknowledged_unsupported() {
        let repo = InMemoryOrderRepository::new();
        let sink = InMemoryEventSink::new();
        let mut dispatcher = dispatcher(&repo, &sink);

        dispatcher
            .process(message(fixtures::event_body("archive_order", "e7", &order("A"))))
            .await;

        assert!(repo.calls().is_empty());
        let acks = sink.acknowledgements();
        assert_eq!(acks[0].status, AckStatus::Unsupported);
        assert_eq!(acks[0].event_id, "e7");
    }

    #[tokio::test]
    async fn repository_failure_is_acknowledged_failed() {
        let repo = InMemoryOrderRepository::new();
        repo.fail_on("B", RepositoryError::Backend("throttled".to_string()));
        let sink = InMemoryEventSink::new();
        let mut dispatcher = dispatcher(&repo, &sink);

        dispatcher.process(message(fixtures::create_order("evt-b", &order("B")))).await;
        dispatcher.process(message(fixtures::create_order("evt-c", &order("C")))).await;

        let acks = sink.acknowledgements();
        assert_eq!(acks[0].event_id, "evt-b");
        assert_eq!(acks[0].status, AckStatus::Failed);
        assert!(acks[0].error.as_deref().unwrap().contains("throttled"));
        assert_eq!(acks[1].status, AckStatus::Processed);
        assert!(repo.order("C", "books").is_some());
    }

    #[tokio::test]
    async fn missing_partition_key_is_a_failed_acknowledgement() {
        let repo = InMemoryOrderRepository::new();
        let sink = InMemoryEventSink::new();
        let mut dispatcher = dispatcher(&repo, &sink);
        let keyless = Order::new("A", "", "p", "c", "Pending");

        dispatcher.process(message(fixtures::create_order("e1", &keyless))).await;

        let acks = sink.acknowledgements();
        assert_eq!(acks[0].status, AckStatus::Failed);
        assert!(acks[0].error.as_deref().unwrap().contains("partition key"));
    }

    #[tokio::test]
    async fn publish_failure_does_not_stop_processing() {
        let repo = InMemoryOrderRepository::new();
        let sink = InMemoryEventSink::new();
        sink.set_fail_sends(true);
        let mut dispatcher = dispatcher(&repo, &sink);

        let published = dispatcher.process(message(fixtures::create_order("e1", &order("A")))).await;

        assert!(!published);
        assert!(repo.order("A", "books").is_some());
        assert_eq!(dispatcher.state(), DispatchState::Listening);
    }

    #[test]
    fn event_payload_maps_without_transformation() {
        let original = Order::new("Z", "garden", "p-9", "c-4", "Shipped");
        let decoded = OrderEvent::decode(&fixtures::update_order("e", &original)).unwrap();
        assert_eq!(decoded.order, original);
    }
}
