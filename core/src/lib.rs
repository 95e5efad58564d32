//! # Orderflow Core
//!
//! Domain types and capability traits for the order event ingestion pipeline.
//!
//! The pipeline consumes order events (`create_order`, `update_order`,
//! `delete_order`) from a partitioned, durable event stream, applies them to a
//! document store, and publishes an acknowledgement for every event it sees.
//! This crate holds everything the pipeline and its adapters agree on:
//!
//! - **Domain**: [`order::Order`], the [`event::OrderEvent`] envelope, and the
//!   outbound [`acknowledgement::Acknowledgement`]
//! - **Pipeline messages**: [`message::InboundMessage`], one per received record
//! - **Capabilities**: one stable, object-safe trait per external system
//!   ([`repository::OrderRepository`], [`checkpoint::CheckpointStore`],
//!   [`stream::EventStream`], [`sink::EventSink`])
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   batch    ┌──────────────────┐
//! │ EventStream  │──────────▶ │ Partition Worker │ x N (one per partition)
//! └──────────────┘            └────────┬─────────┘
//!        ▲                             │ InboundMessage (bounded channel)
//!        │ checkpoint                  ▼
//! ┌──────┴───────┐            ┌──────────────────┐      ┌─────────────────┐
//! │CheckpointStore│           │  Dispatch Loop   │─────▶│ OrderRepository │
//! └──────────────┘            └────────┬─────────┘      └─────────────────┘
//!                                      │ Acknowledgement
//!                                      ▼
//!                             ┌──────────────────┐
//!                             │    EventSink     │
//!                             └──────────────────┘
//! ```
//!
//! ## Dyn Compatibility
//!
//! Every capability trait returns [`BoxFuture`] instead of using `async fn` so
//! that implementations can be injected as `Arc<dyn Trait>` at process startup.

pub use chrono::{DateTime, Utc};
pub use futures::future::BoxFuture;

pub mod acknowledgement;
pub mod checkpoint;
pub mod event;
pub mod message;
pub mod order;
pub mod repository;
pub mod sink;
pub mod stream;

pub use acknowledgement::{AckStatus, Acknowledgement};
pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
pub use event::{EventError, EventType, OrderEvent};
pub use message::InboundMessage;
pub use order::{Order, OrderKey};
pub use repository::{OrderRepository, RepositoryError};
pub use sink::{EventSink, OutboundRecord, PublishError, SinkError};
pub use stream::{EventStream, PartitionClient, PartitionId, RawMessage, StreamError};
