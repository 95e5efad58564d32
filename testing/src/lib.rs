//! # Orderflow Testing
//!
//! In-memory implementations of every pipeline capability, for fast and
//! deterministic tests:
//!
//! - [`InMemoryEventStream`]: scripted partitions, records every receive call
//! - [`InMemoryCheckpointStore`]: monotonic checkpoints, records every advance
//! - [`InMemoryOrderRepository`]: `HashMap` document store, records every call,
//!   injectable failures
//! - [`InMemoryEventSink`]: captures published records
//!
//! plus [`fixtures`] for building event bodies.
//!
//! ## Example
//!
//! ```
//! use orderflow_testing::{fixtures, InMemoryEventStream};
//! use orderflow_core::order::Order;
//!
//! let order = Order::new("A", "books", "p-1", "c-1", "Pending");
//! let stream = InMemoryEventStream::new()
//!     .with_partition("0", vec![vec![fixtures::create_order("evt-1", &order)]]);
//! assert_eq!(stream.partition_ids(), vec!["0".to_string()]);
//! ```

pub mod checkpoint;
pub mod fixtures;
pub mod repository;
pub mod sink;
pub mod stream;

pub use checkpoint::InMemoryCheckpointStore;
pub use repository::{InMemoryOrderRepository, RepositoryCall};
pub use sink::InMemoryEventSink;
pub use stream::{InMemoryEventStream, ScriptStep};

/// Install a test tracing subscriber writing to the test harness output.
///
/// Safe to call from many tests; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
