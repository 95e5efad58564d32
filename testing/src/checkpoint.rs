//! In-memory checkpoint store.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only panics on a poisoned lock

use chrono::Utc;
use futures::future::BoxFuture;
use orderflow_core::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory [`CheckpointStore`] that keeps checkpoints monotonic and
/// records every `advance` call.
///
/// # Example
///
/// ```
/// use orderflow_testing::InMemoryCheckpointStore;
/// use orderflow_core::checkpoint::CheckpointStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryCheckpointStore::new();
/// store.advance("0", 10).await?;
/// store.advance("0", 7).await?;
///
/// assert_eq!(store.sequence("0"), Some(10));
/// assert_eq!(store.advances("0"), vec![10, 7]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<String, Checkpoint>>>,
    advances: Arc<RwLock<Vec<(String, i64)>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a checkpoint, as if a previous run had written it.
    #[must_use]
    pub fn with_checkpoint(self, partition_id: &str, sequence: i64) -> Self {
        self.checkpoints.write().unwrap().insert(
            partition_id.to_string(),
            Checkpoint {
                partition_id: partition_id.to_string(),
                sequence,
                updated_at: Utc::now(),
            },
        );
        self
    }

    /// Make every subsequent `advance` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current checkpoint sequence of a partition.
    #[must_use]
    pub fn sequence(&self, partition_id: &str) -> Option<i64> {
        self.checkpoints
            .read()
            .unwrap()
            .get(partition_id)
            .map(|c| c.sequence)
    }

    /// Every sequence passed to `advance` for a partition, in call order.
    #[must_use]
    pub fn advances(&self, partition_id: &str) -> Vec<i64> {
        self.advances
            .read()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == partition_id)
            .map(|(_, s)| *s)
            .collect()
    }

    /// Total number of `advance` calls.
    #[must_use]
    pub fn advance_count(&self) -> usize {
        self.advances.read().unwrap().len()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn advance<'a>(
        &'a self,
        partition_id: &'a str,
        sequence: i64,
    ) -> BoxFuture<'a, Result<(), CheckpointError>> {
        Box::pin(async move {
            self.advances
                .write()
                .unwrap()
                .push((partition_id.to_string(), sequence));

            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(CheckpointError::WriteFailed {
                    partition_id: partition_id.to_string(),
                    reason: "injected failure".to_string(),
                });
            }

            let mut checkpoints = self.checkpoints.write().unwrap();
            let entry = checkpoints
                .entry(partition_id.to_string())
                .or_insert_with(|| Checkpoint {
                    partition_id: partition_id.to_string(),
                    sequence,
                    updated_at: Utc::now(),
                });
            if sequence >= entry.sequence {
                entry.sequence = sequence;
                entry.updated_at = Utc::now();
            }
            Ok(())
        })
    }

    fn load<'a>(
        &'a self,
        partition_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Checkpoint>, CheckpointError>> {
        Box::pin(async move { Ok(self.checkpoints.read().unwrap().get(partition_id).cloned()) })
    }
}
