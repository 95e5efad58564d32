//! Per-partition progress tracking.
//!
//! A checkpoint records the last sequence of a partition whose batch has been
//! handed to the dispatch loop. On restart a partition resumes right after its
//! checkpoint.
//!
//! # Delivery Semantics
//!
//! Checkpoints advance at batch boundaries, once every message of the batch
//! has been accepted by the dispatch channel, not once the repository write
//! has finished. That gives:
//!
//! - **At-least-once before hand-off**: a crash before the checkpoint write
//!   redelivers the whole batch
//! - **At-most-once after hand-off**: a crash between hand-off and the
//!   repository write loses that mutation, because the checkpoint already
//!   covers it
//!
//! This is not exactly-once.

use crate::stream::PartitionId;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by a [`CheckpointStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    /// The store could not be reached.
    #[error("Checkpoint store unavailable: {0}")]
    Unavailable(String),

    /// Writing the checkpoint failed.
    #[error("Failed to advance checkpoint for partition '{partition_id}': {reason}")]
    WriteFailed {
        /// Partition being advanced
        partition_id: PartitionId,
        /// The reason for failure
        reason: String,
    },

    /// Reading the checkpoint failed.
    #[error("Failed to load checkpoint for partition '{partition_id}': {reason}")]
    ReadFailed {
        /// Partition being loaded
        partition_id: PartitionId,
        /// The reason for failure
        reason: String,
    },
}

/// Last handed-off position of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The partition.
    pub partition_id: PartitionId,
    /// Last sequence covered.
    pub sequence: i64,
    /// When the checkpoint was written.
    pub updated_at: DateTime<Utc>,
}

/// Durable mapping from partition to its last handed-off sequence.
///
/// Implementations must keep checkpoints monotonic: advancing to a sequence
/// lower than the stored one leaves the stored one in place.
pub trait CheckpointStore: Send + Sync {
    /// Record that everything up to and including `sequence` was handed off.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::WriteFailed`] if the write fails.
    fn advance<'a>(
        &'a self,
        partition_id: &'a str,
        sequence: i64,
    ) -> BoxFuture<'a, Result<(), CheckpointError>>;

    /// Load the checkpoint of a partition, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::ReadFailed`] if the read fails.
    fn load<'a>(
        &'a self,
        partition_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Checkpoint>, CheckpointError>>;
}
