//! Scripted in-memory event stream.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only panics on a poisoned mutex

use futures::future::BoxFuture;
use orderflow_core::stream::{EventStream, PartitionClient, PartitionId, RawMessage, StreamError};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// What one `receive_batch` call on a partition returns.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Return these records (split if larger than the requested maximum).
    Batch(Vec<RawMessage>),
    /// Fail the call with this error.
    Fail(StreamError),
    /// Report an elapsed receive window immediately.
    Timeout,
}

#[derive(Debug, Default)]
struct PartitionState {
    script: VecDeque<ScriptStep>,
    next_sequence: i64,
    receive_calls: usize,
    opens: Vec<Option<i64>>,
}

#[derive(Debug, Default)]
struct Inner {
    partitions: Mutex<BTreeMap<PartitionId, PartitionState>>,
    topology_error: Mutex<Option<StreamError>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    notify: Notify,
}

/// In-memory [`EventStream`] whose partitions replay a script.
///
/// When a partition's script is exhausted, `receive_batch` waits for the
/// requested timeout (or for [`InMemoryEventStream::push_batch`]) and then
/// reports [`StreamError::ReceiveTimeout`], like an idle partition.
///
/// Clones share state, so a test can keep one handle for assertions while
/// the pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStream {
    inner: Arc<Inner>,
}

impl InMemoryEventStream {
    /// Create a stream with no partitions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a partition whose script is the given batches of bodies.
    ///
    /// Sequences are assigned from 1 upwards.
    #[must_use]
    pub fn with_partition(self, partition_id: &str, batches: Vec<Vec<Vec<u8>>>) -> Self {
        self.add_partition(partition_id);
        for batch in batches {
            self.push_batch(partition_id, batch);
        }
        self
    }

    /// Add a partition with an explicit script.
    #[must_use]
    pub fn with_script(self, partition_id: &str, steps: Vec<ScriptStep>) -> Self {
        self.add_partition(partition_id);
        for step in steps {
            self.push_step(partition_id, step);
        }
        self
    }

    /// Make `partitions()` fail, to exercise startup errors.
    #[must_use]
    pub fn with_topology_error(self, error: StreamError) -> Self {
        *self.inner.topology_error.lock().unwrap() = Some(error);
        self
    }

    fn add_partition(&self, partition_id: &str) {
        self.inner
            .partitions
            .lock()
            .unwrap()
            .entry(partition_id.to_string())
            .or_insert_with(|| PartitionState {
                next_sequence: 1,
                ..PartitionState::default()
            });
    }

    /// Append a batch of bodies to a partition's script, numbering them
    /// after the last sequence handed out on that partition.
    pub fn push_batch(&self, partition_id: &str, bodies: Vec<Vec<u8>>) {
        self.add_partition(partition_id);
        {
            let mut partitions = self.inner.partitions.lock().unwrap();
            let state = partitions.get_mut(partition_id).unwrap();
            let first = state.next_sequence;
            let records: Vec<RawMessage> = bodies
                .into_iter()
                .zip(first..)
                .map(|(body, sequence)| RawMessage::new(partition_id, sequence, body))
                .collect();
            state.next_sequence = first + i64::try_from(records.len()).unwrap();
            state.script.push_back(ScriptStep::Batch(records));
        }
        self.inner.notify.notify_waiters();
    }

    /// Append an arbitrary step to a partition's script.
    pub fn push_step(&self, partition_id: &str, step: ScriptStep) {
        self.add_partition(partition_id);
        self.inner
            .partitions
            .lock()
            .unwrap()
            .get_mut(partition_id)
            .unwrap()
            .script
            .push_back(step);
        self.inner.notify.notify_waiters();
    }

    /// All partition ids, in order.
    #[must_use]
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        self.inner.partitions.lock().unwrap().keys().cloned().collect()
    }

    /// Number of `receive_batch` calls made on a partition.
    #[must_use]
    pub fn receive_calls(&self, partition_id: &str) -> usize {
        self.inner
            .partitions
            .lock()
            .unwrap()
            .get(partition_id)
            .map_or(0, |p| p.receive_calls)
    }

    /// Total `receive_batch` calls across all partitions.
    #[must_use]
    pub fn total_receive_calls(&self) -> usize {
        self.inner
            .partitions
            .lock()
            .unwrap()
            .values()
            .map(|p| p.receive_calls)
            .sum()
    }

    /// The `resume_after` argument of every `open_partition` call on a partition.
    #[must_use]
    pub fn opens(&self, partition_id: &str) -> Vec<Option<i64>> {
        self.inner
            .partitions
            .lock()
            .unwrap()
            .get(partition_id)
            .map(|p| p.opens.clone())
            .unwrap_or_default()
    }

    /// Steps left unconsumed on a partition.
    #[must_use]
    pub fn remaining_steps(&self, partition_id: &str) -> usize {
        self.inner
            .partitions
            .lock()
            .unwrap()
            .get(partition_id)
            .map_or(0, |p| p.script.len())
    }

    /// Number of `close` calls.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }

    /// Whether the stream has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn next_step(&self, partition_id: &str, max_messages: usize) -> Option<ScriptStep> {
        let mut partitions = self.inner.partitions.lock().unwrap();
        let state = partitions.get_mut(partition_id)?;
        match state.script.pop_front()? {
            ScriptStep::Batch(mut records) if records.len() > max_messages => {
                let rest = records.split_off(max_messages);
                state.script.push_front(ScriptStep::Batch(rest));
                Some(ScriptStep::Batch(records))
            }
            step => Some(step),
        }
    }
}

impl EventStream for InMemoryEventStream {
    fn partitions(&self) -> BoxFuture<'_, Result<Vec<PartitionId>, StreamError>> {
        Box::pin(async move {
            if let Some(error) = self.inner.topology_error.lock().unwrap().clone() {
                return Err(error);
            }
            Ok(self.partition_ids())
        })
    }

    fn open_partition(
        &self,
        partition_id: &str,
        resume_after: Option<i64>,
    ) -> BoxFuture<'_, Result<Box<dyn PartitionClient>, StreamError>> {
        let partition_id = partition_id.to_string();
        Box::pin(async move {
            if self.is_closed() {
                return Err(StreamError::Closed);
            }
            let mut partitions = self.inner.partitions.lock().unwrap();
            let state = partitions
                .get_mut(&partition_id)
                .ok_or_else(|| StreamError::UnknownPartition(partition_id.clone()))?;
            state.opens.push(resume_after);
            drop(partitions);

            Ok(Box::new(InMemoryPartitionClient {
                partition_id,
                stream: self.clone(),
            }) as Box<dyn PartitionClient>)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), StreamError>> {
        Box::pin(async move {
            self.inner.close_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.closed.store(true, Ordering::SeqCst);
            self.inner.notify.notify_waiters();
            Ok(())
        })
    }
}

struct InMemoryPartitionClient {
    partition_id: PartitionId,
    stream: InMemoryEventStream,
}

impl InMemoryPartitionClient {
    fn resolve(step: ScriptStep) -> Result<Vec<RawMessage>, StreamError> {
        match step {
            ScriptStep::Batch(records) => Ok(records),
            ScriptStep::Fail(error) => Err(error),
            ScriptStep::Timeout => Err(StreamError::ReceiveTimeout),
        }
    }
}

impl PartitionClient for InMemoryPartitionClient {
    fn partition_id(&self) -> &str {
        &self.partition_id
    }

    fn receive_batch(
        &mut self,
        max_messages: usize,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Vec<RawMessage>, StreamError>> {
        Box::pin(async move {
            {
                let mut partitions = self.stream.inner.partitions.lock().unwrap();
                if let Some(state) = partitions.get_mut(&self.partition_id) {
                    state.receive_calls += 1;
                }
            }
            if self.stream.is_closed() {
                return Err(StreamError::Closed);
            }

            // Register interest before checking so a concurrent push is not missed.
            let notified = self.stream.inner.notify.notified();
            if let Some(step) = self.stream.next_step(&self.partition_id, max_messages) {
                return Self::resolve(step);
            }

            if tokio::time::timeout(timeout, notified).await.is_err() {
                return Err(StreamError::ReceiveTimeout);
            }
            match self.stream.next_step(&self.partition_id, max_messages) {
                Some(step) => Self::resolve(step),
                None => Ok(Vec::new()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn splits_batches_larger_than_requested() {
        let stream = InMemoryEventStream::new()
            .with_partition("0", vec![vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]]);
        let mut client = stream.open_partition("0", None).await.unwrap();

        let first = client.receive_batch(2, Duration::from_millis(10)).await.unwrap();
        let second = client.receive_batch(2, Duration::from_millis(10)).await.unwrap();

        assert_eq!(first.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(second.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![3]);
        assert_eq!(stream.receive_calls("0"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_partition_times_out() {
        let stream = InMemoryEventStream::new().with_partition("0", vec![]);
        let mut client = stream.open_partition("0", Some(4)).await.unwrap();

        let result = client.receive_batch(10, Duration::from_secs(20)).await;

        assert_eq!(result, Err(StreamError::ReceiveTimeout));
        assert_eq!(stream.opens("0"), vec![Some(4)]);
    }

    #[tokio::test]
    async fn unknown_partition_is_rejected() {
        let stream = InMemoryEventStream::new();
        let result = stream.open_partition("9", None).await;
        assert!(matches!(result, Err(StreamError::UnknownPartition(p)) if p == "9"));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let stream = InMemoryEventStream::new().with_partition("0", vec![]);
        stream.close().await.unwrap();
        stream.close().await.unwrap();
        assert!(stream.is_closed());
        assert_eq!(stream.close_calls(), 2);
        assert!(matches!(stream.open_partition("0", None).await, Err(StreamError::Closed)));
    }
}
