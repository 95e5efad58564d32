//! Partition supervision: restart policy and health reporting.
//!
//! A partition worker that fails (receive or checkpoint error) never takes
//! down its siblings. Its supervisor logs the failure, marks the partition
//! [`PartitionHealth::Unhealthy`], waits with exponential backoff and starts
//! the worker again; the new worker resumes from the checkpoint store. Once
//! the restart budget is spent the partition is marked
//! [`PartitionHealth::Failed`] and left stopped.
//!
//! # Example
//!
//! ```rust
//! use orderflow_runtime::supervisor::RestartPolicy;
//! use std::time::Duration;
//!
//! let policy = RestartPolicy::builder()
//!     .max_restarts(3)
//!     .initial_delay(Duration::from_millis(500))
//!     .max_delay(Duration::from_secs(10))
//!     .build();
//!
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
//! ```

use crate::partition_worker::PartitionWorker;
use crate::telemetry::Telemetry;
use orderflow_core::stream::PartitionId;
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Restart policy for failed partition workers.
///
/// # Default Values
///
/// - `max_restarts`: 5
/// - `initial_delay`: 1 second
/// - `max_delay`: 60 seconds
/// - `multiplier`: 2.0 (delay doubles each restart)
/// - `jitter`: 0.1 (up to 10% added to each delay)
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    /// Restarts allowed before the partition is marked failed
    pub max_restarts: usize,
    /// Delay before the first restart
    pub initial_delay: Duration,
    /// Cap for the exponential backoff
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Fraction of the delay added at random to spread restarts out
    pub jitter: f64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RestartPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub fn builder() -> RestartPolicyBuilder {
        RestartPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// A policy that never restarts.
    #[must_use]
    pub fn never() -> Self {
        Self {
            max_restarts: 0,
            ..Self::default()
        }
    }

    /// Backoff before restart number `attempt` (0-based), without jitter.
    ///
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms.max(0.0) as u64)
        }
    }

    /// Backoff before restart number `attempt`, with jitter applied.
    #[must_use]
    pub fn jittered_delay(&self, attempt: usize) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if !self.jitter.is_finite() || self.jitter <= 0.0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter.min(1.0));
        Duration::try_from_secs_f64(base.as_secs_f64() * (1.0 + extra)).unwrap_or(base)
    }
}

/// Builder for [`RestartPolicy`].
#[derive(Debug, Clone)]
pub struct RestartPolicyBuilder {
    policy: RestartPolicy,
}

impl RestartPolicyBuilder {
    /// Set the restart budget.
    #[must_use]
    pub const fn max_restarts(mut self, max_restarts: usize) -> Self {
        self.policy.max_restarts = max_restarts;
        self
    }

    /// Set the delay before the first restart.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set the backoff cap.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Set the jitter fraction (0 disables jitter).
    #[must_use]
    pub const fn jitter(mut self, jitter: f64) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Build the [`RestartPolicy`].
    #[must_use]
    pub fn build(self) -> RestartPolicy {
        self.policy
    }
}

/// Health of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionHealth {
    /// The worker is running and making progress.
    Healthy,
    /// The worker failed and is being restarted.
    Unhealthy {
        /// Restarts since the partition last made progress
        restarts: usize,
    },
    /// The restart budget is spent; the partition is no longer consumed.
    Failed,
    /// The worker exited because the pipeline is shutting down.
    Stopped,
}

impl PartitionHealth {
    /// Numeric code reported on the health gauge.
    #[must_use]
    pub const fn code(self) -> f64 {
        match self {
            Self::Healthy => 0.0,
            Self::Unhealthy { .. } => 1.0,
            Self::Failed => 2.0,
            Self::Stopped => 3.0,
        }
    }
}

impl fmt::Display for PartitionHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Unhealthy { restarts } => write!(f, "unhealthy ({restarts} restarts)"),
            Self::Failed => f.write_str("failed"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Shared view of every partition's health.
///
/// Written by supervisors and workers, read through the adapter handle.
#[derive(Debug, Clone, Default)]
pub struct PartitionHealthMap {
    inner: Arc<Mutex<BTreeMap<PartitionId, PartitionHealth>>>,
}

impl PartitionHealthMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the health of a partition.
    pub fn set(&self, partition_id: &str, health: PartitionHealth) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(partition_id.to_string(), health);
    }

    /// Health of one partition.
    #[must_use]
    pub fn get(&self, partition_id: &str) -> Option<PartitionHealth> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(partition_id)
            .copied()
    }

    /// Health of every partition.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<PartitionId, PartitionHealth> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Runs one partition worker and restarts it according to a [`RestartPolicy`].
pub struct Supervisor {
    policy: RestartPolicy,
    health: PartitionHealthMap,
    telemetry: Telemetry,
}

impl Supervisor {
    /// Create a supervisor.
    #[must_use]
    pub const fn new(policy: RestartPolicy, health: PartitionHealthMap, telemetry: Telemetry) -> Self {
        Self {
            policy,
            health,
            telemetry,
        }
    }

    fn mark(&self, partition_id: &str, health: PartitionHealth) {
        self.health.set(partition_id, health);
        self.telemetry.record_partition_health(partition_id, health);
    }

    /// Run `worker` until it stops cleanly, the token is cancelled, or the
    /// restart budget is spent.
    ///
    /// The restart budget resets whenever the worker completes a receive
    /// window (marks the partition healthy) between two failures, so only
    /// consecutive failures count against it.
    pub async fn supervise(&self, worker: PartitionWorker, cancel: CancellationToken) {
        let partition_id = worker.partition_id().to_string();
        let mut restarts = 0;
        self.mark(&partition_id, PartitionHealth::Healthy);

        loop {
            let Err(err) = worker.run(&cancel).await else {
                self.mark(&partition_id, PartitionHealth::Stopped);
                info!(partition_id = %partition_id, "Partition worker stopped");
                return;
            };

            if cancel.is_cancelled() {
                warn!(partition_id = %partition_id, error = %err, "Partition worker failed during shutdown");
                self.mark(&partition_id, PartitionHealth::Stopped);
                return;
            }

            if self.health.get(&partition_id) == Some(PartitionHealth::Healthy) {
                restarts = 0;
            }

            if restarts >= self.policy.max_restarts {
                error!(
                    partition_id = %partition_id,
                    restarts,
                    error = %err,
                    "Partition worker failed, restart budget exhausted; partition is no longer consumed"
                );
                self.mark(&partition_id, PartitionHealth::Failed);
                return;
            }

            let delay = self.policy.jittered_delay(restarts);
            restarts += 1;
            error!(
                partition_id = %partition_id,
                restart = restarts,
                delay_ms = delay.as_millis(),
                error = %err,
                "Partition worker failed, restarting"
            );
            self.mark(&partition_id, PartitionHealth::Unhealthy { restarts });
            self.telemetry.record_worker_restart(&partition_id);

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.mark(&partition_id, PartitionHealth::Stopped);
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::partition_worker::WorkerConfig;
    use orderflow_core::order::Order;
    use orderflow_core::stream::StreamError;
    use orderflow_testing::{InMemoryCheckpointStore, InMemoryEventStream, ScriptStep, fixtures};
    use tokio::sync::mpsc;

    fn fast_policy(max_restarts: usize) -> RestartPolicy {
        RestartPolicy::builder()
            .max_restarts(max_restarts)
            .initial_delay(Duration::from_millis(5))
            .max_delay(Duration::from_millis(20))
            .jitter(0.0)
            .build()
    }

    fn receive_failure() -> ScriptStep {
        ScriptStep::Fail(StreamError::ReceiveFailed {
            partition_id: "0".to_string(),
            reason: "broker went away".to_string(),
        })
    }

    #[test]
    fn delay_calculation() {
        let policy = RestartPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RestartPolicy::builder()
            .initial_delay(Duration::from_secs(1))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(10_000), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RestartPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .jitter(0.5)
            .build();

        for _ in 0..100 {
            let delay = policy.jittered_delay(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn health_codes_are_distinct() {
        let codes = [
            PartitionHealth::Healthy.code(),
            PartitionHealth::Unhealthy { restarts: 1 }.code(),
            PartitionHealth::Failed.code(),
            PartitionHealth::Stopped.code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert!((a - b).abs() > f64::EPSILON);
            }
        }
    }

    #[tokio::test]
    async fn restarted_worker_resumes_from_checkpoint() {
        let order = Order::new("A", "books", "p-1", "c-1", "Pending");
        let stream = InMemoryEventStream::new().with_script(
            "0",
            vec![
                ScriptStep::Batch(fixtures::records("0", 1, vec![fixtures::create_order("e1", &order)])),
                receive_failure(),
                ScriptStep::Batch(fixtures::records("0", 2, vec![fixtures::update_order("e2", &order)])),
            ],
        );
        let checkpoints = InMemoryCheckpointStore::new();
        let health = PartitionHealthMap::new();
        let (tx, mut rx) = mpsc::channel(8);
        let worker = PartitionWorker::new(
            "0",
            Arc::new(stream.clone()),
            Arc::new(checkpoints.clone()),
            tx,
            WorkerConfig::default().with_receive_timeout(Duration::from_millis(10)),
            Telemetry::new("test"),
        )
        .with_health(health.clone());
        let supervisor = Supervisor::new(fast_policy(3), health.clone(), Telemetry::new("test"));
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { supervisor.supervise(worker, cancel).await }
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));

        tokio::time::timeout(Duration::from_secs(1), async {
            while checkpoints.sequence("0") != Some(2) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(stream.opens("0"), vec![None, Some(1)]);
        assert_eq!(health.get("0"), Some(PartitionHealth::Healthy));

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(health.get("0"), Some(PartitionHealth::Stopped));
    }

    #[tokio::test]
    async fn exhausted_budget_marks_partition_failed() {
        let stream = InMemoryEventStream::new().with_script(
            "0",
            vec![receive_failure(), receive_failure(), receive_failure()],
        );
        let health = PartitionHealthMap::new();
        let (tx, _rx) = mpsc::channel(1);
        let worker = PartitionWorker::new(
            "0",
            Arc::new(stream.clone()),
            Arc::new(InMemoryCheckpointStore::new()),
            tx,
            WorkerConfig::default(),
            Telemetry::new("test"),
        )
        .with_health(health.clone());
        let supervisor = Supervisor::new(fast_policy(2), health.clone(), Telemetry::new("test"));

        tokio::time::timeout(
            Duration::from_secs(1),
            supervisor.supervise(worker, CancellationToken::new()),
        )
        .await
        .unwrap();

        assert_eq!(health.get("0"), Some(PartitionHealth::Failed));
        assert_eq!(stream.opens("0").len(), 3);
    }

    #[tokio::test]
    async fn budget_is_restored_by_empty_receive_windows() {
        let mut script = Vec::new();
        for _ in 0..6 {
            script.push(ScriptStep::Timeout);
            script.push(receive_failure());
        }
        let stream = InMemoryEventStream::new().with_script("0", script);
        let checkpoints = InMemoryCheckpointStore::new();
        let health = PartitionHealthMap::new();
        let (tx, _rx) = mpsc::channel(1);
        let worker = PartitionWorker::new(
            "0",
            Arc::new(stream.clone()),
            Arc::new(checkpoints.clone()),
            tx,
            WorkerConfig::default().with_receive_timeout(Duration::from_millis(10)),
            Telemetry::new("test"),
        )
        .with_health(health.clone());
        let supervisor = Supervisor::new(fast_policy(2), health.clone(), Telemetry::new("test"));
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { supervisor.supervise(worker, cancel).await }
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while stream.opens("0").len() < 7 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(health.get("0"), Some(PartitionHealth::Healthy));
        assert_eq!(checkpoints.sequence("0"), None);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(health.get("0"), Some(PartitionHealth::Stopped));
    }

    #[tokio::test]
    async fn cancellation_during_backoff_stops_partition() {
        let stream = InMemoryEventStream::new().with_script("0", vec![receive_failure()]);
        let health = PartitionHealthMap::new();
        let (tx, _rx) = mpsc::channel(1);
        let worker = PartitionWorker::new(
            "0",
            Arc::new(stream),
            Arc::new(InMemoryCheckpointStore::new()),
            tx,
            WorkerConfig::default(),
            Telemetry::new("test"),
        )
        .with_health(health.clone());
        let policy = RestartPolicy::builder()
            .initial_delay(Duration::from_secs(30))
            .jitter(0.0)
            .build();
        let supervisor = Supervisor::new(policy, health.clone(), Telemetry::new("test"));
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { supervisor.supervise(worker, cancel).await }
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            while health.get("0") != Some(PartitionHealth::Unhealthy { restarts: 1 }) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(health.get("0"), Some(PartitionHealth::Stopped));
    }

    #[test]
    fn jitter_on_a_huge_delay_does_not_overflow() {
        let policy = RestartPolicy::builder()
            .initial_delay(Duration::MAX)
            .max_delay(Duration::MAX)
            .jitter(1.0)
            .build();

        assert!(policy.jittered_delay(3) >= Duration::from_secs(u64::MAX / 2));
    }

    #[test]
    fn non_finite_jitter_is_ignored() {
        let policy = RestartPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .jitter(f64::NAN)
            .build();

        assert_eq!(policy.jittered_delay(0), Duration::from_millis(100));
    }

    proptest::proptest! {
        #[test]
        fn jittered_delay_stays_within_bounds(
            attempt in 0usize..64,
            initial_ms in 1u64..5_000,
            jitter in 0.0f64..1.0,
        ) {
            let policy = RestartPolicy::builder()
                .initial_delay(Duration::from_millis(initial_ms))
                .max_delay(Duration::from_secs(60))
                .jitter(jitter)
                .build();

            let base = policy.delay_for_attempt(attempt);
            let delay = policy.jittered_delay(attempt);

            proptest::prop_assert!(base <= Duration::from_secs(60));
            proptest::prop_assert!(delay >= base);
            proptest::prop_assert!(delay <= base.mul_f64(1.0 + jitter) + Duration::from_millis(1));
        }
    }
}
