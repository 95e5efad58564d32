//! End-to-end pipeline behaviour against the in-memory capabilities.

#![allow(clippy::unwrap_used)] // Test code uses unwrap for clarity

use orderflow_core::acknowledgement::AckStatus;
use orderflow_core::order::{Order, status};
use orderflow_core::repository::RepositoryError;
use orderflow_core::stream::StreamError;
use orderflow_runtime::adapter::AdapterConfig;
use orderflow_runtime::partition_worker::WorkerConfig;
use orderflow_runtime::pipeline::{Pipeline, PipelineConfig, PipelineReport};
use orderflow_runtime::supervisor::RestartPolicy;
use orderflow_runtime::{PartitionHealth, PipelineError};
use orderflow_testing::{
    InMemoryCheckpointStore, InMemoryEventSink, InMemoryEventStream, InMemoryOrderRepository,
    RepositoryCall, fixtures,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    stream: InMemoryEventStream,
    checkpoints: InMemoryCheckpointStore,
    repository: InMemoryOrderRepository,
    sink: InMemoryEventSink,
}

impl Harness {
    fn new(stream: InMemoryEventStream) -> Self {
        orderflow_testing::init_tracing();
        Self {
            stream,
            checkpoints: InMemoryCheckpointStore::new(),
            repository: InMemoryOrderRepository::new(),
            sink: InMemoryEventSink::new(),
        }
    }

    fn with_repository(mut self, repository: InMemoryOrderRepository) -> Self {
        self.repository = repository;
        self
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            adapter: AdapterConfig {
                channel_capacity: 1,
                worker: WorkerConfig::default().with_receive_timeout(Duration::from_millis(20)),
                restart: RestartPolicy::never(),
            },
            drain_grace: Duration::from_secs(2),
        }
    }

    fn spawn(&self) -> (JoinHandle<Result<PipelineReport, PipelineError>>, CancellationToken) {
        let pipeline = Pipeline::builder()
            .stream(Arc::new(self.stream.clone()))
            .checkpoints(Arc::new(self.checkpoints.clone()))
            .repository(Arc::new(self.repository.clone()))
            .sink(Arc::new(self.sink.clone()))
            .config(Self::config())
            .build()
            .unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(shutdown.clone()));
        (task, shutdown)
    }
}

async fn stop(task: JoinHandle<Result<PipelineReport, PipelineError>>, shutdown: &CancellationToken) -> PipelineReport {
    shutdown.cancel();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap()
}

fn order(id: &str, state: &str) -> Order {
    Order::new(id, "books", "p-1", "c-1", state)
}

#[tokio::test]
async fn create_update_delete_are_applied_and_acknowledged_in_order() {
    let stream = InMemoryEventStream::new().with_partition(
        "0",
        vec![vec![
            fixtures::create_order("evt-1", &order("A", status::PENDING)),
            fixtures::update_order("evt-2", &order("A", status::SHIPPED)),
            fixtures::delete_order("evt-3", &order("A", status::SHIPPED)),
        ]],
    );
    let harness = Harness::new(stream);
    let (task, shutdown) = harness.spawn();

    let acks = harness.sink.wait_for_acknowledgements(3, WAIT).await;
    let report = stop(task, &shutdown).await;

    let (id, partition_key) = ("A".to_string(), "books".to_string());
    assert_eq!(
        harness.repository.calls(),
        vec![
            RepositoryCall::Create { id: id.clone(), partition_key: partition_key.clone() },
            RepositoryCall::Update { id: id.clone(), partition_key: partition_key.clone() },
            RepositoryCall::Delete { id, partition_key },
        ]
    );
    assert_eq!(
        acks.iter().map(|a| a.event_id.as_str()).collect::<Vec<_>>(),
        vec!["evt-1", "evt-2", "evt-3"]
    );
    assert!(acks.iter().all(|a| a.status == AckStatus::Processed));
    assert!(harness.repository.is_empty());
    assert_eq!(harness.checkpoints.sequence("0"), Some(3));
    assert_eq!(report.dispatch.handled + report.dispatch.drained, 3);
}

#[tokio::test]
async fn undecodable_body_is_acknowledged_failed_and_processing_continues() {
    let stream = InMemoryEventStream::new().with_partition(
        "0",
        vec![vec![
            b"not-json".to_vec(),
            fixtures::create_order("evt-2", &order("A", status::PENDING)),
        ]],
    );
    let harness = Harness::new(stream);
    let (task, shutdown) = harness.spawn();

    let acks = harness.sink.wait_for_acknowledgements(2, WAIT).await;
    stop(task, &shutdown).await;

    assert_eq!(acks.len(), 2);
    assert_eq!(acks[0].status, AckStatus::Failed);
    assert!(acks[0].error.is_some());
    assert_eq!(acks[1].status, AckStatus::Processed);
    assert_eq!(acks[1].event_id, "evt-2");
    assert_eq!(harness.repository.calls().len(), 1);
}

#[tokio::test]
async fn repository_failure_is_acknowledged_and_pipeline_continues() {
    let repository = InMemoryOrderRepository::new();
    repository.fail_on("B", RepositoryError::Backend("unavailable".to_string()));
    let stream = InMemoryEventStream::new().with_partition(
        "0",
        vec![vec![
            fixtures::create_order("evt-b", &order("B", status::PENDING)),
            fixtures::create_order("evt-c", &order("C", status::PENDING)),
        ]],
    );
    let harness = Harness::new(stream).with_repository(repository);
    let (task, shutdown) = harness.spawn();

    let acks = harness.sink.wait_for_acknowledgements(2, WAIT).await;
    stop(task, &shutdown).await;

    assert_eq!(acks[0].event_id, "evt-b");
    assert_eq!(acks[0].status, AckStatus::Failed);
    assert_eq!(acks[1].event_id, "evt-c");
    assert_eq!(acks[1].status, AckStatus::Processed);
    assert!(harness.repository.order("C", "books").is_some());
}

#[tokio::test]
async fn unrecognized_type_touches_nothing_and_does_not_stop_the_pipeline() {
    let stream = InMemoryEventStream::new().with_partition(
        "0",
        vec![vec![
            fixtures::event_body("refund_order", "evt-x", &order("A", status::PENDING)),
            fixtures::create_order("evt-y", &order("A", status::PENDING)),
        ]],
    );
    let harness = Harness::new(stream);
    let (task, shutdown) = harness.spawn();

    let acks = harness.sink.wait_for_acknowledgements(2, WAIT).await;
    stop(task, &shutdown).await;

    assert_eq!(acks[0].status, AckStatus::Unsupported);
    assert_eq!(acks[1].status, AckStatus::Processed);
    assert_eq!(
        harness.repository.calls(),
        vec![RepositoryCall::Create {
            id: "A".to_string(),
            partition_key: "books".to_string()
        }]
    );
}

#[tokio::test]
async fn partition_order_is_preserved_and_repository_is_never_called_concurrently() {
    let partitions = ["0", "1", "2"];
    let mut stream = InMemoryEventStream::new();
    for partition in partitions {
        let batches = (0..4)
            .map(|batch| {
                (0..5)
                    .map(|n| {
                        let id = format!("{partition}-{:02}", batch * 5 + n);
                        fixtures::create_order(&format!("evt-{id}"), &order(&id, status::PENDING))
                    })
                    .collect()
            })
            .collect();
        stream = stream.with_partition(partition, batches);
    }
    let repository = InMemoryOrderRepository::new().with_delay(Duration::from_millis(1));
    let harness = Harness::new(stream).with_repository(repository);
    let (task, shutdown) = harness.spawn();

    let acks = harness.sink.wait_for_acknowledgements(60, WAIT).await;
    stop(task, &shutdown).await;

    assert_eq!(acks.len(), 60);
    assert_eq!(harness.repository.max_in_flight(), 1);
    let calls = harness.repository.calls();
    for partition in partitions {
        let ids: Vec<&str> = calls
            .iter()
            .map(RepositoryCall::id)
            .filter(|id| id.starts_with(&format!("{partition}-")))
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids.len(), 20);
        assert_eq!(ids, sorted, "partition {partition} was reordered");
        assert_eq!(harness.checkpoints.sequence(partition), Some(20));
    }
}

#[tokio::test]
async fn shutdown_stops_receiving_and_returns_promptly() {
    let stream = InMemoryEventStream::new()
        .with_partition("0", vec![])
        .with_partition("1", vec![]);
    let harness = Harness::new(stream);
    let (task, shutdown) = harness.spawn();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = Instant::now();
    let report = stop(task, &shutdown).await;
    assert!(started.elapsed() < Duration::from_secs(1));

    let calls_after_stop = harness.stream.total_receive_calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.stream.total_receive_calls(), calls_after_stop);
    assert!(harness.stream.is_closed());
    assert_eq!(harness.stream.close_calls(), 1);
    assert!(report.health.values().all(|h| *h == PartitionHealth::Stopped));
    assert!(!report.dispatch.drain_timed_out);
}

#[tokio::test]
async fn shutdown_finishes_queued_messages_and_never_checkpoints_unhanded_ones() {
    let stream = InMemoryEventStream::new().with_partition(
        "0",
        vec![vec![
            fixtures::create_order("evt-1", &order("A", status::PENDING)),
            fixtures::create_order("evt-2", &order("B", status::PENDING)),
            fixtures::create_order("evt-3", &order("C", status::PENDING)),
        ]],
    );
    let repository = InMemoryOrderRepository::new().with_delay(Duration::from_millis(100));
    let harness = Harness::new(stream).with_repository(repository);
    let (task, shutdown) = harness.spawn();

    harness.sink.wait_for_acknowledgements(1, WAIT).await;
    let report = stop(task, &shutdown).await;

    let acks = harness.sink.acknowledgements();
    assert!(acks.len() >= 2, "queued message was abandoned");
    assert_eq!(acks[0].event_id, "evt-1");
    assert_eq!(acks[1].event_id, "evt-2");
    assert_eq!(report.dispatch.handled + report.dispatch.drained, acks.len() as u64);
    match harness.checkpoints.sequence("0") {
        None => assert_eq!(acks.len(), 2),
        Some(sequence) => {
            assert_eq!(sequence, 3);
            assert_eq!(acks.len(), 3);
        }
    }
}

#[tokio::test]
async fn every_partition_failing_ends_the_run() {
    let failure = || {
        orderflow_testing::ScriptStep::Fail(StreamError::ReceiveFailed {
            partition_id: "0".to_string(),
            reason: "lost lease".to_string(),
        })
    };
    let stream = InMemoryEventStream::new().with_script("0", vec![failure()]);
    let harness = Harness::new(stream);
    let (task, _shutdown) = harness.spawn();

    let report = tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();

    assert!(report.all_partitions_failed());
    assert!(harness.stream.is_closed());
}

#[tokio::test]
async fn topology_failure_is_fatal_at_startup() {
    let stream = InMemoryEventStream::new()
        .with_partition("0", vec![])
        .with_topology_error(StreamError::ConnectionFailed("no route to broker".to_string()));
    let harness = Harness::new(stream);
    let (task, _shutdown) = harness.spawn();

    let result = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();

    assert!(matches!(result, Err(PipelineError::Stream(StreamError::ConnectionFailed(_)))));
    assert_eq!(harness.stream.total_receive_calls(), 0);
}
