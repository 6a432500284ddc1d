//! Queue producer → shared list → ingestion → sinks

use crate::common::{hosting_record, RecordingSinks};
use replicore::buffer::BufferConfig;
use replicore::queue::{QueueConfig, QueueIngestion, QueueProducer, SinkOutcome, StopReason};
use replicore::store::{CoordinationStore, MemoryStore};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const LIST: &str = "it:hosting";

fn ingestion(store: &Arc<MemoryStore>, sinks: &Arc<RecordingSinks>, max_per_run: usize) -> QueueIngestion {
    QueueIngestion::new(
        store.clone(),
        QueueConfig {
            list_key: LIST.to_string(),
            max_per_run,
        },
        sinks.clone(),
        sinks.clone(),
        sinks.clone(),
    )
}

async fn seed(store: &MemoryStore, range: std::ops::Range<usize>) {
    let encoded: Vec<String> = range.map(|i| hosting_record(i).encode().unwrap()).collect();
    store.push_batch(LIST, &encoded).await.unwrap();
}

// ============================================================================
// Draining
// ============================================================================

#[tokio::test]
async fn test_empty_queue_calls_no_sink() {
    let store = Arc::new(MemoryStore::new());
    let sinks = Arc::new(RecordingSinks::default());

    let report = ingestion(&store, &sinks, 100).run_once().await.unwrap();

    assert_eq!(report.popped, 0);
    assert_eq!(report.stop, StopReason::Empty);
    assert_eq!(report.analytics, SinkOutcome::Skipped);
    assert_eq!(report.logs, SinkOutcome::Skipped);
    assert_eq!(report.usage, SinkOutcome::Skipped);
    assert_eq!(sinks.calls(), 0);
}

#[tokio::test]
async fn test_ceiling_leaves_remainder_for_next_run() {
    let store = Arc::new(MemoryStore::new());
    let sinks = Arc::new(RecordingSinks::default());
    seed(&store, 0..150).await;
    let job = ingestion(&store, &sinks, 100);

    let first = job.run_once().await.unwrap();
    assert_eq!(first.popped, 100);
    assert_eq!(first.stop, StopReason::Ceiling);
    assert_eq!(first.logs, SinkOutcome::Stored(100));
    assert_eq!(first.analytics, SinkOutcome::Stored(100));
    assert_eq!(first.usage, SinkOutcome::Stored(3));
    assert_eq!(store.list_len(LIST).await, 50);

    // One insert per sink per run
    assert_eq!(sinks.calls(), 3);

    let second = job.run_once().await.unwrap();
    assert_eq!(second.popped, 50);
    assert_eq!(second.stop, StopReason::Empty);
    assert_eq!(store.list_len(LIST).await, 0);

    let messages = sinks.log_messages();
    let expected: Vec<String> = (0..150).map(|i| format!("request {i}")).collect();
    assert_eq!(messages, expected);

    let bandwidth: u64 = sinks
        .usage
        .lock()
        .unwrap()
        .iter()
        .flatten()
        .map(|d| d.bandwidth_bytes)
        .sum();
    assert_eq!(bandwidth, (1..=150).sum::<u64>());
}

#[tokio::test]
async fn test_decode_failure_keeps_earlier_records() {
    let store = Arc::new(MemoryStore::new());
    let sinks = Arc::new(RecordingSinks::default());
    let items = vec![
        hosting_record(0).encode().unwrap(),
        hosting_record(1).encode().unwrap(),
        "{not a record".to_string(),
        hosting_record(3).encode().unwrap(),
        hosting_record(4).encode().unwrap(),
    ];
    store.push_batch(LIST, &items).await.unwrap();
    let job = ingestion(&store, &sinks, 100);

    let report = job.run_once().await.unwrap();
    assert_eq!(report.popped, 3);
    assert_eq!(report.decoded, 2);
    assert_eq!(report.stop, StopReason::DecodeError);
    assert_eq!(sinks.log_messages(), vec!["request 0", "request 1"]);
    assert_eq!(store.list_len(LIST).await, 2);

    let report = job.run_once().await.unwrap();
    assert_eq!(report.decoded, 2);
    assert_eq!(report.stop, StopReason::Empty);
    assert_eq!(sinks.log_messages().len(), 4);
}

#[tokio::test]
async fn test_failing_sink_does_not_block_others() {
    let store = Arc::new(MemoryStore::new());
    let sinks = Arc::new(RecordingSinks::default());
    sinks.fail_analytics.store(true, Ordering::SeqCst);
    seed(&store, 0..6).await;

    let report = ingestion(&store, &sinks, 100).run_once().await.unwrap();

    assert!(matches!(report.analytics, SinkOutcome::Failed(ref e) if e.contains("unavailable")));
    assert_eq!(report.logs, SinkOutcome::Stored(6));
    assert_eq!(report.usage, SinkOutcome::Stored(3));
    assert!(sinks.analytics.lock().unwrap().is_empty());
    assert_eq!(store.list_len(LIST).await, 0);
}

#[tokio::test]
async fn test_pop_failure_is_reported() {
    let store = Arc::new(MemoryStore::new());
    let sinks = Arc::new(RecordingSinks::default());
    seed(&store, 0..3).await;
    store.set_available(false);

    let err = ingestion(&store, &sinks, 100).run_once().await.unwrap_err();
    assert!(err.is_connectivity());
    assert_eq!(sinks.calls(), 0);

    store.set_available(true);
    assert_eq!(store.list_len(LIST).await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumers_never_share_records() {
    let store = Arc::new(MemoryStore::new());
    let sinks = Arc::new(RecordingSinks::default());
    seed(&store, 0..500).await;

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let job = ingestion(&store, &sinks, 30);
            tokio::spawn(async move {
                loop {
                    let report = job.run_once().await.unwrap();
                    if report.stop == StopReason::Empty {
                        break;
                    }
                }
            })
        })
        .collect();
    for consumer in consumers {
        consumer.await.unwrap();
    }

    let messages = sinks.log_messages();
    let unique: HashSet<&String> = messages.iter().collect();
    assert_eq!(messages.len(), 500);
    assert_eq!(unique.len(), 500);
}

// ============================================================================
// Producer to consumer
// ============================================================================

#[tokio::test]
async fn test_producer_batches_reach_ingestion() {
    let store = Arc::new(MemoryStore::new());
    let sinks = Arc::new(RecordingSinks::default());
    let producer = QueueProducer::new(
        store.clone(),
        LIST,
        BufferConfig {
            size: 4,
            flush_interval: Duration::from_secs(60),
            ..Default::default()
        },
    )
    .unwrap();

    for i in 0..10 {
        producer.enqueue(&hosting_record(i)).await.unwrap();
    }
    // Two full batches pushed, two records still buffered
    assert_eq!(store.list_len(LIST).await, 8);

    producer.close().await.unwrap();
    assert_eq!(store.list_len(LIST).await, 10);

    let report = ingestion(&store, &sinks, 100).run_once().await.unwrap();
    assert_eq!(report.decoded, 10);
    let expected: Vec<String> = (0..10).map(|i| format!("request {i}")).collect();
    assert_eq!(sinks.log_messages(), expected);
}
