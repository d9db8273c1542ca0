//! Queue consumption: message handling, deletion and end-to-end dispatch

mod common;

use common::{
    init_test_tracing, raw_key, s3_event, FakeQueue, Harness, RecordingDispatcher, BUCKET,
    EXPORT_XML,
};
use healthion_ingest::ingest::{
    DispatchError, MemoryImportStore, PollScheduler, PollSummary, QueueConsumer, WorkerPool,
};
use healthion_ingest::queue::config::QueueConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn consumer(queue: &Arc<FakeQueue>, dispatcher: Arc<RecordingDispatcher>) -> QueueConsumer {
    QueueConsumer::new(queue.clone(), dispatcher, &QueueConfig::default())
}

#[tokio::test]
async fn test_dispatches_every_record_and_deletes() {
    init_test_tracing();
    let queue = FakeQueue::new();
    let dispatcher = RecordingDispatcher::new();
    let body = s3_event(BUCKET, &["u1/raw/a.xml", "u1/raw/My+Export%282%29.xml"]);
    let receipt = queue.push(body.clone());

    let summary = consumer(&queue, dispatcher.clone()).poll_once().await.unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.total, 1);
    assert_eq!(summary.raw_messages.len(), 1);
    assert_eq!(summary.raw_messages[0].body, body);
    assert_eq!(summary.raw_messages[0].receipt_handle, receipt);
    let keys: Vec<String> = dispatcher.dispatched().into_iter().map(|n| n.key).collect();
    assert_eq!(keys, vec!["u1/raw/a.xml", "u1/raw/My Export(2).xml"]);
    assert_eq!(queue.deleted(), vec![receipt]);
}

#[tokio::test]
async fn test_invalid_json_is_deleted() {
    let queue = FakeQueue::new();
    let dispatcher = RecordingDispatcher::new();
    let receipt = queue.push("not json at all");

    let summary = consumer(&queue, dispatcher.clone()).poll_once().await.unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.raw_messages[0].body, "not json at all");
    assert!(dispatcher.dispatched().is_empty());
    assert_eq!(queue.deleted(), vec![receipt]);
}

#[tokio::test]
async fn test_message_without_records_is_deleted() {
    let queue = FakeQueue::new();
    let dispatcher = RecordingDispatcher::new();
    let test_event = queue.push(r#"{"Service":"Amazon S3","Event":"s3:TestEvent"}"#);
    let empty = queue.push(r#"{"Records":[]}"#);

    let summary = consumer(&queue, dispatcher.clone()).poll_once().await.unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.total, 2);
    assert_eq!(summary.raw_messages.len(), 2);
    assert_eq!(queue.deleted(), vec![test_event, empty]);
}

#[tokio::test]
async fn test_full_pool_leaves_message_for_redelivery() {
    let queue = FakeQueue::new();
    let dispatcher = RecordingDispatcher::failing(DispatchError::Full);
    queue.push(s3_event(BUCKET, &["u1/raw/a.xml"]));

    let summary = consumer(&queue, dispatcher).poll_once().await.unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.processed, 0);
    assert!(queue.deleted().is_empty());
}

#[tokio::test]
async fn test_receive_failure_is_reported() {
    let queue = FakeQueue::new();
    queue.set_fail_receive(true);

    let result = consumer(&queue, RecordingDispatcher::new()).poll_once().await;

    assert!(result.is_err());
    assert!(queue.deleted().is_empty());
}

#[tokio::test]
async fn test_empty_queue() {
    let queue = FakeQueue::new();

    let summary = consumer(&queue, RecordingDispatcher::new()).poll_once().await.unwrap();

    assert_eq!(summary, PollSummary::default());
}

#[tokio::test]
async fn test_batch_size_is_respected() {
    let queue = FakeQueue::new();
    for i in 0..12 {
        queue.push(s3_event(BUCKET, &[&format!("u1/raw/{}.xml", i)]));
    }
    let consumer = consumer(&queue, RecordingDispatcher::new());

    let first = consumer.poll_once().await.unwrap();
    let second = consumer.poll_once().await.unwrap();

    assert_eq!(first.total, 10);
    assert_eq!(first.raw_messages.len(), 10);
    assert_eq!(second.total, 2);
    assert_eq!(queue.deleted().len(), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_poll_to_import() {
    init_test_tracing();
    let harness = Harness::new(MemoryImportStore::new(), 1000);
    let user_id = Uuid::new_v4();
    let key = raw_key(user_id);
    harness.storage.put(BUCKET, &key, EXPORT_XML, Some("etag-1"));

    let (pool, mut results) = WorkerPool::spawn(harness.orchestrator.clone(), 2, 8);
    let pool = Arc::new(pool);

    let queue = FakeQueue::new();
    queue.push(s3_event(BUCKET, &[&key]));
    let consumer = QueueConsumer::new(queue.clone(), pool.clone(), &QueueConfig::default());

    let summary = consumer.poll_once().await.unwrap();
    assert_eq!(summary.processed, 1);

    pool.shutdown().await;
    let result = results.recv().await.unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.user_id, user_id.to_string());
    assert_eq!(harness.store.snapshot().records, 2);
    assert_eq!(harness.storage.uploads().len(), 1);
    assert_eq!(queue.deleted().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_redelivered_message_imports_once() {
    let harness = Harness::new(MemoryImportStore::new(), 1000);
    let key = raw_key(Uuid::new_v4());
    harness.storage.put(BUCKET, &key, EXPORT_XML, Some("etag-1"));

    let (pool, mut results) = WorkerPool::spawn(harness.orchestrator.clone(), 2, 8);
    let pool = Arc::new(pool);

    let queue = FakeQueue::new();
    queue.push(s3_event(BUCKET, &[&key]));
    queue.push(s3_event(BUCKET, &[&key]));
    let consumer = QueueConsumer::new(queue.clone(), pool.clone(), &QueueConfig::default());

    consumer.poll_once().await.unwrap();
    pool.shutdown().await;

    let mut outcomes = Vec::new();
    while let Some(result) = results.recv().await {
        assert!(result.is_success(), "{:?}", result.error);
        outcomes.push(result.stats.is_some());
    }
    outcomes.sort();

    assert_eq!(outcomes, vec![false, true]);
    assert_eq!(harness.store.snapshot().records, 2);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_drains_queue_within_budget() {
    let queue = FakeQueue::new();
    let dispatcher = RecordingDispatcher::new();
    for i in 0..3 {
        queue.push(s3_event(BUCKET, &[&format!("u1/raw/{}.xml", i)]));
    }
    let config = QueueConfig {
        max_messages: 1,
        wait_time_secs: 0,
        ..QueueConfig::default()
    };
    let consumer = QueueConsumer::new(queue.clone(), dispatcher.clone(), &config);

    let summary = PollScheduler::new(Duration::from_millis(10))
        .run(&consumer, Some(Duration::from_millis(300)), CancellationToken::new())
        .await;

    assert!(summary.polls >= 3);
    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.errors, 0);
    assert_eq!(dispatcher.dispatched().len(), 3);
}
