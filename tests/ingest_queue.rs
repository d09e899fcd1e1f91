mod common;
use crate::common::{event, init_tracing, with_timeout};

use std::error::Error;
use std::time::Duration;

use crm_file_events::engine::{ingest_queue, QueueClosed};
use crm_file_events::event::EventType;
use crm_file_events::types::OverflowPolicy;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn drop_oldest_evicts_and_counts() -> TestResult {
    init_tracing();

    let (sender, receiver) = ingest_queue(3, OverflowPolicy::DropOldest);
    for i in 0..5 {
        sender.send(event(&format!("/q/{i}"), EventType::Created)).await?;
    }

    let stats = receiver.stats();
    assert_eq!(stats.enqueued, 5);
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.depth, 3);

    let paths: Vec<_> = receiver.try_drain(10).into_iter().map(|e| e.path).collect();
    assert_eq!(paths, vec!["/q/2", "/q/3", "/q/4"]);
    Ok(())
}

#[tokio::test]
async fn block_policy_waits_for_room() -> TestResult {
    init_tracing();

    let (sender, receiver) = ingest_queue(1, OverflowPolicy::Block);
    sender.send(event("/q/first", EventType::Created)).await?;

    let producer = tokio::spawn(async move {
        sender.send(event("/q/second", EventType::Created)).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!producer.is_finished(), "send should block while the queue is full");

    assert_eq!(receiver.try_drain(1)[0].path, "/q/first");
    with_timeout(producer).await??;
    assert_eq!(receiver.try_drain(1)[0].path, "/q/second");
    assert_eq!(receiver.stats().dropped, 0);
    Ok(())
}

#[tokio::test]
async fn collect_batch_respects_max_and_window() -> TestResult {
    init_tracing();

    let (sender, receiver) = ingest_queue(100, OverflowPolicy::Block);
    for i in 0..7 {
        sender.send(event(&format!("/q/{i}"), EventType::Modified)).await?;
    }

    let batch = receiver.collect_batch(5, Duration::from_millis(50)).await;
    assert_eq!(batch.len(), 5);

    // Two left; the window expires before the batch fills.
    let started = tokio::time::Instant::now();
    let batch = receiver.collect_batch(5, Duration::from_millis(30)).await;
    assert_eq!(batch.len(), 2);
    assert!(started.elapsed() >= Duration::from_millis(25));
    Ok(())
}

#[tokio::test]
async fn closing_wakes_the_consumer_after_draining() -> TestResult {
    init_tracing();

    let (sender, receiver) = ingest_queue(10, OverflowPolicy::Block);
    let extra = sender.clone();
    sender.send(event("/q/last", EventType::Deleted)).await?;
    drop(sender);
    // One producer still alive.
    assert!(!receiver.is_closed());
    drop(extra);

    assert!(with_timeout(receiver.wait_nonempty()).await);
    assert_eq!(receiver.try_drain(10).len(), 1);
    assert!(!with_timeout(receiver.wait_nonempty()).await);
    Ok(())
}

#[tokio::test]
async fn send_after_close_fails() {
    let (sender, receiver) = ingest_queue(10, OverflowPolicy::Block);
    receiver.close();
    let err = sender.send(event("/q/late", EventType::Created)).await.unwrap_err();
    assert_eq!(err, QueueClosed);
}

#[tokio::test]
async fn dropping_the_consumer_releases_blocked_producers() -> TestResult {
    let (sender, receiver) = ingest_queue(1, OverflowPolicy::Block);
    sender.send(event("/q/a", EventType::Created)).await?;
    let producer = tokio::spawn(async move { sender.send(event("/q/b", EventType::Created)).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(receiver);
    assert_eq!(with_timeout(producer).await?, Err(QueueClosed));
    Ok(())
}
