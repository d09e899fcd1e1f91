mod common;
use crate::common::{event, init_tracing, open_store, with_timeout};

use std::error::Error;
use std::time::Duration;

use tempfile::tempdir;

use crm_file_events::api::EventApi;
use crm_file_events::broadcast::BroadcastHub;
use crm_file_events::clock::Clock;
use crm_file_events::config::{BroadcastConfig, ServiceSettings};
use crm_file_events::engine::{ingest_queue, EventWriter};
use crm_file_events::event::EventType;
use crm_file_events::types::OverflowPolicy;

type TestResult = Result<(), Box<dyn Error>>;

async fn wait_for_history(hub: &BroadcastHub, len: usize) {
    with_timeout(async {
        while hub.history_len() < len {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

#[tokio::test]
async fn replay_then_live_without_duplicates() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let store = open_store(&dir.path().join("events.db"));
    let reader = store.reader()?;
    let service = ServiceSettings {
        batch_window: Duration::from_millis(5),
        ..ServiceSettings::default()
    };
    let (sender, receiver) = ingest_queue(100, OverflowPolicy::Block);
    let hub = BroadcastHub::new(BroadcastConfig::default());
    let writer = EventWriter::new(store, receiver, hub.clone(), &service, Clock::new());
    let writer_task = tokio::spawn(writer.run());
    let api = EventApi::new(reader, hub.clone());

    for i in 1..=8 {
        sender.send(event(&format!("/docs/{i}.txt"), EventType::Created)).await?;
    }
    wait_for_history(&hub, 8).await;

    let mut sub = api.subscribe(5);

    for i in 9..=11 {
        sender.send(event(&format!("/docs/{i}.txt"), EventType::Created)).await?;
    }

    let mut ids = Vec::new();
    while ids.len() < 8 {
        let next = with_timeout(sub.recv()).await.ok_or("subscription ended early")?;
        ids.push(next.id);
    }
    assert_eq!(ids, (4..=11).collect::<Vec<i64>>());

    let paths: Vec<_> = api
        .events_after(10, 10)
        .await?
        .into_iter()
        .map(|e| e.event.path)
        .collect();
    assert_eq!(paths, vec!["/docs/11.txt"]);
    assert_eq!(api.count().await?, 11);

    drop(sender);
    with_timeout(writer_task).await??;
    Ok(())
}

#[tokio::test]
async fn history_is_seeded_from_the_store() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let mut store = open_store(&dir.path().join("events.db"));
    let events: Vec<_> = (1..=10)
        .map(|i| event(&format!("/docs/{i}.txt"), EventType::Modified))
        .collect();
    store.insert_batch(&events)?;

    let hub = BroadcastHub::new(BroadcastConfig {
        subscriber_queue_size: 16,
        history_size: 4,
    });
    hub.seed_history(store.recent(4)?);

    let mut sub = hub.subscribe(100);
    let mut replayed = Vec::new();
    while let Some(e) = sub.try_recv() {
        replayed.push(e.id);
    }
    assert_eq!(replayed, vec![7, 8, 9, 10]);
    Ok(())
}

#[tokio::test]
async fn slow_subscriber_does_not_stall_ingestion() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let store = open_store(&dir.path().join("events.db"));
    let service = ServiceSettings {
        batch_window: Duration::from_millis(5),
        ..ServiceSettings::default()
    };
    let (sender, receiver) = ingest_queue(1000, OverflowPolicy::Block);
    let hub = BroadcastHub::new(BroadcastConfig {
        subscriber_queue_size: 2,
        history_size: 10,
    });
    let writer = EventWriter::new(store, receiver, hub.clone(), &service, Clock::new());
    let stats = writer.stats();
    let writer_task = tokio::spawn(writer.run());

    // Never read from.
    let _stalled = hub.subscribe(0);

    for i in 0..50 {
        sender.send(event(&format!("/docs/{i}.txt"), EventType::Created)).await?;
    }
    drop(sender);
    with_timeout(writer_task).await??;

    assert_eq!(stats.snapshot().events, 50);
    assert_eq!(hub.subscriber_count(), 0);
    assert_eq!(hub.disconnected(), 1);
    Ok(())
}
