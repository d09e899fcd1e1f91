mod common;
use crate::common::{event, event_at, init_tracing, open_store, with_timeout};

use std::error::Error;
use std::time::Duration;

use chrono::Utc;
use tempfile::tempdir;

use crm_file_events::broadcast::BroadcastHub;
use crm_file_events::clock::Clock;
use crm_file_events::config::{BroadcastConfig, DatabaseSettings, ServiceSettings};
use crm_file_events::engine::{clamp_event_times, ingest_queue, EventWriter};
use crm_file_events::event::EventType;
use crm_file_events::store::{EventQuery, EventStore};
use crm_file_events::types::OverflowPolicy;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn ten_thousand_events_commit_in_bounded_batches() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let db = dir.path().join("events.db");
    let store = open_store(&db);

    let service = ServiceSettings {
        max_events_per_batch: 500,
        batch_window: Duration::from_millis(20),
        ..ServiceSettings::default()
    };
    let (sender, receiver) = ingest_queue(10_000, OverflowPolicy::Block);
    let hub = BroadcastHub::new(BroadcastConfig::default());
    let writer = EventWriter::new(store, receiver, hub.clone(), &service, Clock::new());
    let stats = writer.stats();
    let writer_task = tokio::spawn(writer.run());

    for i in 0..10_000 {
        sender.send(event(&format!("/docs/f{i:05}.txt"), EventType::Created)).await?;
    }
    drop(sender);
    with_timeout(writer_task).await??;

    let stats = stats.snapshot();
    assert_eq!(stats.events, 10_000);
    assert!(stats.max_batch <= 500, "batch of {} exceeds the bound", stats.max_batch);
    assert!(stats.batches >= 20);

    let store = open_store(&db);
    let reader = store.reader()?;
    assert_eq!(reader.count()?, 10_000);

    // Ids follow queue order.
    let first = reader.events_after(0, 3)?;
    let paths: Vec<_> = first.iter().map(|e| e.event.path.as_str()).collect();
    assert_eq!(paths, vec!["/docs/f00000.txt", "/docs/f00001.txt", "/docs/f00002.txt"]);

    // The hub keeps only the newest committed events.
    assert_eq!(hub.history_len(), BroadcastConfig::default().history_size);
    Ok(())
}

#[test]
fn insert_batch_round_trips_every_field() -> TestResult {
    let dir = tempdir()?;
    let mut store = open_store(&dir.path().join("events.db"));

    let mut created = event("/docs/a.txt", EventType::Created);
    created.checksum = Some("abc123".to_string());
    created.details.insert("team".into(), serde_json::json!("sales"));
    let deleted = event("/docs/a.txt", EventType::Deleted);

    let stored = store.insert_batch(&[created.clone(), deleted.clone()])?;
    assert_eq!(stored.len(), 2);
    assert!(stored[0].id < stored[1].id);

    let recent = store.recent(10)?;
    assert_eq!(recent, stored);
    assert_eq!(recent[0].event.checksum.as_deref(), Some("abc123"));
    assert_eq!(recent[0].event.details.get("team"), Some(&serde_json::json!("sales")));
    assert_eq!(recent[1].event.file_size, None);
    Ok(())
}

#[test]
fn reader_filters_and_orders_newest_first() -> TestResult {
    let dir = tempdir()?;
    let mut store = open_store(&dir.path().join("events.db"));

    let mut other = event("/other/x.txt", EventType::Modified);
    other.project = Some("globex".to_string());
    store.insert_batch(&[
        event("/docs/a.txt", EventType::Created),
        other,
        event("/docs/a.txt", EventType::Modified),
        event("/docs/b.txt", EventType::Created),
    ])?;

    let reader = store.reader()?;
    let acme = reader.recent_events(&EventQuery {
        project: Some("acme".to_string()),
        ..EventQuery::default()
    })?;
    let paths: Vec<_> = acme.iter().map(|e| (e.event.path.as_str(), e.event.event_type)).collect();
    assert_eq!(
        paths,
        vec![
            ("/docs/b.txt", EventType::Created),
            ("/docs/a.txt", EventType::Modified),
            ("/docs/a.txt", EventType::Created),
        ]
    );

    let modified = reader.recent_events(&EventQuery {
        event_type: Some(EventType::Modified),
        ..EventQuery::default()
    })?;
    assert_eq!(modified.len(), 2);

    let page = reader.recent_events(&EventQuery {
        limit: 1,
        offset: 1,
        ..EventQuery::default()
    })?;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].event.path, "/docs/a.txt");
    assert_eq!(page[0].event.event_type, EventType::Modified);
    Ok(())
}

#[test]
fn clamped_times_never_go_backwards() {
    let now = Utc::now();
    let mut batch = vec![
        event_at("/a", EventType::Created, now),
        event_at("/b", EventType::Created, now - chrono::Duration::seconds(5)),
        event_at("/c", EventType::Created, now + chrono::Duration::seconds(1)),
    ];
    clamp_event_times(&mut batch);
    assert_eq!(batch[1].event_time, now);
    assert_eq!(batch[2].event_time, now + chrono::Duration::seconds(1));
}

#[test]
fn opening_applies_journal_mode_and_custom_pragmas() -> TestResult {
    let dir = tempdir()?;
    let mut settings = DatabaseSettings::for_path(dir.path().join("nested/events.db"));
    settings.pragmas.insert("cache_size".into(), (-4000i64).into());
    let store = EventStore::open(&settings)?;
    assert!(store.path().exists());
    assert_eq!(store.count()?, 0);
    store.close()?;
    Ok(())
}
