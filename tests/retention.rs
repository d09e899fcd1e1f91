mod common;
use crate::common::{event_at, init_tracing};

use std::error::Error;

use chrono::{Duration, Utc};
use tempfile::tempdir;

use crm_file_events::config::DatabaseSettings;
use crm_file_events::event::EventType;
use crm_file_events::store::EventStore;

type TestResult = Result<(), Box<dyn Error>>;

fn store_with_retention(days: u32, batch: Option<usize>) -> Result<(tempfile::TempDir, EventStore), Box<dyn Error>> {
    let dir = tempdir()?;
    let mut settings = DatabaseSettings::for_path(dir.path().join("events.db"));
    settings.retention_days = Some(days);
    settings.maintenance_batch_size = batch;
    let store = EventStore::open(&settings)?;
    Ok((dir, store))
}

#[test]
fn maintenance_removes_only_events_past_the_horizon() -> TestResult {
    init_tracing();

    let (_dir, mut store) = store_with_retention(30, Some(1))?;
    let reference = Utc::now();
    store.insert_batch(&[
        event_at("/docs/ancient.txt", EventType::Created, reference - Duration::days(400)),
        event_at("/docs/old.txt", EventType::Created, reference - Duration::days(31)),
        event_at("/docs/recent.txt", EventType::Created, reference - Duration::days(29)),
        event_at("/docs/now.txt", EventType::Modified, reference),
    ])?;

    let report = store.run_maintenance(reference)?;
    assert_eq!(report.deleted, 2);
    // One row per statement, plus the statement that found nothing left.
    assert_eq!(report.batches, 3);
    assert!(!report.vacuumed);

    let horizon = reference - Duration::days(30);
    let remaining = store.recent(10)?;
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|e| e.event.event_time >= horizon));
    assert_eq!(store.maintenance_state().last_run, Some(reference));
    Ok(())
}

#[test]
fn unbatched_purge_is_one_statement() -> TestResult {
    let (_dir, mut store) = store_with_retention(7, None)?;
    let reference = Utc::now();
    let old: Vec<_> = (0..50)
        .map(|i| event_at(&format!("/docs/{i}.txt"), EventType::Created, reference - Duration::days(8)))
        .collect();
    store.insert_batch(&old)?;

    let report = store.run_maintenance(reference)?;
    assert_eq!(report.deleted, 50);
    assert_eq!(report.batches, 1);
    assert_eq!(store.count()?, 0);
    Ok(())
}

#[test]
fn vacuum_runs_only_when_rows_were_deleted() -> TestResult {
    let dir = tempdir()?;
    let mut settings = DatabaseSettings::for_path(dir.path().join("events.db"));
    settings.retention_days = Some(1);
    settings.vacuum_on_maintenance = true;
    let mut store = EventStore::open(&settings)?;

    let reference = Utc::now();
    store.insert_batch(&[event_at("/docs/a.txt", EventType::Created, reference)])?;
    assert!(!store.run_maintenance(reference)?.vacuumed);

    store.insert_batch(&[event_at("/docs/b.txt", EventType::Created, reference - Duration::days(2))])?;
    let report = store.run_maintenance(reference)?;
    assert_eq!(report.deleted, 1);
    assert!(report.vacuumed);
    Ok(())
}

#[test]
fn without_retention_nothing_is_deleted() -> TestResult {
    let dir = tempdir()?;
    let mut store = EventStore::open(&DatabaseSettings::for_path(dir.path().join("events.db")))?;
    let reference = Utc::now();
    store.insert_batch(&[event_at("/docs/a.txt", EventType::Created, reference - Duration::days(3650))])?;

    let report = store.run_maintenance(reference)?;
    assert_eq!(report.deleted, 0);
    assert_eq!(store.count()?, 1);
    Ok(())
}
