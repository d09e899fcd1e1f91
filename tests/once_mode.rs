mod common;
use crate::common::builders::{ConfigBuilder, TargetBuilder};
use crate::common::{init_tracing, open_store, with_timeout};

use std::error::Error;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use crm_file_events::engine::Supervisor;
use crm_file_events::event::EventType;
use crm_file_events::fs::mock::MockFileSystem;
use crm_file_events::store::EventQuery;
use crm_file_events::types::RunMode;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn second_single_pass_without_changes_records_nothing() -> TestResult {
    init_tracing();

    let data = tempdir()?;
    fs::write(data.path().join("a.txt"), b"alpha")?;
    fs::create_dir(data.path().join("sub"))?;
    fs::write(data.path().join("sub/b.txt"), b"beta")?;
    let db = data.path().join("state/events.db");

    let config = || {
        ConfigBuilder::new(&db)
            .directory(TargetBuilder::new(data.path()).exclude("state/**").config())
            .build()
    };

    let first = with_timeout(Supervisor::new(config()).run(RunMode::Once)).await?;
    assert_eq!(first.writer.events, 0);
    assert_eq!(first.failed_watchers, 0);
    assert_eq!(first.watchers.len(), 1);
    assert_eq!(first.watchers[0].1.cycles, 1);

    let second = with_timeout(Supervisor::new(config()).run(RunMode::Once)).await?;
    assert_eq!(second.writer.events, 0);
    assert_eq!(open_store(&db).count()?, 0);
    Ok(())
}

#[tokio::test]
async fn emit_on_start_records_every_existing_file_once() -> TestResult {
    init_tracing();

    let fs = MockFileSystem::new();
    fs.add_file("/share/docs/a.txt", "a");
    fs.add_file("/share/docs/b.txt", "bb");
    fs.add_file("/share/docs/notes.md", "skip");
    fs.add_file("/share/media/c.txt", "ccc");

    let dir = tempdir()?;
    let db = dir.path().join("events.db");
    let config = ConfigBuilder::new(&db)
        .directory(
            TargetBuilder::new("/share/docs")
                .include("*.txt")
                .project("acme")
                .emit_on_start()
                .config(),
        )
        .directory(TargetBuilder::new("/share/media").username("jdoe").emit_on_start().config())
        .build();

    let summary = with_timeout(
        Supervisor::new(config)
            .with_filesystem(Arc::new(fs))
            .run(RunMode::Once),
    )
    .await?;
    assert_eq!(summary.writer.events, 3);
    assert_eq!(summary.queue.dropped, 0);
    assert!(!summary.drain_timed_out);

    let store = open_store(&db);
    let reader = store.reader()?;
    let acme = reader.recent_events(&EventQuery {
        project: Some("acme".to_string()),
        ..EventQuery::default()
    })?;
    let mut paths: Vec<_> = acme.iter().map(|e| e.event.path.as_str()).collect();
    paths.sort();
    assert_eq!(paths, vec!["/share/docs/a.txt", "/share/docs/b.txt"]);
    assert!(acme.iter().all(|e| e.event.event_type == EventType::Created));

    let media = reader.recent_events(&EventQuery {
        username: Some("jdoe".to_string()),
        ..EventQuery::default()
    })?;
    assert_eq!(media.len(), 1);
    assert_eq!(media[0].event.watched_root(), Some("/share/media"));
    Ok(())
}

#[tokio::test]
async fn missing_directory_fails_its_watcher_only() -> TestResult {
    init_tracing();

    let fs = MockFileSystem::new();
    fs.add_file("/present/a.txt", "a");

    let dir = tempdir()?;
    let config = ConfigBuilder::new(dir.path().join("events.db"))
        .directory(TargetBuilder::new("/present").emit_on_start().config())
        .directory(TargetBuilder::new("/absent").emit_on_start().config())
        .build();

    let summary = with_timeout(
        Supervisor::new(config)
            .with_filesystem(Arc::new(fs))
            .run(RunMode::Once),
    )
    .await?;
    assert_eq!(summary.failed_watchers, 1);
    assert_eq!(summary.writer.events, 1);
    Ok(())
}

#[tokio::test]
async fn continuous_run_records_changes_and_drains_on_shutdown() -> TestResult {
    init_tracing();

    let data = tempdir()?;
    let watched = data.path().join("watched");
    fs::create_dir(&watched)?;
    let db = data.path().join("events.db");

    let config = ConfigBuilder::new(&db)
        .poll_interval(0.05)
        .idle_sleep_interval(0.01)
        .batch_window(0.01)
        .shutdown_grace_period(5.0)
        .directory(TargetBuilder::new(&watched).config())
        .build();

    let service = Supervisor::new(config).start().await?;

    // Wait for the baseline cycle so the new file is a change.
    with_timeout(async {
        while service.summary().watchers[0].1.cycles == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let mut live = service.api().subscribe(0);
    // Renamed in whole so no scan can see it half-written.
    let staged = data.path().join("report.tmp");
    fs::write(&staged, b"quarterly numbers")?;
    fs::rename(&staged, watched.join("report.txt"))?;

    let received = with_timeout(live.recv()).await.ok_or("subscription closed")?;
    assert_eq!(received.event.event_type, EventType::Created);
    assert!(received.event.path.ends_with("/watched/report.txt"));
    assert_eq!(received.event.file_size, Some(17));

    let stored = service.api().recent_events(EventQuery::latest(10)).await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, received.id);

    let summary = with_timeout(service.shutdown()).await?;
    assert!(!summary.drain_timed_out);
    assert_eq!(summary.failed_watchers, 0);
    assert_eq!(summary.writer.events, 1);
    assert_eq!(open_store(&db).count()?, 1);
    Ok(())
}

#[tokio::test]
async fn shutdown_gives_up_on_a_stuck_writer_after_grace_period() -> TestResult {
    init_tracing();

    let data = tempdir()?;
    let watched = data.path().join("watched");
    fs::create_dir(&watched)?;
    let db = data.path().join("events.db");

    let config = ConfigBuilder::new(&db)
        .poll_interval(0.05)
        .idle_sleep_interval(0.01)
        .batch_window(0.01)
        .shutdown_grace_period(0.2)
        .directory(TargetBuilder::new(&watched).config())
        .build();

    let service = Supervisor::new(config).start().await?;
    with_timeout(async {
        while service.summary().watchers[0].1.cycles == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    // Another connection holds the write lock, so the writer's commit sits
    // in SQLite's busy handler well past the grace period.
    let blocker = rusqlite::Connection::open(&db)?;
    blocker.execute_batch("BEGIN EXCLUSIVE")?;

    let staged = data.path().join("stuck.tmp");
    fs::write(&staged, b"never committed in time")?;
    fs::rename(&staged, watched.join("stuck.txt"))?;

    with_timeout(async {
        while service.summary().watchers[0].1.emitted == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    // Let the writer pick the batch up and block on the lock.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    let summary = with_timeout(service.shutdown()).await?;
    assert!(summary.drain_timed_out);
    assert_eq!(summary.writer.events, 0);
    assert_eq!(summary.failed_watchers, 0);
    assert!(started.elapsed() < Duration::from_secs(2));

    blocker.execute_batch("ROLLBACK")?;
    Ok(())
}
