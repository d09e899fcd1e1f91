mod common;
use crate::common::builders::TargetBuilder;
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use crm_file_events::config::ServiceSettings;
use crm_file_events::event::EventType;
use crm_file_events::fs::RealFileSystem;
use crm_file_events::types::BackendKind;
use crm_file_events::watch::path_utils::normalize_path;
use crm_file_events::watch::{build_backend, BackendFailure, ChangeBackend, RawChange};

type TestResult = Result<(), Box<dyn Error>>;

fn service(debounce: Duration) -> ServiceSettings {
    ServiceSettings {
        debounce_interval: debounce,
        ..ServiceSettings::default()
    }
}

fn notify_backend(root: &Path, debounce: Duration) -> Result<Box<dyn ChangeBackend>, Box<dyn Error>> {
    let target = TargetBuilder::new(root)
        .include("*.txt")
        .backend(BackendKind::Notify)
        .build();
    Ok(build_backend(&target, &service(debounce), Arc::new(RealFileSystem))?)
}

fn kinds(changes: &[RawChange]) -> Vec<(&str, EventType)> {
    changes.iter().map(|c| (c.path.as_str(), c.kind)).collect()
}

#[tokio::test]
async fn os_notifications_are_debounced_into_single_changes() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let root = dir.path().canonicalize()?;
    let file = root.join("a.txt");
    let path = normalize_path(&file);

    let mut backend = notify_backend(&root, Duration::from_millis(100))?;
    backend.start()?;
    assert!(backend.resync().await?.is_empty());

    fs::write(&file, b"first")?;
    let created = with_timeout(backend.next_changes()).await?;
    assert_eq!(kinds(&created), vec![(path.as_str(), EventType::Created)]);
    assert_eq!(created[0].meta.map(|m| m.size), Some(5));

    // A burst of writes settles into one modification with the final size.
    for _ in 0..5 {
        fs::OpenOptions::new().append(true).open(&file)?.write_all(b"more")?;
    }
    let modified = with_timeout(backend.next_changes()).await?;
    assert_eq!(kinds(&modified), vec![(path.as_str(), EventType::Modified)]);
    assert_eq!(modified[0].meta.map(|m| m.size), Some(5 + 5 * 4));

    // A file created and removed inside one window leaves no trace.
    let transient = root.join("t.txt");
    fs::write(&transient, b"tmp")?;
    fs::remove_file(&transient)?;
    fs::remove_file(&file)?;
    let deleted = with_timeout(backend.next_changes()).await?;
    assert_eq!(kinds(&deleted), vec![(path.as_str(), EventType::Deleted)]);
    assert!(deleted[0].meta.is_none());

    let idle = tokio::time::timeout(Duration::from_millis(400), backend.next_changes()).await;
    assert!(idle.is_err(), "no further changes expected, got {idle:?}");

    backend.stop();
    Ok(())
}

#[tokio::test]
async fn excluded_files_produce_no_changes() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let root = dir.path().canonicalize()?;

    let mut backend = notify_backend(&root, Duration::from_millis(50))?;
    backend.start()?;
    backend.resync().await?;

    fs::write(root.join("skip.log"), b"not matched")?;
    fs::write(root.join("keep.txt"), b"matched")?;

    let changes = with_timeout(backend.next_changes()).await?;
    let keep = normalize_path(&root.join("keep.txt"));
    assert_eq!(kinds(&changes), vec![(keep.as_str(), EventType::Created)]);

    backend.stop();
    Ok(())
}

#[tokio::test]
async fn unread_notification_backlog_reports_overflow() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let root = dir.path().canonicalize()?;

    let mut backend = notify_backend(&root, Duration::from_millis(50))?;
    backend.start()?;
    backend.resync().await?;

    // Every file yields several notifications; nothing drains them until
    // the channel is well past capacity.
    for i in 0..2500 {
        fs::write(root.join(format!("f{i:04}.txt")), b"x")?;
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    let result = with_timeout(backend.next_changes()).await;
    assert_eq!(result, Err(BackendFailure::Overflow));

    backend.stop();
    Ok(())
}

#[tokio::test]
async fn missing_root_fails_to_start() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let root = dir.path().canonicalize()?.join("not-there");

    let mut backend = notify_backend(&root, Duration::from_millis(50))?;
    assert!(matches!(backend.start(), Err(BackendFailure::RootUnavailable(_))));
    Ok(())
}
