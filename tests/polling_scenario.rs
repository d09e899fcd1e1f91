mod common;
use crate::common::builders::TargetBuilder;
use crate::common::init_tracing;

use std::error::Error;
use std::fs;
use std::io::Write;
use std::sync::Arc;

use tempfile::tempdir;

use crm_file_events::clock::Clock;
use crm_file_events::config::ServiceSettings;
use crm_file_events::engine::{ingest_queue, IngestReceiver};
use crm_file_events::event::{EventType, FileEvent};
use crm_file_events::fs::mock::MockFileSystem;
use crm_file_events::fs::{FileSystem, RealFileSystem};
use crm_file_events::types::{BackendKind, ChecksumAlgorithm, OverflowPolicy};
use crm_file_events::watch::path_utils::normalize_path;
use crm_file_events::watch::DirectoryWatcher;

type TestResult = Result<(), Box<dyn Error>>;

fn drain(receiver: &IngestReceiver) -> Vec<FileEvent> {
    receiver.try_drain(usize::MAX)
}

fn kinds(events: &[FileEvent]) -> Vec<(&str, EventType)> {
    events.iter().map(|e| (e.path.as_str(), e.event_type)).collect()
}

#[tokio::test]
async fn created_modified_deleted_lifecycle_on_mock_fs() -> TestResult {
    init_tracing();

    let fs = MockFileSystem::new();
    fs.add_file("/docs/a.txt", vec![b'x'; 100]);
    fs.add_file("/docs/ignored.log", "not a txt");

    let target = TargetBuilder::new("/docs")
        .include("*.txt")
        .backend(BackendKind::Polling)
        .project("acme")
        .username("jdoe")
        .emit_on_start()
        .build();

    let (sender, receiver) = ingest_queue(100, OverflowPolicy::Block);
    let mut watcher = DirectoryWatcher::for_target(
        target,
        &ServiceSettings::default(),
        Arc::new(fs.clone()) as Arc<dyn FileSystem>,
        sender,
        Clock::new(),
    )?;

    assert_eq!(watcher.run_once().await?, 1);
    let created = drain(&receiver);
    assert_eq!(kinds(&created), vec![("/docs/a.txt", EventType::Created)]);
    assert_eq!(created[0].file_size, Some(100));
    assert_eq!(created[0].project.as_deref(), Some("acme"));
    assert_eq!(created[0].username.as_deref(), Some("jdoe"));
    assert_eq!(created[0].watched_root(), Some("/docs"));
    assert_eq!(created[0].details.get("backend").and_then(|v| v.as_str()), Some("polling"));

    fs.append("/docs/a.txt", b"more data");
    watcher.run_once().await?;
    let modified = drain(&receiver);
    assert_eq!(kinds(&modified), vec![("/docs/a.txt", EventType::Modified)]);
    assert_eq!(modified[0].file_size, Some(109));

    fs.remove("/docs/a.txt");
    watcher.run_once().await?;
    let deleted = drain(&receiver);
    assert_eq!(kinds(&deleted), vec![("/docs/a.txt", EventType::Deleted)]);
    assert_eq!(deleted[0].file_size, None);

    // Nothing changed since the last cycle.
    watcher.run_once().await?;
    assert!(drain(&receiver).is_empty());

    let stats = watcher.stats().snapshot();
    assert_eq!(stats.cycles, 4);
    assert_eq!(stats.emitted, 3);
    Ok(())
}

#[tokio::test]
async fn lifecycle_on_real_directory() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let file = dir.path().join("a.txt");
    fs::write(&file, vec![b'x'; 100])?;
    fs::write(dir.path().join("b.bin"), b"binary")?;

    let target = TargetBuilder::new(dir.path())
        .include("*.txt")
        .emit_on_start()
        .build();

    let (sender, receiver) = ingest_queue(100, OverflowPolicy::Block);
    let mut watcher = DirectoryWatcher::for_target(
        target,
        &ServiceSettings::default(),
        Arc::new(RealFileSystem),
        sender,
        Clock::new(),
    )?;
    let path = normalize_path(&dir.path().canonicalize()?.join("a.txt"));

    watcher.run_once().await?;
    assert_eq!(kinds(&drain(&receiver)), vec![(path.as_str(), EventType::Created)]);

    // Size changes, so the mtime resolution of the filesystem does not matter.
    fs::OpenOptions::new().append(true).open(&file)?.write_all(b"appended")?;
    watcher.run_once().await?;
    let modified = drain(&receiver);
    assert_eq!(kinds(&modified), vec![(path.as_str(), EventType::Modified)]);
    assert_eq!(modified[0].file_size, Some(108));

    fs::remove_file(&file)?;
    watcher.run_once().await?;
    let deleted = drain(&receiver);
    assert_eq!(kinds(&deleted), vec![(path.as_str(), EventType::Deleted)]);
    assert_eq!(deleted[0].file_size, None);
    Ok(())
}

#[tokio::test]
async fn without_emit_on_start_existing_files_are_baseline() -> TestResult {
    init_tracing();

    let fs = MockFileSystem::new();
    fs.add_file("/docs/a.txt", "existing");

    let target = TargetBuilder::new("/docs").build();
    let (sender, receiver) = ingest_queue(100, OverflowPolicy::Block);
    let mut watcher = DirectoryWatcher::for_target(
        target,
        &ServiceSettings::default(),
        Arc::new(fs.clone()),
        sender,
        Clock::new(),
    )?;

    assert_eq!(watcher.run_once().await?, 0);
    fs.add_file("/docs/b.txt", "new");
    watcher.run_once().await?;
    assert_eq!(kinds(&drain(&receiver)), vec![("/docs/b.txt", EventType::Created)]);
    Ok(())
}

#[tokio::test]
async fn checksum_is_attached_when_enabled() -> TestResult {
    init_tracing();

    let fs = MockFileSystem::new();
    fs.add_file("/docs/a.txt", "hello world");

    let target = TargetBuilder::new("/docs").checksum().emit_on_start().build();
    let (sender, receiver) = ingest_queue(100, OverflowPolicy::Block);
    let mut watcher = DirectoryWatcher::for_target(
        target,
        &ServiceSettings::default(),
        Arc::new(fs.clone()),
        sender,
        Clock::new(),
    )?;

    watcher.run_once().await?;
    let events = drain(&receiver);
    assert_eq!(events.len(), 1);
    // blake3 of "hello world"
    assert_eq!(
        events[0].checksum.as_deref(),
        Some("d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24")
    );
    Ok(())
}

#[tokio::test]
async fn checksum_follows_configured_algorithm() -> TestResult {
    init_tracing();

    let fs = MockFileSystem::new();
    fs.add_file("/docs/a.txt", "hello world");

    let cases = [
        (ChecksumAlgorithm::Blake3, 64),
        (ChecksumAlgorithm::Md5, 32),
        (ChecksumAlgorithm::Sha256, 64),
        (ChecksumAlgorithm::Sha512, 128),
    ];
    let mut digests = Vec::new();
    for (algorithm, len) in cases {
        let target = TargetBuilder::new("/docs")
            .checksum_with(algorithm)
            .emit_on_start()
            .build();
        let (sender, receiver) = ingest_queue(100, OverflowPolicy::Block);
        let mut watcher = DirectoryWatcher::for_target(
            target,
            &ServiceSettings::default(),
            Arc::new(fs.clone()),
            sender,
            Clock::new(),
        )?;

        watcher.run_once().await?;
        let events = drain(&receiver);
        let digest = events[0].checksum.clone().ok_or("missing checksum")?;
        assert_eq!(digest.len(), len, "{algorithm}");
        assert_eq!(digest.len(), algorithm.hex_len());
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        digests.push(digest);
    }

    assert_eq!(digests[1], "5eb63bbbe01eeed093cb22bb8f5acdc3");
    assert_ne!(digests[0], digests[2]);
    Ok(())
}
