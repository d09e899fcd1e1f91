// src/watch/notify_backend.rs

//! OS-notification backend built on `notify`.
//!
//! Raw notifications are filtered and fed into a [`Debouncer`]; when a path
//! settles it is stat'ed and compared with the last state this backend
//! reported, which is kept as a [`DirectorySnapshot`]. The same snapshot is
//! what a resync pass diffs against after the notification stream fails.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, trace};

use crate::config::model::WatchTarget;
use crate::event::EventType;
use crate::fs::EntryKind;
use crate::types::BackendKind;
use crate::watch::backend::{BackendFailure, ChangeBackend, ChangeFuture, ChangeResult, RawChange};
use crate::watch::debounce::{coalesce, Debouncer, Settled};
use crate::watch::path_utils::{normalize_path, relative_str};
use crate::watch::polling::{changes_between, scan_blocking, ScanOutcome, ScanStats, Scanner};
use crate::watch::snapshot::{DirectorySnapshot, FileMeta};

/// Notifications buffered between the `notify` thread and the backend.
/// Filling it up is treated as a stream failure and triggers a resync.
pub const NOTIFY_CHANNEL_CAPACITY: usize = 4096;

type Notification = notify::Result<Event>;

pub struct NotifyBackend {
    scanner: Scanner,
    debouncer: Debouncer,
    emit_on_start: bool,
    min_file_size: Option<u64>,
    max_file_size: Option<u64>,
    /// Last reported state of every tracked file.
    known: Option<DirectorySnapshot>,
    watcher: Option<RecommendedWatcher>,
    rx: Option<mpsc::Receiver<Notification>>,
    overflowed: Arc<AtomicBool>,
    skipped: u64,
}

impl std::fmt::Debug for NotifyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyBackend")
            .field("root", &self.scanner.root())
            .field("subscribed", &self.watcher.is_some())
            .field("pending", &self.debouncer.len())
            .finish()
    }
}

impl NotifyBackend {
    pub fn new(scanner: Scanner, target: &WatchTarget, debounce: std::time::Duration) -> Self {
        Self {
            scanner,
            debouncer: Debouncer::new(debounce),
            emit_on_start: target.emit_on_start,
            min_file_size: target.min_file_size,
            max_file_size: target.max_file_size,
            known: None,
            watcher: None,
            rx: None,
            overflowed: Arc::new(AtomicBool::new(false)),
            skipped: 0,
        }
    }

    fn root(&self) -> &Path {
        self.scanner.root()
    }

    /// Full scan diffed against the known state. The first pass seeds the
    /// state, emitting everything only with `emit_on_start`.
    async fn resync_inner(&mut self) -> ChangeResult {
        let outcome = scan_blocking(&self.scanner).await?;
        let (snapshot, stats) = match outcome {
            ScanOutcome::Complete(snapshot, stats) => (snapshot, stats),
            ScanOutcome::Cancelled => return Ok(Vec::new()),
        };
        self.skipped += stats.skipped as u64;
        // A full scan supersedes anything still waiting to settle.
        self.debouncer.clear();

        let changes = match self.known.take() {
            Some(previous) => changes_between(&previous, &snapshot),
            None if self.emit_on_start => changes_between(&DirectorySnapshot::new(), &snapshot),
            None => Vec::new(),
        };
        debug!(
            root = %self.root().display(),
            files = snapshot.len(),
            changes = changes.len(),
            "resync complete"
        );
        self.known = Some(snapshot);
        Ok(changes)
    }

    /// Current metadata of a tracked file, or `None` if it is gone or is
    /// not something this target tracks.
    fn stat_file(&self, path: &Path) -> Option<FileMeta> {
        let fs = self.scanner.fs();
        let meta = if self.scanner.follow_symlinks() {
            fs.metadata(path).ok()?
        } else {
            fs.symlink_metadata(path).ok()?
        };
        (meta.kind == EntryKind::File).then_some(FileMeta {
            size: meta.size,
            modified: meta.modified,
        })
    }

    fn ingest(&mut self, event: Event, now: Instant) -> Result<(), BackendFailure> {
        let removal = match event.kind {
            // Renames arrive as modify events on both names; the stat at
            // settle time tells which side still exists.
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any => false,
            EventKind::Remove(_) => true,
            EventKind::Access(_) | EventKind::Other => return Ok(()),
        };

        for path in event.paths {
            if removal && path == self.root() {
                return Err(BackendFailure::RootUnavailable(format!(
                    "{} was removed",
                    self.root().display()
                )));
            }
            self.ingest_path(&path, now);
        }
        Ok(())
    }

    fn ingest_path(&mut self, path: &Path, now: Instant) {
        let Some(rel) = relative_str(self.root(), path) else {
            trace!(path = %path.display(), "notification outside watched root");
            return;
        };
        if rel.is_empty() {
            return;
        }
        if !self.scanner.recursive() && rel.contains('/') {
            return;
        }

        let norm = normalize_path(path);
        let link = self.scanner.fs().symlink_metadata(path).ok();
        let entry = match link {
            Some(meta) if meta.kind == EntryKind::Symlink && self.scanner.follow_symlinks() => {
                self.scanner.fs().metadata(path).ok()
            }
            other => other,
        };

        match entry.map(|m| m.kind) {
            Some(EntryKind::Dir) => {
                // A directory that appears at once (moved in, or created
                // with contents) only produces one notification.
                if self.scanner.recursive() && self.scanner.filter().allows_dir(&rel) {
                    let mut found = DirectorySnapshot::new();
                    let mut stats = ScanStats::default();
                    self.scanner.scan_subtree(path, &mut found, &mut stats);
                    self.skipped += stats.skipped as u64;
                    for (file, _) in found.iter() {
                        self.debouncer.record(file.clone(), now);
                    }
                }
            }
            None => {
                // Gone. If it was a directory, every file known below it
                // is gone too.
                if let Some(known) = &self.known {
                    let prefix = format!("{norm}/");
                    let below: Vec<String> = known
                        .iter()
                        .filter(|(p, _)| p.starts_with(&prefix))
                        .map(|(p, _)| p.clone())
                        .collect();
                    for file in below {
                        self.debouncer.record(file, now);
                    }
                }
                if self.scanner.filter().matches_file(&rel) {
                    self.debouncer.record(norm, now);
                }
            }
            Some(kind) => {
                if !self.scanner.filter().matches_file(&rel) {
                    return;
                }
                if let Some(meta) = entry.filter(|_| kind == EntryKind::File) {
                    if !self.size_in_range(meta.size) {
                        trace!(path = %norm, size = meta.size, "outside size bounds; not debounced");
                        return;
                    }
                }
                self.debouncer.record(norm, now);
            }
        }
    }

    fn size_in_range(&self, size: u64) -> bool {
        self.min_file_size.is_none_or(|min| size >= min)
            && self.max_file_size.is_none_or(|max| size <= max)
    }

    /// Resolve settled paths against disk and the known state.
    fn settle(&mut self, settled: Vec<Settled>) -> Vec<RawChange> {
        let mut changes = Vec::new();
        for Settled { path, notices } in settled {
            let after = self.stat_file(Path::new(&path));
            let Some(known) = self.known.as_mut() else {
                break;
            };
            let before = known.get(&path).copied();
            let Some(kind) = coalesce(before.as_ref(), after.as_ref()) else {
                trace!(path = %path, notices, "burst collapsed to nothing");
                continue;
            };
            match after {
                Some(meta) => known.insert(path.clone(), meta),
                None => {
                    known.remove(&path);
                }
            }
            changes.push(RawChange {
                path,
                kind,
                meta: if kind == EventType::Deleted { None } else { after },
            });
        }
        changes
    }

    async fn next_inner(&mut self) -> ChangeResult {
        if self.known.is_none() {
            return self.resync_inner().await;
        }

        loop {
            if self.overflowed.load(Ordering::SeqCst) {
                return Err(BackendFailure::Overflow);
            }

            let deadline = self.debouncer.next_deadline();
            let rx = self.rx.as_mut().ok_or(BackendFailure::ChannelClosed)?;
            let received = match deadline {
                Some(at) => {
                    let at = tokio::time::Instant::from_std(at);
                    tokio::time::timeout_at(at, rx.recv()).await.ok()
                }
                None => Some(rx.recv().await),
            };

            match received {
                Some(Some(Ok(event))) => self.ingest(event, Instant::now())?,
                Some(Some(Err(err))) => return Err(BackendFailure::Notify(err.to_string())),
                Some(None) => return Err(BackendFailure::ChannelClosed),
                None => {}
            }

            let settled = self.debouncer.flush_due(Instant::now());
            if !settled.is_empty() {
                let changes = self.settle(settled);
                if !changes.is_empty() {
                    return Ok(changes);
                }
            }
        }
    }
}

impl ChangeBackend for NotifyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Notify
    }

    fn start(&mut self) -> Result<(), BackendFailure> {
        self.scanner.reset();
        let (tx, rx) = mpsc::channel::<Notification>(NOTIFY_CHANNEL_CAPACITY);
        let overflowed = Arc::new(AtomicBool::new(false));

        let mut watcher = RecommendedWatcher::new(
            {
                let overflowed = Arc::clone(&overflowed);
                move |res: Notification| match tx.try_send(res) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => overflowed.store(true, Ordering::SeqCst),
                    // Receiver dropped: the backend is stopping.
                    Err(TrySendError::Closed(_)) => {}
                }
            },
            Config::default(),
        )
        .map_err(|err| BackendFailure::Notify(err.to_string()))?;

        let mode = if self.scanner.recursive() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        let root: PathBuf = self.root().to_path_buf();
        watcher
            .watch(&root, mode)
            .map_err(|err| BackendFailure::RootUnavailable(err.to_string()))?;

        info!(root = %root.display(), "notification watch started");
        self.watcher = Some(watcher);
        self.rx = Some(rx);
        self.overflowed = overflowed;
        Ok(())
    }

    fn next_changes(&mut self) -> ChangeFuture<'_> {
        Box::pin(self.next_inner())
    }

    fn resync(&mut self) -> ChangeFuture<'_> {
        Box::pin(self.resync_inner())
    }

    fn stop(&mut self) {
        self.scanner.cancel();
        // Dropping the watcher unsubscribes; dropping the receiver discards
        // anything still buffered.
        self.watcher = None;
        self.rx = None;
    }

    fn take_skipped_entries(&mut self) -> u64 {
        std::mem::take(&mut self.skipped)
    }
}
