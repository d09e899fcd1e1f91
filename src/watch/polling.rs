// src/watch/polling.rs

//! Active re-scan backend.
//!
//! Every cycle walks the target tree into a fresh [`DirectorySnapshot`] and
//! diffs it against the previous one. The walk runs on the blocking pool and
//! checks a cancellation flag between directories, so a watcher that is
//! asked to stop mid-scan gets nothing rather than half a diff.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::model::WatchTarget;
use crate::event::EventType;
use crate::fs::{EntryKind, FileSystem};
use crate::types::BackendKind;
use crate::watch::backend::{BackendFailure, ChangeBackend, ChangeFuture, ChangeResult, RawChange};
use crate::watch::path_utils::{normalize_path, relative_str};
use crate::watch::patterns::TargetFilter;
use crate::watch::snapshot::{diff_snapshots, DirectorySnapshot, FileMeta};

/// Directory depth at which a walk stops descending. Bounds symlink cycles
/// when `follow_symlinks` is set.
pub const MAX_SCAN_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub files: usize,
    pub dirs: usize,
    /// Entries skipped because reading them failed.
    pub skipped: usize,
}

#[derive(Debug)]
pub enum ScanOutcome {
    Complete(DirectorySnapshot, ScanStats),
    Cancelled,
}

/// Everything needed to walk one target tree, cheap to clone into a
/// blocking task.
#[derive(Debug, Clone)]
pub struct Scanner {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    filter: Arc<TargetFilter>,
    recursive: bool,
    follow_symlinks: bool,
    cancel: Arc<AtomicBool>,
}

impl Scanner {
    pub fn new(fs: Arc<dyn FileSystem>, target: &WatchTarget, filter: Arc<TargetFilter>) -> Self {
        Self {
            fs,
            root: target.path.clone(),
            filter,
            recursive: target.recursive,
            follow_symlinks: target.follow_symlinks,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn filter(&self) -> &TargetFilter {
        &self.filter
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    pub fn follow_symlinks(&self) -> bool {
        self.follow_symlinks
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Walk the whole target tree.
    ///
    /// Fails only when the root itself cannot be listed; every other error
    /// skips the offending entry and is counted in [`ScanStats::skipped`].
    pub fn scan(&self) -> Result<ScanOutcome, BackendFailure> {
        match self.fs.metadata(&self.root) {
            Ok(meta) if meta.kind == EntryKind::Dir => {}
            Ok(_) => {
                return Err(BackendFailure::RootUnavailable(format!(
                    "{} is not a directory",
                    self.root.display()
                )));
            }
            Err(err) => return Err(BackendFailure::RootUnavailable(format!("{err:#}"))),
        }

        let mut snapshot = DirectorySnapshot::new();
        let mut stats = ScanStats::default();

        let root_entries = self
            .fs
            .read_dir(&self.root)
            .map_err(|err| BackendFailure::RootUnavailable(format!("{err:#}")))?;
        stats.dirs += 1;

        let mut stack: Vec<(Vec<PathBuf>, usize)> = vec![(root_entries, 0)];
        while let Some((entries, depth)) = stack.pop() {
            if self.cancelled() {
                return Ok(ScanOutcome::Cancelled);
            }
            for path in entries {
                if let Some(subdir) = self.visit(&path, depth, &mut snapshot, &mut stats) {
                    match self.fs.read_dir(&subdir) {
                        Ok(children) => {
                            stats.dirs += 1;
                            stack.push((children, depth + 1));
                        }
                        Err(err) => {
                            stats.skipped += 1;
                            debug!(path = %subdir.display(), error = %format!("{err:#}"), "skipping unreadable directory");
                        }
                    }
                }
            }
        }

        stats.files = snapshot.len();
        Ok(ScanOutcome::Complete(snapshot, stats))
    }

    /// Walk a single subdirectory (used when a whole directory appears at
    /// once under the notify backend). Files found are added to `snapshot`.
    pub fn scan_subtree(&self, dir: &Path, snapshot: &mut DirectorySnapshot, stats: &mut ScanStats) {
        let depth = relative_str(&self.root, dir)
            .map(|rel| rel.split('/').count())
            .unwrap_or(0);
        let mut stack = vec![(dir.to_path_buf(), depth)];
        while let Some((current, depth)) = stack.pop() {
            let entries = match self.fs.read_dir(&current) {
                Ok(entries) => entries,
                Err(err) => {
                    stats.skipped += 1;
                    debug!(path = %current.display(), error = %format!("{err:#}"), "skipping unreadable directory");
                    continue;
                }
            };
            stats.dirs += 1;
            for path in entries {
                if let Some(subdir) = self.visit(&path, depth, snapshot, stats) {
                    stack.push((subdir, depth + 1));
                }
            }
        }
    }

    /// Classify one entry. Files that pass the filter are recorded; a
    /// directory that should be descended into is returned.
    fn visit(
        &self,
        path: &Path,
        depth: usize,
        snapshot: &mut DirectorySnapshot,
        stats: &mut ScanStats,
    ) -> Option<PathBuf> {
        let Some(rel) = relative_str(&self.root, path) else {
            stats.skipped += 1;
            return None;
        };

        let mut meta = match self.fs.symlink_metadata(path) {
            Ok(meta) => meta,
            Err(err) => {
                stats.skipped += 1;
                trace!(path = %path.display(), error = %format!("{err:#}"), "skipping entry");
                return None;
            }
        };

        if meta.kind == EntryKind::Symlink {
            if !self.follow_symlinks {
                return None;
            }
            meta = match self.fs.metadata(path) {
                Ok(meta) => meta,
                Err(err) => {
                    stats.skipped += 1;
                    trace!(path = %path.display(), error = %format!("{err:#}"), "skipping dangling symlink");
                    return None;
                }
            };
        }

        match meta.kind {
            EntryKind::Dir => {
                if self.recursive && depth < MAX_SCAN_DEPTH && self.filter.allows_dir(&rel) {
                    Some(path.to_path_buf())
                } else {
                    None
                }
            }
            EntryKind::File => {
                if self.filter.matches_file(&rel) {
                    snapshot.insert(
                        normalize_path(path),
                        FileMeta {
                            size: meta.size,
                            modified: meta.modified,
                        },
                    );
                }
                None
            }
            _ => None,
        }
    }
}

/// Run one scan on the blocking pool.
pub(crate) async fn scan_blocking(scanner: &Scanner) -> Result<ScanOutcome, BackendFailure> {
    let scanner = scanner.clone();
    tokio::task::spawn_blocking(move || scanner.scan())
        .await
        .map_err(|err| BackendFailure::Scan(err.to_string()))?
}

/// Turn differ output into backend changes, attaching current metadata.
pub(crate) fn changes_between(previous: &DirectorySnapshot, current: &DirectorySnapshot) -> Vec<RawChange> {
    diff_snapshots(previous, current)
        .into_iter()
        .map(|change| {
            let meta = match change.kind {
                EventType::Deleted => None,
                _ => current.get(&change.path).copied(),
            };
            RawChange {
                path: change.path,
                kind: change.kind,
                meta,
            }
        })
        .collect()
}

/// Polling implementation of [`ChangeBackend`].
#[derive(Debug)]
pub struct PollingBackend {
    scanner: Scanner,
    emit_on_start: bool,
    interval: Duration,
    baseline: Option<DirectorySnapshot>,
    next_due: Option<Instant>,
    skipped: u64,
}

impl PollingBackend {
    /// `idle_sleep` is the floor for the pause between cycles.
    pub fn new(scanner: Scanner, target: &WatchTarget, idle_sleep: Duration) -> Self {
        Self {
            scanner,
            emit_on_start: target.emit_on_start,
            interval: target.poll_interval.max(idle_sleep),
            baseline: None,
            next_due: None,
            skipped: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn cycle(&mut self) -> ChangeResult {
        let outcome = scan_blocking(&self.scanner).await?;
        let (snapshot, stats) = match outcome {
            ScanOutcome::Complete(snapshot, stats) => (snapshot, stats),
            ScanOutcome::Cancelled => {
                debug!(root = %self.scanner.root().display(), "scan cancelled");
                return Ok(Vec::new());
            }
        };
        self.skipped += stats.skipped as u64;
        trace!(
            root = %self.scanner.root().display(),
            files = stats.files,
            dirs = stats.dirs,
            skipped = stats.skipped,
            "scan complete"
        );

        let changes = match self.baseline.take() {
            Some(previous) => changes_between(&previous, &snapshot),
            None if self.emit_on_start => changes_between(&DirectorySnapshot::new(), &snapshot),
            None => {
                debug!(
                    root = %self.scanner.root().display(),
                    files = snapshot.len(),
                    "seeded baseline"
                );
                Vec::new()
            }
        };
        self.baseline = Some(snapshot);
        Ok(changes)
    }
}

impl ChangeBackend for PollingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Polling
    }

    fn start(&mut self) -> Result<(), BackendFailure> {
        self.scanner.reset();
        Ok(())
    }

    fn next_changes(&mut self) -> ChangeFuture<'_> {
        Box::pin(async move {
            if let Some(due) = self.next_due {
                tokio::time::sleep_until(due).await;
            }
            let result = self.cycle().await;
            self.next_due = Some(Instant::now() + self.interval);
            result
        })
    }

    fn resync(&mut self) -> ChangeFuture<'_> {
        Box::pin(async move { self.cycle().await })
    }

    fn stop(&mut self) {
        self.scanner.cancel();
    }

    fn take_skipped_entries(&mut self) -> u64 {
        std::mem::take(&mut self.skipped)
    }
}
