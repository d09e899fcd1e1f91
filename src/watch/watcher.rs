// src/watch/watcher.rs

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Map, Number, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::model::{ScalarValue, ServiceSettings, WatchTarget};
use crate::engine::queue::IngestSender;
use crate::errors::{FileEventsError, Result};
use crate::event::{EventType, FileEvent, DETAILS_WATCHED_ROOT};
use crate::fs::FileSystem;
use crate::types::BackendKind;
use crate::watch::backend::{BackendFailure, ChangeBackend, RawChange};
use crate::watch::checksum::compute_checksum;
use crate::watch::notify_backend::NotifyBackend;
use crate::watch::path_utils::normalize_path;
use crate::watch::patterns::TargetFilter;
use crate::watch::polling::{PollingBackend, Scanner};

/// Consecutive failed resubscribe attempts before a notification watcher
/// gives up.
pub const MAX_RESUBSCRIBE_ATTEMPTS: u32 = 5;

/// Counters for one watcher. Shared through `Arc` so the supervisor can read
/// them while the watcher runs.
#[derive(Debug, Default)]
pub struct WatcherStats {
    pub cycles: AtomicU64,
    pub emitted: AtomicU64,
    pub suppressed: AtomicU64,
    pub skipped_entries: AtomicU64,
    pub checksum_failures: AtomicU64,
    pub backend_failures: AtomicU64,
    pub resyncs: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStatsSnapshot {
    pub cycles: u64,
    pub emitted: u64,
    pub suppressed: u64,
    pub skipped_entries: u64,
    pub checksum_failures: u64,
    pub backend_failures: u64,
    pub resyncs: u64,
}

impl WatcherStats {
    pub fn snapshot(&self) -> WatcherStatsSnapshot {
        WatcherStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            skipped_entries: self.skipped_entries.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
        }
    }
}

/// Build the backend a target asks for.
pub fn build_backend(
    target: &WatchTarget,
    service: &ServiceSettings,
    fs: Arc<dyn FileSystem>,
) -> Result<Box<dyn ChangeBackend>> {
    let filter = Arc::new(
        TargetFilter::compile(target)
            .map_err(|e| FileEventsError::Config(format!("directory {:?}: {e:#}", target.path)))?,
    );
    let scanner = Scanner::new(fs, target, filter);
    Ok(match target.backend {
        BackendKind::Polling => Box::new(PollingBackend::new(scanner, target, service.idle_sleep_interval)),
        BackendKind::Notify => Box::new(NotifyBackend::new(scanner, target, service.debounce_interval)),
    })
}

/// One watch target: its backend plus the per-target event policy (size
/// bounds, checksums, metadata stamping).
pub struct DirectoryWatcher {
    backend: Box<dyn ChangeBackend>,
    sink: EventSink,
    stats: Arc<WatcherStats>,
    root: String,
    recovery_backoff: Duration,
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("root", &self.root)
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl DirectoryWatcher {
    pub fn new(
        target: WatchTarget,
        backend: Box<dyn ChangeBackend>,
        fs: Arc<dyn FileSystem>,
        sender: IngestSender,
        clock: Clock,
    ) -> Self {
        let root = normalize_path(&target.path);
        let recovery_backoff = target.poll_interval;
        let stats = Arc::new(WatcherStats::default());
        let policy = EventPolicy {
            details: Arc::new(base_details(&target, &root, backend.kind())),
            target: Arc::new(target),
            fs,
            stats: Arc::clone(&stats),
            clock,
        };
        Self {
            backend,
            sink: EventSink {
                policy,
                sender,
                root: root.clone(),
            },
            stats,
            root,
            recovery_backoff,
        }
    }

    /// Watcher with the backend selected by the target's configuration.
    pub fn for_target(
        target: WatchTarget,
        service: &ServiceSettings,
        fs: Arc<dyn FileSystem>,
        sender: IngestSender,
        clock: Clock,
    ) -> Result<Self> {
        let backend = build_backend(&target, service, Arc::clone(&fs))?;
        Ok(Self::new(target, backend, fs, sender, clock))
    }

    /// Base delay between resubscribe attempts; attempt `n` waits `n` times
    /// this long.
    pub fn with_recovery_backoff(mut self, backoff: Duration) -> Self {
        self.recovery_backoff = backoff;
        self
    }

    pub fn stats(&self) -> Arc<WatcherStats> {
        Arc::clone(&self.stats)
    }

    pub fn target(&self) -> &WatchTarget {
        &self.sink.policy.target
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// One detection cycle, for single-pass runs. Returns the number of
    /// events enqueued.
    pub async fn run_once(&mut self) -> Result<usize> {
        let result = self.backend.resync().await;
        self.collect_skipped();
        let changes = result.map_err(|failure| {
            self.stats.backend_failures.fetch_add(1, Ordering::Relaxed);
            self.backend_error(&failure.to_string())
        })?;
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        self.sink.emit(changes).await
    }

    /// Watch until `stop` flips to `true` (or its sender is dropped), the
    /// ingest queue closes, or the backend cannot be recovered.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Result<()> {
        info!(
            root = %self.root,
            backend = %self.backend.kind(),
            "directory watcher started"
        );

        if let Err(failure) = self.backend.start() {
            if !self.recover(failure, &mut stop).await? {
                self.backend.stop();
                return Ok(());
            }
        }

        let mut polling_failures: u32 = 0;
        loop {
            if *stop.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = stop.changed() => break,
                next = self.backend.next_changes() => next,
            };
            self.collect_skipped();

            match next {
                Ok(changes) => {
                    if polling_failures > 0 {
                        info!(root = %self.root, "watched root available again");
                        polling_failures = 0;
                    }
                    self.stats.cycles.fetch_add(1, Ordering::Relaxed);
                    if let Err(err) = self.sink.emit(changes).await {
                        debug!(root = %self.root, error = %err, "stopping watcher");
                        break;
                    }
                }
                Err(failure) if self.backend.kind() == BackendKind::Polling => {
                    // The next cycle is the retry.
                    self.stats.backend_failures.fetch_add(1, Ordering::Relaxed);
                    polling_failures += 1;
                    if polling_failures == 1 {
                        warn!(root = %self.root, error = %failure, "scan failed; retrying every cycle");
                    } else {
                        debug!(root = %self.root, error = %failure, attempts = polling_failures, "scan still failing");
                    }
                }
                Err(failure) => {
                    if !self.recover(failure, &mut stop).await? {
                        break;
                    }
                }
            }
        }

        self.backend.stop();
        info!(root = %self.root, "directory watcher stopped");
        Ok(())
    }

    /// Resubscribe after a backend failure, re-synchronising with a full
    /// scan first. `Ok(false)` means a stop was requested meanwhile.
    async fn recover(&mut self, failure: BackendFailure, stop: &mut watch::Receiver<bool>) -> Result<bool> {
        self.stats.backend_failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            root = %self.root,
            backend = %self.backend.kind(),
            error = %failure,
            "watch backend failed; attempting recovery"
        );
        self.backend.stop();

        let mut last_error = failure.to_string();
        for attempt in 1..=MAX_RESUBSCRIBE_ATTEMPTS {
            let delay = self.recovery_backoff * attempt;
            tokio::select! {
                biased;
                _ = stop.changed() => return Ok(false),
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(err) = self.backend.start() {
                warn!(root = %self.root, attempt, error = %err, "resubscribe failed");
                last_error = err.to_string();
                continue;
            }

            match self.backend.resync().await {
                Ok(changes) => {
                    self.collect_skipped();
                    self.stats.resyncs.fetch_add(1, Ordering::Relaxed);
                    info!(root = %self.root, attempt, missed = changes.len(), "watch backend recovered");
                    if self.sink.emit(changes).await.is_err() {
                        return Ok(false);
                    }
                    return Ok(true);
                }
                Err(err) => {
                    warn!(root = %self.root, attempt, error = %err, "resync after resubscribe failed");
                    last_error = err.to_string();
                    self.backend.stop();
                }
            }
        }

        Err(self.backend_error(&format!(
            "giving up after {MAX_RESUBSCRIBE_ATTEMPTS} attempts: {last_error}"
        )))
    }

    fn backend_error(&self, reason: &str) -> FileEventsError {
        FileEventsError::Backend {
            target: self.sink.policy.target.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn collect_skipped(&mut self) {
        let skipped = self.backend.take_skipped_entries();
        if skipped > 0 {
            self.stats.skipped_entries.fetch_add(skipped, Ordering::Relaxed);
        }
    }
}

/// Policy plus the queue it feeds. Kept apart from the backend so `emit`
/// only borrows `Sync` state across its awaits.
struct EventSink {
    policy: EventPolicy,
    sender: IngestSender,
    root: String,
}

impl EventSink {
    /// Apply policy to `changes` and enqueue the survivors in order.
    async fn emit(&self, changes: Vec<RawChange>) -> Result<usize> {
        if changes.is_empty() {
            return Ok(0);
        }

        let events = if self.policy.target.compute_checksum {
            let policy = self.policy.clone();
            tokio::task::spawn_blocking(move || policy.apply(changes))
                .await
                .map_err(|e| FileEventsError::Other(e.into()))?
        } else {
            self.policy.apply(changes)
        };

        let count = events.len();
        for event in events {
            self.sender
                .send(event)
                .await
                .map_err(|e| FileEventsError::Shutdown(e.to_string()))?;
            self.policy.stats.emitted.fetch_add(1, Ordering::Relaxed);
        }
        if count > 0 {
            debug!(root = %self.root, events = count, "enqueued events");
        }
        Ok(count)
    }
}

/// Everything turning changes into events needs. Cheap to clone onto the
/// blocking pool when checksums are computed.
#[derive(Clone)]
struct EventPolicy {
    target: Arc<WatchTarget>,
    fs: Arc<dyn FileSystem>,
    stats: Arc<WatcherStats>,
    clock: Clock,
    details: Arc<Map<String, Value>>,
}

impl EventPolicy {
    fn apply(&self, changes: Vec<RawChange>) -> Vec<FileEvent> {
        changes.into_iter().filter_map(|c| self.to_event(c)).collect()
    }

    fn to_event(&self, change: RawChange) -> Option<FileEvent> {
        let file_size = match change.kind {
            EventType::Deleted => None,
            _ => change.meta.map(|m| m.size),
        };

        // Deletions are always reported, whatever the file's last size.
        if let Some(size) = file_size {
            if !self.target.size_in_range(size) {
                self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
                debug!(path = %change.path, size, kind = %change.kind, "outside size bounds; suppressed");
                return None;
            }
        }

        let checksum = if self.target.compute_checksum && change.kind != EventType::Deleted {
            match compute_checksum(
                self.fs.as_ref(),
                Path::new(&change.path),
                self.target.checksum_algorithm,
            ) {
                Ok(digest) => Some(digest),
                Err(err) => {
                    self.stats.checksum_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(path = %change.path, error = %format!("{err:#}"), "checksum failed");
                    None
                }
            }
        } else {
            None
        };

        Some(FileEvent {
            event_time: self.clock.now(),
            event_type: change.kind,
            path: change.path,
            project: self.target.project.clone(),
            username: self.target.username.clone(),
            file_size,
            checksum,
            details: (*self.details).clone(),
        })
    }
}

/// `details` shared by every event of a target: its metadata map plus the
/// watched root and backend, which take precedence over metadata keys of
/// the same name.
fn base_details(target: &WatchTarget, root: &str, backend: BackendKind) -> Map<String, Value> {
    let mut details: Map<String, Value> = target
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), scalar_to_json(v)))
        .collect();
    details.insert(DETAILS_WATCHED_ROOT.to_string(), Value::String(root.to_string()));
    details.insert("backend".to_string(), Value::String(backend.as_str().to_string()));
    details
}

fn scalar_to_json(value: &ScalarValue) -> Value {
    match value {
        ScalarValue::Bool(b) => Value::Bool(*b),
        ScalarValue::Int(i) => Value::Number((*i).into()),
        ScalarValue::Float(f) => Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        ScalarValue::Text(s) => Value::String(s.clone()),
    }
}
