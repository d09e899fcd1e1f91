// src/engine/supervisor.rs

//! Service lifecycle: start the writer, the watchers and the API layer in
//! that order, and shut them down in two phases (stop producers, then drain
//! the queue within the grace period).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::api::EventApi;
use crate::broadcast::BroadcastHub;
use crate::clock::Clock;
use crate::config::model::ConfigFile;
use crate::engine::queue::{ingest_queue, IngestSender, QueueStats};
use crate::engine::writer::{EventWriter, WriterStats, WriterStatsSnapshot};
use crate::errors::{FileEventsError, Result};
use crate::fs::{FileSystem, RealFileSystem};
use crate::store::{EventReader, EventStore};
use crate::types::RunMode;
use crate::watch::{DirectoryWatcher, WatcherStats, WatcherStatsSnapshot};

/// Final counters of a run.
#[derive(Debug, Clone, Default)]
pub struct ServiceSummary {
    pub watchers: Vec<(String, WatcherStatsSnapshot)>,
    pub writer: WriterStatsSnapshot,
    pub queue: QueueStats,
    /// Watchers that ended with a backend error.
    pub failed_watchers: usize,
    /// Whether the grace period ran out before the queue was drained.
    pub drain_timed_out: bool,
}

type WatcherResult = (String, Result<()>);

#[derive(Debug)]
pub struct Supervisor {
    config: ConfigFile,
    fs: Arc<dyn FileSystem>,
    clock: Clock,
}

impl Supervisor {
    pub fn new(config: ConfigFile) -> Self {
        Self {
            config,
            fs: Arc::new(RealFileSystem),
            clock: Clock::new(),
        }
    }

    pub fn with_filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run in `mode`. Continuous runs stop on Ctrl-C (or SIGTERM on Unix).
    pub async fn run(self, mode: RunMode) -> Result<ServiceSummary> {
        match mode {
            RunMode::Once => self.run_once().await,
            RunMode::Continuous => {
                let service = self.start().await?;
                service.run_until(shutdown_signal()).await
            }
        }
    }

    /// Open the store, seed the hub from its most recent rows, and build
    /// the writer. Also returns a read-only connection for the API.
    async fn prepare_writer(&self) -> Result<(EventWriter, IngestSender, BroadcastHub, EventReader)> {
        let settings = self.config.database.clone();
        let history_size = self.config.broadcast.history_size;
        let (store, history, reader) = tokio::task::spawn_blocking(move || {
            let store = EventStore::open(&settings)?;
            let history = store.recent(history_size)?;
            let reader = store.reader()?;
            Ok::<_, FileEventsError>((store, history, reader))
        })
        .await
        .map_err(|e| FileEventsError::Other(e.into()))??;

        let hub = BroadcastHub::new(self.config.broadcast);
        hub.seed_history(history);

        let service = &self.config.service;
        let (sender, receiver) = ingest_queue(service.ingest_queue_capacity, service.overflow_policy);
        let mut writer = EventWriter::new(store, receiver, hub.clone(), service, self.clock);
        writer.startup_maintenance().await?;
        Ok((writer, sender, hub, reader))
    }

    fn build_watchers(&self, sender: &IngestSender) -> Result<Vec<DirectoryWatcher>> {
        self.config
            .directories
            .iter()
            .map(|target| {
                DirectoryWatcher::for_target(
                    target.clone(),
                    &self.config.service,
                    Arc::clone(&self.fs),
                    sender.clone(),
                    self.clock,
                )
            })
            .collect()
    }

    /// Start every component for a continuous run.
    pub async fn start(self) -> Result<RunningService> {
        let (writer, sender, hub, reader) = self.prepare_writer().await?;
        let writer_stats = writer.stats();
        let writer_task = tokio::spawn(writer.run());
        info!("event writer running");

        let watchers = match self.build_watchers(&sender) {
            Ok(watchers) => watchers,
            Err(err) => {
                sender.close();
                let _ = writer_task.await;
                return Err(err);
            }
        };
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut watcher_stats = Vec::with_capacity(watchers.len());
        let mut tasks = JoinSet::new();
        for watcher in watchers {
            let root = watcher.root().to_string();
            watcher_stats.push((root.clone(), watcher.stats()));
            let stop = stop_rx.clone();
            tasks.spawn(async move { (root, watcher.run(stop).await) });
        }
        info!(watchers = tasks.len(), "directory watchers running");

        let api = EventApi::new(reader, hub.clone());
        info!("event API ready");

        Ok(RunningService {
            api,
            hub,
            sender,
            stop_tx,
            watchers: tasks,
            watcher_stats,
            writer: Some(writer_task),
            writer_stats,
            grace: self.config.service.shutdown_grace_period,
            failed_watchers: 0,
        })
    }

    /// Single pass: one detection cycle per watcher, flush, exit.
    pub async fn run_once(self) -> Result<ServiceSummary> {
        let (writer, sender, hub, _) = self.prepare_writer().await?;
        let writer_stats = writer.stats();
        let writer_task = tokio::spawn(writer.run());

        let watchers = self.build_watchers(&sender)?;
        let mut watcher_stats = Vec::with_capacity(watchers.len());
        let mut tasks = JoinSet::new();
        for mut watcher in watchers {
            let root = watcher.root().to_string();
            watcher_stats.push((root.clone(), watcher.stats()));
            tasks.spawn(async move {
                let result = watcher.run_once().await.map(|n| {
                    info!(root = %root, events = n, "single pass complete");
                });
                (root, result)
            });
        }

        let mut failed_watchers = 0;
        while let Some(joined) = tasks.join_next().await {
            if !log_watcher_exit(joined) {
                failed_watchers += 1;
            }
        }

        let queue = sender.stats();
        sender.close();
        drop(sender);
        writer_task
            .await
            .map_err(|e| FileEventsError::Other(e.into()))??;
        hub.close();

        Ok(ServiceSummary {
            watchers: snapshot_watchers(&watcher_stats),
            writer: writer_stats.snapshot(),
            queue,
            failed_watchers,
            drain_timed_out: false,
        })
    }
}

/// Handle to a running service.
pub struct RunningService {
    api: EventApi,
    hub: BroadcastHub,
    sender: IngestSender,
    stop_tx: watch::Sender<bool>,
    watchers: JoinSet<WatcherResult>,
    watcher_stats: Vec<(String, Arc<WatcherStats>)>,
    writer: Option<JoinHandle<Result<()>>>,
    writer_stats: Arc<WriterStats>,
    grace: Duration,
    failed_watchers: usize,
}

impl std::fmt::Debug for RunningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningService")
            .field("watchers", &self.watcher_stats.len())
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl RunningService {
    pub fn api(&self) -> &EventApi {
        &self.api
    }

    pub fn summary(&self) -> ServiceSummary {
        ServiceSummary {
            watchers: snapshot_watchers(&self.watcher_stats),
            writer: self.writer_stats.snapshot(),
            queue: self.sender.stats(),
            failed_watchers: self.failed_watchers,
            drain_timed_out: false,
        }
    }

    /// Run until `shutdown` resolves or the writer fails, then shut down.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<ServiceSummary>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut writer_failure: Option<FileEventsError> = None;

        loop {
            let Some(writer) = self.writer.as_mut() else {
                break;
            };
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                joined = writer => {
                    self.writer = None;
                    match joined {
                        Ok(Ok(())) => warn!("event writer exited before shutdown"),
                        Ok(Err(err)) => {
                            error!(error = %err, "event writer failed; shutting down");
                            writer_failure = Some(err);
                        }
                        Err(err) => {
                            error!(error = %err, "event writer task panicked; shutting down");
                            writer_failure = Some(FileEventsError::Other(err.into()));
                        }
                    }
                    break;
                }
                Some(joined) = self.watchers.join_next(), if !self.watchers.is_empty() => {
                    if !log_watcher_exit(joined) {
                        self.failed_watchers += 1;
                    }
                }
            }
        }

        let summary = self.shutdown().await?;
        match writer_failure {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    /// Stop watchers, close the queue, and let the writer drain within the
    /// grace period. Exceeding it abandons what is left with a warning.
    pub async fn shutdown(mut self) -> Result<ServiceSummary> {
        let deadline = Instant::now() + self.grace;
        let _ = self.stop_tx.send(true);

        // Phase one: producers stop.
        loop {
            match tokio::time::timeout_at(deadline, self.watchers.join_next()).await {
                Ok(Some(joined)) => {
                    if !log_watcher_exit(joined) {
                        self.failed_watchers += 1;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(remaining = self.watchers.len(), "watchers did not stop within grace period; aborting them");
                    self.watchers.abort_all();
                    break;
                }
            }
        }

        // Phase two: no new events; drain what is queued.
        let queue = self.sender.stats();
        self.sender.close();
        let mut drain_timed_out = false;
        let mut result = Ok(());
        if let Some(mut writer) = self.writer.take() {
            match tokio::time::timeout_at(deadline, &mut writer).await {
                Ok(Ok(writer_result)) => result = writer_result,
                Ok(Err(err)) => result = Err(FileEventsError::Other(err.into())),
                Err(_) => {
                    drain_timed_out = true;
                    warn!(
                        undrained = self.sender.stats().depth,
                        grace_ms = self.grace.as_millis() as u64,
                        "grace period exceeded; abandoning undrained events"
                    );
                    writer.abort();
                }
            }
        }
        self.hub.close();
        result?;

        info!("service stopped");
        Ok(ServiceSummary {
            watchers: snapshot_watchers(&self.watcher_stats),
            writer: self.writer_stats.snapshot(),
            queue,
            failed_watchers: self.failed_watchers,
            drain_timed_out,
        })
    }
}

fn snapshot_watchers(stats: &[(String, Arc<WatcherStats>)]) -> Vec<(String, WatcherStatsSnapshot)> {
    stats.iter().map(|(root, s)| (root.clone(), s.snapshot())).collect()
}

/// Log how a watcher task ended. Returns `false` for a failure.
fn log_watcher_exit(joined: std::result::Result<WatcherResult, tokio::task::JoinError>) -> bool {
    match joined {
        Ok((root, Ok(()))) => {
            info!(root = %root, "watcher finished");
            true
        }
        Ok((root, Err(err))) => {
            error!(root = %root, error = %err, "watcher failed; other watchers continue");
            false
        }
        Err(err) if err.is_cancelled() => true,
        Err(err) => {
            error!(error = %err, "watcher task panicked");
            false
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
