// src/engine/writer.rs

//! The single task that owns the writable store.
//!
//! It drains the ingest queue in batches bounded by `max_events_per_batch`
//! or `batch_window`, commits each batch in one transaction, publishes the
//! committed rows to the broadcast hub, and runs periodic maintenance in
//! between batches.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::broadcast::BroadcastHub;
use crate::clock::Clock;
use crate::config::model::ServiceSettings;
use crate::engine::queue::IngestReceiver;
use crate::errors::{FileEventsError, Result};
use crate::event::{FileEvent, StoredEvent};
use crate::store::{EventStore, MaintenanceReport};

/// Commit attempts per batch before a write failure is treated as
/// persistent.
pub const WRITE_ATTEMPTS: u32 = 3;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
pub struct WriterStats {
    pub batches: AtomicU64,
    pub events: AtomicU64,
    pub max_batch: AtomicU64,
    pub retries: AtomicU64,
    pub maintenance_runs: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStatsSnapshot {
    pub batches: u64,
    pub events: u64,
    pub max_batch: u64,
    pub retries: u64,
    pub maintenance_runs: u64,
}

impl WriterStats {
    pub fn snapshot(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            max_batch: self.max_batch.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            maintenance_runs: self.maintenance_runs.load(Ordering::Relaxed),
        }
    }

    fn record_batch(&self, size: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.events.fetch_add(size as u64, Ordering::Relaxed);
        self.max_batch.fetch_max(size as u64, Ordering::Relaxed);
    }
}

/// Make event times non-decreasing across the batch, in queue order.
pub fn clamp_event_times(batch: &mut [FileEvent]) {
    for i in 1..batch.len() {
        if batch[i].event_time < batch[i - 1].event_time {
            batch[i].event_time = batch[i - 1].event_time;
        }
    }
}

#[derive(Debug)]
pub struct EventWriter {
    /// `None` only while a blocking store call is in flight.
    store: Option<EventStore>,
    receiver: IngestReceiver,
    hub: BroadcastHub,
    clock: Clock,
    max_batch: usize,
    batch_window: Duration,
    maintenance_interval: Option<Duration>,
    stats: Arc<WriterStats>,
}

impl EventWriter {
    pub fn new(
        store: EventStore,
        receiver: IngestReceiver,
        hub: BroadcastHub,
        service: &ServiceSettings,
        clock: Clock,
    ) -> Self {
        let maintenance_interval = if store.settings().maintenance_enabled() {
            store.settings().maintenance_interval
        } else {
            None
        };
        Self {
            store: Some(store),
            receiver,
            hub,
            clock,
            max_batch: service.max_events_per_batch.max(1),
            batch_window: service.batch_window,
            maintenance_interval,
            stats: Arc::new(WriterStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<WriterStats> {
        Arc::clone(&self.stats)
    }

    /// Run `f` against the store on the blocking pool.
    async fn with_store<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut EventStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut store = self
            .store
            .take()
            .ok_or_else(|| FileEventsError::Shutdown("event store is closed".to_string()))?;
        let (store, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut store);
            (store, result)
        })
        .await
        .map_err(|e| FileEventsError::Other(e.into()))?;
        self.store = Some(store);
        result
    }

    /// Startup work configured on the store: vacuum first, then retention.
    pub async fn startup_maintenance(&mut self) -> Result<()> {
        let settings = match &self.store {
            Some(store) => store.settings().clone(),
            None => return Ok(()),
        };
        if settings.vacuum_on_start {
            info!("vacuuming event store at startup");
            self.with_store(|store| store.vacuum()).await?;
        }
        if settings.maintenance_on_start {
            self.maintain().await;
        }
        Ok(())
    }

    /// Retention and optional vacuum. Failures are logged; the next write
    /// surfaces a store that is really broken.
    async fn maintain(&mut self) -> Option<MaintenanceReport> {
        let reference = self.clock.now();
        match self.with_store(move |store| store.run_maintenance(reference)).await {
            Ok(report) => {
                self.stats.maintenance_runs.fetch_add(1, Ordering::Relaxed);
                Some(report)
            }
            Err(err) => {
                warn!(error = %err, "maintenance failed");
                None
            }
        }
    }

    /// Commit one batch, retrying briefly, then publish it.
    async fn commit(&mut self, mut batch: Vec<FileEvent>) -> Result<Vec<StoredEvent>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        clamp_event_times(&mut batch);

        let mut attempt = 1;
        loop {
            let (result, returned) = self
                .with_store(move |store| {
                    let result = store.insert_batch(&batch);
                    Ok((result, batch))
                })
                .await?;

            match result {
                Ok(stored) => {
                    self.stats.record_batch(stored.len());
                    self.hub.publish(&stored);
                    debug!(events = stored.len(), attempt, "batch stored");
                    return Ok(stored);
                }
                Err(err) if attempt < WRITE_ATTEMPTS => {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, attempt, events = returned.len(), "batch commit failed; retrying");
                    batch = returned;
                    attempt += 1;
                    tokio::time::sleep(WRITE_RETRY_DELAY * attempt).await;
                }
                Err(err) => {
                    error!(error = %err, events = returned.len(), "batch commit failed permanently");
                    return Err(err);
                }
            }
        }
    }

    /// Drain the queue until it is closed and empty, then close the store.
    ///
    /// Returns an error only for a persistent store failure.
    pub async fn run(mut self) -> Result<()> {
        info!(
            max_batch = self.max_batch,
            batch_window_ms = self.batch_window.as_millis() as u64,
            maintenance_interval = ?self.maintenance_interval,
            "event writer started"
        );

        let mut maintenance = self.maintenance_interval.map(|period| {
            let mut tick = tokio::time::interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick
        });

        loop {
            // Only the cancel-safe wait races the tick; batches are collected
            // outside the select so no dequeued event can be dropped.
            let ready = match maintenance.as_mut() {
                Some(tick) => tokio::select! {
                    ready = self.receiver.wait_nonempty() => ready,
                    _ = tick.tick() => {
                        self.maintain().await;
                        continue;
                    }
                },
                None => self.receiver.wait_nonempty().await,
            };
            if !ready {
                break;
            }

            let batch = self
                .receiver
                .collect_batch(self.max_batch, self.batch_window)
                .await;
            self.commit(batch).await?;
        }

        let stats = self.stats.snapshot();
        info!(batches = stats.batches, events = stats.events, "event writer drained");
        self.close().await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(store) = self.store.take() {
            tokio::task::spawn_blocking(move || store.close())
                .await
                .map_err(|e| FileEventsError::Other(e.into()))??;
        }
        Ok(())
    }
}
