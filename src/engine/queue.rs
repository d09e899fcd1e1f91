// src/engine/queue.rs

//! Bounded multi-producer, single-consumer ingest queue between the
//! directory watchers and the store writer.
//!
//! A plain `tokio::sync::mpsc` channel can only block when full. This queue
//! also supports evicting the oldest entry instead, and counts what it drops
//! so saturation is observable.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::event::FileEvent;
use crate::types::OverflowPolicy;

/// Returned by [`IngestSender::send`] once the queue has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("ingest queue is closed")]
pub struct QueueClosed;

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub depth: usize,
}

#[derive(Debug, Default)]
struct State {
    items: VecDeque<FileEvent>,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
    policy: OverflowPolicy,
    senders: AtomicUsize,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            state.closed = true;
            debug!(depth = state.items.len(), "ingest queue closed");
        }
        drop(state);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            depth: self.lock().items.len(),
        }
    }
}

/// Create a queue holding at most `capacity` events (clamped to 1).
pub fn ingest_queue(capacity: usize, policy: OverflowPolicy) -> (IngestSender, IngestReceiver) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::default()),
        not_empty: Notify::new(),
        not_full: Notify::new(),
        capacity: capacity.max(1),
        policy,
        senders: AtomicUsize::new(1),
        enqueued: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    });
    (
        IngestSender {
            shared: Arc::clone(&shared),
        },
        IngestReceiver { shared },
    )
}

/// Producer half. Cloneable; the queue closes when the last clone is
/// dropped or [`close`](Self::close) is called.
#[derive(Debug)]
pub struct IngestSender {
    shared: Arc<Shared>,
}

impl Clone for IngestSender {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for IngestSender {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.close();
        }
    }
}

impl IngestSender {
    /// Enqueue one event, applying the overflow policy when full.
    pub async fn send(&self, event: FileEvent) -> Result<(), QueueClosed> {
        let mut event = Some(event);
        loop {
            let mut notified = pin!(self.shared.not_full.notified());
            notified.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if state.closed {
                    return Err(QueueClosed);
                }
                if state.items.len() >= self.shared.capacity
                    && self.shared.policy == OverflowPolicy::DropOldest
                {
                    if let Some(evicted) = state.items.pop_front() {
                        let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(
                            path = %evicted.path,
                            event_type = %evicted.event_type,
                            dropped_total = dropped,
                            "ingest queue full; dropped oldest event"
                        );
                    }
                }
                if state.items.len() < self.shared.capacity {
                    if let Some(event) = event.take() {
                        state.items.push_back(event);
                    }
                    drop(state);
                    self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
                    self.shared.not_empty.notify_one();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats()
    }
}

/// Consumer half, owned by the writer.
#[derive(Debug)]
pub struct IngestReceiver {
    shared: Arc<Shared>,
}

impl Drop for IngestReceiver {
    fn drop(&mut self) {
        // Producers blocked on a full queue must not wait for a consumer
        // that is gone.
        self.shared.close();
    }
}

impl IngestReceiver {
    /// Wait until at least one event is queued. Returns `false` once the
    /// queue is closed and fully drained.
    ///
    /// Cancel-safe: nothing is dequeued.
    pub async fn wait_nonempty(&self) -> bool {
        loop {
            let mut notified = pin!(self.shared.not_empty.notified());
            notified.as_mut().enable();
            {
                let state = self.shared.lock();
                if !state.items.is_empty() {
                    return true;
                }
                if state.closed {
                    return false;
                }
            }
            notified.await;
        }
    }

    /// Take up to `max` queued events without waiting.
    pub fn try_drain(&self, max: usize) -> Vec<FileEvent> {
        let mut state = self.shared.lock();
        let n = max.min(state.items.len());
        let batch: Vec<FileEvent> = state.items.drain(..n).collect();
        drop(state);
        if !batch.is_empty() {
            self.shared.not_full.notify_waiters();
        }
        batch
    }

    /// Take up to `max` events, waiting at most `window` for the batch to
    /// fill once something is available.
    ///
    /// Not cancel-safe: events already taken live in the returned `Vec`.
    pub async fn collect_batch(&self, max: usize, window: Duration) -> Vec<FileEvent> {
        let max = max.max(1);
        let mut batch = self.try_drain(max);
        if batch.len() >= max || window.is_zero() {
            return batch;
        }

        let deadline = Instant::now() + window;
        while batch.len() < max {
            let mut notified = pin!(self.shared.not_empty.notified());
            notified.as_mut().enable();

            let more = self.try_drain(max - batch.len());
            if !more.is_empty() {
                batch.extend(more);
                continue;
            }
            if self.is_closed() {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }
        batch
    }

    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats()
    }
}
