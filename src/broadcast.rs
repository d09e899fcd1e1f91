// src/broadcast.rs

//! Fan-out of committed events to live subscribers.
//!
//! Each subscriber gets a bounded queue. Publishing never waits: a
//! subscriber whose queue is full is disconnected and the event stays in
//! the store and in the replay history.
//!
//! Replay and live delivery are decided under one lock. A subscriber
//! registered while holding it sees exactly the history up to that point
//! and then every later publish, with nothing missed or repeated.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::config::model::BroadcastConfig;
use crate::event::StoredEvent;

#[derive(Debug, Default)]
struct HubState {
    subscribers: HashMap<u64, mpsc::Sender<StoredEvent>>,
    history: VecDeque<StoredEvent>,
}

#[derive(Debug)]
struct HubInner {
    state: Mutex<HubState>,
    queue_size: usize,
    history_size: usize,
    next_id: AtomicU64,
    disconnected: AtomicU64,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState::default()),
                queue_size: config.subscriber_queue_size.max(1),
                history_size: config.history_size,
                next_id: AtomicU64::new(1),
                disconnected: AtomicU64::new(0),
            }),
        }
    }

    /// Preload the replay history, oldest first. Typically the store's most
    /// recent rows at startup.
    pub fn seed_history(&self, events: Vec<StoredEvent>) {
        let mut state = self.inner.lock();
        state.history.clear();
        let skip = events.len().saturating_sub(self.inner.history_size);
        state.history.extend(events.into_iter().skip(skip));
        debug!(seeded = state.history.len(), "broadcast history seeded");
    }

    /// Deliver freshly committed events, in order, to every subscriber.
    pub fn publish(&self, events: &[StoredEvent]) {
        if events.is_empty() {
            return;
        }
        let mut state = self.inner.lock();

        for event in events {
            state.history.push_back(event.clone());
        }
        while state.history.len() > self.inner.history_size {
            state.history.pop_front();
        }

        let mut dropped: Vec<(u64, bool)> = Vec::new();
        for (id, tx) in &state.subscribers {
            for event in events {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped.push((*id, true));
                        break;
                    }
                    Err(TrySendError::Closed(_)) => {
                        dropped.push((*id, false));
                        break;
                    }
                }
            }
        }

        for (id, slow) in dropped {
            state.subscribers.remove(&id);
            self.inner.disconnected.fetch_add(1, Ordering::Relaxed);
            if slow {
                warn!(subscriber = id, queue_size = self.inner.queue_size, "subscriber too slow; disconnected");
            } else {
                debug!(subscriber = id, "subscriber gone");
            }
        }
    }

    /// Register a subscriber that first receives up to `replay` of the most
    /// recent events (bounded by the history size), then live events.
    pub fn subscribe(&self, replay: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.queue_size);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut state = self.inner.lock();
        let skip = state.history.len().saturating_sub(replay);
        let replayed: VecDeque<StoredEvent> = state.history.iter().skip(skip).cloned().collect();
        state.subscribers.insert(id, tx);
        drop(state);

        debug!(subscriber = id, replay = replayed.len(), "subscriber connected");
        Subscription {
            id,
            replay: replayed,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    /// Subscribers removed because they were slow or went away.
    pub fn disconnected(&self) -> u64 {
        self.inner.disconnected.load(Ordering::Relaxed)
    }

    /// Drop every subscriber; their streams end after what is queued.
    pub fn close(&self) {
        self.inner.lock().subscribers.clear();
    }
}

/// One subscriber's ordered stream: replayed events, then live ones.
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    replay: VecDeque<StoredEvent>,
    rx: mpsc::Receiver<StoredEvent>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the hub has disconnected this subscriber
    /// and its queue is drained.
    pub async fn recv(&mut self) -> Option<StoredEvent> {
        if let Some(event) = self.replay.pop_front() {
            return Some(event);
        }
        self.rx.recv().await
    }

    /// Next event if one is ready right now.
    pub fn try_recv(&mut self) -> Option<StoredEvent> {
        self.replay.pop_front().or_else(|| self.rx.try_recv().ok())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            inner.lock().subscribers.remove(&self.id);
        }
    }
}
