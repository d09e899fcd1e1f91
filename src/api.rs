// src/api.rs

//! Narrow query and subscription surface for an HTTP/WebSocket layer.
//!
//! Everything here is read-only: queries go through a separate read-only
//! connection on the blocking pool, and subscriptions come from the
//! broadcast hub.

use std::sync::Arc;

use crate::broadcast::{BroadcastHub, Subscription};
use crate::errors::{FileEventsError, Result};
use crate::event::StoredEvent;
use crate::store::EventReader;

pub use crate::store::{EventQuery, DEFAULT_QUERY_LIMIT};

#[derive(Debug, Clone)]
pub struct EventApi {
    reader: Arc<EventReader>,
    hub: BroadcastHub,
}

impl EventApi {
    pub fn new(reader: EventReader, hub: BroadcastHub) -> Self {
        Self {
            reader: Arc::new(reader),
            hub,
        }
    }

    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&EventReader) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let reader = Arc::clone(&self.reader);
        tokio::task::spawn_blocking(move || f(&reader))
            .await
            .map_err(|e| FileEventsError::Other(e.into()))?
    }

    /// Most recent events matching `query`, newest first.
    pub async fn recent_events(&self, query: EventQuery) -> Result<Vec<StoredEvent>> {
        self.read(move |reader| reader.recent_events(&query)).await
    }

    /// Events committed after `after_id`, oldest first. Lets a client that
    /// was disconnected catch up from the last id it saw.
    pub async fn events_after(&self, after_id: i64, limit: usize) -> Result<Vec<StoredEvent>> {
        self.read(move |reader| reader.events_after(after_id, limit)).await
    }

    pub async fn count(&self) -> Result<u64> {
        self.read(|reader| reader.count()).await
    }

    /// Live stream of new events, preceded by up to `replay` recent ones.
    pub fn subscribe(&self, replay: usize) -> Subscription {
        self.hub.subscribe(replay)
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }
}
