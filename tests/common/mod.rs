#![allow(dead_code)]

pub use crm_file_events_test_utils::{builders, fake_backend, init_tracing, with_timeout};

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Map;

use crm_file_events::config::DatabaseSettings;
use crm_file_events::event::{EventType, FileEvent};
use crm_file_events::store::EventStore;

/// A minimal event for `path`, stamped `event_time` at the microsecond
/// precision the store keeps.
pub fn event_at(path: &str, kind: EventType, event_time: DateTime<Utc>) -> FileEvent {
    FileEvent {
        event_time: event_time.trunc_subsecs(6),
        event_type: kind,
        path: path.to_string(),
        project: Some("acme".to_string()),
        username: Some("jdoe".to_string()),
        file_size: match kind {
            EventType::Deleted => None,
            _ => Some(42),
        },
        checksum: None,
        details: Map::new(),
    }
}

pub fn event(path: &str, kind: EventType) -> FileEvent {
    event_at(path, kind, Utc::now())
}

/// Open a store with default settings at `path`.
pub fn open_store(path: &std::path::Path) -> EventStore {
    EventStore::open(&DatabaseSettings::for_path(path)).expect("open event store")
}
