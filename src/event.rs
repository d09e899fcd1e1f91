// src/event.rs

//! The persisted event record and its helpers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which the watched root is recorded in `details`.
pub const DETAILS_WATCHED_ROOT: &str = "watched_root";

/// Kind of change recorded for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Created,
    Modified,
    Deleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Modified => "modified",
            EventType::Deleted => "deleted",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(EventType::Created),
            "modified" => Ok(EventType::Modified),
            "deleted" => Ok(EventType::Deleted),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// One detected file change, attributed to the owning watch target.
///
/// Immutable once handed to the ingest queue. `file_size` is `None` for
/// deletions; `checksum` is only set when the target computes checksums and
/// the file was readable at detection time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEvent {
    pub event_time: DateTime<Utc>,
    pub event_type: EventType,
    pub path: String,
    pub project: Option<String>,
    pub username: Option<String>,
    pub file_size: Option<u64>,
    pub checksum: Option<String>,
    pub details: Map<String, Value>,
}

impl FileEvent {
    /// The watched root recorded in `details`, if present.
    pub fn watched_root(&self) -> Option<&str> {
        self.details.get(DETAILS_WATCHED_ROOT).and_then(Value::as_str)
    }
}

/// A committed event together with its store identity.
///
/// `id` increases with commit order and is what "most recent N" and replay
/// are ordered by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    #[serde(flatten)]
    pub event: FileEvent,
}

/// Render an event time the way it is stored: RFC 3339, microseconds, `Z`.
///
/// The fixed width keeps text comparison in SQL chronological.
pub fn format_event_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored event time back into UTC.
pub fn parse_event_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
