// src/store/schema.rs

//! Table layout, connection tuning, and row mapping.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::model::{DatabaseSettings, ScalarValue};
use crate::event::{parse_event_time, EventType, FileEvent, StoredEvent};

pub const SCHEMA_SQL: &str = r"
    CREATE TABLE IF NOT EXISTS file_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_time TEXT NOT NULL,
        event_type TEXT NOT NULL,
        path TEXT NOT NULL,
        project TEXT,
        username TEXT,
        file_size INTEGER,
        checksum TEXT,
        details TEXT NOT NULL DEFAULT '{}'
    );
    CREATE INDEX IF NOT EXISTS idx_file_events_event_time ON file_events(event_time);
    CREATE INDEX IF NOT EXISTS idx_file_events_path ON file_events(path);
";

/// Columns in the order [`row_to_event`] expects them.
pub const EVENT_COLUMNS: &str =
    "id, event_time, event_type, path, project, username, file_size, checksum, details";

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

/// Apply lock-wait and durability settings. Called once per connection,
/// right after it is opened.
pub fn apply_pragmas(conn: &Connection, settings: &DatabaseSettings) -> rusqlite::Result<()> {
    conn.busy_timeout(settings.busy_timeout)?;

    let mode: String = conn.pragma_update_and_check(None, "journal_mode", &settings.journal_mode, |row| {
        row.get(0)
    })?;
    if !mode.eq_ignore_ascii_case(&settings.journal_mode) {
        warn!(requested = %settings.journal_mode, effective = %mode, "journal mode not applied");
    }

    if let Some(sync) = &settings.synchronous {
        conn.pragma_update(None, "synchronous", sync)?;
    }

    for (name, value) in &settings.pragmas {
        debug!(pragma = %name, value = %value, "applying pragma");
        conn.pragma_update(None, name, scalar_to_sql(value))?;
    }
    Ok(())
}

fn scalar_to_sql(value: &ScalarValue) -> SqlValue {
    match value {
        ScalarValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        ScalarValue::Int(i) => SqlValue::Integer(*i),
        ScalarValue::Float(f) => SqlValue::Real(*f),
        ScalarValue::Text(s) => SqlValue::Text(s.clone()),
    }
}

/// Map a row selected with [`EVENT_COLUMNS`].
pub fn row_to_event(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    let id: i64 = row.get(0)?;
    let raw_time: String = row.get(1)?;
    let raw_type: String = row.get(2)?;
    let file_size: Option<i64> = row.get(6)?;
    let raw_details: Option<String> = row.get(8)?;

    let event_time = parse_event_time(&raw_time).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("invalid event_time {raw_time:?}").into(),
        )
    })?;
    let event_type: EventType = raw_type.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    let details = raw_details
        .and_then(|raw| serde_json::from_str::<Map<String, Value>>(&raw).ok())
        .unwrap_or_default();

    Ok(StoredEvent {
        id,
        event: FileEvent {
            event_time,
            event_type,
            path: row.get(3)?,
            project: row.get(4)?,
            username: row.get(5)?,
            file_size: file_size.and_then(|s| u64::try_from(s).ok()),
            checksum: row.get(7)?,
            details,
        },
    })
}
