// src/store/reader.rs

//! Read-only access to stored events for the API layer.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use crate::config::model::DatabaseSettings;
use crate::errors::Result;
use crate::event::{format_event_time, EventType, StoredEvent};
use crate::store::schema::{row_to_event, EVENT_COLUMNS};

pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Filters for [`EventReader::recent_events`]. Results are newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventQuery {
    pub limit: usize,
    pub offset: usize,
    pub project: Option<String>,
    pub username: Option<String>,
    pub event_type: Option<EventType>,
    /// Only events at or after this time.
    pub since: Option<DateTime<Utc>>,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
            project: None,
            username: None,
            event_type: None,
            since: None,
        }
    }
}

impl EventQuery {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub(crate) fn query_recent(conn: &Connection, query: &EventQuery) -> rusqlite::Result<Vec<StoredEvent>> {
    let mut sql = format!("SELECT {EVENT_COLUMNS} FROM file_events");
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();

    if let Some(project) = &query.project {
        clauses.push("project = ?");
        values.push(SqlValue::Text(project.clone()));
    }
    if let Some(username) = &query.username {
        clauses.push("username = ?");
        values.push(SqlValue::Text(username.clone()));
    }
    if let Some(kind) = query.event_type {
        clauses.push("event_type = ?");
        values.push(SqlValue::Text(kind.as_str().to_string()));
    }
    if let Some(since) = &query.since {
        clauses.push("event_time >= ?");
        values.push(SqlValue::Text(format_event_time(since)));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY id DESC LIMIT ? OFFSET ?");
    values.push(SqlValue::Integer(to_i64(query.limit)));
    values.push(SqlValue::Integer(to_i64(query.offset)));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), row_to_event)?;
    rows.collect()
}

pub(crate) fn query_after(conn: &Connection, after_id: i64, limit: usize) -> rusqlite::Result<Vec<StoredEvent>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {EVENT_COLUMNS} FROM file_events WHERE id > ?1 ORDER BY id ASC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![after_id, to_i64(limit)], row_to_event)?;
    rows.collect()
}

pub(crate) fn count_events(conn: &Connection) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM file_events", [], |row| row.get(0))?;
    Ok(u64::try_from(n).unwrap_or(0))
}

/// A separate read-only connection. Never takes the write lock, and waits
/// on the configured busy timeout like the writer does.
#[derive(Debug)]
pub struct EventReader {
    conn: Mutex<Connection>,
}

impl EventReader {
    pub fn open(path: &Path, settings: &DatabaseSettings) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(settings.busy_timeout)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Most recent events matching `query`, newest first.
    pub fn recent_events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>> {
        Ok(query_recent(&self.lock(), query)?)
    }

    /// Events committed after `after_id`, oldest first.
    pub fn events_after(&self, after_id: i64, limit: usize) -> Result<Vec<StoredEvent>> {
        Ok(query_after(&self.lock(), after_id, limit)?)
    }

    pub fn count(&self) -> Result<u64> {
        Ok(count_events(&self.lock())?)
    }
}
