// src/store/maintenance.rs

//! Retention and space reclamation.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use crate::config::model::DatabaseSettings;
use crate::event::format_event_time;

/// Process-local maintenance bookkeeping. Derived from configuration at
/// open and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceState {
    pub retention_days: Option<u32>,
    /// `None` deletes every expired row in one statement.
    pub batch_size: Option<usize>,
    pub interval: Option<Duration>,
    pub vacuum_on_maintenance: bool,
    pub last_run: Option<DateTime<Utc>>,
}

impl MaintenanceState {
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self {
            retention_days: settings.retention_days,
            batch_size: settings.maintenance_batch_size,
            interval: settings.maintenance_interval,
            vacuum_on_maintenance: settings.vacuum_on_maintenance,
            last_run: None,
        }
    }

    /// Events strictly older than this are expired, relative to `reference`.
    pub fn horizon(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.retention_days
            .map(|days| reference - ChronoDuration::days(i64::from(days)))
    }
}

/// What one maintenance run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub deleted: usize,
    pub batches: usize,
    pub vacuumed: bool,
}

/// Delete events older than `cutoff`, `batch` rows per statement so no
/// single write holds the lock for long. Returns `(deleted, statements)`.
pub fn purge_older_than(
    conn: &Connection,
    cutoff: &DateTime<Utc>,
    batch: Option<usize>,
) -> rusqlite::Result<(usize, usize)> {
    let cutoff = format_event_time(cutoff);

    let Some(batch) = batch.filter(|b| *b > 0) else {
        let deleted = conn.execute("DELETE FROM file_events WHERE event_time < ?1", params![cutoff])?;
        return Ok((deleted, 1));
    };

    let limit = i64::try_from(batch).unwrap_or(i64::MAX);
    let mut total = 0;
    let mut statements = 0;
    loop {
        let deleted = conn.execute(
            "DELETE FROM file_events WHERE id IN \
             (SELECT id FROM file_events WHERE event_time < ?1 ORDER BY id LIMIT ?2)",
            params![cutoff, limit],
        )?;
        total += deleted;
        statements += 1;
        debug!(deleted, total, "retention batch");
        if deleted < batch {
            break;
        }
    }
    Ok((total, statements))
}

pub fn vacuum(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("VACUUM")
}
