// src/store/mod.rs

//! Durable event storage on SQLite.
//!
//! [`EventStore`] owns the only writable connection and is meant to be held
//! by exactly one task (the writer). Everyone else reads through an
//! [`EventReader`], which opens its own read-only connection.

pub mod maintenance;
pub mod reader;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::config::model::DatabaseSettings;
use crate::errors::{FileEventsError, Result};
use crate::event::{format_event_time, FileEvent, StoredEvent};

pub use maintenance::{MaintenanceReport, MaintenanceState};
pub use reader::{EventQuery, EventReader, DEFAULT_QUERY_LIMIT};

#[derive(Debug)]
pub struct EventStore {
    conn: Connection,
    path: PathBuf,
    settings: DatabaseSettings,
    maintenance: MaintenanceState,
}

impl EventStore {
    /// Open (creating if needed) the database and apply every connection
    /// setting once.
    pub fn open(settings: &DatabaseSettings) -> Result<Self> {
        let path = settings.path.clone();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        schema::apply_pragmas(&conn, settings)?;
        schema::init_schema(&conn)?;
        info!(path = %path.display(), journal_mode = %settings.journal_mode, "event store opened");

        Ok(Self {
            conn,
            path,
            settings: settings.clone(),
            maintenance: MaintenanceState::from_settings(settings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    /// Open a new read-only connection to the same database.
    pub fn reader(&self) -> Result<EventReader> {
        EventReader::open(&self.path, &self.settings)
    }

    /// Insert `events` in one transaction, in order. Returns them with
    /// their assigned ids.
    pub fn insert_batch(&mut self, events: &[FileEvent]) -> Result<Vec<StoredEvent>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let tx = self.conn.transaction()?;
        let mut stored = Vec::with_capacity(events.len());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO file_events \
                 (event_time, event_type, path, project, username, file_size, checksum, details) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for event in events {
                let details = serde_json::to_string(&event.details)?;
                stmt.execute(params![
                    format_event_time(&event.event_time),
                    event.event_type.as_str(),
                    event.path,
                    event.project,
                    event.username,
                    event.file_size.and_then(|s| i64::try_from(s).ok()),
                    event.checksum,
                    details,
                ])?;
                stored.push(StoredEvent {
                    id: tx.last_insert_rowid(),
                    event: event.clone(),
                });
            }
        }
        tx.commit()?;
        debug!(events = stored.len(), "batch committed");
        Ok(stored)
    }

    /// The `limit` most recent events in commit order (oldest first).
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let mut events = reader::query_recent(&self.conn, &EventQuery::latest(limit))?;
        events.reverse();
        Ok(events)
    }

    pub fn count(&self) -> Result<u64> {
        Ok(reader::count_events(&self.conn)?)
    }

    pub fn maintenance_state(&self) -> &MaintenanceState {
        &self.maintenance
    }

    /// Delete events older than `cutoff` using the configured batch size.
    pub fn purge_older_than(&mut self, cutoff: &DateTime<Utc>) -> Result<usize> {
        let (deleted, _) = maintenance::purge_older_than(&self.conn, cutoff, self.maintenance.batch_size)?;
        Ok(deleted)
    }

    /// Apply retention relative to `reference`, then reclaim space if
    /// configured and anything was removed (or no retention is set).
    pub fn run_maintenance(&mut self, reference: DateTime<Utc>) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();

        if let Some(cutoff) = self.maintenance.horizon(reference) {
            let (deleted, batches) =
                maintenance::purge_older_than(&self.conn, &cutoff, self.maintenance.batch_size)?;
            report.deleted = deleted;
            report.batches = batches;
        }

        let retention_off = self.maintenance.retention_days.is_none();
        if self.maintenance.vacuum_on_maintenance && (report.deleted > 0 || retention_off) {
            self.vacuum()?;
            report.vacuumed = true;
        }

        self.maintenance.last_run = Some(reference);
        info!(
            deleted = report.deleted,
            batches = report.batches,
            vacuumed = report.vacuumed,
            "maintenance complete"
        );
        Ok(report)
    }

    pub fn vacuum(&self) -> Result<()> {
        let started = std::time::Instant::now();
        maintenance::vacuum(&self.conn)?;
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "vacuum complete");
        Ok(())
    }

    /// Close the connection, surfacing any error SQLite reports.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, err)| FileEventsError::Store(err))
    }
}
