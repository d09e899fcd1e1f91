// src/config/validate.rs

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::config::model::{
    ConfigFile, DatabaseConfig, DatabaseSettings, DirectoryConfig, RawConfigFile,
    ServiceSettings, WatchTarget, DEFAULT_BATCH_WINDOW, DEFAULT_BUSY_TIMEOUT_MS,
    DEFAULT_DEBOUNCE_INTERVAL, DEFAULT_IDLE_SLEEP_INTERVAL, DEFAULT_JOURNAL_MODE,
    DEFAULT_MAINTENANCE_BATCH_SIZE, DEFAULT_MAINTENANCE_INTERVAL,
    DEFAULT_MAX_EVENTS_PER_BATCH, DEFAULT_POLL_INTERVAL,
};
use crate::errors::{FileEventsError, Result};
use crate::types::ChecksumAlgorithm;
use crate::watch::path_utils::clean_path;
use crate::watch::patterns::TargetFilter;

/// Pragma names and mode keywords are spliced into SQL, so they must be
/// plain identifiers.
static SQL_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static identifier regex")
});

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::FileEventsError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_directories(&raw)?;
        let service = validate_service_settings(&raw)?;
        let database = validate_database(&raw.database)?;

        let mut directories = Vec::with_capacity(raw.directories.len());
        for dir in &raw.directories {
            directories.push(validate_directory(dir, &service)?);
        }

        Ok(ConfigFile {
            database,
            service,
            broadcast: raw.broadcast,
            log_level: raw.log_level,
            directories,
        })
    }
}

/// Validate a single target against the global defaults.
impl TryFrom<DirectoryConfig> for WatchTarget {
    type Error = crate::errors::FileEventsError;

    fn try_from(dir: DirectoryConfig) -> std::result::Result<Self, Self::Error> {
        validate_directory(&dir, &ServiceSettings::default())
    }
}

fn ensure_has_directories(cfg: &RawConfigFile) -> Result<()> {
    if cfg.directories.is_empty() {
        return Err(FileEventsError::Config(
            "config must contain at least one [[directories]] entry".to_string(),
        ));
    }
    Ok(())
}

/// Positive seconds, or `None` for anything missing, zero, negative or NaN.
fn positive_secs(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn validate_service_settings(cfg: &RawConfigFile) -> Result<ServiceSettings> {
    let poll_interval = positive_secs(cfg.poll_interval).unwrap_or(DEFAULT_POLL_INTERVAL);

    let max_events_per_batch = cfg
        .max_events_per_batch
        .unwrap_or(DEFAULT_MAX_EVENTS_PER_BATCH);
    if max_events_per_batch == 0 {
        return Err(FileEventsError::Config(
            "max_events_per_batch must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.ingest_queue_capacity == 0 {
        return Err(FileEventsError::Config(
            "ingest_queue_capacity must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.broadcast.subscriber_queue_size == 0 {
        return Err(FileEventsError::Config(
            "[broadcast].subscriber_queue_size must be >= 1 (got 0)".to_string(),
        ));
    }

    let idle = positive_secs(cfg.idle_sleep_interval).unwrap_or(DEFAULT_IDLE_SLEEP_INTERVAL);
    let grace = positive_secs(cfg.shutdown_grace_period)
        .unwrap_or_else(|| (poll_interval * 2.0).max(5.0));
    let batch_window = positive_secs(cfg.batch_window).unwrap_or(DEFAULT_BATCH_WINDOW);
    let debounce = positive_secs(cfg.debounce_interval).unwrap_or(DEFAULT_DEBOUNCE_INTERVAL);

    // Rejected even when no directory computes checksums.
    let checksum_algorithm = match cfg.checksum_algorithm.as_deref() {
        None => ChecksumAlgorithm::default(),
        Some(name) => name.parse::<ChecksumAlgorithm>().map_err(FileEventsError::Config)?,
    };

    Ok(ServiceSettings {
        poll_interval: Duration::from_secs_f64(poll_interval),
        max_events_per_batch,
        idle_sleep_interval: Duration::from_secs_f64(idle),
        shutdown_grace_period: Duration::from_secs_f64(grace),
        batch_window: Duration::from_secs_f64(batch_window),
        debounce_interval: Duration::from_secs_f64(debounce),
        ingest_queue_capacity: cfg.ingest_queue_capacity,
        overflow_policy: cfg.overflow_policy,
        checksum_algorithm,
    })
}

fn validate_database(db: &DatabaseConfig) -> Result<DatabaseSettings> {
    if db.path.as_os_str().is_empty() {
        return Err(FileEventsError::Config(
            "[database].path must not be empty".to_string(),
        ));
    }

    let retention_days = db
        .retention_days
        .filter(|d| *d > 0)
        .map(|d| u32::try_from(d).unwrap_or(u32::MAX));

    let maintenance_batch_size = match db.maintenance_batch_size {
        None => Some(DEFAULT_MAINTENANCE_BATCH_SIZE),
        Some(0) => None,
        Some(n) => Some(n),
    };

    let mut maintenance_interval = positive_secs(db.maintenance_interval);
    if maintenance_interval.is_none() && (retention_days.is_some() || db.vacuum_on_maintenance) {
        maintenance_interval = Some(DEFAULT_MAINTENANCE_INTERVAL);
    }

    let journal_mode = db
        .journal_mode
        .as_deref()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_JOURNAL_MODE.to_string());
    ensure_identifier("[database].journal_mode", &journal_mode)?;

    let synchronous = db
        .synchronous
        .as_deref()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty());
    if let Some(ref sync) = synchronous {
        ensure_identifier("[database].synchronous", sync)?;
    }

    for key in db.pragmas.keys() {
        ensure_identifier("[database].pragmas key", key)?;
    }

    Ok(DatabaseSettings {
        path: absolute_path(&db.path)?,
        retention_days,
        maintenance_interval: maintenance_interval.map(Duration::from_secs_f64),
        maintenance_batch_size,
        maintenance_on_start: db.maintenance_on_start,
        vacuum_on_start: db.vacuum_on_start,
        vacuum_on_maintenance: db.vacuum_on_maintenance,
        busy_timeout: Duration::from_millis(db.busy_timeout.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS)),
        journal_mode,
        synchronous,
        pragmas: db.pragmas.clone(),
    })
}

fn ensure_identifier(what: &str, value: &str) -> Result<()> {
    if SQL_IDENTIFIER.is_match(value) {
        Ok(())
    } else {
        Err(FileEventsError::Config(format!(
            "{what} must be a plain identifier (got {value:?})"
        )))
    }
}

fn validate_directory(dir: &DirectoryConfig, service: &ServiceSettings) -> Result<WatchTarget> {
    if dir.path.as_os_str().is_empty() {
        return Err(FileEventsError::Config(
            "[[directories]].path must not be empty".to_string(),
        ));
    }

    if let (Some(min), Some(max)) = (dir.min_file_size, dir.max_file_size) {
        if min > max {
            return Err(FileEventsError::Config(format!(
                "directory {:?}: min_file_size ({min}) cannot be greater than max_file_size ({max})",
                dir.path
            )));
        }
    }

    let abs = absolute_path(&dir.path)?;
    // Canonical roots keep notification paths and scan paths on one prefix.
    let root = std::fs::canonicalize(&abs).map(|p| clean_path(&p)).unwrap_or(abs);

    let poll = positive_secs(dir.poll_interval).unwrap_or(service.poll_interval.as_secs_f64());

    let target = WatchTarget {
        path: root,
        project: dir.project.clone(),
        username: dir.username.clone(),
        include: dir.include.clone(),
        exclude: dir.exclude.clone(),
        backend: dir.backend,
        compute_checksum: dir.compute_checksum,
        checksum_algorithm: service.checksum_algorithm,
        min_file_size: dir.min_file_size,
        max_file_size: dir.max_file_size,
        recursive: dir.recursive,
        follow_symlinks: dir.follow_symlinks,
        ignore_hidden: dir.ignore_hidden,
        poll_interval: Duration::from_secs_f64(poll),
        metadata: dir.metadata.clone(),
        emit_on_start: dir.emit_on_start,
    };

    // Fail at startup on bad globs rather than inside a watcher.
    TargetFilter::compile(&target).map_err(|e| {
        FileEventsError::Config(format!("directory {:?}: {e:#}", target.path))
    })?;

    Ok(target)
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    let abs = std::path::absolute(path)?;
    Ok(clean_path(&abs))
}
