// src/config/model.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{BackendKind, ChecksumAlgorithm, OverflowPolicy};

/// Top-level configuration as read from a TOML (or JSON) file.
///
/// ```toml
/// poll_interval = 5.0
/// max_events_per_batch = 500
///
/// [database]
/// path = "file_events.db"
/// retention_days = 30
///
/// [[directories]]
/// path = "/srv/share/docs"
/// project = "acme"
/// username = "jdoe"
/// include = ["*.txt"]
/// backend = "polling"
/// ```
///
/// Only `database` and at least one `directories` entry are required; every
/// other knob has a default. Durations are given in (fractional) seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfigFile {
    /// `[database]` section.
    pub database: DatabaseConfig,

    /// Default interval between polling cycles.
    #[serde(default)]
    pub poll_interval: Option<f64>,

    /// Upper bound on events committed in one transaction.
    #[serde(default)]
    pub max_events_per_batch: Option<usize>,

    /// Minimum sleep between detection cycles, bounding CPU use.
    #[serde(default)]
    pub idle_sleep_interval: Option<f64>,

    /// How long shutdown may spend draining the ingest queue.
    ///
    /// Defaults to `max(2 * poll_interval, 5.0)`.
    #[serde(default)]
    pub shutdown_grace_period: Option<f64>,

    /// Longest time the writer waits to fill a batch once it has one event.
    #[serde(default)]
    pub batch_window: Option<f64>,

    /// Quiet period after which notify-backend changes to a path are flushed.
    #[serde(default)]
    pub debounce_interval: Option<f64>,

    /// Capacity of the queue between watchers and the writer.
    #[serde(default = "default_ingest_queue_capacity")]
    pub ingest_queue_capacity: usize,

    /// `"block"` or `"drop_oldest"`.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Digest for directories with `compute_checksum`: `blake3` (default),
    /// `md5`, `sha256` or `sha512`.
    #[serde(default)]
    pub checksum_algorithm: Option<String>,

    /// Log level used when neither the CLI nor the environment sets one.
    #[serde(default)]
    pub log_level: Option<String>,

    /// `[broadcast]` section.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// All `[[directories]]` entries.
    #[serde(default)]
    pub directories: Vec<DirectoryConfig>,
}

pub const DEFAULT_POLL_INTERVAL: f64 = 5.0;
pub const DEFAULT_MAX_EVENTS_PER_BATCH: usize = 500;
pub const DEFAULT_IDLE_SLEEP_INTERVAL: f64 = 0.1;
pub const DEFAULT_BATCH_WINDOW: f64 = 0.5;
pub const DEFAULT_DEBOUNCE_INTERVAL: f64 = 0.2;
pub const DEFAULT_MAINTENANCE_INTERVAL: f64 = 3600.0;
pub const DEFAULT_MAINTENANCE_BATCH_SIZE: usize = 500;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_JOURNAL_MODE: &str = "WAL";

fn default_ingest_queue_capacity() -> usize {
    10_000
}

/// `[database]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite file. Relative paths are resolved against the
    /// directory holding the config file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Maximum age of a stored event; non-positive values disable retention.
    #[serde(default)]
    pub retention_days: Option<i64>,

    /// Seconds between maintenance cycles.
    #[serde(default)]
    pub maintenance_interval: Option<f64>,

    /// Rows deleted per retention pass; `0` means a single unbounded delete.
    #[serde(default)]
    pub maintenance_batch_size: Option<usize>,

    #[serde(default)]
    pub maintenance_on_start: bool,

    #[serde(default)]
    pub vacuum_on_start: bool,

    #[serde(default)]
    pub vacuum_on_maintenance: bool,

    /// Lock-wait timeout in milliseconds.
    #[serde(default)]
    pub busy_timeout: Option<u64>,

    #[serde(default)]
    pub journal_mode: Option<String>,

    #[serde(default)]
    pub synchronous: Option<String>,

    /// Arbitrary `PRAGMA name = value` pairs applied once at open.
    #[serde(default)]
    pub pragmas: BTreeMap<String, ScalarValue>,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("file_events.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            retention_days: None,
            maintenance_interval: None,
            maintenance_batch_size: None,
            maintenance_on_start: false,
            vacuum_on_start: false,
            vacuum_on_maintenance: false,
            busy_timeout: None,
            journal_mode: None,
            synchronous: None,
            pragmas: BTreeMap::new(),
        }
    }
}

/// `[broadcast]` section.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct BroadcastConfig {
    /// Outbound queue length per live subscriber.
    #[serde(default = "default_subscriber_queue_size")]
    pub subscriber_queue_size: usize,

    /// Number of recently committed events kept for replay on connect.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

fn default_subscriber_queue_size() -> usize {
    256
}

fn default_history_size() -> usize {
    200
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_size: default_subscriber_queue_size(),
            history_size: default_history_size(),
        }
    }
}

/// One `[[directories]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectoryConfig {
    pub path: PathBuf,

    #[serde(default)]
    pub project: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    /// Glob patterns; an empty list includes everything.
    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub compute_checksum: bool,

    #[serde(default)]
    pub min_file_size: Option<u64>,

    #[serde(default)]
    pub max_file_size: Option<u64>,

    #[serde(default = "default_true")]
    pub recursive: bool,

    #[serde(default)]
    pub follow_symlinks: bool,

    #[serde(default)]
    pub ignore_hidden: bool,

    /// Overrides the top-level `poll_interval` for this directory.
    #[serde(default)]
    pub poll_interval: Option<f64>,

    /// Extra key/value pairs merged into every event's `details`.
    #[serde(default)]
    pub metadata: BTreeMap<String, ScalarValue>,

    /// Report every existing file as `created` on the first cycle.
    #[serde(default)]
    pub emit_on_start: bool,
}

fn default_true() -> bool {
    true
}

impl DirectoryConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            project: None,
            username: None,
            include: Vec::new(),
            exclude: Vec::new(),
            backend: BackendKind::default(),
            compute_checksum: false,
            min_file_size: None,
            max_file_size: None,
            recursive: true,
            follow_symlinks: false,
            ignore_hidden: false,
            poll_interval: None,
            metadata: BTreeMap::new(),
            emit_on_start: false,
        }
    }
}

/// A scalar config value (string, integer, float or bool).
///
/// Used for pragma values and per-directory metadata so that both TOML and
/// JSON configs may write `cache_size = -2000` or `"team": "sales"`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Int(i) => write!(f, "{i}"),
            ScalarValue::Float(x) => write!(f, "{x}"),
            ScalarValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Text(value.to_string())
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int(value)
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Bool(value)
    }
}

/// Validated configuration used by the rest of the service.
///
/// Constructed via `TryFrom<RawConfigFile>` (see `validate.rs`), so every
/// instance satisfies the startup invariants: at least one directory, sane
/// size bounds, compilable globs, non-zero batch and queue sizes.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub database: DatabaseSettings,
    pub service: ServiceSettings,
    pub broadcast: BroadcastConfig,
    pub log_level: Option<String>,
    pub directories: Vec<WatchTarget>,
}

/// Effective store settings after defaults are applied.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub retention_days: Option<u32>,
    pub maintenance_interval: Option<Duration>,
    /// `None` deletes every expired row in one statement.
    pub maintenance_batch_size: Option<usize>,
    pub maintenance_on_start: bool,
    pub vacuum_on_start: bool,
    pub vacuum_on_maintenance: bool,
    pub busy_timeout: Duration,
    pub journal_mode: String,
    pub synchronous: Option<String>,
    pub pragmas: BTreeMap<String, ScalarValue>,
}

impl DatabaseSettings {
    /// Store settings with every default applied, for the given file.
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retention_days: None,
            maintenance_interval: None,
            maintenance_batch_size: Some(DEFAULT_MAINTENANCE_BATCH_SIZE),
            maintenance_on_start: false,
            vacuum_on_start: false,
            vacuum_on_maintenance: false,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            journal_mode: DEFAULT_JOURNAL_MODE.to_string(),
            synchronous: None,
            pragmas: BTreeMap::new(),
        }
    }

    /// Whether any periodic maintenance work is configured.
    pub fn maintenance_enabled(&self) -> bool {
        self.retention_days.is_some() || self.vacuum_on_maintenance
    }
}

/// Effective pipeline settings after defaults are applied.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub poll_interval: Duration,
    pub max_events_per_batch: usize,
    pub idle_sleep_interval: Duration,
    pub shutdown_grace_period: Duration,
    pub batch_window: Duration,
    pub debounce_interval: Duration,
    pub ingest_queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs_f64(DEFAULT_POLL_INTERVAL),
            max_events_per_batch: DEFAULT_MAX_EVENTS_PER_BATCH,
            idle_sleep_interval: Duration::from_secs_f64(DEFAULT_IDLE_SLEEP_INTERVAL),
            shutdown_grace_period: Duration::from_secs_f64(
                (DEFAULT_POLL_INTERVAL * 2.0).max(5.0),
            ),
            batch_window: Duration::from_secs_f64(DEFAULT_BATCH_WINDOW),
            debounce_interval: Duration::from_secs_f64(DEFAULT_DEBOUNCE_INTERVAL),
            ingest_queue_capacity: default_ingest_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
            checksum_algorithm: ChecksumAlgorithm::default(),
        }
    }
}

/// One watched directory with its full filtering/behaviour policy.
///
/// Immutable for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    /// Absolute, normalized root.
    pub path: PathBuf,
    pub project: Option<String>,
    pub username: Option<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub backend: BackendKind,
    pub compute_checksum: bool,
    /// Service-wide algorithm, copied here so watchers need no other config.
    pub checksum_algorithm: ChecksumAlgorithm,
    pub min_file_size: Option<u64>,
    pub max_file_size: Option<u64>,
    pub recursive: bool,
    pub follow_symlinks: bool,
    pub ignore_hidden: bool,
    /// Effective interval (per-target override or global default).
    pub poll_interval: Duration,
    pub metadata: BTreeMap<String, ScalarValue>,
    pub emit_on_start: bool,
}

impl WatchTarget {
    /// Whether a file of `size` bytes passes the target's size bounds.
    pub fn size_in_range(&self, size: u64) -> bool {
        if let Some(min) = self.min_file_size {
            if size < min {
                return false;
            }
        }
        if let Some(max) = self.max_file_size {
            if size > max {
                return false;
            }
        }
        true
    }
}
