#![allow(dead_code)]

use std::path::{Path, PathBuf};

use crm_file_events::config::{
    ConfigFile, DatabaseConfig, DirectoryConfig, RawConfigFile, ScalarValue, WatchTarget,
};
use crm_file_events::types::{BackendKind, ChecksumAlgorithm, OverflowPolicy};

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from an empty directory list and a store at `db_path`; every
/// other knob keeps its file default unless overridden.
pub struct ConfigBuilder {
    config: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            config: RawConfigFile {
                database: DatabaseConfig {
                    path: db_path.into(),
                    ..DatabaseConfig::default()
                },
                poll_interval: None,
                max_events_per_batch: None,
                idle_sleep_interval: None,
                shutdown_grace_period: None,
                batch_window: None,
                debounce_interval: None,
                ingest_queue_capacity: 10_000,
                overflow_policy: OverflowPolicy::default(),
                checksum_algorithm: None,
                log_level: None,
                broadcast: Default::default(),
                directories: Vec::new(),
            },
        }
    }

    pub fn directory(mut self, dir: DirectoryConfig) -> Self {
        self.config.directories.push(dir);
        self
    }

    pub fn poll_interval(mut self, secs: f64) -> Self {
        self.config.poll_interval = Some(secs);
        self
    }

    pub fn idle_sleep_interval(mut self, secs: f64) -> Self {
        self.config.idle_sleep_interval = Some(secs);
        self
    }

    pub fn max_events_per_batch(mut self, max: usize) -> Self {
        self.config.max_events_per_batch = Some(max);
        self
    }

    pub fn batch_window(mut self, secs: f64) -> Self {
        self.config.batch_window = Some(secs);
        self
    }

    pub fn shutdown_grace_period(mut self, secs: f64) -> Self {
        self.config.shutdown_grace_period = Some(secs);
        self
    }

    pub fn debounce_interval(mut self, secs: f64) -> Self {
        self.config.debounce_interval = Some(secs);
        self
    }

    pub fn ingest_queue(mut self, capacity: usize, policy: OverflowPolicy) -> Self {
        self.config.ingest_queue_capacity = capacity;
        self.config.overflow_policy = policy;
        self
    }

    pub fn checksum_algorithm(mut self, name: &str) -> Self {
        self.config.checksum_algorithm = Some(name.to_string());
        self
    }

    pub fn retention_days(mut self, days: i64) -> Self {
        self.config.database.retention_days = Some(days);
        self
    }

    pub fn maintenance_interval(mut self, secs: f64) -> Self {
        self.config.database.maintenance_interval = Some(secs);
        self
    }

    pub fn maintenance_on_start(mut self, on: bool) -> Self {
        self.config.database.maintenance_on_start = on;
        self
    }

    pub fn history_size(mut self, size: usize) -> Self {
        self.config.broadcast.history_size = size;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for one `[[directories]]` entry.
pub struct TargetBuilder {
    dir: DirectoryConfig,
    algorithm: Option<ChecksumAlgorithm>,
}

impl TargetBuilder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            dir: DirectoryConfig::new(path.as_ref()),
            algorithm: None,
        }
    }

    pub fn project(mut self, project: &str) -> Self {
        self.dir.project = Some(project.to_string());
        self
    }

    pub fn username(mut self, username: &str) -> Self {
        self.dir.username = Some(username.to_string());
        self
    }

    pub fn include(mut self, pattern: &str) -> Self {
        self.dir.include.push(pattern.to_string());
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.dir.exclude.push(pattern.to_string());
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.dir.backend = backend;
        self
    }

    pub fn checksum(mut self) -> Self {
        self.dir.compute_checksum = true;
        self
    }

    /// Enable checksums with a specific algorithm. The algorithm is a
    /// service-wide setting, so it only affects [`TargetBuilder::build`].
    pub fn checksum_with(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.dir.compute_checksum = true;
        self.algorithm = Some(algorithm);
        self
    }

    pub fn size_bounds(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.dir.min_file_size = min;
        self.dir.max_file_size = max;
        self
    }

    pub fn non_recursive(mut self) -> Self {
        self.dir.recursive = false;
        self
    }

    pub fn ignore_hidden(mut self) -> Self {
        self.dir.ignore_hidden = true;
        self
    }

    pub fn poll_interval(mut self, secs: f64) -> Self {
        self.dir.poll_interval = Some(secs);
        self
    }

    pub fn emit_on_start(mut self) -> Self {
        self.dir.emit_on_start = true;
        self
    }

    pub fn metadata(mut self, key: &str, value: impl Into<ScalarValue>) -> Self {
        self.dir.metadata.insert(key.to_string(), value.into());
        self
    }

    /// The raw entry, for use with [`ConfigBuilder::directory`].
    pub fn config(self) -> DirectoryConfig {
        self.dir
    }

    /// A validated target, using the default poll interval unless set.
    pub fn build(self) -> WatchTarget {
        let mut target =
            WatchTarget::try_from(self.dir).expect("Failed to build valid target from builder");
        if let Some(algorithm) = self.algorithm {
            target.checksum_algorithm = algorithm;
        }
        target
    }
}
