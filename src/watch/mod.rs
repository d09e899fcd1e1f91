// src/watch/mod.rs

//! File watching and change detection.
//!
//! This module is responsible for:
//! - Compiling `include` / `exclude` glob patterns per target.
//! - Detecting changes, either by re-scanning ([`polling`]) or from OS
//!   notifications ([`notify_backend`]), behind one [`ChangeBackend`] trait.
//! - Turning changes into [`FileEvent`](crate::event::FileEvent)s according
//!   to each target's policy (size bounds, checksums, metadata).
//!
//! It does **not** know about the store; watchers only feed the ingest queue.

pub mod backend;
pub mod checksum;
pub mod debounce;
pub mod notify_backend;
pub mod path_utils;
pub mod patterns;
pub mod polling;
pub mod snapshot;
pub mod watcher;

pub use backend::{BackendFailure, ChangeBackend, ChangeFuture, RawChange};
pub use debounce::{coalesce, Debouncer};
pub use notify_backend::NotifyBackend;
pub use patterns::TargetFilter;
pub use polling::{PollingBackend, ScanOutcome, ScanStats, Scanner};
pub use snapshot::{diff_snapshots, Change, DirectorySnapshot, FileMeta};
pub use watcher::{
    build_backend, DirectoryWatcher, WatcherStats, WatcherStatsSnapshot, MAX_RESUBSCRIBE_ATTEMPTS,
};
