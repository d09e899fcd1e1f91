// src/watch/backend.rs

//! Pluggable change-detection backend abstraction.
//!
//! A [`DirectoryWatcher`](crate::watch::DirectoryWatcher) talks to a
//! `ChangeBackend` instead of to `notify` or the scanner directly. Choosing
//! polling vs. OS notifications is a construction-time decision, and tests
//! can drive a watcher with a scripted backend.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::event::EventType;
use crate::types::BackendKind;
use crate::watch::snapshot::FileMeta;

/// A normalized change as produced by any backend, before watcher policy
/// (size bounds, checksum, metadata stamping) is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    /// Normalized absolute path.
    pub path: String,
    pub kind: EventType,
    /// Latest observed metadata; always `None` for deletions.
    pub meta: Option<FileMeta>,
}

/// Why a backend stopped producing changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendFailure {
    /// The watched root is missing or cannot be listed.
    RootUnavailable(String),
    /// The OS notification stream reported an error.
    Notify(String),
    /// More notifications arrived than could be buffered.
    Overflow,
    /// The notification channel closed unexpectedly.
    ChannelClosed,
    /// A background scan task panicked or was torn down.
    Scan(String),
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendFailure::RootUnavailable(reason) => write!(f, "watched root unavailable: {reason}"),
            BackendFailure::Notify(reason) => write!(f, "notification error: {reason}"),
            BackendFailure::Overflow => f.write_str("notification buffer overflowed"),
            BackendFailure::ChannelClosed => f.write_str("notification channel closed"),
            BackendFailure::Scan(reason) => write!(f, "scan task failed: {reason}"),
        }
    }
}

impl std::error::Error for BackendFailure {}

pub type ChangeResult = Result<Vec<RawChange>, BackendFailure>;
pub type ChangeFuture<'a> = Pin<Box<dyn Future<Output = ChangeResult> + Send + 'a>>;

/// Trait abstracting how changes under one target root are detected.
///
/// Both returned futures must be cancel-safe: dropping one before it
/// completes must not lose or half-apply a batch.
pub trait ChangeBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Begin (or resume, after a failure) observing the root.
    fn start(&mut self) -> Result<(), BackendFailure>;

    /// Wait for and return the next batch of changes. An empty batch is a
    /// normal outcome (a polling cycle with nothing new).
    fn next_changes(&mut self) -> ChangeFuture<'_>;

    /// Perform one full scan immediately and diff it against the last known
    /// state. Used for single-pass runs and to recover after a failure.
    fn resync(&mut self) -> ChangeFuture<'_>;

    /// Stop observing; a scan in flight aborts at its next checkpoint.
    fn stop(&mut self);

    /// Number of entries skipped because of per-item errors since the last
    /// call.
    fn take_skipped_entries(&mut self) -> u64 {
        0
    }
}
