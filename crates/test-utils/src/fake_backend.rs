//! A scripted `ChangeBackend` for driving a `DirectoryWatcher` in tests.
//!
//! Each call to `next_changes` pops the next scripted step; once the script
//! is exhausted the backend behaves like an idle watch (never returns).
//! `resync` pops from its own script and returns an empty batch when that
//! runs dry. A shared [`FakeBackendHandle`] lets the test inspect how the
//! watcher drove the backend.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tracing::debug;

use crm_file_events::event::EventType;
use crm_file_events::types::BackendKind;
use crm_file_events::watch::{
    BackendFailure, ChangeBackend, ChangeFuture, FileMeta, RawChange,
};

/// One scripted `next_changes` outcome.
#[derive(Debug, Clone)]
pub enum Step {
    Changes(Vec<RawChange>),
    Fail(BackendFailure),
}

#[derive(Debug, Default)]
struct Calls {
    starts: u32,
    stops: u32,
    resyncs: u32,
    next_calls: u32,
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<Step>,
    resyncs: VecDeque<Result<Vec<RawChange>, BackendFailure>>,
    start_failures: u32,
    calls: Calls,
}

/// Shared view of a [`FakeBackend`]'s script and call counters.
#[derive(Debug, Clone, Default)]
pub struct FakeBackendHandle {
    inner: Arc<Mutex<Script>>,
}

impl FakeBackendHandle {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_changes(&self, changes: Vec<RawChange>) {
        self.lock().steps.push_back(Step::Changes(changes));
    }

    pub fn push_failure(&self, failure: BackendFailure) {
        self.lock().steps.push_back(Step::Fail(failure));
    }

    pub fn push_resync(&self, result: Result<Vec<RawChange>, BackendFailure>) {
        self.lock().resyncs.push_back(result);
    }

    /// Make the next `n` calls to `start` fail.
    pub fn fail_starts(&self, n: u32) {
        self.lock().start_failures = n;
    }

    pub fn starts(&self) -> u32 {
        self.lock().calls.starts
    }

    pub fn stops(&self) -> u32 {
        self.lock().calls.stops
    }

    pub fn resyncs(&self) -> u32 {
        self.lock().calls.resyncs
    }

    pub fn next_calls(&self) -> u32 {
        self.lock().calls.next_calls
    }
}

#[derive(Debug)]
pub struct FakeBackend {
    kind: BackendKind,
    handle: FakeBackendHandle,
}

impl FakeBackend {
    pub fn new(kind: BackendKind) -> (Self, FakeBackendHandle) {
        let handle = FakeBackendHandle::default();
        (
            Self {
                kind,
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl ChangeBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn start(&mut self) -> Result<(), BackendFailure> {
        let mut script = self.handle.lock();
        script.calls.starts += 1;
        if script.start_failures > 0 {
            script.start_failures -= 1;
            debug!(remaining = script.start_failures, "fake backend: scripted start failure");
            return Err(BackendFailure::RootUnavailable("scripted start failure".into()));
        }
        Ok(())
    }

    fn next_changes(&mut self) -> ChangeFuture<'_> {
        let step = {
            let mut script = self.handle.lock();
            script.calls.next_calls += 1;
            script.steps.pop_front()
        };
        debug!(?step, "fake backend: next step");
        Box::pin(async move {
            match step {
                Some(Step::Changes(changes)) => Ok(changes),
                Some(Step::Fail(failure)) => Err(failure),
                None => std::future::pending().await,
            }
        })
    }

    fn resync(&mut self) -> ChangeFuture<'_> {
        let result = {
            let mut script = self.handle.lock();
            script.calls.resyncs += 1;
            script.resyncs.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        };
        debug!(?result, "fake backend: resync");
        Box::pin(async move { result })
    }

    fn stop(&mut self) {
        self.handle.lock().calls.stops += 1;
    }
}

/// A change for a file of `size` bytes modified now.
pub fn change(path: &str, kind: EventType, size: u64) -> RawChange {
    let meta = match kind {
        EventType::Deleted => None,
        _ => Some(FileMeta {
            size,
            modified: Some(SystemTime::now()),
        }),
    };
    RawChange {
        path: path.to_string(),
        kind,
        meta,
    }
}
