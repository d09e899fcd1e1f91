// src/watch/debounce.rs

//! Per-path coalescing of OS notifications.
//!
//! The debouncer only tracks *when* each path was last touched. What a
//! settled path turns into is decided afterwards by [`coalesce`], from the
//! state the backend knew before the burst and the state on disk after it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::event::EventType;
use crate::watch::snapshot::FileMeta;

/// A path that keeps changing is flushed anyway after this many windows.
const MAX_DELAY_WINDOWS: u32 = 10;

#[derive(Debug, Clone, Copy)]
struct Pending {
    first_seen: Instant,
    last_seen: Instant,
    notices: u32,
}

/// One path whose notifications have gone quiet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub path: String,
    pub notices: u32,
}

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    max_delay: Duration,
    pending: HashMap<String, Pending>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            max_delay: window * MAX_DELAY_WINDOWS,
            pending: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Note a notification for `path` at `now`.
    pub fn record(&mut self, path: impl Into<String>, now: Instant) {
        self.pending
            .entry(path.into())
            .and_modify(|p| {
                p.last_seen = now;
                p.notices += 1;
            })
            .or_insert(Pending {
                first_seen: now,
                last_seen: now,
                notices: 1,
            });
    }

    fn due_at(&self, p: &Pending) -> Instant {
        (p.last_seen + self.window).min(p.first_seen + self.max_delay)
    }

    /// Earliest instant at which some pending path becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| self.due_at(p)).min()
    }

    /// Remove and return every path due at `now`, sorted by path.
    pub fn flush_due(&mut self, now: Instant) -> Vec<Settled> {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| self.due_at(p) <= now)
            .map(|(path, _)| path.clone())
            .collect();
        let mut settled: Vec<Settled> = due
            .into_iter()
            .filter_map(|path| {
                self.pending
                    .remove(&path)
                    .map(|p| Settled { path, notices: p.notices })
            })
            .collect();
        settled.sort_by(|a, b| a.path.cmp(&b.path));
        settled
    }

    /// Remove and return everything, regardless of timing.
    pub fn flush_all(&mut self) -> Vec<Settled> {
        let mut settled: Vec<Settled> = self
            .pending
            .drain()
            .map(|(path, p)| Settled { path, notices: p.notices })
            .collect();
        settled.sort_by(|a, b| a.path.cmp(&b.path));
        settled
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// The single event a burst of notifications collapses to.
///
/// | before | after | result   |
/// |--------|-------|----------|
/// | absent | absent| none     |
/// | absent | file  | created  |
/// | file   | absent| deleted  |
/// | file   | file  | modified, if size or mtime changed |
pub fn coalesce(before: Option<&FileMeta>, after: Option<&FileMeta>) -> Option<EventType> {
    match (before, after) {
        (None, None) => None,
        (None, Some(_)) => Some(EventType::Created),
        (Some(_), None) => Some(EventType::Deleted),
        (Some(old), Some(new)) if old != new => Some(EventType::Modified),
        (Some(_), Some(_)) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_path_flushes_after_window() {
        let t0 = Instant::now();
        let window = Duration::from_millis(200);
        let mut d = Debouncer::new(window);

        d.record("/a", t0);
        d.record("/a", t0 + Duration::from_millis(150));

        assert!(d.flush_due(t0 + Duration::from_millis(300)).is_empty());
        let settled = d.flush_due(t0 + Duration::from_millis(350));
        assert_eq!(settled, vec![Settled { path: "/a".into(), notices: 2 }]);
        assert!(d.is_empty());
    }

    #[test]
    fn busy_path_is_flushed_at_max_delay() {
        let t0 = Instant::now();
        let window = Duration::from_millis(10);
        let mut d = Debouncer::new(window);
        for i in 0..50 {
            d.record("/busy", t0 + Duration::from_millis(i * 5));
        }
        assert_eq!(d.next_deadline(), Some(t0 + window * MAX_DELAY_WINDOWS));
    }
}
