// src/watch/snapshot.rs

//! Directory snapshots and the pure differ between two of them.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::time::SystemTime;

use crate::event::EventType;

/// Size and modification time of one tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Every tracked file under a target root at one point in time, keyed by
/// normalized absolute path.
///
/// Keys are kept sorted, which is what makes the differ's output order
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    files: BTreeMap<String, FileMeta>,
}

impl DirectorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, meta: FileMeta) {
        self.files.insert(path.into(), meta);
    }

    pub fn remove(&mut self, path: &str) -> Option<FileMeta> {
        self.files.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&FileMeta> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, FileMeta> {
        self.files.iter()
    }
}

impl FromIterator<(String, FileMeta)> for DirectorySnapshot {
    fn from_iter<I: IntoIterator<Item = (String, FileMeta)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

/// One path whose status or metadata differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: String,
    pub kind: EventType,
}

/// Compute the minimal set of changes turning `previous` into `current`.
///
/// - only in `current` -> `Created`
/// - in both, size or mtime differs -> `Modified`
/// - only in `previous` -> `Deleted`
///
/// Output is sorted lexicographically by path. Pure; never fails.
pub fn diff_snapshots(previous: &DirectorySnapshot, current: &DirectorySnapshot) -> Vec<Change> {
    let mut changes = Vec::new();
    let mut prev_iter = previous.files.iter().peekable();
    let mut curr_iter = current.files.iter().peekable();

    loop {
        let order = match (prev_iter.peek(), curr_iter.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((p, _)), Some((c, _))) => p.cmp(c),
        };

        match order {
            Ordering::Less => {
                if let Some((path, _)) = prev_iter.next() {
                    changes.push(Change {
                        path: path.clone(),
                        kind: EventType::Deleted,
                    });
                }
            }
            Ordering::Greater => {
                if let Some((path, _)) = curr_iter.next() {
                    changes.push(Change {
                        path: path.clone(),
                        kind: EventType::Created,
                    });
                }
            }
            Ordering::Equal => {
                if let (Some((path, old)), Some((_, new))) = (prev_iter.next(), curr_iter.next()) {
                    if old != new {
                        changes.push(Change {
                            path: path.clone(),
                            kind: EventType::Modified,
                        });
                    }
                }
            }
        }
    }

    changes
}
