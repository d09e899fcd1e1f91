// src/fs/mock.rs

use super::{EntryKind, EntryMeta, FileSystem};
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File {
        content: Vec<u8>,
        modified: SystemTime,
    },
    Dir,
    Symlink(PathBuf),
    /// Present in listings, but every access fails (permission denied).
    Unreadable,
}

/// In-memory filesystem keyed by absolute path.
///
/// Parents are created implicitly. Modification times come from a logical
/// clock that advances on every write, so rewrites are always observable.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    entries: Arc<Mutex<BTreeMap<PathBuf, MockEntry>>>,
    tick: Arc<Mutex<u64>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PathBuf, MockEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_mtime(&self) -> SystemTime {
        let mut tick = self.tick.lock().unwrap_or_else(|e| e.into_inner());
        *tick += 1;
        UNIX_EPOCH + Duration::from_secs(1_700_000_000 + *tick)
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut entries = self.lock();
        ensure_dirs(&mut entries, path.as_ref());
    }

    /// Create or overwrite a file.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let modified = self.next_mtime();
        self.insert(path.as_ref(), MockEntry::File {
            content: content.into(),
            modified,
        });
    }

    /// Append to a file, creating it if necessary.
    pub fn append(&self, path: impl AsRef<Path>, extra: &[u8]) {
        let path = path.as_ref();
        let modified = self.next_mtime();
        let mut entries = self.lock();
        match entries.get_mut(path) {
            Some(MockEntry::File { content, modified: m }) => {
                content.extend_from_slice(extra);
                *m = modified;
            }
            _ => {
                if let Some(parent) = path.parent() {
                    ensure_dirs(&mut entries, parent);
                }
                entries.insert(path.to_path_buf(), MockEntry::File {
                    content: extra.to_vec(),
                    modified,
                });
            }
        }
    }

    pub fn add_symlink(&self, path: impl AsRef<Path>, target: impl Into<PathBuf>) {
        self.insert(path.as_ref(), MockEntry::Symlink(target.into()));
    }

    pub fn add_unreadable(&self, path: impl AsRef<Path>) {
        self.insert(path.as_ref(), MockEntry::Unreadable);
    }

    /// Remove a path and everything below it.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut entries = self.lock();
        entries.retain(|p, _| !p.starts_with(path));
    }

    fn insert(&self, path: &Path, entry: MockEntry) {
        let mut entries = self.lock();
        if let Some(parent) = path.parent() {
            ensure_dirs(&mut entries, parent);
        }
        entries.insert(path.to_path_buf(), entry);
    }

    fn resolve(&self, path: &Path) -> Result<(PathBuf, MockEntry)> {
        let entries = self.lock();
        let mut current = path.to_path_buf();
        // Bounded so a symlink cycle cannot spin forever.
        for _ in 0..16 {
            match entries.get(&current) {
                Some(MockEntry::Symlink(target)) => current = target.clone(),
                Some(entry) => return Ok((current, entry.clone())),
                None => return Err(anyhow!("No such file or directory: {:?}", path)),
            }
        }
        Err(anyhow!("Too many levels of symbolic links: {:?}", path))
    }
}

fn ensure_dirs(entries: &mut BTreeMap<PathBuf, MockEntry>, dir: &Path) {
    for ancestor in dir.ancestors() {
        if ancestor.as_os_str().is_empty() {
            continue;
        }
        entries
            .entry(ancestor.to_path_buf())
            .or_insert(MockEntry::Dir);
    }
}

fn meta_of(entry: &MockEntry, path: &Path) -> Result<EntryMeta> {
    match entry {
        MockEntry::File { content, modified } => Ok(EntryMeta {
            kind: EntryKind::File,
            size: content.len() as u64,
            modified: Some(*modified),
        }),
        MockEntry::Dir => Ok(EntryMeta {
            kind: EntryKind::Dir,
            size: 0,
            modified: None,
        }),
        MockEntry::Symlink(_) => Ok(EntryMeta {
            kind: EntryKind::Symlink,
            size: 0,
            modified: None,
        }),
        MockEntry::Unreadable => Err(anyhow!("Permission denied: {:?}", path)),
    }
}

impl FileSystem for MockFileSystem {
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let (dir, entry) = self.resolve(path)?;
        match entry {
            MockEntry::Dir => {
                let entries = self.lock();
                Ok(entries
                    .keys()
                    .filter(|p| p.parent() == Some(dir.as_path()))
                    .map(|p| path.join(p.file_name().unwrap_or_default()))
                    .collect())
            }
            MockEntry::Unreadable => Err(anyhow!("Permission denied: {:?}", path)),
            _ => Err(anyhow!("Not a directory: {:?}", path)),
        }
    }

    fn symlink_metadata(&self, path: &Path) -> Result<EntryMeta> {
        let entries = self.lock();
        match entries.get(path) {
            Some(entry) => meta_of(entry, path),
            None => Err(anyhow!("No such file or directory: {:?}", path)),
        }
    }

    fn metadata(&self, path: &Path) -> Result<EntryMeta> {
        let (_, entry) = self.resolve(path)?;
        meta_of(&entry, path)
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let (_, entry) = self.resolve(path)?;
        match entry {
            MockEntry::File { content, .. } => Ok(Box::new(Cursor::new(content))),
            MockEntry::Dir => Err(anyhow!("Is a directory: {:?}", path)),
            _ => Err(anyhow!("Permission denied: {:?}", path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).is_ok()
    }
}
