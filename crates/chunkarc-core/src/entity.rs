//! Include/exclude lists of entities (channel IDs).
//!
//! Entries are given as plain IDs to include, `^ID` to exclude, or `@path` to
//! read more entries from a file (one per line, `#` starts a comment line).
//! An entity both included and excluded is excluded.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread;

use tracing::debug;

use crate::error::{Error, Result};

const EXCLUDE_PREFIX: char = '^';
const FILE_PREFIX: char = '@';

/// Maximum number of non-empty entries read from a list file.
pub const MAX_FILE_ENTRIES: usize = 65536;

/// Sorted, deduplicated include and exclude lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityList {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl EntityList {
    /// Builds a list from entries (`ID`, `^ID`, `@file`). Empty entries and
    /// bare prefixes are ignored.
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index: HashMap<String, bool> = HashMap::new();
        let mut excluded = Vec::new();

        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            if let Some(id) = entry.strip_prefix(EXCLUDE_PREFIX) {
                if !id.is_empty() {
                    excluded.push(id.to_string());
                }
            } else if let Some(path) = entry.strip_prefix(FILE_PREFIX) {
                if path.is_empty() {
                    continue;
                }
                let nested = Self::load(path)?;
                for id in nested.include {
                    index.insert(id, true);
                }
                excluded.extend(nested.exclude);
            } else {
                index.insert(entry.to_string(), true);
            }
        }
        for id in excluded {
            index.insert(id, false);
        }

        let mut list = Self::default();
        for (id, include) in index {
            if include {
                list.include.push(id);
            } else {
                list.exclude.push(id);
            }
        }
        list.include.sort();
        list.exclude.sort();
        Ok(list)
    }

    /// Reads entries from a file, one per line.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(|e| Error::fs(path, e))?;
        debug!(path = %path.display(), "loading entity list");
        Self::read(file, MAX_FILE_ENTRIES)
    }

    fn read(reader: impl Read, max_entries: usize) -> Result<Self> {
        let mut entries = Vec::new();
        for line in BufReader::new(reader).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if entries.len() >= max_entries {
                return Err(Error::TooManyEntries { limit: max_entries });
            }
            entries.push(line.to_string());
        }
        Self::new(entries)
    }

    pub fn include(&self) -> &[String] {
        &self.include
    }

    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    pub fn has_includes(&self) -> bool {
        !self.include.is_empty()
    }

    pub fn has_excludes(&self) -> bool {
        !self.exclude.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Returns a lookup of every listed entity.
    pub fn index(&self) -> EntityIndex {
        let mut map = HashMap::with_capacity(self.include.len() + self.exclude.len());
        for id in &self.include {
            map.insert(id.clone(), true);
        }
        for id in &self.exclude {
            map.insert(id.clone(), false);
        }
        EntityIndex(map)
    }

    /// Streams the included entities from a background thread.
    ///
    /// The channel is unbuffered: each entity is handed over only when the
    /// receiver asks for it. The stream ends after the last entity, when
    /// `cancel` is triggered, or when the receiver is dropped.
    pub fn generator(&self, cancel: &CancelToken) -> Receiver<String> {
        let (tx, rx) = mpsc::sync_channel(0);
        let include = self.include.clone();
        let cancel = cancel.clone();
        thread::spawn(move || {
            for id in include {
                if cancel.is_cancelled() || tx.send(id).is_err() {
                    return;
                }
            }
        });
        rx
    }
}

/// Membership lookup built by [`EntityList::index`].
#[derive(Debug, Clone, Default)]
pub struct EntityIndex(HashMap<String, bool>);

impl EntityIndex {
    pub fn is_included(&self, id: &str) -> bool {
        self.0.get(id).copied().unwrap_or(false)
    }

    pub fn is_excluded(&self, id: &str) -> bool {
        self.0.get(id).is_some_and(|v| !*v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cooperative cancellation flag shared between threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_new_sorts_and_dedups() {
        let list = EntityList::new(["C3", "C1", "^C9", "C1", "", "^", "C2"]).unwrap();
        assert_eq!(list.include(), ["C1", "C2", "C3"]);
        assert_eq!(list.exclude(), ["C9"]);
        assert!(list.has_includes());
        assert!(list.has_excludes());
        assert!(!list.is_empty());
    }

    #[test]
    fn test_exclude_wins() {
        let list = EntityList::new(["^C1", "C1", "C2"]).unwrap();
        assert_eq!(list.include(), ["C2"]);
        assert_eq!(list.exclude(), ["C1"]);

        let idx = list.index();
        assert!(idx.is_excluded("C1"));
        assert!(!idx.is_included("C1"));
        assert!(idx.is_included("C2"));
        assert!(!idx.is_included("C404"));
        assert!(!idx.is_excluded("C404"));
    }

    #[test]
    fn test_empty_list() {
        let list = EntityList::new(Vec::<String>::new()).unwrap();
        assert!(list.is_empty());
        assert!(!list.has_includes());
        assert!(list.index().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("list.txt");
        fs::write(&path, "# channels\nC1\n\n^C2\n  C3  \n").unwrap();

        let arg = format!("@{}", path.display());
        let list = EntityList::new([arg.as_str(), "C2", "C4"]).unwrap();
        assert_eq!(list.include(), ["C1", "C3", "C4"]);
        assert_eq!(list.exclude(), ["C2"]);
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = tempdir().unwrap();
        let err = EntityList::load(tmp.path().join("nope")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_read_limit() {
        let data = "C1\n# comment\nC2\nC3\n";
        assert!(EntityList::read(Cursor::new(data), 3).is_ok());
        let err = EntityList::read(Cursor::new(data), 2).unwrap_err();
        assert!(matches!(err, Error::TooManyEntries { limit: 2 }));
    }

    #[test]
    fn test_generator_streams_includes() {
        let list = EntityList::new(["C2", "C1", "^C3"]).unwrap();
        let got: Vec<String> = list.generator(&CancelToken::new()).iter().collect();
        assert_eq!(got, ["C1", "C2"]);
    }

    #[test]
    fn test_generator_cancelled_before_start() {
        let list = EntityList::new(["C1", "C2", "C3"]).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(list.generator(&cancel).iter().count(), 0);
    }

    #[test]
    fn test_generator_cancelled_midway() {
        let ids: Vec<String> = (0..100).map(|i| format!("C{:03}", i)).collect();
        let list = EntityList::new(&ids).unwrap();
        let cancel = CancelToken::new();
        let rx = list.generator(&cancel);

        assert_eq!(rx.recv().unwrap(), "C000");
        assert_eq!(rx.recv().unwrap(), "C001");
        cancel.cancel();
        // The sender may already be blocked on the next hand-over.
        assert!(rx.iter().count() <= 1);
    }

    #[test]
    fn test_generator_receiver_dropped() {
        let list = EntityList::new(["C1", "C2"]).unwrap();
        let rx = list.generator(&CancelToken::new());
        drop(rx);
    }
}
