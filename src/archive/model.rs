//! In-memory directory tree of an opened container.

use std::collections::{BTreeSet, HashMap};

use crate::codec::{EntryHandle, LoadedEntry};
use crate::{Error, ResourcePath, Result};

/// A change staged on an entry, applied at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingChange {
    /// Replace (or, for inserted entries, provide) the entry's bytes.
    Import(Vec<u8>),
    /// Drop the entry from the rebuilt container.
    Remove,
}

/// A file inside an archive.
#[derive(Debug, Clone)]
pub struct FileEntry {
    path: ResourcePath,
    size: u64,
    handle: Option<EntryHandle>,
    pending: Option<PendingChange>,
}

impl FileEntry {
    /// Returns the full entry path.
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Returns the file name (last path segment).
    pub fn name(&self) -> &str {
        self.path.file_name()
    }

    /// Returns the parent directory path, empty for the root.
    pub fn parent(&self) -> &str {
        self.path.parent_str()
    }

    /// Returns the size the entry will have after commit.
    ///
    /// Staged imports report the staged length; removals report zero.
    pub fn size(&self) -> u64 {
        match &self.pending {
            Some(PendingChange::Import(data)) => data.len() as u64,
            Some(PendingChange::Remove) => 0,
            None => self.size,
        }
    }

    /// Returns the size stored in the original container.
    pub fn original_size(&self) -> Option<u64> {
        self.handle.as_ref().map(|_| self.size)
    }

    /// Returns the codec handle, `None` for entries staged for insertion.
    pub fn handle(&self) -> Option<&EntryHandle> {
        self.handle.as_ref()
    }

    /// Returns the staged change, if any.
    pub fn pending(&self) -> Option<&PendingChange> {
        self.pending.as_ref()
    }

    /// Returns true if the entry does not exist in the original container.
    pub fn is_inserted(&self) -> bool {
        self.handle.is_none()
    }

    /// Returns true if the entry is staged for removal.
    pub fn is_removed(&self) -> bool {
        matches!(self.pending, Some(PendingChange::Remove))
    }

    pub(crate) fn set_pending(&mut self, change: Option<PendingChange>) {
        self.pending = change;
    }

    pub(crate) fn take_pending(&mut self) -> Option<PendingChange> {
        self.pending.take()
    }
}

/// The entries of an archive in container order, with path lookups.
///
/// Directories are implied by entry paths; a container has no empty
/// directories.
#[derive(Debug, Clone, Default)]
pub struct ArchiveTree {
    entries: Vec<FileEntry>,
    exact: HashMap<String, usize>,
    folded: HashMap<String, Vec<usize>>,
}

impl ArchiveTree {
    /// Builds the tree from a codec's directory listing.
    ///
    /// Fails with [`Error::InvalidFormat`] if two entries share a path.
    pub(crate) fn from_loaded(loaded: Vec<LoadedEntry<EntryHandle>>) -> Result<Self> {
        let mut tree = Self::default();
        for entry in loaded {
            if tree.exact.contains_key(entry.path.as_str()) {
                return Err(Error::InvalidFormat(format!(
                    "duplicate entry '{}' in container directory",
                    entry.path
                )));
            }
            tree.push(FileEntry {
                path: entry.path,
                size: entry.size,
                handle: Some(entry.handle),
                pending: None,
            });
        }
        Ok(tree)
    }

    fn push(&mut self, entry: FileEntry) -> usize {
        let index = self.entries.len();
        self.exact.insert(entry.path.as_str().to_string(), index);
        self.folded
            .entry(entry.path.to_lowercase_key())
            .or_default()
            .push(index);
        self.entries.push(entry);
        index
    }

    fn reindex(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        self.exact.clear();
        self.folded.clear();
        for entry in entries {
            self.push(entry);
        }
    }

    /// Returns the number of entries, including staged insertions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries in container order.
    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter()
    }

    /// Finds an entry index by exact path, then by unique case-insensitive match.
    pub fn find(&self, path: &str) -> Option<usize> {
        let normalized = path.replace('\\', "/");
        if let Some(&index) = self.exact.get(&normalized) {
            return Some(index);
        }
        match self.folded.get(&normalized.to_ascii_lowercase()) {
            Some(matches) if matches.len() == 1 => Some(matches[0]),
            _ => None,
        }
    }

    /// Looks up an entry by path.
    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.find(path).map(|i| &self.entries[i])
    }

    /// Returns true if an entry (exact or case-insensitive) has this path.
    pub fn exists(&self, path: &str) -> bool {
        self.exact.contains_key(path) || self.folded.contains_key(&path.to_ascii_lowercase())
    }

    /// Returns true if some entry lives below `dir`.
    pub fn is_dir(&self, dir: &str) -> bool {
        let dir = dir.trim_matches('/');
        if dir.is_empty() {
            return true;
        }
        let prefix = format!("{}/", dir);
        self.entries
            .iter()
            .any(|e| e.path.as_str().starts_with(&prefix))
    }

    /// Returns all directory paths in sorted order, starting with the root `""`.
    pub fn directories(&self) -> Vec<String> {
        let mut dirs = BTreeSet::new();
        dirs.insert(String::new());
        for entry in &self.entries {
            let mut parent = entry.path.parent();
            while let Some(dir) = parent {
                parent = dir.parent();
                if !dirs.insert(dir.as_str().to_string()) {
                    break;
                }
            }
        }
        dirs.into_iter().collect()
    }

    /// Returns the files directly inside `dir` (`""` for the root).
    pub fn list_dir(&self, dir: &str) -> Vec<&FileEntry> {
        let dir = dir.trim_matches('/');
        self.entries.iter().filter(|e| e.parent() == dir).collect()
    }

    /// Returns every file at or below `dir`.
    pub fn walk(&self, dir: &str) -> Vec<&FileEntry> {
        let dir = dir.trim_matches('/');
        if dir.is_empty() {
            return self.entries.iter().collect();
        }
        let prefix = format!("{}/", dir);
        self.entries
            .iter()
            .filter(|e| e.path.as_str().starts_with(&prefix))
            .collect()
    }

    pub(crate) fn entry(&self, index: usize) -> &FileEntry {
        &self.entries[index]
    }

    pub(crate) fn entry_mut(&mut self, index: usize) -> &mut FileEntry {
        &mut self.entries[index]
    }

    pub(crate) fn insert(&mut self, path: ResourcePath, data: Vec<u8>) -> usize {
        self.push(FileEntry {
            path,
            size: 0,
            handle: None,
            pending: Some(PendingChange::Import(data)),
        })
    }

    /// Removes an inserted entry.
    pub(crate) fn drop_inserted(&mut self, index: usize) {
        debug_assert!(self.entries[index].is_inserted());
        self.entries.remove(index);
        self.reindex();
    }
}
