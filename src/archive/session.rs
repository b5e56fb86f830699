//! Staged editing of a container and atomic commit.

use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::model::{ArchiveTree, FileEntry, PendingChange};
use crate::atomic_file::write_atomic;
use crate::codec::{CodecRegistry, DynCodec, RebuildItem};
use crate::progress::ProgressReporter;
use crate::{Error, ResourcePath, Result};

/// An entry that could not be written during a commit.
#[derive(Debug)]
pub struct EntryFailure {
    /// Entry path.
    pub path: ResourcePath,
    /// Why the codec rejected the staged bytes.
    pub error: Error,
}

/// Result of a commit operation.
#[must_use = "commit result should be checked for failed entries"]
#[derive(Debug, Default)]
pub struct CommitResult {
    /// Entries copied unchanged (raw bytes).
    pub entries_kept: usize,
    /// Entries whose bytes were replaced.
    pub entries_replaced: usize,
    /// New entries written.
    pub entries_inserted: usize,
    /// Entries left out of the rebuilt container.
    pub entries_removed: usize,
    /// Total bytes written to the output.
    pub total_bytes: u64,
    /// Staged entries the codec could not encode.
    ///
    /// Replacements that failed keep their original bytes in the output;
    /// insertions that failed are left out.
    pub failed: Vec<EntryFailure>,
}

impl CommitResult {
    /// Returns the number of entries in the rebuilt container.
    pub fn total_entries(&self) -> usize {
        self.entries_kept + self.entries_replaced + self.entries_inserted
    }

    /// Returns true if every staged change was written.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// An opened container with staged, not yet committed changes.
///
/// The archive owns its input stream for its whole lifetime. Staging never
/// touches the stream; [`commit`](Self::commit) rebuilds the container into
/// a new output and consumes the archive, [`discard`](Self::discard) drops
/// every staged change without writing anything.
///
/// # Example
///
/// ```rust,no_run
/// use modstack::{Archive, CodecRegistry};
/// use modstack::progress::NoProgress;
///
/// let registry = CodecRegistry::with_builtin();
/// let mut archive = Archive::open_path("DUKE3D.GRP", &registry)?;
/// archive.stage_import("GAME.CON", b"// patched\n".to_vec())?;
/// let result = archive.commit_in_place(&mut NoProgress)?;
/// println!("replaced {} entries", result.entries_replaced);
/// # Ok::<(), modstack::Error>(())
/// ```
pub struct Archive<R> {
    reader: R,
    codec: Arc<dyn DynCodec>,
    tree: ArchiveTree,
    source: Option<PathBuf>,
}

impl<R> std::fmt::Debug for Archive<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("codec", &self.codec.descriptor().name)
            .field("entries", &self.tree.len())
            .field("source", &self.source)
            .finish()
    }
}

impl Archive<BufReader<File>> {
    /// Opens a container file, selecting the codec from `registry`.
    pub fn open_path(path: impl AsRef<Path>, registry: &CodecRegistry) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let codec = registry.detect(&mut reader, path.to_str())?;
        let mut archive = Self::open(reader, codec)?;
        archive.source = Some(path.to_path_buf());
        Ok(archive)
    }
}

impl<R: Read + Seek> Archive<R> {
    /// Loads the container directory from `reader` using `codec`.
    ///
    /// Fails without producing an archive if the codec rejects the bytes.
    pub fn open(mut reader: R, codec: Arc<dyn DynCodec>) -> Result<Self> {
        let loaded = codec.load(&mut reader)?;
        let tree = ArchiveTree::from_loaded(loaded)?;
        log::debug!(
            "opened {} container with {} entries",
            codec.descriptor().name,
            tree.len()
        );
        Ok(Self {
            reader,
            codec,
            tree,
            source: None,
        })
    }

    /// Returns the codec serving this archive.
    pub fn codec(&self) -> &Arc<dyn DynCodec> {
        &self.codec
    }

    /// Returns the path the archive was opened from, if any.
    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Returns the directory tree.
    pub fn tree(&self) -> &ArchiveTree {
        &self.tree
    }

    /// Iterates over all entries in container order.
    ///
    /// Includes staged insertions and entries staged for removal.
    pub fn entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.tree.iter()
    }

    /// Looks up an entry by exact path, then case-insensitively.
    pub fn entry(&self, path: &str) -> Option<&FileEntry> {
        self.tree.get(path)
    }

    /// Returns all directory paths, starting with the root `""`.
    pub fn directories(&self) -> Vec<String> {
        self.tree.directories()
    }

    /// Returns the files directly inside `dir`.
    pub fn list_dir(&self, dir: &str) -> Vec<&FileEntry> {
        self.tree.list_dir(dir)
    }

    /// Returns the number of entries with a staged change.
    pub fn pending_count(&self) -> usize {
        self.tree.iter().filter(|e| e.pending().is_some()).count()
    }

    fn require(&self, path: &str) -> Result<usize> {
        self.tree.find(path).ok_or_else(|| Error::EntryNotFound {
            path: path.to_string(),
        })
    }

    /// Returns the entry's current bytes.
    ///
    /// Staged bytes win over the original; entries staged for removal are
    /// reported as not found.
    pub fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        let index = self.require(path)?;
        let entry = self.tree.entry(index);
        match (entry.pending(), entry.handle()) {
            (Some(PendingChange::Import(data)), _) => Ok(data.clone()),
            (Some(PendingChange::Remove), _) => Err(Error::EntryNotFound {
                path: path.to_string(),
            }),
            (None, Some(handle)) => {
                let handle = handle.clone();
                self.codec.decode_entry(&handle, &mut self.reader)
            }
            (None, None) => Err(Error::EntryNotFound {
                path: path.to_string(),
            }),
        }
    }

    /// Stages replacement bytes for an existing entry.
    ///
    /// Replaces any earlier staged change on the same entry. Performs no I/O.
    pub fn stage_import(&mut self, path: &str, data: Vec<u8>) -> Result<()> {
        let index = self.require(path)?;
        log::debug!("staging {} bytes for {}", data.len(), path);
        self.tree
            .entry_mut(index)
            .set_pending(Some(PendingChange::Import(data)));
        Ok(())
    }

    /// Stages a new entry.
    ///
    /// Fails with [`Error::EntryExists`] if an entry already has the path
    /// (also case-insensitively) and with [`Error::InvalidOperation`] if the
    /// format cannot insert entries.
    pub fn stage_insert(&mut self, path: ResourcePath, data: Vec<u8>) -> Result<()> {
        if !self.codec.supports_insert() {
            return Err(Error::InvalidOperation(format!(
                "{} containers do not support adding entries",
                self.codec.descriptor().name
            )));
        }
        if self.tree.exists(path.as_str()) {
            return Err(Error::EntryExists {
                path: path.to_string(),
            });
        }
        log::debug!("staging new entry {} ({} bytes)", path, data.len());
        self.tree.insert(path, data);
        Ok(())
    }

    /// Stages an entry for removal.
    ///
    /// Removing a staged insertion simply drops it.
    pub fn stage_removal(&mut self, path: &str) -> Result<()> {
        if !self.codec.supports_remove() {
            return Err(Error::InvalidOperation(format!(
                "{} containers do not support removing entries",
                self.codec.descriptor().name
            )));
        }
        let index = self.require(path)?;
        if self.tree.entry(index).is_inserted() {
            self.tree.drop_inserted(index);
        } else {
            self.tree
                .entry_mut(index)
                .set_pending(Some(PendingChange::Remove));
        }
        Ok(())
    }

    /// Drops the staged change of one entry.
    ///
    /// Returns `false` if the entry had nothing staged.
    pub fn unstage(&mut self, path: &str) -> Result<bool> {
        let index = self.require(path)?;
        if self.tree.entry(index).is_inserted() {
            self.tree.drop_inserted(index);
            return Ok(true);
        }
        Ok(self.tree.entry_mut(index).take_pending().is_some())
    }

    /// Drops the archive and every staged change without writing.
    ///
    /// Returns the input stream.
    pub fn discard(self) -> R {
        log::debug!("discarding {} staged changes", self.pending_count());
        self.reader
    }

    /// Rebuilds the container into `writer`, applying staged changes.
    ///
    /// Staged bytes the codec cannot encode are collected into
    /// [`CommitResult::failed`]; every other entry is still written.
    /// Cancellation is checked before each entry and returns
    /// [`Error::Cancelled`], in which case the output is incomplete.
    pub fn commit<W: Write>(
        mut self,
        mut writer: W,
        progress: &mut dyn ProgressReporter,
    ) -> Result<CommitResult> {
        let mut result = CommitResult::default();

        // Encode staged bytes first so failures never reach the writer.
        let mut encoded: Vec<Option<Vec<u8>>> = Vec::with_capacity(self.tree.len());
        for entry in self.tree.iter() {
            let data = match entry.pending() {
                Some(PendingChange::Import(data)) => data,
                _ => {
                    encoded.push(None);
                    continue;
                }
            };
            if progress.should_cancel() {
                return Err(Error::Cancelled);
            }
            match self.codec.encode_entry(entry.path(), data, entry.handle()) {
                Ok(bytes) => encoded.push(Some(bytes)),
                Err(e) if e.is_per_file() => {
                    log::warn!("cannot store {}: {}", entry.path(), e);
                    progress.on_warning(&format!("{}: {}", entry.path(), e));
                    result.failed.push(EntryFailure {
                        path: entry.path().clone(),
                        error: e,
                    });
                    encoded.push(None);
                }
                Err(e) => return Err(e),
            }
        }

        let mut plan = Vec::with_capacity(self.tree.len());
        for (entry, bytes) in self.tree.iter().zip(&encoded) {
            match (entry.pending(), entry.handle(), bytes) {
                (Some(PendingChange::Remove), _, _) => result.entries_removed += 1,
                (_, handle, Some(data)) => {
                    if handle.is_some() {
                        result.entries_replaced += 1;
                    } else {
                        result.entries_inserted += 1;
                    }
                    plan.push(RebuildItem::Write {
                        path: entry.path(),
                        data: data.as_slice(),
                        handle,
                    });
                }
                (_, Some(handle), None) => {
                    result.entries_kept += 1;
                    plan.push(RebuildItem::Keep {
                        path: entry.path(),
                        handle,
                    });
                }
                // A failed insertion has nothing to fall back on.
                (_, None, None) => {}
            }
        }

        result.total_bytes = self
            .codec
            .rebuild(&plan, &mut self.reader, &mut writer, progress)?;
        writer.flush()?;

        log::info!(
            "committed {} container: {} kept, {} replaced, {} inserted, {} removed, {} failed",
            self.codec.descriptor().name,
            result.entries_kept,
            result.entries_replaced,
            result.entries_inserted,
            result.entries_removed,
            result.failed.len()
        );
        Ok(result)
    }

    /// Commits over the file the archive was opened from.
    ///
    /// The container is rebuilt into a temporary file next to the original,
    /// which replaces it by rename only after the whole commit succeeded.
    /// Fails with [`Error::InvalidOperation`] for archives not opened from
    /// a path.
    pub fn commit_in_place(mut self, progress: &mut dyn ProgressReporter) -> Result<CommitResult> {
        let target = self.source.take().ok_or_else(|| {
            Error::InvalidOperation("archive was not opened from a file path".into())
        })?;
        write_atomic(&target, |writer| self.commit(writer, progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{GrpCodec, WadCodec};
    use crate::progress::{NoProgress, StatisticsProgress};
    use std::io::Cursor;

    fn grp_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = b"KenSilverman".to_vec();
        out.extend_from_slice(&(files.len() as u32).to_le_bytes());
        for (name, data) in files {
            let mut field = [0u8; 12];
            field[..name.len()].copy_from_slice(name.as_bytes());
            out.extend_from_slice(&field);
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        }
        for (_, data) in files {
            out.extend_from_slice(data);
        }
        out
    }

    fn open_grp(files: &[(&str, &[u8])]) -> Archive<Cursor<Vec<u8>>> {
        Archive::open(Cursor::new(grp_bytes(files)), Arc::new(GrpCodec)).unwrap()
    }

    fn reopen(bytes: Vec<u8>) -> Archive<Cursor<Vec<u8>>> {
        Archive::open(Cursor::new(bytes), Arc::new(GrpCodec)).unwrap()
    }

    #[test]
    fn test_read_prefers_staged_bytes() {
        let mut archive = open_grp(&[("A.BIN", b"old")]);
        assert_eq!(archive.read("A.BIN").unwrap(), b"old");

        archive.stage_import("a.bin", b"new".to_vec()).unwrap();
        assert_eq!(archive.read("A.BIN").unwrap(), b"new");
        assert_eq!(archive.entry("A.BIN").unwrap().size(), 3);
        assert_eq!(archive.pending_count(), 1);
    }

    #[test]
    fn test_restaging_replaces_previous_import() {
        let mut archive = open_grp(&[("A.BIN", b"old")]);
        archive.stage_import("A.BIN", b"first".to_vec()).unwrap();
        archive.stage_import("A.BIN", b"second".to_vec()).unwrap();
        assert_eq!(archive.pending_count(), 1);
        assert_eq!(archive.read("A.BIN").unwrap(), b"second");
    }

    #[test]
    fn test_stage_missing_entry() {
        let mut archive = open_grp(&[("A.BIN", b"old")]);
        let err = archive.stage_import("B.BIN", Vec::new()).unwrap_err();
        assert!(matches!(err, Error::EntryNotFound { .. }));
    }

    #[test]
    fn test_insert_existing_rejected() {
        let mut archive = open_grp(&[("A.BIN", b"old")]);
        let err = archive
            .stage_insert(ResourcePath::new("a.bin").unwrap(), Vec::new())
            .unwrap_err();
        assert!(matches!(err, Error::EntryExists { .. }));
    }

    #[test]
    fn test_removal_and_unstage() {
        let mut archive = open_grp(&[("A.BIN", b"a"), ("B.BIN", b"b")]);
        archive.stage_removal("B.BIN").unwrap();
        assert!(matches!(
            archive.read("B.BIN"),
            Err(Error::EntryNotFound { .. })
        ));
        assert!(archive.unstage("B.BIN").unwrap());
        assert!(!archive.unstage("B.BIN").unwrap());
        assert_eq!(archive.read("B.BIN").unwrap(), b"b");

        archive
            .stage_insert(ResourcePath::new("C.BIN").unwrap(), b"c".to_vec())
            .unwrap();
        archive.stage_removal("C.BIN").unwrap();
        assert!(archive.entry("C.BIN").is_none());
        assert_eq!(archive.pending_count(), 0);
    }

    #[test]
    fn test_discard_writes_nothing() {
        let original = grp_bytes(&[("A.BIN", b"a")]);
        let mut archive = reopen(original.clone());
        archive.stage_import("A.BIN", b"zzz".to_vec()).unwrap();
        let reader = archive.discard();
        assert_eq!(reader.into_inner(), original);
    }

    #[test]
    fn test_commit_collects_conversion_failures() {
        let mut archive = open_grp(&[("A.BIN", b"a"), ("B.BIN", b"b")]);
        archive.stage_import("A.BIN", b"AA".to_vec()).unwrap();
        archive
            .stage_insert(ResourcePath::new("NAME_TOO_LONG.BIN").unwrap(), b"x".to_vec())
            .unwrap();

        let mut out: Vec<u8> = Vec::new();
        let result = archive.commit(&mut out, &mut NoProgress).unwrap();
        assert_eq!(result.entries_replaced, 1);
        assert_eq!(result.entries_kept, 1);
        assert_eq!(result.entries_inserted, 0);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].path.as_str(), "NAME_TOO_LONG.BIN");
        assert!(!result.is_complete());

        let mut reopened = reopen(out);
        assert_eq!(reopened.tree().len(), 2);
        assert_eq!(reopened.read("A.BIN").unwrap(), b"AA");
        assert_eq!(reopened.read("B.BIN").unwrap(), b"b");
    }

    #[test]
    fn test_commit_cancelled() {
        let mut archive = open_grp(&[("A.BIN", b"a")]);
        archive.stage_import("A.BIN", b"new".to_vec()).unwrap();
        let mut progress = StatisticsProgress::new();
        progress.cancelled = true;
        let err = archive
            .commit(Vec::<u8>::new(), &mut progress)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_wad_insert_not_supported() {
        let mut wad = b"PWAD".to_vec();
        wad.extend_from_slice(&0u32.to_le_bytes());
        wad.extend_from_slice(&12u32.to_le_bytes());
        let mut archive = Archive::open(Cursor::new(wad), Arc::new(WadCodec)).unwrap();
        let err = archive
            .stage_insert(ResourcePath::new("NEW").unwrap(), Vec::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_commit_in_place_requires_path() {
        let archive = open_grp(&[("A.BIN", b"a")]);
        let err = archive.commit_in_place(&mut NoProgress).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }
}
