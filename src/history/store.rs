//! Content-addressed blob storage for original bytes.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::atomic_file::write_bytes_atomic;
use crate::digest::ContentDigest;
use crate::{Error, Result};

/// A stored blob: its digest and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobRef {
    /// SHA-256 of the blob.
    pub digest: ContentDigest,
    /// Length in bytes.
    pub size: u64,
}

impl BlobRef {
    /// Describes `data` without storing it.
    pub fn of(data: &[u8]) -> Self {
        Self {
            digest: ContentDigest::of(data),
            size: data.len() as u64,
        }
    }
}

/// Blob store laid out as `<root>/<first two hex digits>/<digest>`.
///
/// Blobs are written once and never modified; storing the same bytes twice
/// is a no-op.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
    verify: bool,
}

impl BackupStore {
    /// Creates a store rooted at `root`. Directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            verify: true,
        }
    }

    /// Sets whether [`get`](Self::get) re-hashes blobs (default: true).
    pub fn verify_on_read(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Returns the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns where a blob with `digest` lives.
    pub fn blob_path(&self, digest: &ContentDigest) -> PathBuf {
        let hex = digest.to_hex();
        self.root.join(&hex[..2]).join(hex)
    }

    /// Stores `data`, returning its reference.
    pub fn put(&self, data: &[u8]) -> Result<BlobRef> {
        let blob = BlobRef::of(data);
        let path = self.blob_path(&blob.digest);
        if fs::metadata(&path).is_ok_and(|m| m.len() == blob.size) {
            log::debug!("blob {} already stored", blob.digest);
            return Ok(blob);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        write_bytes_atomic(&path, data)?;
        log::debug!("stored blob {} ({} bytes)", blob.digest, blob.size);
        Ok(blob)
    }

    /// Reads a blob back.
    ///
    /// With verification on, fails with [`Error::DigestMismatch`] if the
    /// stored bytes were altered.
    pub fn get(&self, blob: &BlobRef) -> Result<Vec<u8>> {
        let path = self.blob_path(&blob.digest);
        let data = fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("backup blob {} is missing", blob.digest),
                ))
            } else {
                Error::Io(e)
            }
        })?;
        if self.verify {
            blob.digest
                .verify(&format!("backup blob {}", path.display()), &data)?;
        }
        Ok(data)
    }

    /// Returns true if the blob is present.
    pub fn contains(&self, blob: &BlobRef) -> bool {
        self.blob_path(&blob.digest).is_file()
    }

    /// Deletes a blob. Returns false if it was not present.
    pub fn remove(&self, blob: &BlobRef) -> Result<bool> {
        match fs::remove_file(self.blob_path(&blob.digest)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every blob whose digest is not in `live`.
    ///
    /// Files that do not look like blobs are left alone. Returns the number
    /// of blobs deleted.
    pub fn collect_garbage(&self, live: &HashSet<ContentDigest>) -> Result<usize> {
        let shards = match fs::read_dir(&self.root) {
            Ok(shards) => shards,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for shard in shards {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(shard.path())? {
                let file = file?;
                let digest = match file.file_name().to_str().map(str::parse::<ContentDigest>) {
                    Some(Ok(digest)) => digest,
                    _ => continue,
                };
                if live.contains(&digest) {
                    continue;
                }
                fs::remove_file(file.path())?;
                log::debug!("collected orphan blob {}", digest);
                removed += 1;
            }
            // Only succeeds once the shard is empty.
            let _ = fs::remove_dir(shard.path());
        }
        Ok(removed)
    }
}
