//! Atomic file replacement.
//!
//! Every file this crate produces (committed containers, packages, library
//! state, backup blobs, patched loose files) is written to a temporary file
//! in the destination directory, synced, and then renamed over the target.
//! Readers see either the old or the new file, never a partial one.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::{Error, Result};

/// Writes `path` atomically using the bytes produced by `write`.
///
/// If the target already exists its permissions are carried over. On any
/// error the temporary file is removed and the target is left untouched.
pub(crate) fn write_atomic<T>(
    path: &Path,
    write: impl FnOnce(&mut dyn Write) -> Result<T>,
) -> Result<T> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)?;

    let value = {
        let mut writer = BufWriter::new(temp.as_file_mut());
        let value = write(&mut writer)?;
        writer.flush()?;
        value
    };

    if let Ok(existing) = fs::metadata(path) {
        if let Err(e) = fs::set_permissions(temp.path(), existing.permissions()) {
            log::warn!("could not copy permissions to {}: {}", path.display(), e);
        }
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(value)
}

/// Writes a byte slice to `path` atomically.
pub(crate) fn write_bytes_atomic(path: &Path, data: &[u8]) -> Result<()> {
    write_atomic(path, |w| {
        w.write_all(data)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_new_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        write_bytes_atomic(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_failed_write_keeps_original() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        fs::write(&path, b"original").unwrap();

        let result: Result<()> = write_atomic(&path, |w| {
            w.write_all(b"partial")?;
            Err(Error::Cancelled)
        });
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(fs::read(&path).unwrap(), b"original");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("out.bin");
        let err = write_bytes_atomic(&path, b"x").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
