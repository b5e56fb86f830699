//! Codec selection by signature and extension.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use super::{ContainerCodec, DynCodec, GrpCodec, PakCodec, WadCodec};
use crate::{Error, Result};

/// Number of leading bytes inspected for signatures.
const SIGNATURE_PROBE_LEN: usize = 16;

/// A set of container codecs, selected per file.
///
/// Detection tries signatures first and falls back to the file extension,
/// so a container with a damaged header is still routed to the codec that
/// reports a precise format error.
///
/// # Example
///
/// ```rust
/// use modstack::CodecRegistry;
/// use std::io::Cursor;
///
/// let registry = CodecRegistry::with_builtin();
/// let mut data = Cursor::new(b"PACK\x0c\0\0\0\0\0\0\0".to_vec());
/// let codec = registry.detect(&mut data, Some("id1/pak0.pak")).unwrap();
/// assert_eq!(codec.descriptor().name, "PAK");
/// ```
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: Vec<Arc<dyn DynCodec>>,
}

impl CodecRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the GRP, PAK and WAD codecs.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(GrpCodec);
        registry.register(PakCodec);
        registry.register(WadCodec);
        registry
    }

    /// Registers a codec. Later registrations win ties.
    pub fn register<C: ContainerCodec>(&mut self, codec: C) -> &mut Self {
        self.codecs.push(Arc::new(codec));
        self
    }

    /// Returns the registered codecs in registration order.
    pub fn codecs(&self) -> &[Arc<dyn DynCodec>] {
        &self.codecs
    }

    /// Finds a codec by its descriptor name (case-insensitive).
    pub fn by_name(&self, name: &str) -> Option<Arc<dyn DynCodec>> {
        self.codecs
            .iter()
            .rev()
            .find(|c| c.descriptor().name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Finds a codec by file extension alone.
    pub fn by_extension(&self, file_name: &str) -> Option<Arc<dyn DynCodec>> {
        let extension = Path::new(file_name).extension()?.to_str()?;
        self.codecs
            .iter()
            .rev()
            .find(|c| c.descriptor().matches_extension(extension))
            .cloned()
    }

    /// Returns true if the file name has the extension of a registered codec.
    pub fn is_container_name(&self, file_name: &str) -> bool {
        self.by_extension(file_name).is_some()
    }

    /// Selects the codec for a stream.
    ///
    /// Reads up to 16 bytes from the current position and restores it
    /// afterwards. Returns [`Error::UnknownContainer`] if neither the
    /// signature nor the extension of `file_name` matches.
    pub fn detect<R: Read + Seek + ?Sized>(
        &self,
        reader: &mut R,
        file_name: Option<&str>,
    ) -> Result<Arc<dyn DynCodec>> {
        let start = reader.stream_position()?;
        let mut header = Vec::with_capacity(SIGNATURE_PROBE_LEN);
        Read::take(&mut *reader, SIGNATURE_PROBE_LEN as u64).read_to_end(&mut header)?;
        reader.seek(SeekFrom::Start(start))?;

        if let Some(codec) = self
            .codecs
            .iter()
            .rev()
            .find(|c| c.descriptor().matches_signature(&header))
        {
            log::debug!("detected {} container by signature", codec.descriptor().name);
            return Ok(Arc::clone(codec));
        }

        if let Some(codec) = file_name.and_then(|name| self.by_extension(name)) {
            log::debug!("detected {} container by extension", codec.descriptor().name);
            return Ok(codec);
        }

        Err(Error::UnknownContainer {
            path: file_name.unwrap_or("<stream>").to_string(),
        })
    }

    /// Opens a file and selects its codec.
    pub fn detect_path(&self, path: impl AsRef<Path>) -> Result<Arc<dyn DynCodec>> {
        let path = path.as_ref();
        let mut file = std::fs::File::open(path)?;
        self.detect(&mut file, path.to_str())
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.codecs.iter().map(|c| c.descriptor().name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_detect_by_signature() {
        let registry = CodecRegistry::with_builtin();
        let mut cursor = Cursor::new(b"KenSilverman\0\0\0\0".to_vec());
        let codec = registry.detect(&mut cursor, Some("misnamed.pak")).unwrap();
        assert_eq!(codec.descriptor().name, "GRP");
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_detect_by_extension_fallback() {
        let registry = CodecRegistry::with_builtin();
        let mut cursor = Cursor::new(b"garbage".to_vec());
        let codec = registry.detect(&mut cursor, Some("DOOM2.WAD")).unwrap();
        assert_eq!(codec.descriptor().name, "WAD");
    }

    #[test]
    fn test_detect_unknown() {
        let registry = CodecRegistry::with_builtin();
        let mut cursor = Cursor::new(b"garbage".to_vec());
        let err = registry.detect(&mut cursor, Some("notes.txt")).err().unwrap();
        assert!(matches!(err, Error::UnknownContainer { .. }));

        let err = CodecRegistry::new()
            .detect(&mut Cursor::new(b"PACK".to_vec()), None)
            .err()
            .unwrap();
        assert!(err.to_string().contains("<stream>"));
    }

    #[test]
    fn test_lookup_helpers() {
        let registry = CodecRegistry::with_builtin();
        assert!(registry.by_name("grp").is_some());
        assert!(registry.is_container_name("maps/DUKE3D.GRP"));
        assert!(!registry.is_container_name("readme.txt"));
        assert_eq!(format!("{:?}", registry), r#"["GRP", "PAK", "WAD"]"#);
    }
}
