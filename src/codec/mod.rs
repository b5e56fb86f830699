//! Container codecs for game asset archives.
//!
//! A codec is a stateless strategy for one container format. It turns the
//! raw bytes of a container into an ordered list of entries, decodes and
//! encodes single entries, and rebuilds a whole container from a plan of
//! kept and rewritten entries.
//!
//! Codecs are written against [`ContainerCodec`], which carries a typed
//! per-entry handle. The rest of the crate works with [`DynCodec`], an
//! object-safe view that every `ContainerCodec` gets through a blanket impl
//! and whose handles travel as opaque [`EntryHandle`]s.
//!
//! # Built-in codecs
//!
//! | Codec | Game family | Nested paths | Insert | Remove |
//! |-------|-------------|--------------|--------|--------|
//! | [`GrpCodec`] | Build engine (`KenSilverman`) | No | Yes | Yes |
//! | [`PakCodec`] | Quake (`PACK`) | Yes | Yes | Yes |
//! | [`WadCodec`] | Doom (`IWAD`/`PWAD`) | Map groups only | No | Yes |

use std::any::Any;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::progress::ProgressReporter;
use crate::{Error, ResourcePath, Result};

pub mod grp;
pub mod pak;
pub mod registry;
pub mod wad;

pub use grp::GrpCodec;
pub use pak::PakCodec;
pub use registry::CodecRegistry;
pub use wad::WadCodec;

/// A seekable input stream.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// Static description of a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecDescriptor {
    /// Short format name, e.g. `"GRP"`.
    pub name: &'static str,
    /// Lowercase file extensions without the leading dot.
    pub extensions: &'static [&'static str],
    /// Magic byte sequences found at offset 0.
    pub signatures: &'static [&'static [u8]],
}

impl CodecDescriptor {
    /// Returns true if the header starts with one of the signatures.
    pub fn matches_signature(&self, header: &[u8]) -> bool {
        self.signatures
            .iter()
            .any(|sig| header.len() >= sig.len() && header.starts_with(sig))
    }

    /// Returns true if the extension belongs to this format (case-insensitive).
    pub fn matches_extension(&self, extension: &str) -> bool {
        self.extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }
}

/// One entry produced by [`ContainerCodec::load`].
#[derive(Debug, Clone)]
pub struct LoadedEntry<H> {
    /// Entry path inside the container.
    pub path: ResourcePath,
    /// Decoded size in bytes.
    pub size: u64,
    /// Codec-specific location data.
    pub handle: H,
}

/// One entry of the container being rebuilt, in output order.
#[derive(Debug)]
pub enum RebuildItem<'a, H> {
    /// Copy the entry's raw bytes from the original container.
    Keep {
        /// Entry path.
        path: &'a ResourcePath,
        /// Handle from the original load.
        handle: &'a H,
    },
    /// Write already-encoded bytes.
    Write {
        /// Entry path.
        path: &'a ResourcePath,
        /// Bytes produced by [`ContainerCodec::encode_entry`].
        data: &'a [u8],
        /// Handle of the replaced entry, `None` for inserted entries.
        handle: Option<&'a H>,
    },
}

impl<H> RebuildItem<'_, H> {
    /// Returns the entry path.
    pub fn path(&self) -> &ResourcePath {
        match self {
            RebuildItem::Keep { path, .. } | RebuildItem::Write { path, .. } => path,
        }
    }
}

/// A container format strategy.
///
/// Implementations hold no per-archive state; one instance serves every
/// archive of its format.
pub trait ContainerCodec: Send + Sync + 'static {
    /// Per-entry location data (offsets, sizes, raw names).
    type Handle: Clone + fmt::Debug + Send + Sync + 'static;

    /// Returns the static format description.
    fn descriptor(&self) -> &'static CodecDescriptor;

    /// Reads the container directory.
    ///
    /// Entries are returned in container order. Fails with a format error if
    /// the signature or directory structure is invalid; only reads from the
    /// stream.
    fn load(&self, reader: &mut dyn ReadSeek) -> Result<Vec<LoadedEntry<Self::Handle>>>;

    /// Reads and decodes one entry.
    fn decode_entry(&self, handle: &Self::Handle, reader: &mut dyn ReadSeek) -> Result<Vec<u8>>;

    /// Produces the on-disk representation of a replacement or new entry.
    ///
    /// Fails with [`Error::UnsupportedConversion`] if the format cannot hold
    /// the data under that path.
    fn encode_entry(
        &self,
        path: &ResourcePath,
        data: &[u8],
        handle: Option<&Self::Handle>,
    ) -> Result<Vec<u8>>;

    /// Writes a complete container following `plan`.
    ///
    /// Returns the number of bytes written. Checks for cancellation before
    /// each entry.
    fn rebuild(
        &self,
        plan: &[RebuildItem<'_, Self::Handle>],
        reader: &mut dyn ReadSeek,
        writer: &mut dyn Write,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64>;

    /// Returns whether new entries can be added.
    fn supports_insert(&self) -> bool {
        true
    }

    /// Returns whether entries can be removed.
    fn supports_remove(&self) -> bool {
        true
    }
}

/// A type-erased codec entry handle.
///
/// Meaningless outside the codec that produced it.
#[derive(Clone)]
pub struct EntryHandle(Arc<dyn Any + Send + Sync>);

impl EntryHandle {
    /// Wraps a typed handle.
    pub fn new<H: Any + Send + Sync>(handle: H) -> Self {
        Self(Arc::new(handle))
    }

    /// Returns the typed handle if it has type `H`.
    pub fn downcast<H: Any>(&self) -> Option<&H> {
        self.0.downcast_ref::<H>()
    }
}

impl fmt::Debug for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EntryHandle(..)")
    }
}

/// Object-safe view of a [`ContainerCodec`].
pub trait DynCodec: Send + Sync {
    /// Returns the static format description.
    fn descriptor(&self) -> &'static CodecDescriptor;

    /// See [`ContainerCodec::load`].
    fn load(&self, reader: &mut dyn ReadSeek) -> Result<Vec<LoadedEntry<EntryHandle>>>;

    /// See [`ContainerCodec::decode_entry`].
    fn decode_entry(&self, handle: &EntryHandle, reader: &mut dyn ReadSeek) -> Result<Vec<u8>>;

    /// See [`ContainerCodec::encode_entry`].
    fn encode_entry(
        &self,
        path: &ResourcePath,
        data: &[u8],
        handle: Option<&EntryHandle>,
    ) -> Result<Vec<u8>>;

    /// See [`ContainerCodec::rebuild`].
    fn rebuild(
        &self,
        plan: &[RebuildItem<'_, EntryHandle>],
        reader: &mut dyn ReadSeek,
        writer: &mut dyn Write,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64>;

    /// See [`ContainerCodec::supports_insert`].
    fn supports_insert(&self) -> bool;

    /// See [`ContainerCodec::supports_remove`].
    fn supports_remove(&self) -> bool;
}

fn typed_handle<'a, C: ContainerCodec>(
    codec: &C,
    handle: &'a EntryHandle,
) -> Result<&'a C::Handle> {
    handle.downcast::<C::Handle>().ok_or_else(|| {
        Error::InvalidOperation(format!(
            "entry handle does not belong to the {} codec",
            ContainerCodec::descriptor(codec).name
        ))
    })
}

impl<C: ContainerCodec> DynCodec for C {
    fn descriptor(&self) -> &'static CodecDescriptor {
        ContainerCodec::descriptor(self)
    }

    fn load(&self, reader: &mut dyn ReadSeek) -> Result<Vec<LoadedEntry<EntryHandle>>> {
        let entries = ContainerCodec::load(self, reader)?;
        Ok(entries
            .into_iter()
            .map(|e| LoadedEntry {
                path: e.path,
                size: e.size,
                handle: EntryHandle::new(e.handle),
            })
            .collect())
    }

    fn decode_entry(&self, handle: &EntryHandle, reader: &mut dyn ReadSeek) -> Result<Vec<u8>> {
        ContainerCodec::decode_entry(self, typed_handle(self, handle)?, reader)
    }

    fn encode_entry(
        &self,
        path: &ResourcePath,
        data: &[u8],
        handle: Option<&EntryHandle>,
    ) -> Result<Vec<u8>> {
        let handle = handle.map(|h| typed_handle(self, h)).transpose()?;
        ContainerCodec::encode_entry(self, path, data, handle)
    }

    fn rebuild(
        &self,
        plan: &[RebuildItem<'_, EntryHandle>],
        reader: &mut dyn ReadSeek,
        writer: &mut dyn Write,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64> {
        let mut typed = Vec::with_capacity(plan.len());
        for item in plan {
            typed.push(match item {
                RebuildItem::Keep { path, handle } => RebuildItem::Keep {
                    path: *path,
                    handle: typed_handle(self, handle)?,
                },
                RebuildItem::Write { path, data, handle } => RebuildItem::Write {
                    path: *path,
                    data: *data,
                    handle: (*handle).map(|h| typed_handle(self, h)).transpose()?,
                },
            });
        }
        ContainerCodec::rebuild(self, &typed, reader, writer, progress)
    }

    fn supports_insert(&self) -> bool {
        ContainerCodec::supports_insert(self)
    }

    fn supports_remove(&self) -> bool {
        ContainerCodec::supports_remove(self)
    }
}

// ============================================================================
// Binary helpers shared by the built-in codecs
// ============================================================================

/// Returns the stream length, leaving the position at the start.
pub(crate) fn stream_len(reader: &mut dyn ReadSeek) -> Result<u64> {
    let len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;
    Ok(len)
}

/// Reads exactly `len` bytes at `offset`.
pub(crate) fn read_at(reader: &mut dyn ReadSeek, offset: u64, len: usize) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::corrupt_header(offset, format!("expected {} bytes of data", len))
        } else {
            Error::Io(e)
        }
    })?;
    Ok(buf)
}

/// Copies `len` raw bytes at `offset` to the writer.
pub(crate) fn copy_range(
    reader: &mut dyn ReadSeek,
    offset: u64,
    len: u64,
    writer: &mut dyn Write,
) -> Result<()> {
    reader.seek(SeekFrom::Start(offset))?;
    let copied = io::copy(&mut Read::take(&mut *reader, len), writer)?;
    if copied != len {
        return Err(Error::corrupt_header(
            offset,
            format!("entry data truncated ({} of {} bytes)", copied, len),
        ));
    }
    Ok(())
}

pub(crate) fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Decodes a fixed-width, NUL-padded name field.
pub(crate) fn padded_name(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Encodes a name into a fixed-width, NUL-padded field.
pub(crate) fn pad_name(name: &str, width: usize) -> Vec<u8> {
    let mut field = vec![0u8; width];
    let bytes = name.as_bytes();
    let len = bytes.len().min(width);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

/// Returns the size of a plan item as written.
pub(crate) fn item_size<H>(item: &RebuildItem<'_, H>, keep_size: impl Fn(&H) -> u64) -> u64 {
    match item {
        RebuildItem::Keep { handle, .. } => keep_size(handle),
        RebuildItem::Write { data, .. } => data.len() as u64,
    }
}

/// Writes each plan item's data in order, returning the bytes written.
pub(crate) fn write_plan_data<H>(
    plan: &[RebuildItem<'_, H>],
    reader: &mut dyn ReadSeek,
    writer: &mut dyn Write,
    progress: &mut dyn ProgressReporter,
    raw_location: impl Fn(&H) -> (u64, u64),
) -> Result<u64> {
    let total: u64 = plan
        .iter()
        .map(|item| item_size(item, |h| raw_location(h).1))
        .sum();
    progress.on_total(total);

    let mut written = 0u64;
    for item in plan {
        if progress.should_cancel() {
            return Err(Error::Cancelled);
        }
        let size = item_size(item, |h| raw_location(h).1);
        progress.on_entry_start(item.path().as_str(), size);
        match item {
            RebuildItem::Keep { handle, .. } => {
                let (offset, len) = raw_location(handle);
                copy_range(reader, offset, len, writer)?;
            }
            RebuildItem::Write { data, .. } => writer.write_all(data)?,
        }
        written += size;
        progress.on_entry_complete(item.path().as_str(), true);
        if !progress.on_progress(written, total) {
            return Err(Error::Cancelled);
        }
    }
    Ok(written)
}
