//! Binary layout of `.mspk` patch packages.
//!
//! ```text
//! 0   magic "MSPK"
//! 4   format version        u16
//! 6   flags                 u16 (0)
//! 8   metadata length       u32
//! 12  manifest length       u32
//! 16  CRC-32 of metadata and manifest bytes
//! 20  reserved              u32
//! 24  metadata (UTF-8 JSON)
//! ..  manifest
//! ..  payload
//! ```
//!
//! All integers are little-endian. Payload offsets in the manifest are
//! relative to the first payload byte.

use std::collections::HashSet;
use std::io::{Read, Write};

use crate::digest::ContentDigest;
use crate::{Error, FileKind, Result, Target};

/// Package file signature.
pub const PACKAGE_MAGIC: &[u8; 4] = b"MSPK";

/// Highest package format version this build reads and the one it writes.
pub const PACKAGE_FORMAT_VERSION: u16 = 1;

/// Size of the fixed header.
pub const HEADER_SIZE: u64 = 24;

/// File extension of patch packages.
pub const PACKAGE_EXTENSION: &str = "mspk";

/// How a resource's bytes are stored in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Raw bytes.
    Stored,
    /// Raw deflate stream (requires the `deflate` feature).
    Deflate,
}

impl Default for Compression {
    /// Deflate when compiled in, stored otherwise.
    fn default() -> Self {
        if cfg!(feature = "deflate") {
            Compression::Deflate
        } else {
            Compression::Stored
        }
    }
}

impl Compression {
    /// Returns the manifest method id.
    pub fn id(self) -> u8 {
        match self {
            Compression::Stored => 0,
            Compression::Deflate => 1,
        }
    }

    /// Maps a manifest method id.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Compression::Stored),
            1 => Ok(Compression::Deflate),
            method => Err(Error::UnsupportedMethod { method }),
        }
    }

    pub(crate) fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::Stored => Ok(data.to_vec()),
            #[cfg(feature = "deflate")]
            Compression::Deflate => {
                let mut encoder = flate2::write::DeflateEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    flate2::Compression::default(),
                );
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            #[cfg(not(feature = "deflate"))]
            Compression::Deflate => Err(Error::UnsupportedMethod { method: self.id() }),
        }
    }

    pub(crate) fn decompress(self, packed: &[u8], size: u64) -> Result<Vec<u8>> {
        match self {
            Compression::Stored => Ok(packed.to_vec()),
            #[cfg(feature = "deflate")]
            Compression::Deflate => {
                let mut out = Vec::with_capacity(size.min(64 << 20) as usize);
                flate2::read::DeflateDecoder::new(packed)
                    .take(size + 1)
                    .read_to_end(&mut out)
                    .map_err(|e| Error::InvalidFormat(format!("corrupt deflate stream: {}", e)))?;
                if out.len() as u64 != size {
                    return Err(Error::InvalidFormat(format!(
                        "deflate stream holds {} bytes, manifest says {}",
                        out.len(),
                        size
                    )));
                }
                Ok(out)
            }
            #[cfg(not(feature = "deflate"))]
            Compression::Deflate => {
                let _ = (packed, size);
                Err(Error::UnsupportedMethod { method: self.id() })
            }
        }
    }
}

/// One added resource in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    /// Where the resource is installed.
    pub target: Target,
    /// Payload storage method.
    pub compression: Compression,
    /// Offset of the stored bytes, relative to the payload start.
    pub offset: u64,
    /// Stored (possibly compressed) size.
    pub packed_size: u64,
    /// Uncompressed size.
    pub size: u64,
    /// Digest of the uncompressed bytes.
    pub digest: ContentDigest,
}

/// The resource manifest of a package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Added resources in payload order.
    pub resources: Vec<ResourceEntry>,
    /// Targets the package deletes.
    pub removed: Vec<Target>,
}

impl Manifest {
    /// Serializes the manifest block.
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&count(self.resources.len())?.to_le_bytes());
        for entry in &self.resources {
            put_target(&mut out, &entry.target)?;
            out.push(entry.compression.id());
            out.extend_from_slice(&entry.offset.to_le_bytes());
            out.extend_from_slice(&entry.packed_size.to_le_bytes());
            out.extend_from_slice(&entry.size.to_le_bytes());
            out.extend_from_slice(entry.digest.as_bytes());
        }
        out.extend_from_slice(&count(self.removed.len())?.to_le_bytes());
        for target in &self.removed {
            put_target(&mut out, target)?;
        }
        Ok(out)
    }

    /// Parses a manifest block, checking that each target appears once.
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = ManifestCursor { bytes, pos: 0 };
        let mut seen = HashSet::new();

        let added = cursor.u32()? as usize;
        let mut resources = Vec::with_capacity(added.min(bytes.len() / 59));
        for _ in 0..added {
            let target = cursor.target()?;
            let compression = Compression::from_id(cursor.u8()?)?;
            let offset = cursor.u64()?;
            let packed_size = cursor.u64()?;
            let size = cursor.u64()?;
            let digest = ContentDigest::from_bytes(cursor.array()?);
            if !seen.insert(target.clone()) {
                return Err(duplicate(&target));
            }
            resources.push(ResourceEntry {
                target,
                compression,
                offset,
                packed_size,
                size,
                digest,
            });
        }

        let removed_count = cursor.u32()? as usize;
        let mut removed = Vec::with_capacity(removed_count.min(bytes.len() / 3));
        for _ in 0..removed_count {
            let target = cursor.target()?;
            if !seen.insert(target.clone()) {
                return Err(duplicate(&target));
            }
            removed.push(target);
        }

        if cursor.pos != bytes.len() {
            return Err(Error::InvalidFormat(format!(
                "{} trailing bytes after package manifest",
                bytes.len() - cursor.pos
            )));
        }
        Ok(Self { resources, removed })
    }
}

fn duplicate(target: &Target) -> Error {
    Error::InvalidFormat(format!("target '{}' listed twice in manifest", target))
}

fn count(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| Error::InvalidOperation("too many manifest entries".into()))
}

fn put_target(out: &mut Vec<u8>, target: &Target) -> Result<()> {
    let s = target.to_string();
    let len = u16::try_from(s.len())
        .map_err(|_| Error::InvalidResourcePath(format!("target too long: {}", s)))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

struct ManifestCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ManifestCursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                Error::corrupt_header(
                    HEADER_SIZE + self.pos as u64,
                    "package manifest truncated",
                )
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn target(&mut self) -> Result<Target> {
        let len = u16::from_le_bytes(self.array()?) as usize;
        let raw = self.take(len)?;
        let s = std::str::from_utf8(raw)
            .map_err(|_| Error::InvalidFormat("manifest target is not UTF-8".into()))?;
        Target::parse(s)
    }
}

/// The fixed package header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PackageHeader {
    pub version: u16,
    pub metadata_len: u32,
    pub manifest_len: u32,
    pub crc: u32,
}

impl PackageHeader {
    pub(crate) fn for_blocks(metadata: &[u8], manifest: &[u8]) -> Result<Self> {
        let too_large = || Error::InvalidOperation("package header block exceeds 4 GiB".into());
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(metadata);
        hasher.update(manifest);
        Ok(Self {
            version: PACKAGE_FORMAT_VERSION,
            metadata_len: u32::try_from(metadata.len()).map_err(|_| too_large())?,
            manifest_len: u32::try_from(manifest.len()).map_err(|_| too_large())?,
            crc: hasher.finalize(),
        })
    }

    pub(crate) fn write(&self, w: &mut dyn Write) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[..4].copy_from_slice(PACKAGE_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.metadata_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.manifest_len.to_le_bytes());
        buf[16..20].copy_from_slice(&self.crc.to_le_bytes());
        w.write_all(&buf)?;
        Ok(())
    }

    /// Reads and validates the magic and version.
    pub(crate) fn read(r: &mut dyn Read) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        r.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::InvalidFormat("file too short for a patch package".into())
            } else {
                Error::Io(e)
            }
        })?;
        if &buf[..4] != PACKAGE_MAGIC {
            return Err(Error::InvalidFormat("not a patch package (bad magic)".into()));
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version == 0 || version > PACKAGE_FORMAT_VERSION {
            return Err(Error::UnsupportedFormatVersion {
                kind: FileKind::Package,
                found: version,
                supported: PACKAGE_FORMAT_VERSION,
            });
        }
        let le = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        Ok(Self {
            version,
            metadata_len: le(8),
            manifest_len: le(12),
            crc: le(16),
        })
    }

    /// Returns the offset of the first payload byte.
    pub(crate) fn payload_start(&self) -> u64 {
        HEADER_SIZE + self.metadata_len as u64 + self.manifest_len as u64
    }
}
