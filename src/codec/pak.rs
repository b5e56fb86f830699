//! Quake package files (`.pak`).
//!
//! Layout (little-endian):
//!
//! ```text
//! 0    "PACK"
//! 4    u32 directory offset
//! 8    u32 directory length (multiple of 64)
//! ..   file data
//! dir  n x { name: [u8; 56] NUL-padded, offset: u32, size: u32 }
//! ```
//!
//! Names are `/`-separated paths. The rebuilt file keeps the directory at
//! the end, after all data.

use std::io::Write;

use super::{
    CodecDescriptor, ContainerCodec, LoadedEntry, ReadSeek, RebuildItem, item_size, le_u32,
    pad_name, padded_name, read_at, stream_len, write_plan_data,
};
use crate::progress::ProgressReporter;
use crate::{Error, ResourcePath, Result};

/// PAK file signature.
pub const PAK_SIGNATURE: &[u8] = b"PACK";

const HEADER_LEN: usize = 12;
const NAME_LEN: usize = 56;
const RECORD_LEN: usize = 64;

static DESCRIPTOR: CodecDescriptor = CodecDescriptor {
    name: "PAK",
    extensions: &["pak"],
    signatures: &[PAK_SIGNATURE],
};

/// Location of one file inside a PAK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PakHandle {
    /// Absolute offset of the data.
    pub offset: u64,
    /// Data size in bytes.
    pub size: u64,
}

/// Codec for Quake PAK files.
#[derive(Debug, Clone, Copy, Default)]
pub struct PakCodec;

impl ContainerCodec for PakCodec {
    type Handle = PakHandle;

    fn descriptor(&self) -> &'static CodecDescriptor {
        &DESCRIPTOR
    }

    fn load(&self, reader: &mut dyn ReadSeek) -> Result<Vec<LoadedEntry<PakHandle>>> {
        let len = stream_len(reader)?;
        if len < HEADER_LEN as u64 {
            return Err(Error::InvalidFormat("file too small for a PAK header".into()));
        }

        let header = read_at(reader, 0, HEADER_LEN)?;
        if !header.starts_with(PAK_SIGNATURE) {
            return Err(Error::InvalidFormat("missing PACK signature".into()));
        }

        let dir_offset = le_u32(&header, 4) as u64;
        let dir_len = le_u32(&header, 8) as u64;
        if dir_len % RECORD_LEN as u64 != 0 {
            return Err(Error::corrupt_header(
                8,
                format!("directory length {} is not a multiple of {}", dir_len, RECORD_LEN),
            ));
        }
        if dir_offset < HEADER_LEN as u64 || dir_offset + dir_len > len {
            return Err(Error::corrupt_header(
                4,
                format!("directory at {:#x} (+{}) lies outside the file", dir_offset, dir_len),
            ));
        }

        let directory = read_at(reader, dir_offset, dir_len as usize)?;
        let mut entries = Vec::with_capacity(directory.len() / RECORD_LEN);
        for (index, record) in directory.chunks_exact(RECORD_LEN).enumerate() {
            let record_offset = dir_offset + (index * RECORD_LEN) as u64;
            let name = padded_name(&record[..NAME_LEN]);
            let offset = le_u32(record, NAME_LEN) as u64;
            let size = le_u32(record, NAME_LEN + 4) as u64;
            if offset + size > len {
                return Err(Error::corrupt_header(
                    record_offset,
                    format!("data for '{}' runs past end of file", name),
                ));
            }
            let path = ResourcePath::new(&name).map_err(|_| {
                Error::corrupt_header(record_offset, format!("invalid entry name {:?}", name))
            })?;
            entries.push(LoadedEntry {
                path,
                size,
                handle: PakHandle { offset, size },
            });
        }

        log::debug!("PAK directory: {} entries at {:#x}", entries.len(), dir_offset);
        Ok(entries)
    }

    fn decode_entry(&self, handle: &PakHandle, reader: &mut dyn ReadSeek) -> Result<Vec<u8>> {
        read_at(reader, handle.offset, handle.size as usize)
    }

    fn encode_entry(
        &self,
        path: &ResourcePath,
        data: &[u8],
        _handle: Option<&PakHandle>,
    ) -> Result<Vec<u8>> {
        // One byte stays reserved for the terminating NUL.
        if path.as_str().len() >= NAME_LEN {
            return Err(Error::unsupported_conversion(
                path.as_str(),
                format!("PAK names are limited to {} bytes", NAME_LEN - 1),
            ));
        }
        if u32::try_from(data.len()).is_err() {
            return Err(Error::unsupported_conversion(
                path.as_str(),
                "PAK entries are limited to 4 GiB",
            ));
        }
        Ok(data.to_vec())
    }

    fn rebuild(
        &self,
        plan: &[RebuildItem<'_, PakHandle>],
        reader: &mut dyn ReadSeek,
        writer: &mut dyn Write,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64> {
        let data_len: u64 = plan.iter().map(|item| item_size(item, |h| h.size)).sum();
        let dir_offset = HEADER_LEN as u64 + data_len;
        let dir_len = (plan.len() * RECORD_LEN) as u64;
        let (dir_offset, dir_len) = match (u32::try_from(dir_offset), u32::try_from(dir_len)) {
            (Ok(offset), Ok(len)) => (offset, len),
            _ => return Err(Error::InvalidOperation("PAK contents exceed 4 GiB".into())),
        };

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(PAK_SIGNATURE);
        header.extend_from_slice(&dir_offset.to_le_bytes());
        header.extend_from_slice(&dir_len.to_le_bytes());
        writer.write_all(&header)?;

        let written = write_plan_data(plan, reader, writer, progress, |h| (h.offset, h.size))?;

        let mut directory = Vec::with_capacity(dir_len as usize);
        let mut offset = HEADER_LEN as u64;
        for item in plan {
            let size = item_size(item, |h| h.size);
            directory.extend_from_slice(&pad_name(item.path().as_str(), NAME_LEN));
            directory.extend_from_slice(&(offset as u32).to_le_bytes());
            directory.extend_from_slice(&(size as u32).to_le_bytes());
            offset += size;
        }
        writer.write_all(&directory)?;

        Ok(HEADER_LEN as u64 + written + directory.len() as u64)
    }
}
