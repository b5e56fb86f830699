//! Build engine group files (`.grp`).
//!
//! Layout (little-endian):
//!
//! ```text
//! 0    "KenSilverman"
//! 12   u32 file count
//! 16   count x { name: [u8; 12] NUL-padded, size: u32 }
//! ..   file data, concatenated in directory order
//! ```
//!
//! The format is flat: entry names are at most 12 bytes and carry no
//! directory component.

use std::io::Write;

use super::{
    CodecDescriptor, ContainerCodec, LoadedEntry, ReadSeek, RebuildItem, le_u32, pad_name,
    padded_name, read_at, stream_len, write_plan_data,
};
use crate::progress::ProgressReporter;
use crate::{Error, ResourcePath, Result};

/// GRP file signature.
pub const GRP_SIGNATURE: &[u8] = b"KenSilverman";

const NAME_LEN: usize = 12;
const RECORD_LEN: usize = 16;
const HEADER_LEN: usize = 16;

static DESCRIPTOR: CodecDescriptor = CodecDescriptor {
    name: "GRP",
    extensions: &["grp"],
    signatures: &[GRP_SIGNATURE],
};

/// Location of one file inside a GRP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpHandle {
    /// Name as stored in the directory.
    pub name: String,
    /// Absolute offset of the data.
    pub offset: u64,
    /// Data size in bytes.
    pub size: u64,
}

/// Codec for Build engine GRP files.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpCodec;

fn check_name(path: &ResourcePath) -> Result<()> {
    let name = path.as_str();
    if name.contains('/') {
        return Err(Error::unsupported_conversion(
            name,
            "GRP files are flat and cannot hold nested paths",
        ));
    }
    if !name.is_ascii() {
        return Err(Error::unsupported_conversion(name, "GRP names must be ASCII"));
    }
    if name.len() > NAME_LEN {
        return Err(Error::unsupported_conversion(
            name,
            format!("GRP names are limited to {} bytes", NAME_LEN),
        ));
    }
    Ok(())
}

impl ContainerCodec for GrpCodec {
    type Handle = GrpHandle;

    fn descriptor(&self) -> &'static CodecDescriptor {
        &DESCRIPTOR
    }

    fn load(&self, reader: &mut dyn ReadSeek) -> Result<Vec<LoadedEntry<GrpHandle>>> {
        let len = stream_len(reader)?;
        if len < HEADER_LEN as u64 {
            return Err(Error::InvalidFormat("file too small for a GRP header".into()));
        }

        let header = read_at(reader, 0, HEADER_LEN)?;
        if !header.starts_with(GRP_SIGNATURE) {
            return Err(Error::InvalidFormat("missing KenSilverman signature".into()));
        }

        let count = le_u32(&header, 12) as u64;
        let dir_end = HEADER_LEN as u64 + count * RECORD_LEN as u64;
        if dir_end > len {
            return Err(Error::corrupt_header(
                12,
                format!("directory of {} entries exceeds file size", count),
            ));
        }

        let directory = read_at(reader, HEADER_LEN as u64, (count as usize) * RECORD_LEN)?;
        let mut entries = Vec::with_capacity(count as usize);
        let mut offset = dir_end;
        for (index, record) in directory.chunks_exact(RECORD_LEN).enumerate() {
            let record_offset = (HEADER_LEN + index * RECORD_LEN) as u64;
            let name = padded_name(&record[..NAME_LEN]);
            let size = le_u32(record, NAME_LEN) as u64;
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
                handle: GrpHandle { name, offset, size },
            });
            offset += size;
        }

        log::debug!("GRP directory: {} entries, {} bytes", entries.len(), len);
        Ok(entries)
    }

    fn decode_entry(&self, handle: &GrpHandle, reader: &mut dyn ReadSeek) -> Result<Vec<u8>> {
        read_at(reader, handle.offset, handle.size as usize)
    }

    fn encode_entry(
        &self,
        path: &ResourcePath,
        data: &[u8],
        handle: Option<&GrpHandle>,
    ) -> Result<Vec<u8>> {
        if handle.is_none() {
            check_name(path)?;
        }
        if u32::try_from(data.len()).is_err() {
            return Err(Error::unsupported_conversion(
                path.as_str(),
                "GRP entries are limited to 4 GiB",
            ));
        }
        Ok(data.to_vec())
    }

    fn rebuild(
        &self,
        plan: &[RebuildItem<'_, GrpHandle>],
        reader: &mut dyn ReadSeek,
        writer: &mut dyn Write,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64> {
        let count = u32::try_from(plan.len())
            .map_err(|_| Error::InvalidOperation("too many entries for a GRP file".into()))?;

        let mut directory = Vec::with_capacity(HEADER_LEN + plan.len() * RECORD_LEN);
        directory.extend_from_slice(GRP_SIGNATURE);
        directory.extend_from_slice(&count.to_le_bytes());
        for item in plan {
            let (name, size) = match item {
                RebuildItem::Keep { handle, .. } => (handle.name.as_str(), handle.size),
                RebuildItem::Write { path, data, handle } => (
                    handle.map_or(path.as_str(), |h| h.name.as_str()),
                    data.len() as u64,
                ),
            };
            directory.extend_from_slice(&pad_name(name, NAME_LEN));
            directory.extend_from_slice(&(size as u32).to_le_bytes());
        }
        writer.write_all(&directory)?;

        let data = write_plan_data(plan, reader, writer, progress, |h| (h.offset, h.size))?;
        Ok(directory.len() as u64 + data)
    }
}
