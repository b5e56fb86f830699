//! Doom WAD files (`.wad`).
//!
//! Layout (little-endian):
//!
//! ```text
//! 0    "IWAD" or "PWAD"
//! 4    u32 lump count
//! 8    u32 directory offset
//! dir  n x { offset: u32, size: u32, name: [u8; 8] NUL-padded }
//! ```
//!
//! Lumps are an ordered list and their position carries meaning (map data
//! follows its marker, sprite and flat ranges sit between `S_START`/`S_END`
//! style markers). The codec therefore keeps the original order and refuses
//! to insert new lumps.
//!
//! Map lumps following a marker such as `E1M1` or `MAP01` are exposed under a
//! virtual directory named after the map (`MAP01/THINGS`). Repeated names
//! elsewhere get a `#n` suffix (`DEMO1#2`).

use std::collections::HashSet;
use std::io::Write;

use super::{
    CodecDescriptor, ContainerCodec, LoadedEntry, ReadSeek, RebuildItem, item_size, le_u32,
    pad_name, padded_name, read_at, stream_len, write_plan_data,
};
use crate::progress::ProgressReporter;
use crate::{Error, ResourcePath, Result};

const IWAD_SIGNATURE: &[u8] = b"IWAD";
const PWAD_SIGNATURE: &[u8] = b"PWAD";

const HEADER_LEN: usize = 12;
const NAME_LEN: usize = 8;
const RECORD_LEN: usize = 16;

static DESCRIPTOR: CodecDescriptor = CodecDescriptor {
    name: "WAD",
    extensions: &["wad"],
    signatures: &[IWAD_SIGNATURE, PWAD_SIGNATURE],
};

/// Lumps that belong to the preceding map marker.
const MAP_LUMPS: &[&str] = &[
    "THINGS", "LINEDEFS", "SIDEDEFS", "VERTEXES", "SEGS", "SSECTORS", "NODES", "SECTORS",
    "REJECT", "BLOCKMAP", "BEHAVIOR", "SCRIPTS",
];

/// Lumps made of fixed-size records, with the record size in bytes.
const RECORD_SIZES: &[(&str, usize)] = &[
    ("PLAYPAL", 768),
    ("COLORMAP", 256),
    ("THINGS", 10),
    ("LINEDEFS", 14),
    ("SIDEDEFS", 30),
    ("VERTEXES", 4),
    ("SEGS", 12),
    ("SSECTORS", 4),
    ("NODES", 28),
    ("SECTORS", 26),
];

/// Location of one lump inside a WAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WadHandle {
    /// Lump name as stored in the directory.
    pub name: String,
    /// Absolute offset of the data.
    pub offset: u64,
    /// Data size in bytes.
    pub size: u64,
}

/// Codec for Doom IWAD and PWAD files.
#[derive(Debug, Clone, Copy, Default)]
pub struct WadCodec;

/// Returns true for `ExMy` and `MAPxx` map markers.
fn is_map_marker(name: &str) -> bool {
    let b = name.as_bytes();
    match b.len() {
        4 => b[0] == b'E' && b[1].is_ascii_digit() && b[2] == b'M' && b[3].is_ascii_digit(),
        5 => name.starts_with("MAP") && b[3].is_ascii_digit() && b[4].is_ascii_digit(),
        _ => false,
    }
}

fn record_size(name: &str) -> Option<usize> {
    RECORD_SIZES
        .iter()
        .find(|(lump, _)| lump.eq_ignore_ascii_case(name))
        .map(|(_, size)| *size)
}

/// Maps a raw lump name to a path segment.
fn lump_segment(name: &str, index: usize) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if ResourcePath::new(&cleaned).is_ok() {
        cleaned
    } else {
        format!("LUMP{:05}", index)
    }
}

impl ContainerCodec for WadCodec {
    type Handle = WadHandle;

    fn descriptor(&self) -> &'static CodecDescriptor {
        &DESCRIPTOR
    }

    fn load(&self, reader: &mut dyn ReadSeek) -> Result<Vec<LoadedEntry<WadHandle>>> {
        let len = stream_len(reader)?;
        if len < HEADER_LEN as u64 {
            return Err(Error::InvalidFormat("file too small for a WAD header".into()));
        }

        let header = read_at(reader, 0, HEADER_LEN)?;
        if !DESCRIPTOR.matches_signature(&header) {
            return Err(Error::InvalidFormat("missing IWAD/PWAD signature".into()));
        }

        let count = le_u32(&header, 4) as u64;
        let dir_offset = le_u32(&header, 8) as u64;
        if dir_offset + count * RECORD_LEN as u64 > len {
            return Err(Error::corrupt_header(
                8,
                format!("directory of {} lumps at {:#x} exceeds file size", count, dir_offset),
            ));
        }

        let directory = read_at(reader, dir_offset, count as usize * RECORD_LEN)?;
        let mut entries = Vec::with_capacity(count as usize);
        let mut used = HashSet::new();
        let mut current_map: Option<String> = None;

        for (index, record) in directory.chunks_exact(RECORD_LEN).enumerate() {
            let record_offset = dir_offset + (index * RECORD_LEN) as u64;
            let offset = le_u32(record, 0) as u64;
            let size = le_u32(record, 4) as u64;
            let name = padded_name(&record[8..8 + NAME_LEN]);
            if size > 0 && offset + size > len {
                return Err(Error::corrupt_header(
                    record_offset,
                    format!("data for lump '{}' runs past end of file", name),
                ));
            }

            let upper = name.to_ascii_uppercase();
            let segment = lump_segment(&name, index);
            let base = if is_map_marker(&upper) {
                current_map = Some(segment.clone());
                segment
            } else if current_map.is_some() && MAP_LUMPS.contains(&upper.as_str()) {
                format!("{}/{}", current_map.as_deref().unwrap_or_default(), segment)
            } else {
                current_map = None;
                segment
            };

            let mut candidate = base.clone();
            let mut n = 2;
            while used.contains(&candidate) {
                candidate = format!("{}#{}", base, n);
                n += 1;
            }
            used.insert(candidate.clone());

            entries.push(LoadedEntry {
                path: ResourcePath::new(&candidate)?,
                size,
                handle: WadHandle { name, offset, size },
            });
        }

        log::debug!("WAD directory: {} lumps", entries.len());
        Ok(entries)
    }

    fn decode_entry(&self, handle: &WadHandle, reader: &mut dyn ReadSeek) -> Result<Vec<u8>> {
        if handle.size == 0 {
            return Ok(Vec::new());
        }
        read_at(reader, handle.offset, handle.size as usize)
    }

    fn encode_entry(
        &self,
        path: &ResourcePath,
        data: &[u8],
        handle: Option<&WadHandle>,
    ) -> Result<Vec<u8>> {
        let Some(handle) = handle else {
            return Err(Error::unsupported_conversion(
                path.as_str(),
                "WAD lump order is significant; new lumps cannot be inserted",
            ));
        };
        if let Some(record) = record_size(&handle.name) {
            if data.len() % record != 0 {
                return Err(Error::unsupported_conversion(
                    path.as_str(),
                    format!(
                        "{} lumps must be a multiple of {} bytes, got {}",
                        handle.name.to_ascii_uppercase(),
                        record,
                        data.len()
                    ),
                ));
            }
        }
        if i32::try_from(data.len()).is_err() {
            return Err(Error::unsupported_conversion(
                path.as_str(),
                "WAD lumps are limited to 2 GiB",
            ));
        }
        Ok(data.to_vec())
    }

    fn rebuild(
        &self,
        plan: &[RebuildItem<'_, WadHandle>],
        reader: &mut dyn ReadSeek,
        writer: &mut dyn Write,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64> {
        let signature = if stream_len(reader)? >= 4 && read_at(reader, 0, 4)? == IWAD_SIGNATURE {
            IWAD_SIGNATURE
        } else {
            PWAD_SIGNATURE
        };

        let data_len: u64 = plan.iter().map(|item| item_size(item, |h| h.size)).sum();
        let dir_offset = u32::try_from(HEADER_LEN as u64 + data_len)
            .map_err(|_| Error::InvalidOperation("WAD contents exceed 4 GiB".into()))?;
        let count = u32::try_from(plan.len())
            .map_err(|_| Error::InvalidOperation("too many lumps for a WAD file".into()))?;

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(signature);
        header.extend_from_slice(&count.to_le_bytes());
        header.extend_from_slice(&dir_offset.to_le_bytes());
        writer.write_all(&header)?;

        let written = write_plan_data(plan, reader, writer, progress, |h| (h.offset, h.size))?;

        let mut directory = Vec::with_capacity(plan.len() * RECORD_LEN);
        let mut offset = HEADER_LEN as u64;
        for item in plan {
            let size = item_size(item, |h| h.size);
            let name = match item {
                RebuildItem::Keep { handle, .. } => handle.name.clone(),
                RebuildItem::Write { path, handle, .. } => match handle {
                    Some(h) => h.name.clone(),
                    None => path.file_name().to_ascii_uppercase(),
                },
            };
            directory.extend_from_slice(&(offset as u32).to_le_bytes());
            directory.extend_from_slice(&(size as u32).to_le_bytes());
            directory.extend_from_slice(&pad_name(&name, NAME_LEN));
            offset += size;
        }
        writer.write_all(&directory)?;

        Ok(HEADER_LEN as u64 + written + directory.len() as u64)
    }

    fn supports_insert(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::io::Cursor;

    fn build_wad(kind: &[u8], lumps: &[(&str, &[u8])]) -> Vec<u8> {
        let data_len: usize = lumps.iter().map(|(_, d)| d.len()).sum();
        let mut out = kind.to_vec();
        out.extend_from_slice(&(lumps.len() as u32).to_le_bytes());
        out.extend_from_slice(&((HEADER_LEN + data_len) as u32).to_le_bytes());
        for (_, data) in lumps {
            out.extend_from_slice(data);
        }
        let mut offset = HEADER_LEN as u32;
        for (name, data) in lumps {
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&pad_name(name, NAME_LEN));
            offset += data.len() as u32;
        }
        out
    }

    fn sample() -> Vec<u8> {
        build_wad(
            b"IWAD",
            &[
                ("PLAYPAL", &[0u8; 768]),
                ("MAP01", b""),
                ("THINGS", &[1u8; 10]),
                ("LINEDEFS", &[2u8; 14]),
                ("MAP02", b""),
                ("THINGS", &[3u8; 20]),
                ("DEMO1", b"d1"),
                ("DEMO1", b"d1-again"),
            ],
        )
    }

    #[test]
    fn test_map_groups_and_duplicates() {
        let entries = WadCodec.load(&mut Cursor::new(sample())).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "PLAYPAL",
                "MAP01",
                "MAP01/THINGS",
                "MAP01/LINEDEFS",
                "MAP02",
                "MAP02/THINGS",
                "DEMO1",
                "DEMO1#2",
            ]
        );
        assert_eq!(entries[5].handle.name, "THINGS");
    }

    #[test]
    fn test_map_lump_outside_map_stays_at_root() {
        let bytes = build_wad(b"PWAD", &[("TEXTURE1", b"t"), ("THINGS", &[0u8; 10])]);
        let entries = WadCodec.load(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(entries[1].path.as_str(), "THINGS");
    }

    #[test]
    fn test_marker_detection() {
        assert!(is_map_marker("E1M1"));
        assert!(is_map_marker("MAP32"));
        assert!(!is_map_marker("MAP1"));
        assert!(!is_map_marker("EXMY"));
        assert!(!is_map_marker("E1M10"));
    }

    #[test]
    fn test_encode_validates_record_sizes() {
        let mut cursor = Cursor::new(sample());
        let entries = WadCodec.load(&mut cursor).unwrap();
        let things = &entries[2];

        let err = WadCodec
            .encode_entry(&things.path, &[0u8; 11], Some(&things.handle))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedConversion { .. }));
        assert!(err.to_string().contains("multiple of 10"));

        assert!(WadCodec
            .encode_entry(&things.path, &[0u8; 30], Some(&things.handle))
            .is_ok());

        let playpal = &entries[0];
        assert!(WadCodec
            .encode_entry(&playpal.path, &[0u8; 700], Some(&playpal.handle))
            .is_err());
    }

    #[test]
    fn test_insert_rejected() {
        let path = ResourcePath::new("NEWLUMP").unwrap();
        let err = WadCodec.encode_entry(&path, b"x", None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedConversion { .. }));
        assert!(!WadCodec.supports_insert());
    }

    #[test]
    fn test_rebuild_preserves_order_and_kind() {
        let mut cursor = Cursor::new(sample());
        let entries = WadCodec.load(&mut cursor).unwrap();
        let replacement = [9u8; 10];

        let plan: Vec<RebuildItem<'_, WadHandle>> = entries
            .iter()
            .map(|e| {
                if e.path.as_str() == "MAP01/THINGS" {
                    RebuildItem::Write {
                        path: &e.path,
                        data: &replacement,
                        handle: Some(&e.handle),
                    }
                } else {
                    RebuildItem::Keep {
                        path: &e.path,
                        handle: &e.handle,
                    }
                }
            })
            .collect();

        let mut out: Vec<u8> = Vec::new();
        WadCodec
            .rebuild(&plan, &mut cursor, &mut out, &mut NoProgress)
            .unwrap();
        assert_eq!(&out[..4], b"IWAD");

        let mut reopened = Cursor::new(out);
        let rebuilt = WadCodec.load(&mut reopened).unwrap();
        let paths: Vec<&str> = rebuilt.iter().map(|e| e.path.as_str()).collect();
        let original: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, original);
        assert_eq!(
            WadCodec.decode_entry(&rebuilt[2].handle, &mut reopened).unwrap(),
            replacement
        );
        assert_eq!(
            WadCodec.decode_entry(&rebuilt[7].handle, &mut reopened).unwrap(),
            b"d1-again"
        );
    }
}
