//! The `library.msl` state file.
//!
//! ```text
//! 0  magic "MSLB"
//! 4  format version u16
//! 6  reserved       u16
//! 8  JSON body
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::LibraryEntry;
use crate::digest::ContentDigest;
use crate::history::{Backup, BlobRef, History};
use crate::{Error, FileKind, Result, Target, Timestamp};

/// Library file signature.
pub const LIBRARY_MAGIC: &[u8; 4] = b"MSLB";

/// Highest library format version this build reads and the one it writes.
pub const LIBRARY_FORMAT_VERSION: u16 = 1;

const PREFIX_LEN: usize = 8;

#[derive(Serialize, Deserialize)]
struct Body {
    game: String,
    patches: Vec<PatchRow>,
    #[serde(default)]
    history: Vec<RecordRow>,
}

#[derive(Serialize, Deserialize)]
struct PatchRow {
    id: String,
    enabled: bool,
    package: String,
}

#[derive(Serialize, Deserialize)]
struct RecordRow {
    target: Target,
    backup: BackupRow,
    contributor: String,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum BackupRow {
    Original {
        digest: ContentDigest,
        size: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modified: Option<Timestamp>,
    },
    Absent,
}

impl From<Backup> for BackupRow {
    fn from(backup: Backup) -> Self {
        match backup {
            Backup::Original { blob, modified } => BackupRow::Original {
                digest: blob.digest,
                size: blob.size,
                modified,
            },
            Backup::Absent => BackupRow::Absent,
        }
    }
}

impl From<BackupRow> for Backup {
    fn from(row: BackupRow) -> Self {
        match row {
            BackupRow::Original {
                digest,
                size,
                modified,
            } => Backup::Original {
                blob: BlobRef { digest, size },
                modified,
            },
            BackupRow::Absent => Backup::Absent,
        }
    }
}

/// Decoded contents of a library file.
pub(crate) struct LibraryState {
    pub game: String,
    pub entries: Vec<LibraryEntry>,
    pub history: History,
}

pub(crate) fn encode(game: &str, entries: &[LibraryEntry], history: &History) -> Result<Vec<u8>> {
    let body = Body {
        game: game.to_string(),
        patches: entries
            .iter()
            .map(|e| PatchRow {
                id: e.id.clone(),
                enabled: e.enabled,
                package: e.package.clone(),
            })
            .collect(),
        history: history
            .iter()
            .map(|r| RecordRow {
                target: r.target.clone(),
                backup: r.backup.into(),
                contributor: r.contributor.clone(),
            })
            .collect(),
    };

    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(LIBRARY_MAGIC);
    out.extend_from_slice(&LIBRARY_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    serde_json::to_writer_pretty(&mut out, &body)?;
    out.push(b'\n');
    Ok(out)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<LibraryState> {
    if bytes.len() < PREFIX_LEN || &bytes[..4] != LIBRARY_MAGIC {
        return Err(Error::InvalidFormat("not a patch library file (bad magic)".into()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version == 0 || version > LIBRARY_FORMAT_VERSION {
        return Err(Error::UnsupportedFormatVersion {
            kind: FileKind::Library,
            found: version,
            supported: LIBRARY_FORMAT_VERSION,
        });
    }

    let body: Body = serde_json::from_slice(&bytes[PREFIX_LEN..])
        .map_err(|e| Error::InvalidFormat(format!("patch library body: {}", e)))?;

    let mut seen = HashSet::new();
    for row in &body.patches {
        if !seen.insert(row.id.as_str()) {
            return Err(Error::InvalidFormat(format!(
                "patch '{}' listed twice in library",
                row.id
            )));
        }
    }

    let mut history = History::new();
    for row in body.history {
        history
            .insert_first_touch(row.target, row.backup.into(), row.contributor)
            .map_err(|_| Error::InvalidFormat("duplicate history record in library".into()))?;
    }

    Ok(LibraryState {
        game: body.game,
        entries: body
            .patches
            .into_iter()
            .map(|p| LibraryEntry {
                id: p.id,
                enabled: p.enabled,
                package: p.package,
            })
            .collect(),
        history,
    })
}
