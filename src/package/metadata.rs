//! Patch package metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, Timestamp};

/// A `major.minor.revision` patch version.
///
/// Orders numerically field by field, so `1.10.0` is newer than `1.9.3`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct PatchVersion {
    /// Incompatible changes.
    pub major: u32,
    /// Added content.
    pub minor: u32,
    /// Fixes.
    pub revision: u32,
}

impl PatchVersion {
    /// Creates a version from its parts.
    pub const fn new(major: u32, minor: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }

    /// Parses `major.minor.revision`.
    ///
    /// A missing revision (`"2.1"`) is read as zero.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidFormat(format!("invalid patch version '{}'", s));
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> Result<u32> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| invalid()),
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };
        let version = Self::new(next(true)?, next(true)?, next(false)?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for PatchVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

impl FromStr for PatchVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PatchVersion {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<PatchVersion> for String {
    fn from(version: PatchVersion) -> Self {
        version.to_string()
    }
}

/// One release note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    /// Version the note belongs to.
    pub version: PatchVersion,
    /// Release date.
    pub date: Timestamp,
    /// Free-form description.
    pub description: String,
}

/// Descriptive data stored in a package header.
///
/// Readable without touching the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// Unique patch id. Also names the stored package file.
    pub id: String,
    /// Display name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub website: String,
    /// Package version.
    pub version: PatchVersion,
    /// Game ids the patch is meant for. Empty means any game.
    #[serde(default)]
    pub target_games: Vec<String>,
    /// Release notes, oldest first.
    #[serde(default)]
    pub changelog: Vec<ChangelogEntry>,
    /// Sum of the uncompressed sizes of all added resources.
    pub total_size: u64,
    /// When the package was built.
    pub modified: Timestamp,
}

impl PackageMetadata {
    /// Returns true if the patch may be installed for `game`.
    pub fn targets_game(&self, game: &str) -> bool {
        self.target_games.is_empty() || self.target_games.iter().any(|g| g == game)
    }

    /// Returns the newest changelog entry.
    pub fn latest_change(&self) -> Option<&ChangelogEntry> {
        self.changelog.iter().max_by_key(|c| c.version)
    }
}

/// Checks that a patch id can name a file in the package store.
pub(crate) fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidOperation(format!(
            "patch id '{}' must be 1-128 characters of [A-Za-z0-9._-]",
            id
        )))
    }
}
