//! Validated resource paths and patch targets.
//!
//! A [`ResourcePath`] names a file relative to some root: either the game
//! installation directory or the inside of a container file. A [`Target`]
//! is what a patch addresses: a loose file under the installation root, or
//! one entry inside a container.
//!
//! # Target syntax
//!
//! ```
//! use modstack::Target;
//!
//! let loose: Target = "maps/e1m1.map".parse().unwrap();
//! assert!(loose.container().is_none());
//!
//! let entry: Target = "DUKE3D.GRP::TILES000.ART".parse().unwrap();
//! assert_eq!(entry.container().unwrap().as_str(), "DUKE3D.GRP");
//! assert_eq!(entry.to_string(), "DUKE3D.GRP::TILES000.ART");
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum length for resource paths (in bytes).
const MAX_PATH_LENGTH: usize = 4096;

/// Separator between a container path and an entry path in a [`Target`].
pub const CONTAINER_SEPARATOR: &str = "::";

/// Windows reserved device names that cannot be used as filenames.
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Checks if a filename is a Windows reserved name (also with an extension).
fn is_windows_reserved(name: &str) -> bool {
    let base = match name.find('.') {
        Some(pos) => &name[..pos],
        None => name,
    };

    WINDOWS_RESERVED_NAMES
        .iter()
        .any(|reserved| base.eq_ignore_ascii_case(reserved))
}

/// A validated relative path with `/` separators.
///
/// Backslashes are normalized to `/` on construction, so names read from
/// DOS-era containers (`MAPS\E1M1.BSP`) and Windows paths compare equal to
/// their forward-slash spelling. The path must not:
/// - be empty, absolute, or longer than 4096 bytes
/// - contain NUL bytes
/// - contain empty, `.` or `..` segments
///
/// # Examples
///
/// ```
/// use modstack::ResourcePath;
///
/// let path = ResourcePath::new("maps\\e1m1.bsp").unwrap();
/// assert_eq!(path.as_str(), "maps/e1m1.bsp");
///
/// assert!(ResourcePath::new("../secret").is_err());
/// assert!(ResourcePath::new("/absolute/path").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath(String);

impl ResourcePath {
    /// Creates a new `ResourcePath`, normalizing separators and validating it.
    pub fn new(s: &str) -> Result<Self> {
        let normalized = s.replace('\\', "/");
        Self::validate(&normalized)?;
        Ok(Self(normalized))
    }

    fn validate(s: &str) -> Result<()> {
        if s.contains('\0') {
            return Err(Error::InvalidResourcePath("contains NUL byte".into()));
        }

        if s.is_empty() {
            return Err(Error::InvalidResourcePath("empty path".into()));
        }

        if s.len() > MAX_PATH_LENGTH {
            return Err(Error::InvalidResourcePath(format!(
                "path exceeds maximum length of {} bytes",
                MAX_PATH_LENGTH
            )));
        }

        if s.starts_with('/') {
            return Err(Error::InvalidResourcePath(
                "absolute path not allowed".into(),
            ));
        }

        if s.ends_with('/') {
            return Err(Error::InvalidResourcePath(
                "trailing slash not allowed".into(),
            ));
        }

        if s.contains(CONTAINER_SEPARATOR) {
            return Err(Error::InvalidResourcePath(format!(
                "'{}' is reserved as the container separator",
                CONTAINER_SEPARATOR
            )));
        }

        for segment in s.split('/') {
            if segment.is_empty() {
                return Err(Error::InvalidResourcePath(
                    "empty segment (consecutive slashes)".into(),
                ));
            }
            if segment == "." {
                return Err(Error::InvalidResourcePath("'.' segment not allowed".into()));
            }
            if segment == ".." {
                return Err(Error::InvalidResourcePath(
                    "'..' segment not allowed (path traversal)".into(),
                ));
            }
        }

        Ok(())
    }

    /// Checks that the path can be created as a file on every platform.
    ///
    /// Rejects Windows reserved device names and `:` in segments (drive
    /// letters, alternate data streams). Entry paths inside containers do not
    /// need this; paths under an installation root do.
    pub fn check_portable(&self) -> Result<()> {
        for segment in self.components() {
            if is_windows_reserved(segment) {
                return Err(Error::InvalidResourcePath(format!(
                    "Windows reserved filename '{}' not allowed",
                    segment
                )));
            }
            if segment.contains(':') {
                return Err(Error::InvalidResourcePath(format!(
                    "':' not allowed in file name '{}'",
                    segment
                )));
            }
        }
        Ok(())
    }

    /// Returns the path as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Joins this path with another segment.
    pub fn join(&self, other: &str) -> Result<Self> {
        Self::new(&format!("{}/{}", self.0, other))
    }

    /// Returns the parent directory, or `None` for a single segment.
    pub fn parent(&self) -> Option<Self> {
        self.0.rfind('/').map(|idx| Self(self.0[..idx].to_string()))
    }

    /// Returns the parent directory as a string, empty for the root.
    pub fn parent_str(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }

    /// Returns the file name (last segment) of this path.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Returns the file extension, if any.
    ///
    /// Dotfiles (`.config`) have no extension.
    pub fn extension(&self) -> Option<&str> {
        let file_name = self.file_name();
        let dot_pos = file_name.rfind('.')?;
        if dot_pos == 0 {
            None
        } else {
            Some(&file_name[dot_pos + 1..])
        }
    }

    /// Returns an iterator over the path segments.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Returns the ASCII-lowercased key used for case-insensitive lookups.
    ///
    /// DOS-era containers store names in upper case while patches are often
    /// authored in lower case.
    pub fn to_lowercase_key(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// Resolves this path below a filesystem root.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.components() {
            path.push(segment);
        }
        path
    }
}

impl AsRef<str> for ResourcePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for ResourcePath {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(&s)
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.0
    }
}

impl FromStr for ResourcePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// A file addressed by a patch.
///
/// Targets order by their string form so resolution and reconciliation
/// visit them in a deterministic order, with all entries of one container
/// adjacent to each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Target {
    /// A file under the installation root.
    Loose(ResourcePath),
    /// An entry inside a container file under the installation root.
    Entry {
        /// Container file, relative to the installation root.
        container: ResourcePath,
        /// Entry path inside the container.
        entry: ResourcePath,
    },
}

impl Target {
    /// Parses a target string (`path` or `container::entry`).
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once(CONTAINER_SEPARATOR) {
            None => {
                let path = ResourcePath::new(s)?;
                path.check_portable()?;
                Ok(Target::Loose(path))
            }
            Some((container, entry)) => {
                let container = ResourcePath::new(container)?;
                container.check_portable()?;
                Ok(Target::Entry {
                    container,
                    entry: ResourcePath::new(entry)?,
                })
            }
        }
    }

    /// Creates a loose-file target.
    pub fn loose(path: ResourcePath) -> Self {
        Target::Loose(path)
    }

    /// Creates a container entry target.
    pub fn entry(container: ResourcePath, entry: ResourcePath) -> Self {
        Target::Entry { container, entry }
    }

    /// Returns the container path for entry targets.
    pub fn container(&self) -> Option<&ResourcePath> {
        match self {
            Target::Loose(_) => None,
            Target::Entry { container, .. } => Some(container),
        }
    }

    /// Returns the file on disk this target lives in.
    pub fn file(&self) -> &ResourcePath {
        match self {
            Target::Loose(path) => path,
            Target::Entry { container, .. } => container,
        }
    }

    /// Returns true for targets inside a container.
    pub fn is_entry(&self) -> bool {
        matches!(self, Target::Entry { .. })
    }

    /// Returns the key under which all spellings of one target are equal.
    ///
    /// Entry names are matched ASCII case-insensitively inside their
    /// container, so `X.GRP::game.con` and `X.GRP::GAME.CON` share a key.
    /// Loose paths and container paths are kept as written.
    pub fn lookup_key(&self) -> String {
        match self {
            Target::Loose(path) => path.as_str().to_string(),
            Target::Entry { container, entry } => format!(
                "{}{}{}",
                container,
                CONTAINER_SEPARATOR,
                entry.to_lowercase_key()
            ),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Loose(path) => write!(f, "{}", path),
            Target::Entry { container, entry } => {
                write!(f, "{}{}{}", container, CONTAINER_SEPARATOR, entry)
            }
        }
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Target {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Target {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let key = |t: &Target| match t {
            Target::Loose(p) => (p.as_str().to_owned(), None),
            Target::Entry { container, entry } => {
                (container.as_str().to_owned(), Some(entry.as_str().to_owned()))
            }
        };
        key(self).cmp(&key(other))
    }
}
