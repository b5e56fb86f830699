//! Error types for archive and patch operations.
//!
//! This module provides the [`Error`] enum which represents all possible
//! failure modes of the crate, along with a convenient [`Result<T>`] alias.
//!
//! # Error Handling
//!
//! Load-time failures (a container or package whose bytes don't match the
//! expected structure, or a file written by a newer build) are returned from
//! the load call itself and never produce a partially initialized object.
//!
//! Per-file failures during [`Archive::commit`] and
//! [`Installation::reapply`] are *collected* into the result objects
//! ([`CommitResult::failed`], [`ReapplyReport::failed`]) instead of aborting
//! the whole operation:
//!
//! ```rust,no_run
//! use modstack::{Installation, InstallationConfig, CodecRegistry, ApplyStatus};
//!
//! fn reapply(config: InstallationConfig) -> modstack::Result<()> {
//!     let mut installation = Installation::open(config, CodecRegistry::with_builtin())?;
//!     let report = installation.reapply()?;
//!     if report.status() == ApplyStatus::Partial {
//!         for failure in &report.failed {
//!             eprintln!("{}: {}", failure.target, failure.error);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! [`Archive::commit`]: crate::archive::Archive::commit
//! [`Installation::reapply`]: crate::installation::Installation::reapply
//! [`CommitResult::failed`]: crate::archive::CommitResult::failed
//! [`ReapplyReport::failed`]: crate::engine::ReapplyReport::failed

use std::io;

/// What kind of file a format version belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FileKind {
    /// A patch package (`.mspk`).
    Package,
    /// A patch library state file.
    Library,
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Package => write!(f, "patch package"),
            Self::Library => write!(f, "patch library"),
        }
    }
}

/// The main error type for archive, package and patch library operations.
///
/// # Error Categories
///
/// | Category | Variants | Scope |
/// |----------|----------|-------|
/// | I/O | [`Io`][Self::Io] | One path during reapply, otherwise the call |
/// | Format | [`InvalidFormat`][Self::InvalidFormat], [`CorruptHeader`][Self::CorruptHeader] | Whole load |
/// | Version | [`UnsupportedFormatVersion`][Self::UnsupportedFormatVersion] | Whole load |
/// | Conversion | [`UnsupportedConversion`][Self::UnsupportedConversion] | One file |
/// | Usage | [`InvalidOperation`][Self::InvalidOperation], [`DuplicatePatch`][Self::DuplicatePatch] | The call |
/// | Lookup | [`EntryNotFound`][Self::EntryNotFound], [`ResourceNotFound`][Self::ResourceNotFound], [`PatchNotFound`][Self::PatchNotFound] | The call |
/// | Integrity | [`DigestMismatch`][Self::DigestMismatch] | One file |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred during file operations.
    ///
    /// During a reapply this halts only the path being processed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The bytes do not have the structure the format requires.
    ///
    /// Returned when a container or package signature is missing, when
    /// required fields are out of range, or when a library file body cannot
    /// be decoded.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A header or directory table is corrupt or truncated.
    #[error("Corrupt header at offset {offset:#x}: {reason}")]
    CorruptHeader {
        /// The byte offset where corruption was detected.
        offset: u64,
        /// A description of the corruption.
        reason: String,
    },

    /// The file was written by a newer build than this one understands.
    ///
    /// # Recovery
    ///
    /// Update the application, or skip the patch package.
    #[error("Unsupported {kind} format version {found} (this build supports up to {supported})")]
    UnsupportedFormatVersion {
        /// Which kind of file carried the version.
        kind: FileKind,
        /// The version found in the file.
        found: u16,
        /// The highest version this build reads.
        supported: u16,
    },

    /// A codec cannot represent the given bytes in its container format.
    ///
    /// Scoped to one file: commits and reapplies continue with the rest.
    #[error("Cannot store '{path}' in this container: {reason}")]
    UnsupportedConversion {
        /// The entry path that could not be encoded.
        path: String,
        /// Why the codec rejected the data.
        reason: String,
    },

    /// The requested operation is not valid in the current state.
    ///
    /// Examples are a reorder that is not a permutation of the installed
    /// patches, or a codec handle used with the wrong codec.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A patch with the same id is already installed.
    #[error("Patch '{id}' is already installed")]
    DuplicatePatch {
        /// The duplicated patch id.
        id: String,
    },

    /// No installed patch has the given id.
    #[error("Patch not found: {id}")]
    PatchNotFound {
        /// The missing patch id.
        id: String,
    },

    /// An entry was not found in an archive.
    #[error("Entry not found: {path}")]
    EntryNotFound {
        /// The path that was not found.
        path: String,
    },

    /// An entry already exists in an archive.
    #[error("Entry already exists: {path}")]
    EntryExists {
        /// The path that already exists.
        path: String,
    },

    /// A resource is not listed in a patch package manifest.
    #[error("Resource not found in package: {path}")]
    ResourceNotFound {
        /// The target that was requested.
        path: String,
    },

    /// No registered codec recognizes the container.
    #[error("No codec recognizes container '{path}'")]
    UnknownContainer {
        /// The container file path.
        path: String,
    },

    /// A resource path or target string is invalid.
    ///
    /// Resource paths must be relative, use `/` as separator and must not
    /// contain `.` or `..` segments.
    #[error("Invalid resource path: {0}")]
    InvalidResourcePath(String),

    /// Stored bytes do not hash to the digest recorded for them.
    #[error("Digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        /// What was being read (package resource or backup blob).
        path: String,
        /// The recorded SHA-256 digest.
        expected: String,
        /// The digest of the bytes actually read.
        actual: String,
    },

    /// A package payload uses a compression method not compiled in.
    #[error("Unsupported payload compression method {method}")]
    UnsupportedMethod {
        /// The raw method id from the manifest.
        method: u8,
    },

    /// The operation was cancelled through a progress reporter.
    ///
    /// Completed steps are never rolled back; cancellation only stops
    /// further progress.
    #[error("Operation cancelled")]
    Cancelled,

    /// A JSON block (package metadata or library body) failed to encode or decode.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if the error means the input's structure is invalid.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidFormat(_) | Error::CorruptHeader { .. } | Error::Json(_)
        )
    }

    /// Returns `true` for errors that are scoped to a single file.
    ///
    /// These are collected into commit and reapply results rather than
    /// aborting the surrounding operation.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::UnsupportedConversion { .. }
                | Error::DigestMismatch { .. }
                | Error::EntryNotFound { .. }
                | Error::EntryExists { .. }
                | Error::ResourceNotFound { .. }
                | Error::UnknownContainer { .. }
                | Error::UnsupportedMethod { .. }
                | Error::InvalidOperation(_)
        )
    }

    /// Returns `true` if the error might go away on retry.
    ///
    /// Only transient I/O kinds and cancellation qualify.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            Error::Cancelled => true,
            _ => false,
        }
    }

    /// Rebuilds an equivalent error, for reporting one cause on several paths.
    ///
    /// I/O errors keep their kind and message; JSON errors become
    /// [`Error::InvalidFormat`].
    pub(crate) fn replicate(&self) -> Error {
        match self {
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::InvalidFormat(s) => Error::InvalidFormat(s.clone()),
            Error::CorruptHeader { offset, reason } => {
                Error::corrupt_header(*offset, reason.clone())
            }
            Error::UnsupportedFormatVersion {
                kind,
                found,
                supported,
            } => Error::UnsupportedFormatVersion {
                kind: *kind,
                found: *found,
                supported: *supported,
            },
            Error::UnsupportedConversion { path, reason } => {
                Error::unsupported_conversion(path.clone(), reason.clone())
            }
            Error::InvalidOperation(s) => Error::InvalidOperation(s.clone()),
            Error::DuplicatePatch { id } => Error::DuplicatePatch { id: id.clone() },
            Error::PatchNotFound { id } => Error::PatchNotFound { id: id.clone() },
            Error::EntryNotFound { path } => Error::EntryNotFound { path: path.clone() },
            Error::EntryExists { path } => Error::EntryExists { path: path.clone() },
            Error::ResourceNotFound { path } => Error::ResourceNotFound { path: path.clone() },
            Error::UnknownContainer { path } => Error::UnknownContainer { path: path.clone() },
            Error::InvalidResourcePath(s) => Error::InvalidResourcePath(s.clone()),
            Error::DigestMismatch {
                path,
                expected,
                actual,
            } => Error::DigestMismatch {
                path: path.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            },
            Error::UnsupportedMethod { method } => Error::UnsupportedMethod { method: *method },
            Error::Cancelled => Error::Cancelled,
            Error::Json(e) => Error::InvalidFormat(e.to_string()),
        }
    }

    /// Creates a corrupt header error.
    pub fn corrupt_header(offset: u64, reason: impl Into<String>) -> Self {
        Error::CorruptHeader {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates an unsupported conversion error.
    pub fn unsupported_conversion(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::UnsupportedConversion {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
