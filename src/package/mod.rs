//! Patch packages.
//!
//! A patch package (`.mspk`) is an immutable bundle of resources to install
//! and targets to delete, plus descriptive metadata and a changelog. The
//! header, metadata and manifest are read when the package is opened;
//! payload bytes are only read and verified when a resource is requested.
//!
//! Packages are produced with [`PackageBuilder`] and read with
//! [`PatchPackage`]. The on-disk layout is documented in [`format`].

pub mod format;

mod builder;
mod metadata;
mod reader;

pub use builder::PackageBuilder;
pub use format::{Compression, Manifest, ResourceEntry};
pub use metadata::{ChangelogEntry, PackageMetadata, PatchVersion};
pub use reader::{PackageChange, PatchPackage};

pub(crate) use metadata::validate_id;
