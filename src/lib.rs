//! # modstack
//!
//! A library for managing stacks of content patches on a game installation.
//!
//! Patches are distributed as `.mspk` packages. Each package replaces,
//! adds or deletes resources: loose files under the installation root, or
//! entries inside the game's container files (GRP, PAK, WAD). An
//! installation keeps an ordered list of installed patches; later patches
//! override earlier ones, and every original is backed up on first touch so
//! that disabling or removing a patch restores exactly what was there.
//!
//! ## Quick Start
//!
//! ### Managing patches
//!
//! ```rust,no_run
//! use modstack::{CodecRegistry, Installation, InstallationConfig, Result};
//!
//! fn main() -> Result<()> {
//!     let config = InstallationConfig::new("quake", "/games/quake");
//!     let mut install = Installation::open(config, CodecRegistry::with_builtin())?;
//!
//!     // Each call saves the library and reapplies the whole stack
//!     let report = install.add_patch("downloads/hd-textures.mspk")?;
//!     println!("{}: {} writes", report.status(), report.writes());
//!
//!     install.set_enabled("hd-textures", false)?;
//!     install.remove_patch("hd-textures")?;
//!     Ok(())
//! }
//! ```
//!
//! ### Building a package
//!
//! ```rust,no_run
//! use modstack::{PackageBuilder, PatchVersion, Result, Target};
//!
//! fn main() -> Result<()> {
//!     let version = PatchVersion::new(1, 2, 0);
//!     let mut builder = PackageBuilder::new("brighter-e1", "Brighter Episode 1", version)
//!         .author("mapper")
//!         .target_game("quake");
//!     let map = std::fs::read("e1m1.bsp")?;
//!     builder.add_resource(Target::parse("id1/pak0.pak::maps/e1m1.bsp")?, map)?;
//!     builder.remove(Target::parse("id1/autoexec.cfg")?)?;
//!     builder.write_to_path("brighter-e1.mspk")?;
//!     Ok(())
//! }
//! ```
//!
//! ### Editing a container directly
//!
//! ```rust,no_run
//! use modstack::{Archive, CodecRegistry, Result};
//! use modstack::progress::NoProgress;
//!
//! fn main() -> Result<()> {
//!     let mut archive = Archive::open_path("DUKE3D.GRP", &CodecRegistry::with_builtin())?;
//!     archive.stage_import("E1L1.MAP", std::fs::read("my-e1l1.map")?)?;
//!     let result = archive.commit_in_place(&mut NoProgress)?;
//!     println!("replaced {} entries", result.entries_replaced);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `deflate` | Yes | Deflate compression of package payloads |
//! | `cli` | No | Command-line interface tool |
//!
//! Without `deflate`, packages with stored payloads can still be read and
//! written; compressed payloads fail with [`Error::UnsupportedMethod`].
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`]. Problems with a single target during
//! a reapply or a single entry during a commit do not fail the call; they
//! are collected into the returned report:
//!
//! ```rust,no_run
//! use modstack::{ApplyStatus, Installation};
//!
//! fn refresh(install: &mut Installation) -> modstack::Result<()> {
//!     let report = install.reapply()?;
//!     if report.status() == ApplyStatus::Partial {
//!         for failure in &report.failed {
//!             eprintln!("{}: {}", failure.target, failure.error);
//!         }
//!     }
//!     Ok(())
//! }
//! # fn main() {}
//! ```
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! This crate requires **Rust 1.85** or later.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod archive;
pub mod codec;
pub mod digest;
pub mod engine;
pub mod error;
pub mod history;
pub mod installation;
pub mod library;
pub mod package;
pub mod progress;
pub mod resource_path;
pub mod timestamp;

mod atomic_file;

pub use error::{Error, FileKind, Result};
pub use resource_path::{ResourcePath, Target};
pub use timestamp::Timestamp;
pub use digest::ContentDigest;

// Containers
pub use archive::{Archive, CommitResult, EntryFailure, FileEntry};
pub use codec::{CodecRegistry, ContainerCodec, EntryHandle};

// Packages
pub use package::{PackageBuilder, PackageMetadata, PatchPackage, PatchVersion};

// Library and history
pub use history::{Backup, BackupStore, History, HistoryRecord};
pub use library::{LibraryEntry, PatchLibrary};

// Reapply
pub use engine::{
    ApplyStatus, Engine, EventBus, LibraryEvent, PathFailure, ReapplyReport, VerifyReport,
};
pub use installation::{Installation, InstallationConfig, ReapplyLocks};

// Re-export progress API
pub use progress::{AtomicProgress, NoProgress, ProgressReporter, StatisticsProgress};
