//! Opened containers with staged edits.
//!
//! An [`Archive`] wraps one container file and the codec that understands
//! it. Imports, insertions and removals are staged in memory and only reach
//! disk through [`Archive::commit`], which rebuilds the whole container into
//! a new stream. [`Archive::commit_in_place`] does this through a temporary
//! file so the original is replaced atomically or not at all.
//!
//! # Example
//!
//! ```rust,no_run
//! use modstack::{Archive, CodecRegistry};
//!
//! let registry = CodecRegistry::with_builtin();
//! let archive = Archive::open_path("id1/pak0.pak", &registry)?;
//! for dir in archive.directories() {
//!     for entry in archive.list_dir(&dir) {
//!         println!("{:>10}  {}", entry.size(), entry.path());
//!     }
//! }
//! # Ok::<(), modstack::Error>(())
//! ```

mod model;
mod session;

pub use model::{ArchiveTree, FileEntry, PendingChange};
pub use session::{Archive, CommitResult, EntryFailure};
