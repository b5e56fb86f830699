//! Patch application engine.
//!
//! The engine turns the library's ordered, enabled patches into a
//! [`ResolvedState`] (one winning action per target, later patches win) and
//! reconciles the installation with it. Every reapply is a full pass over
//! all resolved and recorded targets, so enabling, disabling, reordering,
//! replacing and removing patches all go through the same code path.
//!
//! # Example
//!
//! ```rust,no_run
//! use modstack::engine::Engine;
//! use modstack::progress::NoProgress;
//! use modstack::{CodecRegistry, PatchLibrary};
//!
//! let mut library = PatchLibrary::load("/games/duke3d/.modstack")?;
//! let store = library.backup_store();
//! let report = Engine::new().reapply(
//!     &mut library,
//!     &store,
//!     &CodecRegistry::with_builtin(),
//!     "/games/duke3d".as_ref(),
//!     &mut NoProgress,
//! )?;
//! println!("{}: {} writes", report.status(), report.writes());
//! # Ok::<(), modstack::Error>(())
//! ```

mod events;
mod reapply;
mod report;
mod resolve;

pub use events::{EventBus, LibraryEvent};
pub use reapply::Engine;
pub use report::{ApplyStatus, PathFailure, ReapplyReport, VerifyReport};
pub use resolve::{Action, Resolution, ResolvedState, resolve};
