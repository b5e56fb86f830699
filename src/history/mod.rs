//! Pre-patch state of every touched target.
//!
//! The first time a patch writes a target, its original bytes go into the
//! [`BackupStore`] (or the target is recorded as [`Backup::Absent`]) and a
//! [`HistoryRecord`] is created. Later writes only change the record's
//! contributor. When no enabled patch targets the path any more the backup
//! is restored and the record dropped.

mod record;
mod store;

pub use record::{Backup, History, HistoryRecord};
pub use store::{BackupStore, BlobRef};
