//! Per-target history records.

use std::collections::{BTreeMap, HashSet};

use super::store::BlobRef;
use crate::digest::ContentDigest;
use crate::{Error, Result, Target, Timestamp};

/// What a target held before any patch touched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backup {
    /// The target existed with these bytes.
    Original {
        /// Stored original bytes.
        blob: BlobRef,
        /// Modification time of a loose file, restored on revert.
        modified: Option<Timestamp>,
    },
    /// The target did not exist; reverting deletes it.
    Absent,
}

impl Backup {
    /// Returns the stored blob, `None` for [`Backup::Absent`].
    pub fn blob(&self) -> Option<&BlobRef> {
        match self {
            Backup::Original { blob, .. } => Some(blob),
            Backup::Absent => None,
        }
    }
}

/// History of one patched target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    /// The patched target.
    pub target: Target,
    /// Pre-patch content, captured once.
    pub backup: Backup,
    /// Id of the patch whose content is installed.
    pub contributor: String,
}

/// All history records of an installation, ordered by target.
///
/// A record exists exactly while its target differs from the original. The
/// backup of a record is set when the record is created and can only be
/// dropped together with the record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    records: BTreeMap<Target, HistoryRecord>,
}

impl History {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `target`.
    pub fn get(&self, target: &Target) -> Option<&HistoryRecord> {
        self.records.get(target)
    }

    /// Returns true if `target` has a record.
    pub fn contains(&self, target: &Target) -> bool {
        self.records.contains_key(target)
    }

    /// Creates the record for a target on its first modification.
    ///
    /// Fails with [`Error::InvalidOperation`] if a record already exists;
    /// an existing backup is never replaced.
    pub fn insert_first_touch(
        &mut self,
        target: Target,
        backup: Backup,
        contributor: impl Into<String>,
    ) -> Result<()> {
        if self.records.contains_key(&target) {
            return Err(Error::InvalidOperation(format!(
                "backup of '{}' was already captured",
                target
            )));
        }
        let record = HistoryRecord {
            target: target.clone(),
            backup,
            contributor: contributor.into(),
        };
        self.records.insert(target, record);
        Ok(())
    }

    /// Credits an existing record to another patch.
    pub fn set_contributor(
        &mut self,
        target: &Target,
        contributor: impl Into<String>,
    ) -> Result<()> {
        let record = self.records.get_mut(target).ok_or_else(|| {
            Error::InvalidOperation(format!("no history record for '{}'", target))
        })?;
        record.contributor = contributor.into();
        Ok(())
    }

    /// Drops the record of a fully reverted target.
    pub fn remove(&mut self, target: &Target) -> Option<HistoryRecord> {
        self.records.remove(target)
    }

    /// Iterates over records in target order.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.values()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is patched.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the targets credited to `patch_id`.
    pub fn contributed_by<'a>(&'a self, patch_id: &'a str) -> impl Iterator<Item = &'a Target> {
        self.records
            .values()
            .filter(move |r| r.contributor == patch_id)
            .map(|r| &r.target)
    }

    /// Returns the digests of all blobs still referenced by a record.
    pub fn live_blobs(&self) -> HashSet<ContentDigest> {
        self.records
            .values()
            .filter_map(|r| r.backup.blob().map(|b| b.digest))
            .collect()
    }
}

impl FromIterator<HistoryRecord> for History {
    fn from_iter<I: IntoIterator<Item = HistoryRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().map(|r| (r.target.clone(), r)).collect(),
        }
    }
}
