//! Target state derived from the enabled patches.

use std::collections::{BTreeMap, HashMap};

use crate::digest::ContentDigest;
use crate::history::History;
use crate::library::PatchLibrary;
use crate::package::{PackageChange, PatchPackage};
use crate::{Error, Result, Target};

/// What a target should look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The target holds these bytes.
    Write {
        /// Digest of the bytes.
        digest: ContentDigest,
        /// Length of the bytes.
        size: u64,
    },
    /// The target does not exist.
    Remove,
}

impl Action {
    /// Returns true if `current` (`None` when absent) already satisfies the action.
    pub fn is_satisfied_by(&self, current: Option<&[u8]>) -> bool {
        match (self, current) {
            (Action::Remove, None) => true,
            (Action::Write { digest, size }, Some(bytes)) => {
                bytes.len() as u64 == *size && ContentDigest::of(bytes) == *digest
            }
            _ => false,
        }
    }
}

/// The winning patch for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Id of the highest-priority enabled patch touching the target.
    pub contributor: String,
    /// What that patch does to it.
    pub action: Action,
    /// The target as the contributor's package spells it.
    pub source: Target,
}

/// Resolved state of all targets touched by enabled patches.
///
/// Keeps the packages open so the winning bytes can be read on demand.
#[derive(Debug, Default)]
pub struct ResolvedState {
    targets: BTreeMap<Target, Resolution>,
    packages: HashMap<String, PatchPackage>,
}

impl ResolvedState {
    /// Resolves packages given lowest priority first; later packages win.
    ///
    /// Spellings of one container entry that differ only in case resolve
    /// as a single target. It is keyed by the spelling `history` already
    /// records, otherwise by the first spelling seen.
    pub fn from_packages(packages: Vec<PatchPackage>, history: &History) -> Self {
        let mut spellings: HashMap<String, Target> = history
            .iter()
            .map(|record| (record.target.lookup_key(), record.target.clone()))
            .collect();
        let mut targets = BTreeMap::new();
        for package in &packages {
            for (target, change) in package.changes() {
                let action = match change {
                    PackageChange::Add(entry) => Action::Write {
                        digest: entry.digest,
                        size: entry.size,
                    },
                    PackageChange::Remove => Action::Remove,
                };
                let key = spellings
                    .entry(target.lookup_key())
                    .or_insert_with(|| target.clone())
                    .clone();
                targets.insert(
                    key,
                    Resolution {
                        contributor: package.id().to_string(),
                        action,
                        source: target.clone(),
                    },
                );
            }
        }
        Self {
            targets,
            packages: packages
                .into_iter()
                .map(|p| (p.id().to_string(), p))
                .collect(),
        }
    }

    /// Returns the resolution for a target.
    pub fn get(&self, target: &Target) -> Option<&Resolution> {
        self.targets.get(target)
    }

    /// Iterates over resolutions in target order.
    pub fn iter(&self) -> impl Iterator<Item = (&Target, &Resolution)> {
        self.targets.iter()
    }

    /// Returns the resolution map.
    pub fn targets(&self) -> &BTreeMap<Target, Resolution> {
        &self.targets
    }

    /// Returns the number of targeted paths.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns true if no enabled patch touches anything.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Reads the winning bytes of a target with a write resolution.
    pub fn read_content(&self, target: &Target) -> Result<Vec<u8>> {
        let resolution = self.get(target).ok_or_else(|| Error::ResourceNotFound {
            path: target.to_string(),
        })?;
        let package = self.packages.get(&resolution.contributor).ok_or_else(|| {
            Error::PatchNotFound {
                id: resolution.contributor.clone(),
            }
        })?;
        package.read_resource(&resolution.source)
    }
}

/// Resolves the enabled patches of `library`.
///
/// Fails if a stored package cannot be opened; nothing is written then.
pub fn resolve(library: &PatchLibrary) -> Result<ResolvedState> {
    let packages = library.enabled_packages()?;
    let state = ResolvedState::from_packages(packages, library.history());
    log::debug!(
        "resolved {} targets from {} enabled patches",
        state.len(),
        state.packages.len()
    );
    Ok(state)
}
