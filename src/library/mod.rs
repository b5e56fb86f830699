//! The ordered patch stack of one installation.
//!
//! A [`PatchLibrary`] lives in a state directory:
//!
//! ```text
//! <state>/library.msl          order, enabled flags, history
//! <state>/packages/<id>.mspk   copies of the installed packages
//! <state>/backups/             original bytes (see BackupStore)
//! ```
//!
//! Mutations only change the library; game files are touched by the next
//! reapply. [`PatchLibrary::needs_reapply`] reports whether one is due.

mod file;

pub use file::{LIBRARY_FORMAT_VERSION, LIBRARY_MAGIC};

use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::atomic_file::{write_atomic, write_bytes_atomic};
use crate::history::{BackupStore, History};
use crate::package::{PatchPackage, validate_id};
use crate::package::format::PACKAGE_EXTENSION;
use crate::{Error, Result};

/// File name of the library state file.
pub const LIBRARY_FILE_NAME: &str = "library.msl";

/// Directory holding stored package copies.
pub const PACKAGES_DIR: &str = "packages";

/// Directory holding backup blobs.
pub const BACKUPS_DIR: &str = "backups";

/// One installed patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    /// Patch id.
    pub id: String,
    /// Whether the patch takes part in resolution.
    pub enabled: bool,
    /// Stored package, relative to the state directory.
    pub(crate) package: String,
}

impl LibraryEntry {
    /// Returns the stored package path relative to the state directory.
    pub fn package_file(&self) -> &str {
        &self.package
    }
}

/// Installed patches of one game installation, in priority order.
///
/// Index 0 has the lowest priority; for every target the enabled patch with
/// the highest index wins.
#[derive(Debug)]
pub struct PatchLibrary {
    state_dir: PathBuf,
    game: String,
    entries: Vec<LibraryEntry>,
    history: History,
    dirty: bool,
    needs_reapply: bool,
}

impl PatchLibrary {
    /// Creates an empty, unsaved library.
    pub fn new(state_dir: impl Into<PathBuf>, game: impl Into<String>) -> Self {
        Self {
            state_dir: state_dir.into(),
            game: game.into(),
            entries: Vec::new(),
            history: History::new(),
            dirty: false,
            needs_reapply: false,
        }
    }

    /// Loads the library stored in `state_dir`.
    pub fn load(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let state_dir = state_dir.into();
        let bytes = fs::read(state_dir.join(LIBRARY_FILE_NAME))?;
        let state = file::decode(&bytes)?;
        log::debug!(
            "loaded library for {} with {} patches and {} history records",
            state.game,
            state.entries.len(),
            state.history.len()
        );
        Ok(Self {
            state_dir,
            game: state.game,
            entries: state.entries,
            history: state.history,
            dirty: false,
            needs_reapply: false,
        })
    }

    /// Loads the library in `state_dir`, or starts a new one if none exists.
    ///
    /// Fails with [`Error::InvalidOperation`] if the stored library belongs
    /// to another game.
    pub fn open_or_create(state_dir: impl Into<PathBuf>, game: &str) -> Result<Self> {
        let state_dir = state_dir.into();
        if !state_dir.join(LIBRARY_FILE_NAME).exists() {
            return Ok(Self::new(state_dir, game));
        }
        let library = Self::load(state_dir)?;
        if library.game != game {
            return Err(Error::InvalidOperation(format!(
                "library in {} belongs to game '{}', not '{}'",
                library.state_dir.display(),
                library.game,
                game
            )));
        }
        Ok(library)
    }

    /// Writes the library file atomically.
    pub fn save(&mut self) -> Result<()> {
        fs::create_dir_all(&self.state_dir)?;
        let bytes = file::encode(&self.game, &self.entries, &self.history)?;
        write_bytes_atomic(&self.state_dir.join(LIBRARY_FILE_NAME), &bytes)?;
        self.dirty = false;
        Ok(())
    }

    /// Returns the game id.
    pub fn game(&self) -> &str {
        &self.game
    }

    /// Returns the state directory.
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Returns the backup store of this library.
    pub fn backup_store(&self) -> BackupStore {
        BackupStore::new(self.state_dir.join(BACKUPS_DIR))
    }

    /// Returns the installed patches, lowest priority first.
    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }

    /// Returns the index of a patch.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Returns whether a patch is installed and enabled.
    pub fn is_enabled(&self, id: &str) -> Option<bool> {
        self.entry(id).map(|e| e.enabled)
    }

    fn entry(&self, id: &str) -> Option<&LibraryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn require(&self, id: &str) -> Result<usize> {
        self.position(id)
            .ok_or_else(|| Error::PatchNotFound { id: id.to_string() })
    }

    /// Opens the stored copy of a patch's package.
    pub fn package(&self, id: &str) -> Result<PatchPackage> {
        let index = self.require(id)?;
        PatchPackage::open(self.state_dir.join(&self.entries[index].package))
    }

    /// Opens the packages of all enabled patches, lowest priority first.
    pub fn enabled_packages(&self) -> Result<Vec<PatchPackage>> {
        self.entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| PatchPackage::open(self.state_dir.join(&e.package)))
            .collect()
    }

    /// Returns the history records.
    pub fn history(&self) -> &History {
        &self.history
    }

    pub(crate) fn history_mut(&mut self) -> &mut History {
        self.dirty = true;
        &mut self.history
    }

    /// Returns true if the in-memory state differs from the saved file.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns true if a mutation happened since the last reapply.
    pub fn needs_reapply(&self) -> bool {
        self.needs_reapply
    }

    fn mutated(&mut self) {
        self.dirty = true;
        self.needs_reapply = true;
    }

    fn check_game(&self, package: &PatchPackage) -> Result<()> {
        if package.metadata().targets_game(&self.game) {
            Ok(())
        } else {
            Err(Error::InvalidOperation(format!(
                "patch '{}' targets {:?}, not '{}'",
                package.id(),
                package.metadata().target_games,
                self.game
            )))
        }
    }

    fn store_package(&self, package: &PatchPackage) -> Result<String> {
        validate_id(package.id())?;
        let relative = format!("{}/{}.{}", PACKAGES_DIR, package.id(), PACKAGE_EXTENSION);
        let dest = self.state_dir.join(&relative);
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)?;
        }
        let same_file = match (fs::canonicalize(package.path()), fs::canonicalize(&dest)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !same_file {
            write_atomic(&dest, |w| {
                io::copy(&mut File::open(package.path())?, w)?;
                Ok(())
            })?;
        }
        Ok(relative)
    }

    /// Installs a package as the highest-priority, enabled patch.
    ///
    /// Copies the package into the state directory. Fails with
    /// [`Error::DuplicatePatch`] if the id is installed and with
    /// [`Error::InvalidOperation`] if the package is for another game.
    pub fn add_patch(&mut self, package: &PatchPackage) -> Result<()> {
        if self.position(package.id()).is_some() {
            return Err(Error::DuplicatePatch {
                id: package.id().to_string(),
            });
        }
        self.check_game(package)?;
        let stored = self.store_package(package)?;
        self.entries.push(LibraryEntry {
            id: package.id().to_string(),
            enabled: true,
            package: stored,
        });
        log::info!("added patch {} {}", package.id(), package.version());
        self.mutated();
        Ok(())
    }

    /// Upgrades an installed patch to another package with the same id.
    ///
    /// Keeps the patch's position and enabled flag.
    pub fn replace_patch(&mut self, package: &PatchPackage) -> Result<()> {
        let index = self.require(package.id())?;
        self.check_game(package)?;
        self.entries[index].package = self.store_package(package)?;
        log::info!("replaced patch {} with {}", package.id(), package.version());
        self.mutated();
        Ok(())
    }

    /// Uninstalls a patch.
    ///
    /// Its package copy is deleted by [`purge_packages`](Self::purge_packages)
    /// after the reapply that reverts its targets.
    pub fn remove_patch(&mut self, id: &str) -> Result<()> {
        let index = self.require(id)?;
        self.entries.remove(index);
        log::info!("removed patch {}", id);
        self.mutated();
        Ok(())
    }

    /// Enables or disables a patch. Returns false if nothing changed.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<bool> {
        let index = self.require(id)?;
        if self.entries[index].enabled == enabled {
            return Ok(false);
        }
        self.entries[index].enabled = enabled;
        log::info!(
            "{} patch {}",
            if enabled { "enabled" } else { "disabled" },
            id
        );
        self.mutated();
        Ok(true)
    }

    /// Reorders the patches to `order`, lowest priority first.
    ///
    /// `order` must name every installed patch exactly once.
    pub fn reorder<S: AsRef<str>>(&mut self, order: &[S]) -> Result<()> {
        let current: HashSet<&str> = self.entries.iter().map(|e| e.id.as_str()).collect();
        let requested: HashSet<&str> = order.iter().map(|id| id.as_ref()).collect();
        if order.len() != self.entries.len() || requested != current {
            return Err(Error::InvalidOperation(format!(
                "new order must be a permutation of the {} installed patches",
                self.entries.len()
            )));
        }

        let mut old = std::mem::take(&mut self.entries);
        for id in order {
            if let Some(index) = old.iter().position(|e| e.id == id.as_ref()) {
                self.entries.push(old.swap_remove(index));
            }
        }
        log::info!("reordered patches");
        self.mutated();
        Ok(())
    }

    pub(crate) fn mark_applied(&mut self) {
        self.needs_reapply = false;
    }

    /// Deletes stored packages that no installed patch refers to.
    ///
    /// Returns the number of files deleted.
    pub fn purge_packages(&self) -> Result<usize> {
        let dir = self.state_dir.join(PACKAGES_DIR);
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let live: HashSet<PathBuf> = self
            .entries
            .iter()
            .map(|e| self.state_dir.join(&e.package))
            .collect();

        let mut removed = 0;
        for file in listing {
            let path = file?.path();
            let is_package = path
                .extension()
                .is_some_and(|ext| ext == PACKAGE_EXTENSION);
            if is_package && !live.contains(&path) {
                fs::remove_file(&path)?;
                log::debug!("deleted stored package {}", path.display());
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PackageBuilder, PatchVersion, Target};
    use tempfile::TempDir;

    fn package(dir: &Path, id: &str, game: Option<&str>) -> PatchPackage {
        let path = dir.join(format!("{}-src.mspk", id));
        let mut builder = PackageBuilder::new(id, id, PatchVersion::new(1, 0, 0));
        if let Some(game) = game {
            builder = builder.target_game(game);
        }
        builder
            .add_resource(Target::parse("a.txt").unwrap(), id.as_bytes().to_vec())
            .unwrap();
        builder.write_to_path(&path).unwrap();
        PatchPackage::open(&path).unwrap()
    }

    fn ids(library: &PatchLibrary) -> Vec<&str> {
        library.entries().iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_add_and_persist() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("state");
        let mut library = PatchLibrary::new(&state, "duke3d");
        library.add_patch(&package(dir.path(), "a", None)).unwrap();
        library
            .add_patch(&package(dir.path(), "b", Some("duke3d")))
            .unwrap();
        assert!(library.needs_reapply());
        assert!(library.is_dirty());
        library.save().unwrap();
        assert!(!library.is_dirty());

        let loaded = PatchLibrary::load(&state).unwrap();
        assert_eq!(ids(&loaded), ["a", "b"]);
        assert_eq!(loaded.is_enabled("b"), Some(true));
        assert_eq!(loaded.package("a").unwrap().id(), "a");
        assert!(state.join("packages/a.mspk").is_file());
    }

    #[test]
    fn test_add_rejections() {
        let dir = TempDir::new().unwrap();
        let mut library = PatchLibrary::new(dir.path().join("state"), "duke3d");
        let a = package(dir.path(), "a", None);
        library.add_patch(&a).unwrap();
        assert!(matches!(
            library.add_patch(&a),
            Err(Error::DuplicatePatch { .. })
        ));
        assert!(matches!(
            library.add_patch(&package(dir.path(), "doom-only", Some("doom"))),
            Err(Error::InvalidOperation(_))
        ));
        assert_eq!(library.entries().len(), 1);
    }

    #[test]
    fn test_reorder_must_be_permutation() {
        let dir = TempDir::new().unwrap();
        let mut library = PatchLibrary::new(dir.path().join("state"), "g");
        for id in ["a", "b", "c"] {
            library.add_patch(&package(dir.path(), id, None)).unwrap();
        }
        library.reorder(&["c", "a", "b"]).unwrap();
        assert_eq!(ids(&library), ["c", "a", "b"]);

        for bad in [&["a", "b"][..], &["a", "b", "b"], &["a", "b", "x"]] {
            assert!(matches!(
                library.reorder(bad),
                Err(Error::InvalidOperation(_))
            ));
        }
        assert_eq!(ids(&library), ["c", "a", "b"]);
    }

    #[test]
    fn test_enable_replace_remove() {
        let dir = TempDir::new().unwrap();
        let mut library = PatchLibrary::new(dir.path().join("state"), "g");
        library.add_patch(&package(dir.path(), "a", None)).unwrap();
        library.add_patch(&package(dir.path(), "b", None)).unwrap();
        library.mark_applied();

        assert!(library.set_enabled("a", false).unwrap());
        assert!(!library.set_enabled("a", false).unwrap());
        assert!(library.needs_reapply());

        library.replace_patch(&package(dir.path(), "a", None)).unwrap();
        assert_eq!(library.position("a"), Some(0));
        assert_eq!(library.is_enabled("a"), Some(false));

        library.remove_patch("a").unwrap();
        assert!(matches!(
            library.remove_patch("a"),
            Err(Error::PatchNotFound { .. })
        ));
        assert_eq!(library.purge_packages().unwrap(), 1);
        assert!(library.package("b").is_ok());
    }

    #[test]
    fn test_open_or_create_checks_game() {
        let dir = TempDir::new().unwrap();
        let mut library = PatchLibrary::open_or_create(dir.path(), "duke3d").unwrap();
        library.save().unwrap();
        assert!(PatchLibrary::open_or_create(dir.path(), "duke3d").is_ok());
        assert!(matches!(
            PatchLibrary::open_or_create(dir.path(), "doom"),
            Err(Error::InvalidOperation(_))
        ));
    }
}
