//! One game installation with its patch library.
//!
//! [`Installation`] ties a [`PatchLibrary`] to the directory it manages.
//! Every mutating call changes the library, saves it and runs a full
//! reapply, so the installation always tracks the library. Callers that
//! need progress or cancellation install a reporter with
//! [`Installation::set_progress`].
//!
//! # Example
//!
//! ```rust,no_run
//! use modstack::{ApplyStatus, CodecRegistry, Installation, InstallationConfig};
//!
//! let config = InstallationConfig::new("duke3d", "/games/duke3d");
//! let mut install = Installation::open(config, CodecRegistry::with_builtin())?;
//! let events = install.subscribe();
//!
//! let report = install.add_patch("hires-pack.mspk")?;
//! if report.status() == ApplyStatus::Partial {
//!     for failure in &report.failed {
//!         eprintln!("{}: {}", failure.target, failure.error);
//!     }
//! }
//! assert!(events.try_recv().is_ok());
//! # Ok::<(), modstack::Error>(())
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::sync::mpsc::Receiver;

use parking_lot::Mutex;

use crate::codec::CodecRegistry;
use crate::engine::{Engine, EventBus, LibraryEvent, ReapplyReport, VerifyReport};
use crate::history::BackupStore;
use crate::library::PatchLibrary;
use crate::package::PatchPackage;
use crate::progress::{NoProgress, ProgressReporter};
use crate::{Error, Result};

/// Name of the state directory created under the installation root by default.
pub const DEFAULT_STATE_DIR: &str = ".modstack";

// ============================================================================
// Locks
// ============================================================================

static PROCESS_LOCKS: LazyLock<ReapplyLocks> = LazyLock::new(ReapplyLocks::new);

/// Serializes library operations per installation.
///
/// Handles opened with clones of the same `ReapplyLocks` never run two
/// operations on one installation at once. Different installations do not
/// block each other. Every [`InstallationConfig`] starts out with
/// [`ReapplyLocks::process`], so all handles of one process exclude each
/// other unless a separate set is configured.
#[derive(Debug, Clone, Default)]
pub struct ReapplyLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ReapplyLocks {
    /// Creates an empty lock set, independent of all others.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock set shared by the whole process.
    pub fn process() -> Self {
        PROCESS_LOCKS.clone()
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Settings for an [`Installation`].
#[derive(Debug, Clone)]
pub struct InstallationConfig {
    game: String,
    root: PathBuf,
    state_dir: Option<PathBuf>,
    preserve_mtime: bool,
    verify_backups: bool,
    locks: ReapplyLocks,
}

impl InstallationConfig {
    /// Creates a configuration for `game` installed at `root`.
    pub fn new(game: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            game: game.into(),
            root: root.into(),
            state_dir: None,
            preserve_mtime: true,
            verify_backups: true,
            locks: ReapplyLocks::process(),
        }
    }

    /// Sets where the library, packages and backups live
    /// (default: `<root>/.modstack`).
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Sets whether reverted files get their original modification time back.
    pub fn preserve_mtime(mut self, preserve: bool) -> Self {
        self.preserve_mtime = preserve;
        self
    }

    /// Sets whether backup blobs are re-hashed when read.
    pub fn verify_backups(mut self, verify: bool) -> Self {
        self.verify_backups = verify;
        self
    }

    /// Replaces the process-wide lock set with `locks`.
    pub fn locks(mut self, locks: ReapplyLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Returns the game id.
    pub fn game(&self) -> &str {
        &self.game
    }

    /// Returns the installation root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the effective state directory.
    pub fn effective_state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.root.join(DEFAULT_STATE_DIR))
    }

    fn lock_key(&self) -> String {
        let root = fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        format!("{}@{}", self.game, root.display())
    }
}

// ============================================================================
// Installation
// ============================================================================

/// A managed game installation.
pub struct Installation {
    config: InstallationConfig,
    registry: CodecRegistry,
    engine: Engine,
    library: PatchLibrary,
    store: BackupStore,
    lock: Arc<Mutex<()>>,
    events: EventBus,
    progress: Box<dyn ProgressReporter>,
}

impl std::fmt::Debug for Installation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installation")
            .field("game", &self.config.game)
            .field("root", &self.config.root)
            .field("patches", &self.library.entries().len())
            .finish_non_exhaustive()
    }
}

impl Installation {
    /// Opens an installation, loading its library or starting an empty one.
    ///
    /// Fails if the root is not a directory or the stored library belongs
    /// to another game.
    pub fn open(config: InstallationConfig, registry: CodecRegistry) -> Result<Self> {
        if !config.root.is_dir() {
            return Err(Error::InvalidOperation(format!(
                "installation root {} is not a directory",
                config.root.display()
            )));
        }
        let state_dir = config.effective_state_dir();
        let library = PatchLibrary::open_or_create(&state_dir, &config.game)?;
        let store = library
            .backup_store()
            .verify_on_read(config.verify_backups);
        let engine = Engine::new().preserve_mtime(config.preserve_mtime);
        let lock = config.locks.lock_for(&config.lock_key());
        log::debug!(
            "opened {} at {} with {} patches",
            config.game,
            config.root.display(),
            library.entries().len()
        );
        Ok(Self {
            config,
            registry,
            engine,
            library,
            store,
            lock,
            events: EventBus::new(),
            progress: Box::new(NoProgress),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &InstallationConfig {
        &self.config
    }

    /// Returns the library as of the last operation.
    pub fn library(&self) -> &PatchLibrary {
        &self.library
    }

    /// Returns the codec registry.
    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    /// Returns a receiver for [`LibraryEvent`]s of this handle.
    pub fn subscribe(&self) -> Receiver<LibraryEvent> {
        self.events.subscribe()
    }

    /// Sets the reporter used by subsequent reapply runs.
    pub fn set_progress(&mut self, progress: Box<dyn ProgressReporter>) {
        self.progress = progress;
    }

    /// Installs the package at `path` as the highest-priority patch.
    pub fn add_patch(&mut self, path: impl AsRef<Path>) -> Result<ReapplyReport> {
        let package = PatchPackage::open(path)?;
        self.mutate(|library| library.add_patch(&package))
    }

    /// Upgrades an installed patch from the package at `path`.
    pub fn replace_patch(&mut self, path: impl AsRef<Path>) -> Result<ReapplyReport> {
        let package = PatchPackage::open(path)?;
        self.mutate(|library| library.replace_patch(&package))
    }

    /// Uninstalls a patch and restores what it changed.
    pub fn remove_patch(&mut self, id: &str) -> Result<ReapplyReport> {
        self.mutate(|library| library.remove_patch(id))
    }

    /// Enables or disables a patch.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<ReapplyReport> {
        self.mutate(|library| library.set_enabled(id, enabled).map(|_| ()))
    }

    /// Reorders patches, lowest priority first.
    pub fn reorder<S: AsRef<str>>(&mut self, order: &[S]) -> Result<ReapplyReport> {
        self.mutate(|library| library.reorder(order))
    }

    /// Reconciles the installation with the library without changing it.
    pub fn reapply(&mut self) -> Result<ReapplyReport> {
        self.mutate(|_| Ok(()))
    }

    /// Compares installed content with the library without writing.
    pub fn verify(&mut self) -> Result<VerifyReport> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.lock();
        self.reload()?;
        self.engine
            .verify(&self.library, &self.store, &self.registry, &self.config.root)
    }

    /// Runs `change` on a fresh copy of the library, then reapplies.
    ///
    /// A failing `change` leaves both the library file and the installation
    /// untouched.
    fn mutate<F>(&mut self, change: F) -> Result<ReapplyReport>
    where
        F: FnOnce(&mut PatchLibrary) -> Result<()>,
    {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.lock();
        self.reload()?;
        change(&mut self.library)?;
        if self.library.is_dirty() {
            self.library.save()?;
        }

        let report = self.engine.reapply(
            &mut self.library,
            &self.store,
            &self.registry,
            &self.config.root,
            self.progress.as_mut(),
        )?;
        self.events
            .publish(LibraryEvent::reapplied(&self.config.game, &report));
        Ok(report)
    }

    /// Reloads the library so changes saved by other handles are seen.
    fn reload(&mut self) -> Result<()> {
        let state_dir = self.library.state_dir().to_path_buf();
        self.library = PatchLibrary::open_or_create(state_dir, &self.config.game)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ApplyStatus;
    use crate::{PackageBuilder, PatchVersion, Target};
    use tempfile::TempDir;

    fn package(dir: &Path, id: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(format!("{}.mspk", id));
        let mut builder = PackageBuilder::new(id, id, PatchVersion::new(1, 0, 0));
        builder
            .add_resource(Target::parse("data.txt").unwrap(), data.to_vec())
            .unwrap();
        builder.write_to_path(&path).unwrap();
        path
    }

    fn setup() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("game");
        fs::create_dir_all(&root).unwrap();
        (dir, root)
    }

    #[test]
    fn test_default_state_dir() {
        let config = InstallationConfig::new("quake", "/games/quake");
        assert_eq!(
            config.effective_state_dir(),
            Path::new("/games/quake").join(DEFAULT_STATE_DIR)
        );
        let config = config.state_dir("/var/lib/modstack/quake");
        assert_eq!(
            config.effective_state_dir(),
            Path::new("/var/lib/modstack/quake")
        );
    }

    #[test]
    fn test_open_rejects_missing_root() {
        let dir = TempDir::new().unwrap();
        let config = InstallationConfig::new("quake", dir.path().join("nope"));
        let err = Installation::open(config, CodecRegistry::with_builtin()).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_mutations_publish_events() {
        let (dir, root) = setup();
        let config = InstallationConfig::new("quake", &root);
        let mut install = Installation::open(config, CodecRegistry::with_builtin()).unwrap();
        let events = install.subscribe();

        let report = install
            .add_patch(package(dir.path(), "a", b"from a"))
            .unwrap();
        assert_eq!(report.status(), ApplyStatus::Complete);
        assert_eq!(fs::read(root.join("data.txt")).unwrap(), b"from a");

        let report = install.set_enabled("a", false).unwrap();
        assert_eq!(report.reverted.len(), 1);
        assert!(!root.join("data.txt").exists());

        let received: Vec<LibraryEvent> = events.try_iter().collect();
        assert_eq!(received.len(), 2);
    }

    #[test]
    fn test_failed_mutation_changes_nothing() {
        let (_dir, root) = setup();
        let config = InstallationConfig::new("quake", &root);
        let mut install = Installation::open(config, CodecRegistry::with_builtin()).unwrap();
        let events = install.subscribe();

        let err = install.remove_patch("missing").unwrap_err();
        assert!(matches!(err, Error::PatchNotFound { .. }));
        assert!(events.try_recv().is_err());
        assert!(!root.join(DEFAULT_STATE_DIR).join("library.msl").exists());
    }

    #[test]
    fn test_handles_share_library_state() {
        let (dir, root) = setup();
        let locks = ReapplyLocks::new();
        let config = InstallationConfig::new("quake", &root).locks(locks);
        let mut first = Installation::open(config.clone(), CodecRegistry::with_builtin()).unwrap();
        let mut second = Installation::open(config, CodecRegistry::with_builtin()).unwrap();

        let _ = first.add_patch(package(dir.path(), "a", b"a")).unwrap();
        let _ = second.add_patch(package(dir.path(), "b", b"b")).unwrap();
        assert_eq!(fs::read(root.join("data.txt")).unwrap(), b"b");

        let _ = first.reapply().unwrap();
        assert_eq!(first.library().entries().len(), 2);
        assert!(Arc::ptr_eq(&first.lock, &second.lock));
    }

    #[test]
    fn test_separate_configs_share_the_process_lock() {
        let (_dir, root) = setup();
        let first = Installation::open(
            InstallationConfig::new("quake", &root),
            CodecRegistry::with_builtin(),
        )
        .unwrap();
        let second = Installation::open(
            InstallationConfig::new("quake", &root),
            CodecRegistry::with_builtin(),
        )
        .unwrap();
        assert!(Arc::ptr_eq(&first.lock, &second.lock));

        let isolated = Installation::open(
            InstallationConfig::new("quake", &root).locks(ReapplyLocks::new()),
            CodecRegistry::with_builtin(),
        )
        .unwrap();
        assert!(!Arc::ptr_eq(&first.lock, &isolated.lock));
    }
}
