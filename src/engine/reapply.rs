//! Reconciling installed content with the resolved state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Component, Path};

use super::report::{PathFailure, ReapplyReport, VerifyReport};
use super::resolve::{Action, Resolution, ResolvedState, resolve};
use crate::archive::Archive;
use crate::atomic_file::write_bytes_atomic;
use crate::codec::CodecRegistry;
use crate::history::{Backup, BackupStore, HistoryRecord};
use crate::library::PatchLibrary;
use crate::progress::ProgressReporter;
use crate::{Error, ResourcePath, Result, Target, Timestamp};

/// Drives installed content toward the state the enabled patches resolve to.
///
/// For every target that is resolved or has a history record:
///
/// 1. a target whose content and contributor already match is left alone;
/// 2. a target whose content matches but whose contributor changed is only
///    re-credited;
/// 3. otherwise the original is backed up (first touch only) and the
///    winning bytes are written, or the target is deleted;
/// 4. a recorded target no patch wants any more is restored from its
///    backup and its record dropped.
///
/// Loose files are written one at a time. Entries of one container are
/// staged into a single archive session and committed together. A failing
/// target never stops the others and keeps its history as it was.
#[derive(Debug, Clone)]
pub struct Engine {
    preserve_mtime: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            preserve_mtime: true,
        }
    }
}

impl Engine {
    /// Creates an engine with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether reverted loose files get their original modification
    /// time back (default: true).
    pub fn preserve_mtime(mut self, preserve: bool) -> Self {
        self.preserve_mtime = preserve;
        self
    }

    /// Runs one reconciliation pass over the installation at `root`.
    ///
    /// Returns `Err` only if the run could not start (a stored package does
    /// not open) or the library file could not be saved. Per-target problems
    /// are collected into [`ReapplyReport::failed`]. The library is saved
    /// after every file, so its history never lags a completed write.
    pub fn reapply(
        &self,
        library: &mut PatchLibrary,
        store: &BackupStore,
        registry: &CodecRegistry,
        root: &Path,
        progress: &mut dyn ProgressReporter,
    ) -> Result<ReapplyReport> {
        let resolved = resolve(library)?;
        let groups = group_targets(&resolved, library);
        let total = groups.values().map(FileGroup::len).sum::<usize>() as u64;
        progress.on_total(total);

        let mut run = Run {
            engine: self,
            resolved: &resolved,
            store,
            registry,
            root,
            progress,
            report: ReapplyReport::default(),
            done: 0,
            total,
        };

        let guard = StateDirGuard::new(root, library.state_dir());
        for (file, group) in &groups {
            if run.report.cancelled {
                break;
            }
            if guard.covers(file) {
                run.fail_all(group.loose.iter().chain(&group.entries), &guard.error(file));
                continue;
            }
            if let Some(target) = &group.loose {
                run.loose(library, target);
            }
            if !group.entries.is_empty() && !run.report.cancelled {
                run.container(library, file, group);
            }
            if library.is_dirty() {
                library.save()?;
            }
        }

        let report = run.report;
        let live = library.history().live_blobs();
        match store.collect_garbage(&live) {
            Ok(0) => {}
            Ok(n) => log::debug!("collected {} orphan backup blobs", n),
            Err(e) => log::warn!("could not collect orphan backups: {}", e),
        }

        if !report.cancelled {
            if report.failed.is_empty() {
                library.mark_applied();
            }
            if let Err(e) = library.purge_packages() {
                log::warn!("could not delete packages of removed patches: {}", e);
            }
        }

        log::info!(
            "reapply for {} {}: {} written, {} reverted, {} credited, {} unchanged, {} failed",
            library.game(),
            report.status(),
            report.written.len(),
            report.reverted.len(),
            report.credited.len(),
            report.unchanged,
            report.failed.len()
        );
        Ok(report)
    }

    /// Compares the installation against the resolved state without writing.
    pub fn verify(
        &self,
        library: &PatchLibrary,
        store: &BackupStore,
        registry: &CodecRegistry,
        root: &Path,
    ) -> Result<VerifyReport> {
        let resolved = resolve(library)?;
        let groups = group_targets(&resolved, library);
        let mut report = VerifyReport::default();

        for record in library.history().iter() {
            if let Backup::Original { blob, .. } = &record.backup {
                if let Err(e) = store.get(blob) {
                    log::warn!("backup of {} is unusable: {}", record.target, e);
                    report.broken_backups.push(record.target.clone());
                }
            }
        }

        let check = |report: &mut VerifyReport, target: &Target, current: Option<&[u8]>| {
            report.checked += 1;
            let record = library.history().get(target);
            let in_place = match (resolved.get(target), record) {
                (Some(res), Some(record)) => {
                    record.contributor == res.contributor && res.action.is_satisfied_by(current)
                }
                (Some(res), None) => res.action.is_satisfied_by(current),
                (None, _) => false,
            };
            if !in_place {
                report.drifted.push(target.clone());
            }
        };

        let guard = StateDirGuard::new(root, library.state_dir());
        for (file, group) in &groups {
            if guard.covers(file) {
                for target in group.loose.iter().chain(&group.entries) {
                    report.failed.push(PathFailure {
                        target: target.clone(),
                        error: guard.error(file),
                    });
                }
                continue;
            }
            if let Some(target) = &group.loose {
                match read_optional(&file.to_fs_path(root)) {
                    Ok(current) => check(&mut report, target, current.as_deref()),
                    Err(error) => report.failed.push(PathFailure {
                        target: target.clone(),
                        error,
                    }),
                }
            }
            if group.entries.is_empty() {
                continue;
            }
            match open_container(root, file, registry) {
                Ok(mut archive) => {
                    for target in &group.entries {
                        match read_entry(archive.as_mut(), target) {
                            Ok(current) => check(&mut report, target, current.as_deref()),
                            Err(error) => report.failed.push(PathFailure {
                                target: target.clone(),
                                error,
                            }),
                        }
                    }
                }
                Err(error) => {
                    for target in &group.entries {
                        report.failed.push(PathFailure {
                            target: target.clone(),
                            error: error.replicate(),
                        });
                    }
                }
            }
        }
        Ok(report)
    }
}

// ============================================================================
// Grouping
// ============================================================================

/// All targets living in one file under the root.
#[derive(Debug, Default)]
struct FileGroup {
    loose: Option<Target>,
    entries: BTreeSet<Target>,
}

impl FileGroup {
    fn len(&self) -> usize {
        self.loose.iter().count() + self.entries.len()
    }
}

fn group_targets(
    resolved: &ResolvedState,
    library: &PatchLibrary,
) -> BTreeMap<ResourcePath, FileGroup> {
    let mut groups: BTreeMap<ResourcePath, FileGroup> = BTreeMap::new();
    let targets = resolved
        .targets()
        .keys()
        .chain(library.history().iter().map(|r| &r.target));
    for target in targets {
        let group = groups.entry(target.file().clone()).or_default();
        if target.is_entry() {
            group.entries.insert(target.clone());
        } else {
            group.loose = Some(target.clone());
        }
    }
    groups
}

/// Keeps patches away from the files of the library itself.
///
/// Holds the components of the state directory relative to the root, if the
/// state directory lies inside it.
struct StateDirGuard {
    prefix: Option<Vec<String>>,
}

impl StateDirGuard {
    fn new(root: &Path, state_dir: &Path) -> Self {
        let (root, state_dir) = match (root.canonicalize(), state_dir.canonicalize()) {
            (Ok(root), Ok(state_dir)) => (root, state_dir),
            _ => match (std::path::absolute(root), std::path::absolute(state_dir)) {
                (Ok(root), Ok(state_dir)) => (root, state_dir),
                _ => return Self { prefix: None },
            },
        };
        let prefix = state_dir.strip_prefix(&root).ok().and_then(|relative| {
            relative
                .components()
                .map(|c| match c {
                    Component::Normal(name) => name.to_str().map(str::to_string),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
        });
        Self { prefix }
    }

    /// Returns true if `file` is the state directory or lies inside it.
    fn covers(&self, file: &ResourcePath) -> bool {
        let Some(prefix) = &self.prefix else {
            return false;
        };
        let components: Vec<&str> = file.components().collect();
        components.len() >= prefix.len()
            && prefix
                .iter()
                .zip(&components)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    fn error(&self, file: &ResourcePath) -> Error {
        Error::InvalidOperation(format!("'{}' is inside the state directory", file))
    }
}

// ============================================================================
// Planning
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Written,
    Reverted,
    Credited,
    Unchanged,
}

enum Change {
    Bytes(Vec<u8>),
    Remove,
}

enum RecordOp {
    Insert(Backup, String),
    Credit(String),
    Drop,
}

enum Plan {
    /// Settled without touching content; history already updated.
    Done(Outcome),
    /// Content must change; `op` runs once the change is on disk.
    Apply {
        change: Change,
        op: RecordOp,
        outcome: Outcome,
    },
}

struct Run<'a> {
    engine: &'a Engine,
    resolved: &'a ResolvedState,
    store: &'a BackupStore,
    registry: &'a CodecRegistry,
    root: &'a Path,
    progress: &'a mut dyn ProgressReporter,
    report: ReapplyReport,
    done: u64,
    total: u64,
}

impl Run<'_> {
    fn begin(&mut self, target: &Target) -> bool {
        if self.report.cancelled || self.progress.should_cancel() {
            self.report.cancelled = true;
            return false;
        }
        self.progress.on_entry_start(&target.to_string(), 0);
        true
    }

    fn finish(&mut self, target: &Target, result: Result<Outcome>) {
        let name = target.to_string();
        match result {
            Ok(outcome) => {
                match outcome {
                    Outcome::Written => self.report.written.push(target.clone()),
                    Outcome::Reverted => self.report.reverted.push(target.clone()),
                    Outcome::Credited => self.report.credited.push(target.clone()),
                    Outcome::Unchanged => self.report.unchanged += 1,
                }
                if outcome != Outcome::Unchanged {
                    log::debug!("{}: {:?}", name, outcome);
                }
                self.progress.on_entry_complete(&name, true);
            }
            Err(Error::Cancelled) => {
                self.report.cancelled = true;
                self.progress.on_entry_complete(&name, false);
            }
            Err(error) => {
                log::warn!("failed to apply {}: {}", name, error);
                self.progress.on_warning(&format!("{}: {}", name, error));
                self.progress.on_entry_complete(&name, false);
                self.report.failed.push(PathFailure {
                    target: target.clone(),
                    error,
                });
            }
        }
        self.done += 1;
        if !self.progress.on_progress(self.done, self.total) {
            self.report.cancelled = true;
        }
    }

    fn capture(&self, current: Option<&[u8]>, modified: Option<Timestamp>) -> Result<Backup> {
        Ok(match current {
            Some(bytes) => Backup::Original {
                blob: self.store.put(bytes)?,
                modified,
            },
            None => Backup::Absent,
        })
    }

    fn credit(
        &self,
        library: &mut PatchLibrary,
        target: &Target,
        resolution: &Resolution,
        record: Option<&HistoryRecord>,
        current: Option<&[u8]>,
        modified: Option<Timestamp>,
    ) -> Result<Outcome> {
        match record {
            Some(r) if r.contributor == resolution.contributor => Ok(Outcome::Unchanged),
            Some(_) => {
                library
                    .history_mut()
                    .set_contributor(target, &resolution.contributor)?;
                Ok(Outcome::Credited)
            }
            None => {
                let backup = self.capture(current, modified)?;
                library.history_mut().insert_first_touch(
                    target.clone(),
                    backup,
                    &resolution.contributor,
                )?;
                Ok(Outcome::Credited)
            }
        }
    }

    /// Decides what `target` needs given its current content.
    fn plan(
        &self,
        library: &mut PatchLibrary,
        target: &Target,
        current: Option<&[u8]>,
        modified: Option<Timestamp>,
    ) -> Result<Plan> {
        let record = library.history().get(target).cloned();
        match (self.resolved.get(target), record) {
            (Some(resolution), record) => {
                if resolution.action.is_satisfied_by(current) {
                    let outcome = self.credit(
                        library,
                        target,
                        resolution,
                        record.as_ref(),
                        current,
                        modified,
                    )?;
                    return Ok(Plan::Done(outcome));
                }
                let change = match resolution.action {
                    Action::Write { .. } => Change::Bytes(self.resolved.read_content(target)?),
                    Action::Remove => Change::Remove,
                };
                let op = match record {
                    Some(_) => RecordOp::Credit(resolution.contributor.clone()),
                    None => RecordOp::Insert(
                        self.capture(current, modified)?,
                        resolution.contributor.clone(),
                    ),
                };
                Ok(Plan::Apply {
                    change,
                    op,
                    outcome: Outcome::Written,
                })
            }
            (None, Some(record)) => {
                let change = match record.backup {
                    Backup::Original { blob, .. } => {
                        let original = self.store.get(&blob)?;
                        (current != Some(original.as_slice())).then_some(Change::Bytes(original))
                    }
                    Backup::Absent => current.map(|_| Change::Remove),
                };
                match change {
                    Some(change) => Ok(Plan::Apply {
                        change,
                        op: RecordOp::Drop,
                        outcome: Outcome::Reverted,
                    }),
                    None => {
                        library.history_mut().remove(target);
                        Ok(Plan::Done(Outcome::Reverted))
                    }
                }
            }
            (None, None) => Ok(Plan::Done(Outcome::Unchanged)),
        }
    }

    fn record(&self, library: &mut PatchLibrary, target: &Target, op: RecordOp) -> Result<()> {
        let history = library.history_mut();
        match op {
            RecordOp::Insert(backup, contributor) => {
                history.insert_first_touch(target.clone(), backup, contributor)
            }
            RecordOp::Credit(contributor) => history.set_contributor(target, contributor),
            RecordOp::Drop => {
                history.remove(target);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Loose files
    // ------------------------------------------------------------------------

    fn loose(&mut self, library: &mut PatchLibrary, target: &Target) {
        if !self.begin(target) {
            return;
        }
        let result = self.apply_loose(library, target);
        self.finish(target, result);
    }

    fn apply_loose(&self, library: &mut PatchLibrary, target: &Target) -> Result<Outcome> {
        let path = target.file().to_fs_path(self.root);
        let current = read_optional(&path)?;
        let modified = if self.engine.preserve_mtime && current.is_some() {
            fs::metadata(&path).ok().map(|m| Timestamp::modified(&m))
        } else {
            None
        };
        let original_mtime = match library.history().get(target).map(|r| r.backup) {
            Some(Backup::Original { modified, .. }) => modified,
            _ => None,
        };

        match self.plan(library, target, current.as_deref(), modified)? {
            Plan::Done(outcome) => Ok(outcome),
            Plan::Apply {
                change,
                op,
                outcome,
            } => {
                match &change {
                    Change::Bytes(data) => write_loose(&path, data)?,
                    Change::Remove => remove_loose(&path)?,
                }
                if outcome == Outcome::Reverted && self.engine.preserve_mtime {
                    if let (Change::Bytes(_), Some(mtime)) = (&change, original_mtime) {
                        if let Err(e) = filetime::set_file_mtime(&path, mtime.to_file_time()) {
                            log::warn!("could not restore mtime of {}: {}", path.display(), e);
                        }
                    }
                }
                self.record(library, target, op)?;
                Ok(outcome)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Containers
    // ------------------------------------------------------------------------

    fn fail_all<'t>(&mut self, targets: impl IntoIterator<Item = &'t Target>, error: &Error) {
        for target in targets {
            if !self.begin(target) {
                return;
            }
            self.finish(target, Err(error.replicate()));
        }
    }

    fn container(&mut self, library: &mut PatchLibrary, file: &ResourcePath, group: &FileGroup) {
        if let Some(loose) = &group.loose {
            if self.resolved.get(loose).is_some() {
                let error = Error::InvalidOperation(format!(
                    "container '{}' is also replaced as a loose file",
                    file
                ));
                self.fail_all(&group.entries, &error);
                return;
            }
        }

        let mut archive = match open_container(self.root, file, self.registry) {
            Ok(Some(archive)) => archive,
            Ok(None) => {
                self.settle_without_container(library, file, group);
                return;
            }
            Err(error) => {
                self.fail_all(&group.entries, &error);
                return;
            }
        };

        // Targets staged into the session: (target, entry key, record op, outcome).
        let mut staged: Vec<(Target, String, RecordOp, Outcome)> = Vec::new();
        for target in &group.entries {
            if !self.begin(target) {
                break;
            }
            match self.stage_entry(library, &mut archive, target) {
                Ok(Staging::Done(outcome)) => self.finish(target, Ok(outcome)),
                Ok(Staging::Staged { key, op, outcome }) => {
                    staged.push((target.clone(), key, op, outcome));
                }
                Err(error) => self.finish(target, Err(error)),
            }
        }

        if self.report.cancelled || staged.is_empty() {
            if !staged.is_empty() {
                log::info!("cancelled before committing {}", file);
            }
            archive.discard();
            return;
        }

        let result = archive.commit_in_place(&mut CancelOnly(&mut *self.progress));
        match result {
            Ok(result) => {
                let mut failed: HashMap<String, Error> = result
                    .failed
                    .into_iter()
                    .map(|f| (f.path.as_str().to_string(), f.error))
                    .collect();
                for (target, key, op, outcome) in staged {
                    let outcome = match failed.remove(&key) {
                        Some(error) => Err(error),
                        None => self.record(library, &target, op).map(|_| outcome),
                    };
                    self.finish(&target, outcome);
                }
            }
            Err(Error::Cancelled) => {
                log::info!("cancelled while committing {}", file);
                self.report.cancelled = true;
            }
            Err(error) => {
                for (target, ..) in &staged {
                    self.finish(target, Err(error.replicate()));
                }
            }
        }
    }

    fn stage_entry(
        &self,
        library: &mut PatchLibrary,
        archive: &mut Archive<io::BufReader<fs::File>>,
        target: &Target,
    ) -> Result<Staging> {
        let entry_path = entry_path(target)?;
        let existing = archive.entry(entry_path.as_str()).map(|e| e.path().clone());
        let current = match &existing {
            Some(path) => Some(archive.read(path.as_str())?),
            None => None,
        };

        match self.plan(library, target, current.as_deref(), None)? {
            Plan::Done(outcome) => Ok(Staging::Done(outcome)),
            Plan::Apply {
                change,
                op,
                outcome,
            } => {
                let key = match (change, existing) {
                    (Change::Bytes(data), Some(path)) => {
                        archive.stage_import(path.as_str(), data)?;
                        path
                    }
                    (Change::Bytes(data), None) => {
                        archive.stage_insert(entry_path.clone(), data)?;
                        entry_path
                    }
                    (Change::Remove, Some(path)) => {
                        archive.stage_removal(path.as_str())?;
                        path
                    }
                    // Planning never asks to remove what is not there.
                    (Change::Remove, None) => return Ok(Staging::Done(outcome)),
                };
                Ok(Staging::Staged {
                    key: key.as_str().to_string(),
                    op,
                    outcome,
                })
            }
        }
    }

    /// Handles entries of a container file that does not exist.
    ///
    /// Only targets that want the entry gone can be settled.
    fn settle_without_container(
        &mut self,
        library: &mut PatchLibrary,
        file: &ResourcePath,
        group: &FileGroup,
    ) {
        for target in &group.entries {
            if !self.begin(target) {
                return;
            }
            let result = match self.plan(library, target, None, None) {
                Ok(Plan::Done(outcome)) => Ok(outcome),
                Ok(Plan::Apply { .. }) => Err(Error::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("container '{}' does not exist", file),
                ))),
                Err(error) => Err(error),
            };
            self.finish(target, result);
        }
    }
}

enum Staging {
    Done(Outcome),
    Staged {
        key: String,
        op: RecordOp,
        outcome: Outcome,
    },
}

/// Forwards only cancellation to the reapply progress reporter.
struct CancelOnly<'a>(&'a mut dyn ProgressReporter);

impl ProgressReporter for CancelOnly<'_> {
    fn should_cancel(&self) -> bool {
        self.0.should_cancel()
    }
}

// ============================================================================
// File helpers
// ============================================================================

fn entry_path(target: &Target) -> Result<ResourcePath> {
    match target {
        Target::Entry { entry, .. } => Ok(entry.clone()),
        Target::Loose(path) => Err(Error::InvalidOperation(format!(
            "'{}' is not a container entry",
            path
        ))),
    }
}

/// Opens a container under `root`; `Ok(None)` if the file does not exist.
fn open_container(
    root: &Path,
    file: &ResourcePath,
    registry: &CodecRegistry,
) -> Result<Option<Archive<io::BufReader<fs::File>>>> {
    match Archive::open_path(file.to_fs_path(root), registry) {
        Ok(archive) => Ok(Some(archive)),
        Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn read_entry(
    archive: Option<&mut Archive<io::BufReader<fs::File>>>,
    target: &Target,
) -> Result<Option<Vec<u8>>> {
    let Some(archive) = archive else {
        return Ok(None);
    };
    let entry_path = entry_path(target)?;
    match archive.entry(entry_path.as_str()).map(|e| e.path().clone()) {
        Some(path) => archive.read(path.as_str()).map(Some),
        None => Ok(None),
    }
}

/// Reads a file, `None` if it does not exist.
fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_loose(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    write_bytes_atomic(path, data)
}

fn remove_loose(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
