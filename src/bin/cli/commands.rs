//! Command implementations for the CLI tool.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use walkdir::WalkDir;

use modstack::package::Compression;
use modstack::progress::{AtomicProgress, format_bytes_iec};
use modstack::{
    Archive, CodecRegistry, Error, FileEntry, Installation, PackageBuilder, PatchPackage,
    PatchVersion, ReapplyReport, ResourcePath, Result, Target, Timestamp,
};

use crate::config::load_config;
use crate::exit_codes::{ExitCode, error_to_exit_code, status_to_exit_code};
use crate::file_selector::FileSelector;
use crate::output::{PatchRow, create_formatter};
use crate::progress::CliProgress;
use crate::{ArchiveCommand, InstallArgs, OutputFormat, PackageCommand, PatchCommand};

/// Settings shared by all commands.
pub struct Context {
    pub format: OutputFormat,
    pub quiet: bool,
    pub cancel: Arc<AtomicProgress>,
}

impl Context {
    fn human(&self) -> bool {
        self.format == OutputFormat::Human && !self.quiet
    }
}

fn fail(error: &Error) -> ExitCode {
    eprintln!("Error: {}", error);
    error_to_exit_code(error)
}

fn finish(result: Result<ExitCode>) -> ExitCode {
    result.unwrap_or_else(|e| fail(&e))
}

// ============================================================================
// archive
// ============================================================================

/// `archive` subcommands
pub fn archive(ctx: &Context, action: ArchiveCommand) -> ExitCode {
    let registry = CodecRegistry::with_builtin();
    match action {
        ArchiveCommand::List { file, include } => {
            let selector = match FileSelector::new(&include, &[]) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::BadArgs;
                }
            };
            finish(list_entries(ctx, &registry, &file, &selector))
        }
        ArchiveCommand::Extract {
            file,
            entry,
            output,
        } => finish(extract_entry(ctx, &registry, &file, &entry, &output)),
        ArchiveCommand::Import {
            file,
            entry,
            source,
        } => finish(import_entry(ctx, &registry, &file, &entry, &source)),
        ArchiveCommand::Remove { file, entry } => {
            finish(remove_entry(ctx, &registry, &file, &entry))
        }
    }
}

fn list_entries(
    ctx: &Context,
    registry: &CodecRegistry,
    file: &Path,
    selector: &FileSelector,
) -> Result<ExitCode> {
    let archive = Archive::open_path(file, registry)?;
    let entries: Vec<&FileEntry> = archive
        .entries()
        .filter(|e| selector.matches(e.path().as_str()))
        .collect();
    print!("{}", create_formatter(ctx.format).format_entries(&entries));
    Ok(ExitCode::Success)
}

fn extract_entry(
    ctx: &Context,
    registry: &CodecRegistry,
    file: &Path,
    entry: &str,
    output: &Path,
) -> Result<ExitCode> {
    let mut archive = Archive::open_path(file, registry)?;
    let data = archive.read(entry)?;
    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(output, &data)?;
    if ctx.human() {
        println!(
            "Extracted {} to {} ({})",
            entry,
            output.display(),
            format_bytes_iec(data.len() as u64)
        );
    }
    Ok(ExitCode::Success)
}

fn import_entry(
    ctx: &Context,
    registry: &CodecRegistry,
    file: &Path,
    entry: &str,
    source: &Path,
) -> Result<ExitCode> {
    let data = fs::read(source)?;
    let mut archive = Archive::open_path(file, registry)?;
    let existing = archive.entry(entry).map(|e| e.path().as_str().to_string());
    match existing {
        Some(path) => archive.stage_import(&path, data)?,
        None => archive.stage_insert(ResourcePath::new(entry)?, data)?,
    }
    commit(ctx, archive)
}

fn remove_entry(
    ctx: &Context,
    registry: &CodecRegistry,
    file: &Path,
    entry: &str,
) -> Result<ExitCode> {
    let mut archive = Archive::open_path(file, registry)?;
    archive.stage_removal(entry)?;
    commit(ctx, archive)
}

fn commit(ctx: &Context, archive: Archive<BufReader<File>>) -> Result<ExitCode> {
    let mut progress = CliProgress::new(ctx.cancel.clone(), ctx.quiet);
    let bar = progress.handle();
    let result = archive.commit_in_place(&mut progress);
    bar.finish_and_clear();

    let result = result?;
    print!("{}", create_formatter(ctx.format).format_commit(&result));
    Ok(if result.is_complete() {
        ExitCode::Success
    } else {
        ExitCode::Warning
    })
}

// ============================================================================
// package
// ============================================================================

/// Options of `package build`
struct BuildConfig {
    id: String,
    name: Option<String>,
    version: String,
    description: Option<String>,
    author: Option<String>,
    website: Option<String>,
    games: Vec<String>,
    removals: Vec<String>,
    changelog: Option<String>,
    stored: bool,
}

/// `package` subcommands
pub fn package(ctx: &Context, action: PackageCommand) -> ExitCode {
    match action {
        PackageCommand::Info { file, verify } => finish(package_info(ctx, &file, verify)),
        PackageCommand::Build {
            dir,
            output,
            id,
            name,
            version,
            description,
            author,
            website,
            games,
            removals,
            changelog,
            exclude,
            stored,
        } => {
            let selector = match FileSelector::new(&[], &exclude) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::BadArgs;
                }
            };
            let config = BuildConfig {
                id,
                name,
                version,
                description,
                author,
                website,
                games,
                removals,
                changelog,
                stored,
            };
            finish(build_package(ctx, &dir, &output, &selector, config))
        }
    }
}

fn package_info(ctx: &Context, file: &Path, verify: bool) -> Result<ExitCode> {
    let package = PatchPackage::open(file)?;
    if verify {
        package.verify_payload()?;
    }
    print!("{}", create_formatter(ctx.format).format_package(&package));
    if verify && ctx.human() {
        println!("Payload OK");
    }
    Ok(ExitCode::Success)
}

/// Maps a path relative to the build directory to its target.
///
/// The first directory named like a container turns the rest of the path
/// into an entry of that container.
fn target_for(registry: &CodecRegistry, relative: &str) -> Result<Target> {
    let parts: Vec<&str> = relative.split('/').collect();
    let container = parts[..parts.len().saturating_sub(1)]
        .iter()
        .position(|part| registry.is_container_name(part));
    match container {
        Some(at) => Target::parse(&format!(
            "{}::{}",
            parts[..=at].join("/"),
            parts[at + 1..].join("/")
        )),
        None => Target::parse(relative),
    }
}

fn build_package(
    ctx: &Context,
    dir: &Path,
    output: &Path,
    selector: &FileSelector,
    config: BuildConfig,
) -> Result<ExitCode> {
    let version = PatchVersion::parse(&config.version)?;
    let name = config.name.unwrap_or_else(|| config.id.clone());
    let mut builder = PackageBuilder::new(config.id, name, version);
    if let Some(description) = config.description {
        builder = builder.description(description);
    }
    if let Some(author) = config.author {
        builder = builder.author(author);
    }
    if let Some(website) = config.website {
        builder = builder.website(website);
    }
    for game in config.games {
        builder = builder.target_game(game);
    }
    if let Some(text) = config.changelog {
        builder = builder.changelog(version, Timestamp::now(), text);
    }
    if config.stored {
        builder = builder.compression(Compression::Stored);
    }

    let registry = CodecRegistry::with_builtin();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = match entry.path().strip_prefix(dir) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !selector.matches(&relative) {
            continue;
        }
        let target = target_for(&registry, &relative)?;
        log::debug!("{} -> {}", relative, target);
        builder.add_file(target, entry.path())?;
    }
    for removal in &config.removals {
        builder.remove(Target::parse(removal)?)?;
    }

    if builder.is_empty() {
        eprintln!("Error: nothing to package in {}", dir.display());
        return Ok(ExitCode::BadArgs);
    }
    let count = builder.len();
    let metadata = builder.write_to_path(output)?;
    if ctx.human() {
        println!(
            "Built {} {} ({} changes, {}) -> {}",
            metadata.id,
            metadata.version,
            count,
            format_bytes_iec(metadata.total_size),
            output.display()
        );
    }
    Ok(ExitCode::Success)
}

// ============================================================================
// patch
// ============================================================================

/// `patch` subcommands
pub fn patch(
    ctx: &Context,
    config_path: Option<&Path>,
    args: &InstallArgs,
    action: PatchCommand,
) -> ExitCode {
    let config = match load_config(config_path).and_then(|c| c.resolve(args)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::BadArgs;
        }
    };
    let mut install = match Installation::open(config, CodecRegistry::with_builtin()) {
        Ok(install) => install,
        Err(e) => return fail(&e),
    };

    match action {
        PatchCommand::List => list_patches(ctx, &install),
        PatchCommand::Add { packages } => {
            let mut code = ExitCode::Success;
            for package in &packages {
                code = code.max(run_reapply(ctx, &mut install, |i| i.add_patch(package)));
                if ctx.cancel.is_cancelled() {
                    break;
                }
            }
            code
        }
        PatchCommand::Replace { package } => {
            run_reapply(ctx, &mut install, |i| i.replace_patch(&package))
        }
        PatchCommand::Remove { id } => run_reapply(ctx, &mut install, |i| i.remove_patch(&id)),
        PatchCommand::Enable { id } => {
            run_reapply(ctx, &mut install, |i| i.set_enabled(&id, true))
        }
        PatchCommand::Disable { id } => {
            run_reapply(ctx, &mut install, |i| i.set_enabled(&id, false))
        }
        PatchCommand::Reorder { ids } => {
            run_reapply(ctx, &mut install, |i| i.reorder(ids.as_slice()))
        }
        PatchCommand::Reapply => run_reapply(ctx, &mut install, Installation::reapply),
        PatchCommand::Verify => match install.verify() {
            Ok(report) => {
                print!("{}", create_formatter(ctx.format).format_verify(&report));
                if report.is_clean() {
                    ExitCode::Success
                } else {
                    ExitCode::Warning
                }
            }
            Err(e) => fail(&e),
        },
    }
}

fn run_reapply<F>(ctx: &Context, install: &mut Installation, op: F) -> ExitCode
where
    F: FnOnce(&mut Installation) -> Result<ReapplyReport>,
{
    let progress = CliProgress::new(ctx.cancel.clone(), ctx.quiet);
    let bar = progress.handle();
    install.set_progress(Box::new(progress));
    let result = op(install);
    bar.finish_and_clear();

    match result {
        Ok(report) => {
            print!("{}", create_formatter(ctx.format).format_reapply(&report));
            status_to_exit_code(report.status())
        }
        Err(e) => fail(&e),
    }
}

fn list_patches(ctx: &Context, install: &Installation) -> ExitCode {
    let library = install.library();
    let rows: Vec<PatchRow> = library
        .entries()
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let (name, version, error) = match library.package(&entry.id) {
                Ok(package) => (
                    Some(package.metadata().name.clone()),
                    Some(package.version().to_string()),
                    None,
                ),
                Err(e) => (None, None, Some(e.to_string())),
            };
            PatchRow {
                position: index + 1,
                id: entry.id.clone(),
                enabled: entry.enabled,
                name,
                version,
                error,
            }
        })
        .collect();
    print!(
        "{}",
        create_formatter(ctx.format).format_patches(library.game(), &rows)
    );
    if rows.iter().any(|r| r.error.is_some()) {
        ExitCode::Warning
    } else {
        ExitCode::Success
    }
}
