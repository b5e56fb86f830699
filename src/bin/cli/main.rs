//! CLI tool for modstack containers, packages and patch stacks.

mod commands;
mod config;
mod exit_codes;
mod file_selector;
mod output;
mod progress;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use std::path::PathBuf;

use modstack::progress::AtomicProgress;

use exit_codes::ExitCode;

/// Game container editor and patch stack manager
#[derive(Parser)]
#[command(name = "modstack")]
#[command(author, version, about = "Game container editor and patch stack manager", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, short = 'f', value_enum, default_value = "human", global = true)]
    format: OutputFormat,

    /// Suppress progress output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (default: <config dir>/modstack/config.toml)
    #[arg(long, global = true, env = "MODSTACK_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and edit container files (alias: a)
    #[command(alias = "a")]
    Archive {
        #[command(subcommand)]
        action: ArchiveCommand,
    },

    /// Inspect and build patch packages
    Package {
        #[command(subcommand)]
        action: PackageCommand,
    },

    /// Manage the patch stack of an installation (alias: p)
    #[command(alias = "p")]
    Patch {
        #[command(flatten)]
        install: InstallArgs,

        #[command(subcommand)]
        action: PatchCommand,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ArchiveCommand {
    /// List container entries (alias: l)
    #[command(alias = "l")]
    List {
        /// Container file
        file: PathBuf,

        /// Entry patterns to show (glob patterns supported)
        #[arg(short = 'i', long)]
        include: Vec<String>,
    },

    /// Extract one entry (alias: x)
    #[command(alias = "x")]
    Extract {
        /// Container file
        file: PathBuf,

        /// Entry path inside the container
        entry: String,

        /// Output file
        #[arg(short = 'o', long)]
        output: PathBuf,
    },

    /// Replace or add an entry from a file
    Import {
        /// Container file
        file: PathBuf,

        /// Entry path inside the container
        entry: String,

        /// File with the new content
        source: PathBuf,
    },

    /// Remove an entry
    Remove {
        /// Container file
        file: PathBuf,

        /// Entry path inside the container
        entry: String,
    },
}

#[derive(Subcommand)]
pub enum PackageCommand {
    /// Show package metadata and contents
    Info {
        /// Package file
        file: PathBuf,

        /// Also check every payload against its digest
        #[arg(long)]
        verify: bool,
    },

    /// Build a package from a directory tree
    ///
    /// Files are installed at their path relative to DIR. A directory named
    /// like a container (e.g. `DUKE3D.GRP/`) maps its files to entries of
    /// that container.
    Build {
        /// Directory with the patch content
        dir: PathBuf,

        /// Package file to write
        #[arg(short = 'o', long)]
        output: PathBuf,

        /// Patch id
        #[arg(long)]
        id: String,

        /// Display name (default: the id)
        #[arg(long)]
        name: Option<String>,

        /// Version (major.minor[.revision])
        #[arg(long, default_value = "1.0.0")]
        version: String,

        /// Description
        #[arg(long)]
        description: Option<String>,

        /// Author
        #[arg(long)]
        author: Option<String>,

        /// Website
        #[arg(long)]
        website: Option<String>,

        /// Game ids the patch is for (repeatable)
        #[arg(long = "game")]
        games: Vec<String>,

        /// Targets the patch deletes (repeatable, `path` or `container::entry`)
        #[arg(long = "remove")]
        removals: Vec<String>,

        /// Changelog line for this version
        #[arg(long)]
        changelog: Option<String>,

        /// Exclude patterns
        #[arg(short = 'x', long)]
        exclude: Vec<String>,

        /// Store payloads without compression
        #[arg(long)]
        stored: bool,
    },
}

/// Which installation a `patch` command works on.
#[derive(Args, Debug, Default)]
pub struct InstallArgs {
    /// Named installation from the config file
    #[arg(long, short = 'I', global = true)]
    pub install: Option<String>,

    /// Game id
    #[arg(long, short = 'g', global = true)]
    pub game: Option<String>,

    /// Installation root directory
    #[arg(long, short = 'r', global = true)]
    pub root: Option<PathBuf>,

    /// State directory (default: <root>/.modstack)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum PatchCommand {
    /// List installed patches in priority order (alias: l)
    #[command(alias = "l")]
    List,

    /// Install packages as the highest-priority patches
    Add {
        /// Package files
        #[arg(required = true)]
        packages: Vec<PathBuf>,
    },

    /// Upgrade an installed patch from a package with the same id
    Replace {
        /// Package file
        package: PathBuf,
    },

    /// Uninstall a patch and restore what it changed
    Remove {
        /// Patch id
        id: String,
    },

    /// Enable a patch
    Enable {
        /// Patch id
        id: String,
    },

    /// Disable a patch without uninstalling it
    Disable {
        /// Patch id
        id: String,
    },

    /// Set the priority order (lowest first); must name every patch
    Reorder {
        /// Patch ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Bring the installation in line with the patch stack
    Reapply,

    /// Compare installed content with the patch stack without writing
    Verify,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // First Ctrl+C cancels cooperatively; the second one exits at once
    let cancel = AtomicProgress::shared();
    let handler_cancel = cancel.clone();
    ctrlc::set_handler(move || {
        if handler_cancel.is_cancelled() {
            eprintln!("\nInterrupted");
            std::process::exit(exit_codes::USER_INTERRUPT);
        }
        eprintln!("\nCancelling after the current step (Ctrl+C again to abort)");
        handler_cancel.cancel();
    })
    .ok();

    let ctx = commands::Context {
        format: cli.format,
        quiet: cli.quiet,
        cancel,
    };

    let exit_code = match cli.command {
        Commands::Archive { action } => commands::archive(&ctx, action),
        Commands::Package { action } => commands::package(&ctx, action),
        Commands::Patch { install, action } => {
            commands::patch(&ctx, cli.config.as_deref(), &install, action)
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut std::io::stdout());
            ExitCode::Success
        }
    };

    std::process::exit(exit_code.code());
}
