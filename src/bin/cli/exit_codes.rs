//! Exit codes for the CLI tool.

use modstack::{ApplyStatus, Error};

/// Exit code constants
pub const SUCCESS: i32 = 0;
/// Operation completed with warnings (some paths or entries failed)
pub const WARNING: i32 = 1;
/// Fatal error occurred
pub const FATAL_ERROR: i32 = 2;
/// Container, package or library format error
pub const BAD_ARCHIVE: i32 = 3;
/// I/O error
pub const IO_ERROR: i32 = 5;
/// Ctrl+C (128 + SIGINT)
pub const USER_INTERRUPT: i32 = 130;
/// Invalid command line arguments
pub const BAD_ARGS: i32 = 255;

/// Exit code enum for structured handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExitCode {
    Success,
    Warning,
    FatalError,
    BadArchive,
    IoError,
    UserInterrupt,
    BadArgs,
}

impl ExitCode {
    /// Returns the numeric exit code
    pub fn code(self) -> i32 {
        match self {
            Self::Success => SUCCESS,
            Self::Warning => WARNING,
            Self::FatalError => FATAL_ERROR,
            Self::BadArchive => BAD_ARCHIVE,
            Self::IoError => IO_ERROR,
            Self::UserInterrupt => USER_INTERRUPT,
            Self::BadArgs => BAD_ARGS,
        }
    }
}

/// Converts a modstack error to an exit code
pub fn error_to_exit_code(error: &Error) -> ExitCode {
    match error {
        Error::Io(_) => ExitCode::IoError,
        Error::Cancelled => ExitCode::UserInterrupt,
        Error::InvalidResourcePath(_) => ExitCode::BadArgs,
        Error::PatchNotFound { .. } | Error::EntryNotFound { .. } => ExitCode::BadArgs,
        Error::UnknownContainer { .. }
        | Error::UnsupportedFormatVersion { .. }
        | Error::UnsupportedMethod { .. }
        | Error::DigestMismatch { .. } => ExitCode::BadArchive,
        e if e.is_format_error() => ExitCode::BadArchive,
        _ => ExitCode::FatalError,
    }
}

/// Converts the status of a reapply to an exit code
pub fn status_to_exit_code(status: ApplyStatus) -> ExitCode {
    match status {
        ApplyStatus::Complete => ExitCode::Success,
        ApplyStatus::Partial => ExitCode::Warning,
        ApplyStatus::Cancelled => ExitCode::UserInterrupt,
    }
}
