//! Progress bar implementation for CLI operations.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use modstack::progress::{AtomicProgress, ProgressReporter};

/// Progress bar driven by commits and reapply runs.
///
/// Cancellation comes from the shared Ctrl+C flag.
pub struct CliProgress {
    bar: ProgressBar,
    cancel: Arc<AtomicProgress>,
}

impl CliProgress {
    /// Creates a progress bar; hidden when `quiet`.
    pub fn new(cancel: Arc<AtomicProgress>, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        };
        Self { bar, cancel }
    }

    /// Returns a handle to the bar that stays valid after `self` is moved.
    pub fn handle(&self) -> ProgressBar {
        self.bar.clone()
    }
}

impl ProgressReporter for CliProgress {
    fn on_total(&mut self, total: u64) {
        self.bar.set_length(total);
    }

    fn on_progress(&mut self, done: u64, _total: u64) -> bool {
        self.bar.set_position(done);
        !self.cancel.is_cancelled()
    }

    fn on_entry_start(&mut self, entry_name: &str, _size: u64) {
        // Keep the tail of long names
        let display_name = match entry_name.char_indices().rev().nth(39) {
            Some((at, _)) => format!("...{}", &entry_name[at..]),
            None => entry_name.to_string(),
        };
        self.bar.set_message(display_name);
    }

    fn on_warning(&mut self, message: &str) {
        self.bar.suspend(|| eprintln!("warning: {}", message));
    }

    fn should_cancel(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
