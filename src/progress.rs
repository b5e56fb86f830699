//! Progress reporting and cooperative cancellation.
//!
//! Archive commits report one entry per container entry written; reapply runs
//! report one entry per target. Both check [`ProgressReporter::should_cancel`]
//! before each step and stop with [`Error::Cancelled`](crate::Error::Cancelled)
//! (commit) or a cancelled report (reapply) when it returns `true`.
//!
//! # Example
//!
//! ```rust
//! use modstack::progress::{AtomicProgress, ProgressReporter};
//!
//! let progress = AtomicProgress::shared();
//! let handle = progress.clone();
//! // Hand `handle` to a Ctrl+C handler...
//! handle.cancel();
//! assert!(progress.should_cancel());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// Floating point versions for formatting calculations
const BYTES_KB: f64 = 1024.0;
const BYTES_MB: f64 = BYTES_KB * 1024.0;
const BYTES_GB: f64 = BYTES_MB * 1024.0;

/// Progress reporting trait for commits and reapply runs.
pub trait ProgressReporter: Send {
    /// Called once at the start with the total number of bytes to process.
    fn on_total(&mut self, total_bytes: u64) {
        let _ = total_bytes;
    }

    /// Called after each step.
    ///
    /// Returns `true` to continue or `false` to request cancellation.
    fn on_progress(&mut self, bytes_processed: u64, total_bytes: u64) -> bool {
        let _ = (bytes_processed, total_bytes);
        true
    }

    /// Called when starting to process an entry or target.
    fn on_entry_start(&mut self, entry_name: &str, size: u64) {
        let _ = (entry_name, size);
    }

    /// Called when an entry or target is done.
    fn on_entry_complete(&mut self, entry_name: &str, success: bool) {
        let _ = (entry_name, success);
    }

    /// Called for per-file failures that were collected rather than raised.
    fn on_warning(&mut self, message: &str) {
        let _ = message;
    }

    /// Checks if cancellation has been requested.
    ///
    /// Called before each entry or target. Default implementation returns
    /// `false`.
    fn should_cancel(&self) -> bool {
        false
    }
}

impl<P: ProgressReporter + ?Sized> ProgressReporter for &mut P {
    fn on_total(&mut self, total_bytes: u64) {
        (**self).on_total(total_bytes);
    }

    fn on_progress(&mut self, bytes_processed: u64, total_bytes: u64) -> bool {
        (**self).on_progress(bytes_processed, total_bytes)
    }

    fn on_entry_start(&mut self, entry_name: &str, size: u64) {
        (**self).on_entry_start(entry_name, size);
    }

    fn on_entry_complete(&mut self, entry_name: &str, success: bool) {
        (**self).on_entry_complete(entry_name, success);
    }

    fn on_warning(&mut self, message: &str) {
        (**self).on_warning(message);
    }

    fn should_cancel(&self) -> bool {
        (**self).should_cancel()
    }
}

/// Counters collected by [`StatisticsProgress`].
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    /// Total bytes to process.
    pub total_bytes: u64,
    /// Bytes processed so far.
    pub processed_bytes: u64,
    /// Current entry being processed.
    pub current_entry: Option<String>,
    /// Number of entries processed.
    pub entries_processed: usize,
    /// Number of entries that failed.
    pub entries_failed: usize,
}

/// A progress reporter that does nothing (null object pattern).
#[derive(Debug, Default, Clone)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {}

/// A progress reporter that collects statistics.
#[derive(Debug, Default, Clone)]
pub struct StatisticsProgress {
    /// The progress state.
    pub state: ProgressState,
    /// Whether cancellation was requested.
    pub cancelled: bool,
    /// Warnings collected.
    pub warnings: Vec<String>,
}

impl StatisticsProgress {
    /// Creates a new statistics progress reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collected state.
    pub fn state(&self) -> &ProgressState {
        &self.state
    }
}

impl ProgressReporter for StatisticsProgress {
    fn on_total(&mut self, total_bytes: u64) {
        self.state.total_bytes = total_bytes;
    }

    fn on_progress(&mut self, bytes_processed: u64, _total_bytes: u64) -> bool {
        self.state.processed_bytes = bytes_processed;
        !self.cancelled
    }

    fn on_entry_start(&mut self, entry_name: &str, _size: u64) {
        self.state.current_entry = Some(entry_name.to_string());
    }

    fn on_entry_complete(&mut self, _entry_name: &str, success: bool) {
        self.state.entries_processed += 1;
        if !success {
            self.state.entries_failed += 1;
        }
        self.state.current_entry = None;
    }

    fn on_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    fn should_cancel(&self) -> bool {
        self.cancelled
    }
}

/// A cancellation flag that can be shared across threads.
///
/// Clone the `Arc` from [`AtomicProgress::shared`] into a signal handler and
/// hand the other clone to a commit or reapply run.
#[derive(Debug, Default)]
pub struct AtomicProgress {
    cancelled: AtomicBool,
}

impl AtomicProgress {
    /// Creates a new atomic progress reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared atomic progress reporter.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Returns whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl ProgressReporter for AtomicProgress {
    fn on_progress(&mut self, _bytes_processed: u64, _total_bytes: u64) -> bool {
        !self.is_cancelled()
    }

    fn should_cancel(&self) -> bool {
        self.is_cancelled()
    }
}

impl ProgressReporter for Arc<AtomicProgress> {
    fn on_progress(&mut self, _bytes_processed: u64, _total_bytes: u64) -> bool {
        !self.is_cancelled()
    }

    fn should_cancel(&self) -> bool {
        self.is_cancelled()
    }
}

/// Formats bytes as a human-readable string using IEC units (KiB, MiB, GiB).
///
/// # Examples
///
/// ```rust
/// use modstack::progress::format_bytes_iec;
///
/// assert_eq!(format_bytes_iec(512), "512 B");
/// assert_eq!(format_bytes_iec(1536), "1.5 KiB");
/// assert_eq!(format_bytes_iec(1048576), "1.0 MiB");
/// ```
pub fn format_bytes_iec(bytes: u64) -> String {
    let bytes_f64 = bytes as f64;
    if bytes_f64 < BYTES_KB {
        format!("{} B", bytes)
    } else if bytes_f64 < BYTES_MB {
        format!("{:.1} KiB", bytes_f64 / BYTES_KB)
    } else if bytes_f64 < BYTES_GB {
        format!("{:.1} MiB", bytes_f64 / BYTES_MB)
    } else {
        format!("{:.1} GiB", bytes_f64 / BYTES_GB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_progress() {
        let mut progress = NoProgress;
        assert!(progress.on_progress(50, 100));
        assert!(!progress.should_cancel());
    }

    #[test]
    fn test_statistics_progress() {
        let mut progress = StatisticsProgress::new();
        progress.on_total(1000);
        progress.on_entry_start("TILES000.ART", 500);
        progress.on_progress(250, 1000);
        progress.on_entry_complete("TILES000.ART", true);
        progress.on_entry_complete("MAP01/THINGS", false);
        progress.on_warning("MAP01/THINGS: bad size");

        assert_eq!(progress.state().total_bytes, 1000);
        assert_eq!(progress.state().processed_bytes, 250);
        assert_eq!(progress.state().entries_processed, 2);
        assert_eq!(progress.state().entries_failed, 1);
        assert_eq!(progress.warnings.len(), 1);
    }

    #[test]
    fn test_statistics_cancellation() {
        let mut progress = StatisticsProgress::new();
        assert!(progress.on_progress(50, 100));

        progress.cancelled = true;
        assert!(!progress.on_progress(75, 100));
        assert!(progress.should_cancel());
    }

    #[test]
    fn test_atomic_progress() {
        let progress = AtomicProgress::shared();
        let mut reporter: Arc<AtomicProgress> = Arc::clone(&progress);
        assert!(reporter.on_progress(500, 1000));
        assert!(!reporter.should_cancel());

        progress.cancel();
        assert!(!reporter.on_progress(600, 1000));
        assert!(reporter.should_cancel());
    }

    #[test]
    fn test_mut_ref_forwards() {
        fn drive<P: ProgressReporter>(mut progress: P) {
            progress.on_total(10);
            progress.on_entry_complete("a", true);
        }

        let mut stats = StatisticsProgress::new();
        drive(&mut stats);
        assert_eq!(stats.state.total_bytes, 10);
        assert_eq!(stats.state.entries_processed, 1);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes_iec(500), "500 B");
        assert_eq!(format_bytes_iec(1500), "1.5 KiB");
        assert_eq!(format_bytes_iec(1500 * 1024), "1.5 MiB");
        assert_eq!(format_bytes_iec(1500 * 1024 * 1024), "1.5 GiB");
    }
}
