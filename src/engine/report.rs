//! Results of reapply and verify runs.

use std::fmt;

use serde::Serialize;

use crate::{Error, Target};

/// A target that could not be brought to its resolved state.
#[derive(Debug)]
pub struct PathFailure {
    /// The target.
    pub target: Target,
    /// Why it failed.
    pub error: Error,
}

/// Overall outcome of a reapply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyStatus {
    /// Every target matches the resolved state.
    Complete,
    /// Some targets failed; all others were applied.
    Partial,
    /// The run stopped early; completed targets stay applied.
    Cancelled,
}

impl fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApplyStatus::Complete => "complete",
            ApplyStatus::Partial => "partial",
            ApplyStatus::Cancelled => "cancelled",
        })
    }
}

/// Result of a reapply.
#[must_use = "reapply report should be checked for failed paths"]
#[derive(Debug, Default)]
pub struct ReapplyReport {
    /// Targets whose content was written or deleted to match a patch.
    pub written: Vec<Target>,
    /// Targets restored to their original state.
    pub reverted: Vec<Target>,
    /// Targets already holding the right bytes, now credited to another patch.
    pub credited: Vec<Target>,
    /// Targets that needed nothing.
    pub unchanged: usize,
    /// Targets that failed; their history is left as it was.
    pub failed: Vec<PathFailure>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
}

impl ReapplyReport {
    /// Returns the overall status.
    pub fn status(&self) -> ApplyStatus {
        if self.cancelled {
            ApplyStatus::Cancelled
        } else if self.failed.is_empty() {
            ApplyStatus::Complete
        } else {
            ApplyStatus::Partial
        }
    }

    /// Returns the number of file or archive writes performed.
    ///
    /// Zero on a rerun with nothing to do.
    pub fn writes(&self) -> usize {
        self.written.len() + self.reverted.len()
    }

    /// Returns every target whose content or contributor changed, sorted.
    pub fn affected(&self) -> Vec<Target> {
        let mut affected: Vec<Target> = self
            .written
            .iter()
            .chain(&self.reverted)
            .chain(&self.credited)
            .cloned()
            .collect();
        affected.sort();
        affected
    }

    /// Returns the failed targets.
    pub fn failed_targets(&self) -> Vec<Target> {
        self.failed.iter().map(|f| f.target.clone()).collect()
    }
}

/// Result of comparing the installation against the resolved state.
#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Targets inspected (resolved or with history).
    pub checked: usize,
    /// Targets whose content differs from what the stack resolves to.
    pub drifted: Vec<Target>,
    /// Records whose backup blob is missing or damaged.
    pub broken_backups: Vec<Target>,
    /// Targets that could not be inspected.
    pub failed: Vec<PathFailure>,
}

impl VerifyReport {
    /// Returns true if nothing is out of place.
    pub fn is_clean(&self) -> bool {
        self.drifted.is_empty() && self.broken_backups.is_empty() && self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(s: &str) -> Target {
        Target::parse(s).unwrap()
    }

    #[test]
    fn test_status_precedence() {
        let mut report = ReapplyReport::default();
        assert_eq!(report.status(), ApplyStatus::Complete);
        report.failed.push(PathFailure {
            target: target("a"),
            error: Error::Cancelled,
        });
        assert_eq!(report.status(), ApplyStatus::Partial);
        report.cancelled = true;
        assert_eq!(report.status(), ApplyStatus::Cancelled);
    }

    #[test]
    fn test_affected_is_sorted() {
        let report = ReapplyReport {
            written: vec![target("b")],
            reverted: vec![target("a")],
            credited: vec![target("c")],
            ..Default::default()
        };
        assert_eq!(report.writes(), 2);
        assert_eq!(report.affected(), [target("a"), target("b"), target("c")]);
    }
}
