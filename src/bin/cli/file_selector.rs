//! Entry and file selection using glob patterns.

use glob::{MatchOptions, Pattern};

/// Error type for file selector operations
#[derive(Debug, thiserror::Error)]
#[error("invalid glob pattern '{pattern}': {reason}")]
pub struct PatternError {
    pattern: String,
    reason: String,
}

/// Selects paths by include and exclude glob patterns.
///
/// Matching ignores ASCII case, since container entry names are usually
/// upper-case on disk and typed lower-case.
pub struct FileSelector {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, PatternError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| PatternError {
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

impl FileSelector {
    /// Creates a selector; no include patterns means "everything".
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, PatternError> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Checks if a path is selected.
    pub fn matches(&self, path: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches_with(path, OPTIONS)) {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches_with(path, OPTIONS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_include_ignores_case() {
        let selector = FileSelector::new(&strings(&["*.map", "maps/*"]), &[]).unwrap();
        assert!(selector.matches("E1L1.MAP"));
        assert!(selector.matches("MAPS/start.bsp"));
        assert!(!selector.matches("TILES000.ART"));
    }

    #[test]
    fn test_exclude_wins() {
        let selector = FileSelector::new(&strings(&["*.txt"]), &strings(&["debug*"])).unwrap();
        assert!(selector.matches("readme.txt"));
        assert!(!selector.matches("debug.txt"));
    }

    #[test]
    fn test_no_patterns_selects_all() {
        let selector = FileSelector::new(&[], &[]).unwrap();
        assert!(selector.matches("any/path/file.ext"));
    }

    #[test]
    fn test_bad_pattern() {
        assert!(FileSelector::new(&strings(&["[unclosed"]), &[]).is_err());
    }
}
