use std::path::Path;

use glob::Pattern;

use crate::error::ConfigError;
use crate::storage::{ARCHIVE_DIR, ERRORS_DIR};

/// Suffixes left behind by editors, browsers and copy tools mid-write.
const PARTIAL_SUFFIXES: &[&str] = &[
    ".tmp",
    ".temp",
    ".part",
    ".partial",
    ".crdownload",
    ".download",
    ".swp",
    "~",
];

/// Decides which paths under a watch root are intake candidates.
#[derive(Debug, Clone, Default)]
pub struct WatchFilter {
    ignore: Vec<Pattern>,
}

impl WatchFilter {
    pub fn new(ignore_patterns: &[String]) -> Result<Self, ConfigError> {
        let ignore = ignore_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| ConfigError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ignore })
    }

    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        // Dotfiles and Office lock files.
        if name.starts_with('.') || name.starts_with("~$") {
            return false;
        }

        let lower = name.to_ascii_lowercase();
        if PARTIAL_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
            return false;
        }

        if is_in_reserved_dir(path) {
            return false;
        }

        !self
            .ignore
            .iter()
            .any(|p| p.matches(name) || p.matches_path(path))
    }
}

/// True for files already moved to an `archive/` or `errors/` folder.
pub fn is_in_reserved_dir(path: &Path) -> bool {
    path.parent()
        .and_then(|p| p.file_name())
        .is_some_and(|d| d == ARCHIVE_DIR || d == ERRORS_DIR)
}
