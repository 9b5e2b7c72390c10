//! Path exclusion with gitignore-style patterns.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use super::path::TypedPath;
use crate::Result;

/// Excludes paths matching a set of gitignore patterns.
#[derive(Debug)]
pub struct IgnoreFilter {
    gitignore: Option<Gitignore>,
}

impl IgnoreFilter {
    /// A filter that excludes nothing.
    #[must_use]
    pub const fn none() -> Self {
        Self { gitignore: None }
    }

    /// Create a filter with custom ignore patterns.
    ///
    /// Patterns are matched against paths anywhere on the file system, so a
    /// pattern like `target/` excludes every directory named `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if patterns are invalid.
    pub fn with_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self::none());
        }

        let mut builder = GitignoreBuilder::new(PathBuf::from("/"));
        for pattern in patterns {
            builder
                .add_line(None, pattern.as_ref())
                .map_err(|e| crate::Error::config(format!("invalid pattern: {e}")))?;
        }

        let gitignore = builder
            .build()
            .map_err(|e| crate::Error::config(format!("failed to build ignore set: {e}")))?;

        Ok(Self {
            gitignore: Some(gitignore),
        })
    }

    /// True if `typed_path` is excluded.
    #[must_use]
    pub fn is_ignored(&self, typed_path: &TypedPath) -> bool {
        self.gitignore.as_ref().is_some_and(|gi| {
            matched(gi, typed_path.path(), typed_path.is_directory())
        })
    }
}

fn matched(gi: &Gitignore, path: &Path, is_dir: bool) -> bool {
    if !path.starts_with(gi.path()) {
        return false;
    }
    gi.matched_path_or_any_parents(path, is_dir).is_ignore()
}
