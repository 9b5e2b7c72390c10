//! Directory listing primitive used for scans.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use super::path::{FileKind, TypedPath};
use crate::error::CacheError;
use crate::Result;

/// Predicate over typed paths. Rejected paths are skipped by scans.
pub type PathFilter = dyn Fn(&TypedPath) -> bool + Send + Sync;

/// Lists typed directory entries from disk.
pub trait DirectoryLister: Send + Sync {
    /// List the children of `path` down to `depth` levels below it
    /// (`0` lists only the immediate children).
    ///
    /// # Errors
    ///
    /// Returns `CacheError::NotFound`, `CacheError::NotADirectory`,
    /// `CacheError::AccessDenied`, or `CacheError::ScanFailed`.
    fn list(&self, path: &Path, depth: usize, filter: &PathFilter) -> Result<Vec<TypedPath>>;
}

/// `DirectoryLister` backed by `walkdir`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkDirLister;

impl DirectoryLister for WalkDirLister {
    fn list(&self, path: &Path, depth: usize, filter: &PathFilter) -> Result<Vec<TypedPath>> {
        let meta = fs::metadata(path).map_err(|e| CacheError::from_io(path, &e))?;
        if !meta.is_dir() {
            return Err(CacheError::NotADirectory {
                path: path.display().to_string(),
            }
            .into());
        }

        let mut result = Vec::new();
        let walker = WalkDir::new(path)
            .min_depth(1)
            .max_depth(depth.saturating_add(1))
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker {
            match entry {
                Ok(entry) => {
                    let file_type = entry.file_type();
                    let typed = if file_type.is_symlink() {
                        let target_is_dir = fs::metadata(entry.path()).is_ok_and(|m| m.is_dir());
                        TypedPath::new(entry.path(), FileKind::SymbolicLink, target_is_dir)
                    } else if file_type.is_dir() {
                        TypedPath::new(entry.path(), FileKind::Directory, true)
                    } else {
                        TypedPath::new(entry.path(), FileKind::File, false)
                    };
                    if filter(&typed) {
                        result.push(typed);
                    }
                }
                Err(e) if e.depth() == 0 => {
                    let io = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walk failed"));
                    return Err(CacheError::from_io(path, &io).into());
                }
                Err(e) => {
                    // Children that vanish mid-walk are simply absent.
                    tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                }
            }
        }

        Ok(result)
    }
}
