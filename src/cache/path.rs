//! Typed path snapshots.

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Kind of a file system object, as seen without following links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    SymbolicLink,
    /// Unknown or nonexistent.
    Unknown,
}

/// Immutable snapshot of a path's type and existence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypedPath {
    path: PathBuf,
    kind: FileKind,
    /// For links: whether the link target is a directory.
    target_is_dir: bool,
    exists: bool,
}

impl TypedPath {
    /// Build a snapshot from known attributes.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: FileKind, target_is_dir: bool) -> Self {
        Self {
            path: path.into(),
            exists: kind != FileKind::Unknown,
            kind,
            target_is_dir: kind == FileKind::Directory || target_is_dir,
        }
    }

    /// Snapshot of a path that does not exist.
    #[must_use]
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Unknown,
            target_is_dir: false,
            exists: false,
        }
    }

    /// Stat `path` without following a trailing link, then resolve the link
    /// target type if it is one.
    #[must_use]
    pub fn stat(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match fs::symlink_metadata(&path) {
            Ok(meta) => {
                let file_type = meta.file_type();
                if file_type.is_symlink() {
                    let target_is_dir = fs::metadata(&path).is_ok_and(|m| m.is_dir());
                    Self::new(path, FileKind::SymbolicLink, target_is_dir)
                } else if file_type.is_dir() {
                    Self::new(path, FileKind::Directory, true)
                } else {
                    Self::new(path, FileKind::File, false)
                }
            }
            Err(_) => Self::missing(path),
        }
    }

    /// The same attributes at a different path.
    #[must_use]
    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    /// Copy of this snapshot with the existence flag cleared.
    #[must_use]
    pub fn as_missing(&self) -> Self {
        Self {
            exists: false,
            ..self.clone()
        }
    }

    /// The absolute path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The link-level kind.
    #[must_use]
    pub const fn kind(&self) -> FileKind {
        self.kind
    }

    /// Whether the path existed when the snapshot was taken.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.exists
    }

    /// True for directories and for links that point at directories.
    #[must_use]
    pub const fn is_directory(&self) -> bool {
        self.exists && self.target_is_dir
    }

    /// True for regular files and for links to non-directories.
    #[must_use]
    pub const fn is_file(&self) -> bool {
        self.exists && !self.target_is_dir
    }

    /// True if the path itself is a symbolic link.
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::SymbolicLink
    }

    /// Fully resolved path, or the path itself if it cannot be resolved.
    #[must_use]
    pub fn expanded(&self) -> PathBuf {
        if self.is_symlink() {
            fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone())
        } else {
            self.path.clone()
        }
    }
}

/// True if following `path` (which resolves to `real`) would re-enter one of
/// its own ancestors.
#[must_use]
pub fn is_loop(path: &Path, real: &Path) -> bool {
    path.starts_with(real) && path != real
}

/// Name components of `path` below `root`. Empty when `path == root`, `None`
/// when `path` is not under `root`.
#[must_use]
pub fn relative_parts(root: &Path, path: &Path) -> Option<Vec<OsString>> {
    let rel = path.strip_prefix(root).ok()?;
    Some(
        rel.components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_os_string()),
                _ => None,
            })
            .collect(),
    )
}

/// Number of name components between `root` and `path`.
#[must_use]
pub fn distance(root: &Path, path: &Path) -> Option<usize> {
    relative_parts(root, path).map(|parts| parts.len())
}

/// Make `path` absolute against the current working directory.
#[must_use]
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
