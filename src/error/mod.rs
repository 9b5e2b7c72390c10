//! Error types and Result aliases for treecache.
//!
//! This module defines the error hierarchy used throughout the crate.
//! All public functions return `Result<T, Error>` or `Result<T>`.

use std::io;
use std::path::Path;

use thiserror::Error;

/// Result type alias using treecache's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for treecache operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Directory cache error.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// File watching error.
    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors raised while scanning directories or converting entries.
///
/// Payloads are plain strings so the error can be cloned into cache entries
/// and fanned out to every observer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Path does not exist.
    #[error("no such file or directory: '{path}'")]
    NotFound { path: String },

    /// Path exists but is not a directory.
    #[error("not a directory: '{path}'")]
    NotADirectory { path: String },

    /// Access to the path was denied, possibly transiently.
    #[error("access denied: '{path}'")]
    AccessDenied { path: String },

    /// Any other failure while listing a directory.
    #[error("failed to scan '{path}': {reason}")]
    ScanFailed { path: String, reason: String },

    /// The user converter failed for a path.
    #[error("failed to convert '{path}': {reason}")]
    ConvertFailed { path: String, reason: String },
}

/// File watcher errors.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Failed to watch path.
    #[error("failed to watch path '{path}': {reason}")]
    WatchFailed { path: String, reason: String },

    /// The watcher has already been closed.
    #[error("watcher is closed")]
    Closed,
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True if the error means the path does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Cache(CacheError::NotFound { .. }) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// True if the error means the path is not a directory.
    #[must_use]
    pub const fn is_not_a_directory(&self) -> bool {
        matches!(self, Self::Cache(CacheError::NotADirectory { .. }))
    }

    /// True if the error is an access-denied failure.
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        match self {
            Self::Cache(CacheError::AccessDenied { .. }) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }

    /// Reduce this error to a `CacheError` about `path`, for delivery to
    /// observers.
    #[must_use]
    pub fn into_cache_error(self, path: &Path) -> CacheError {
        match self {
            Self::Cache(err) => err,
            Self::Io(e) => CacheError::from_io(path, &e),
            other => CacheError::ScanFailed {
                path: path.display().to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl CacheError {
    /// Classify an I/O error raised while touching `path`.
    #[must_use]
    pub fn from_io(path: &Path, err: &io::Error) -> Self {
        let path = path.display().to_string();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::PermissionDenied => Self::AccessDenied { path },
            _ => Self::ScanFailed {
                path,
                reason: err.to_string(),
            },
        }
    }

    /// Create a converter error.
    pub fn convert_failed(path: &Path, reason: impl Into<String>) -> Self {
        Self::ConvertFailed {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}
