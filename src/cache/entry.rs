//! Cache entries and the converters that produce their values.

use std::fs;
use std::io::Read;
use std::path::Path;

use blake3::Hasher;

use super::path::TypedPath;
use crate::error::CacheError;
use crate::Result;

/// Produces the cached value for a path.
///
/// Implemented for any `Fn(&TypedPath) -> Result<T>` closure.
pub trait Converter<T>: Send + Sync {
    /// Convert a typed path into a cached value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be computed. The failure is
    /// stored in the entry and reported to observers.
    fn convert(&self, typed_path: &TypedPath) -> Result<T>;
}

impl<T, F> Converter<T> for F
where
    F: Fn(&TypedPath) -> Result<T> + Send + Sync,
{
    fn convert(&self, typed_path: &TypedPath) -> Result<T> {
        self(typed_path)
    }
}

/// A cached path plus its converted value.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    typed_path: TypedPath,
    value: std::result::Result<T, CacheError>,
    exists: bool,
}

impl<T> CacheEntry<T> {
    /// Run `converter` on `typed_path` and capture the outcome.
    pub fn new(typed_path: TypedPath, converter: &dyn Converter<T>) -> Self {
        let value = converter.convert(&typed_path).map_err(|e| match e {
            crate::Error::Cache(err) => err,
            other => CacheError::convert_failed(typed_path.path(), other.to_string()),
        });
        let exists = typed_path.exists();
        Self {
            typed_path,
            value,
            exists,
        }
    }

    /// Build an entry from an already-computed value.
    pub fn from_value(typed_path: TypedPath, value: T) -> Self {
        let exists = typed_path.exists();
        Self {
            typed_path,
            value: Ok(value),
            exists,
        }
    }

    /// The typed path of this entry.
    #[must_use]
    pub const fn typed_path(&self) -> &TypedPath {
        &self.typed_path
    }

    /// Shortcut for `typed_path().path()`.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.typed_path.path()
    }

    /// The converted value, or the converter's failure.
    ///
    /// # Errors
    ///
    /// Returns the error raised by the converter for this path.
    pub const fn value(&self) -> std::result::Result<&T, &CacheError> {
        self.value.as_ref()
    }

    /// Whether the entry describes a path that still exists.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.exists
    }

    /// Same entry with the existence flag cleared.
    #[must_use]
    pub fn into_missing(mut self) -> Self {
        self.exists = false;
        self.typed_path = self.typed_path.as_missing();
        self
    }
}

/// Converter that caches nothing beyond the path itself.
pub fn unit(_: &TypedPath) -> Result<()> {
    Ok(())
}

/// Converter that caches a file's length in bytes (0 for directories).
///
/// # Errors
///
/// Returns an error if the file metadata cannot be read.
pub fn file_size(typed_path: &TypedPath) -> Result<u64> {
    if typed_path.is_directory() {
        return Ok(0);
    }
    let meta = fs::metadata(typed_path.path())
        .map_err(|e| CacheError::from_io(typed_path.path(), &e))?;
    Ok(meta.len())
}

/// Converter that caches the blake3 hash of a file's content as hex.
/// Directories hash to an empty string.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn content_hash(typed_path: &TypedPath) -> Result<String> {
    if typed_path.is_directory() {
        return Ok(String::new());
    }
    let mut file = fs::File::open(typed_path.path())
        .map_err(|e| CacheError::from_io(typed_path.path(), &e))?;
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| CacheError::from_io(typed_path.path(), &e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
