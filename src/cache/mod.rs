//! In-memory directory tree cache.
//!
//! This module provides:
//! - `CachedDirectory`, a depth-bounded mirror of one directory tree
//! - Snapshot reconciliation into create/update/delete transitions
//! - `FileTreeCache`, which owns a forest of trees and applies raw watcher
//!   events to them
//! - `FileTreeRepository`, the cache wired to a live notify watcher

mod diff;
mod directory;
mod dispatch;
mod entry;
mod filter;
mod lister;
mod observers;
mod path;
mod registry;
mod repository;
mod tree;

pub use diff::{diff_entries, CacheUpdate, CacheUpdates};
pub use directory::{CachedDirectory, EntryFilter, ScanContext};
pub use dispatch::CallbackExecutor;
pub use entry::{content_hash, file_size, unit, CacheEntry, Converter};
pub use filter::IgnoreFilter;
pub use lister::{DirectoryLister, PathFilter, WalkDirLister};
pub use observers::{CacheEvent, CacheObserver, Observers};
pub use path::{absolute, distance, is_loop, relative_parts, FileKind, TypedPath};
pub use registry::DirectoryRegistry;
pub use repository::FileTreeRepository;
pub use tree::{FileTreeCache, TreeOptions, WatcherFactory};

/// Depth value meaning "no limit".
pub const UNBOUNDED_DEPTH: i32 = i32::MAX;
