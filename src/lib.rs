//! Treecache Library
//!
//! Live in-memory mirror of directory trees, reconciled from file system
//! events and published to observers as create/update/delete transitions.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod error;
pub mod observability;
pub mod watcher;

pub use cache::{
    CacheEntry, CacheEvent, CacheObserver, CachedDirectory, Converter, FileTreeCache,
    FileTreeRepository, TypedPath, UNBOUNDED_DEPTH,
};
pub use config::Config;
pub use error::{Error, Result};
