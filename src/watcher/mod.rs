//! Raw file system event sources.
//!
//! This module provides:
//! - The `RawWatcher` contract the cache consumes
//! - A notify-rs backed implementation with debouncing
//! - A sub-watcher that follows symbolic link targets

mod events;
mod symlink;
#[allow(clippy::module_inception)]
mod watcher;

pub use events::{Event, EventBatch, EventKind};
pub use symlink::SymlinkWatcher;
pub use watcher::{EventCallback, NotifyWatcher, RawWatcher, DEBOUNCE_DURATION};
