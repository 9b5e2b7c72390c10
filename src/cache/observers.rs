//! Observer registry for cache transitions.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use super::entry::CacheEntry;
use crate::error::CacheError;

/// Receives cache transitions. Every method defaults to a no-op.
pub trait CacheObserver<T>: Send + Sync {
    /// A path entered the cache.
    fn on_create(&self, _new: &CacheEntry<T>) {}

    /// A cached path was refreshed.
    fn on_update(&self, _old: &CacheEntry<T>, _new: &CacheEntry<T>) {}

    /// A path left the cache.
    fn on_delete(&self, _old: &CacheEntry<T>) {}

    /// Converting or scanning a path failed.
    fn on_error(&self, _error: &CacheError) {}
}

/// One observer callback, as a value.
#[derive(Debug, Clone)]
pub enum CacheEvent<T> {
    /// See [`CacheObserver::on_create`].
    Create(CacheEntry<T>),
    /// See [`CacheObserver::on_update`].
    Update {
        old: CacheEntry<T>,
        new: CacheEntry<T>,
    },
    /// See [`CacheObserver::on_delete`].
    Delete(CacheEntry<T>),
    /// See [`CacheObserver::on_error`].
    Error(CacheError),
}

impl<T> CacheEvent<T> {
    /// Path the event refers to. Errors have no path and sort first.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Create(e) | Self::Delete(e) | Self::Update { new: e, .. } => e.path(),
            Self::Error(_) => Path::new(""),
        }
    }

    /// Deliver this event to `observer`.
    pub fn dispatch(&self, observer: &dyn CacheObserver<T>) {
        match self {
            Self::Create(new) => observer.on_create(new),
            Self::Update { old, new } => observer.on_update(old, new),
            Self::Delete(old) => observer.on_delete(old),
            Self::Error(err) => observer.on_error(err),
        }
    }
}

/// A channel sender observes by forwarding every event.
impl<T: Clone + Send> CacheObserver<T> for Sender<CacheEvent<T>> {
    fn on_create(&self, new: &CacheEntry<T>) {
        let _ = self.send(CacheEvent::Create(new.clone()));
    }

    fn on_update(&self, old: &CacheEntry<T>, new: &CacheEntry<T>) {
        let _ = self.send(CacheEvent::Update {
            old: old.clone(),
            new: new.clone(),
        });
    }

    fn on_delete(&self, old: &CacheEntry<T>) {
        let _ = self.send(CacheEvent::Delete(old.clone()));
    }

    fn on_error(&self, error: &CacheError) {
        let _ = self.send(CacheEvent::Error(error.clone()));
    }
}

/// Handle-addressed set of observers.
pub struct Observers<T> {
    next_handle: AtomicUsize,
    observers: Mutex<BTreeMap<usize, Arc<dyn CacheObserver<T>>>>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            next_handle: AtomicUsize::new(0),
            observers: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<T> Observers<T> {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer, returning its handle.
    pub fn add(&self, observer: Arc<dyn CacheObserver<T>>) -> usize {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().insert(handle, observer);
        handle
    }

    /// Remove the observer with `handle`. Returns false if it was unknown.
    pub fn remove(&self, handle: usize) -> bool {
        self.observers.lock().remove(&handle).is_some()
    }

    /// True if nobody is observing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.lock().is_empty()
    }

    /// Deliver `event` to every observer in handle order.
    pub fn notify(&self, event: &CacheEvent<T>) {
        // Snapshot so observers may add or remove observers re-entrantly.
        let observers: Vec<_> = self.observers.lock().values().cloned().collect();
        for observer in observers {
            event.dispatch(observer.as_ref());
        }
    }

    /// Drop every observer.
    pub fn clear(&self) {
        self.observers.lock().clear();
    }
}
