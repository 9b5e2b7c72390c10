//! Raw file system watcher using notify-rs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use parking_lot::Mutex;

use super::events::{Event, EventBatch};
use crate::error::WatcherError;
use crate::Result;

/// Debounce duration for file events.
pub const DEBOUNCE_DURATION: Duration = Duration::from_millis(100);

/// Receives raw events from a watcher. Called on the watcher's own thread.
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// A source of raw file system events.
pub trait RawWatcher: Send + Sync {
    /// Start watching `path` down to `max_depth`.
    ///
    /// Returns false if `path` was already watched at the same or a greater
    /// depth. A path that does not exist yet is watched once it appears.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying watch cannot be installed.
    fn register(&self, path: &Path, max_depth: i32) -> Result<bool>;

    /// Stop watching `path`.
    fn unregister(&self, path: &Path);

    /// Release every watch. Later registrations fail.
    fn close(&self);
}

/// Bookkeeping shared between the watcher and its event thread.
#[derive(Debug, Default)]
struct WatchState {
    /// Registered roots and their depths.
    roots: BTreeMap<PathBuf, i32>,
    /// Paths currently handed to notify.
    watches: BTreeMap<PathBuf, RecursiveMode>,
    /// Registered roots that do not exist yet, keyed to the ancestor watched
    /// in their place.
    pending: BTreeMap<PathBuf, PathBuf>,
    closed: bool,
}

impl WatchState {
    /// True if some recursive watch other than `path` itself covers it.
    fn covered(&self, path: &Path) -> bool {
        self.watches.iter().any(|(watched, mode)| {
            watched != path && *mode == RecursiveMode::Recursive && path.starts_with(watched)
        })
    }

    fn is_anchor(&self, path: &Path) -> bool {
        self.pending.values().any(|anchor| anchor == path)
    }
}

struct Shared {
    state: Mutex<WatchState>,
    debouncer: Mutex<Option<Debouncer<RecommendedWatcher>>>,
}

impl Shared {
    fn watch(&self, state: &mut WatchState, path: &Path, mode: RecursiveMode) -> Result<()> {
        if state.watches.get(path) == Some(&mode) || state.covered(path) {
            return Ok(());
        }
        let mut guard = self.debouncer.lock();
        let debouncer = guard.as_mut().ok_or(WatcherError::Closed)?;
        if state.watches.contains_key(path) {
            let _ = debouncer.watcher().unwatch(path);
        }
        debouncer
            .watcher()
            .watch(path, mode)
            .map_err(|e| WatcherError::WatchFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        state.watches.insert(path.to_path_buf(), mode);
        tracing::debug!(path = %path.display(), ?mode, "Installed watch");
        Ok(())
    }

    fn unwatch(&self, state: &mut WatchState, path: &Path) {
        if state.watches.remove(path).is_none() {
            return;
        }
        if let Some(debouncer) = self.debouncer.lock().as_mut() {
            if let Err(e) = debouncer.watcher().unwatch(path) {
                tracing::debug!(path = %path.display(), error = %e, "Unwatch failed");
            }
        }
    }

    /// Watch a registered root, or the nearest existing ancestor if the root
    /// is missing.
    fn install(&self, state: &mut WatchState, root: &Path, max_depth: i32) -> Result<()> {
        if root.exists() {
            state.pending.remove(root);
            return self.watch(state, root, mode_for(root, max_depth));
        }
        let Some(anchor) = nearest_existing_ancestor(root) else {
            return Err(WatcherError::WatchFailed {
                path: root.display().to_string(),
                reason: "no existing ancestor".to_string(),
            }
            .into());
        };
        self.watch(state, &anchor, RecursiveMode::NonRecursive)?;
        tracing::debug!(
            path = %root.display(),
            anchor = %anchor.display(),
            "Root is missing, watching ancestor"
        );
        state.pending.insert(root.to_path_buf(), anchor);
        Ok(())
    }

    /// Drop an ancestor watch that no longer serves a root or pending path.
    fn release_anchor(&self, state: &mut WatchState, anchor: &Path) {
        if !state.is_anchor(anchor) && !state.roots.contains_key(anchor) {
            self.unwatch(state, anchor);
        }
    }

    /// Move pending roots whose ancestry changed. Returns the roots that now
    /// exist.
    fn resolve_pending(&self, state: &mut WatchState) -> Vec<PathBuf> {
        let pending: Vec<(PathBuf, PathBuf)> = state
            .pending
            .iter()
            .map(|(root, anchor)| (root.clone(), anchor.clone()))
            .collect();

        let mut appeared = Vec::new();
        for (root, anchor) in pending {
            let nearest = nearest_existing_ancestor(&root);
            if !root.exists() && nearest.as_ref() == Some(&anchor) {
                continue;
            }
            let depth = state.roots.get(&root).copied().unwrap_or(0);
            state.pending.remove(&root);
            if let Err(e) = self.install(state, &root, depth) {
                tracing::warn!(path = %root.display(), error = %e, "Failed to watch pending root");
                state.pending.insert(root.clone(), anchor.clone());
                continue;
            }
            self.release_anchor(state, &anchor);
            if root.exists() {
                tracing::debug!(path = %root.display(), "Pending root appeared");
                appeared.push(root);
            }
        }
        appeared
    }

    /// Re-watch roots that were only covered by `removed`.
    fn rewatch_uncovered(&self, state: &mut WatchState, removed: &Path) {
        let nested: Vec<(PathBuf, i32)> = state
            .roots
            .iter()
            .filter(|(root, _)| root.starts_with(removed) && !state.pending.contains_key(*root))
            .map(|(root, depth)| (root.clone(), *depth))
            .collect();
        for (root, depth) in nested {
            if let Err(e) = self.install(state, &root, depth) {
                tracing::warn!(path = %root.display(), error = %e, "Failed to re-watch root");
            }
        }
    }
}

/// `RawWatcher` backed by the platform's recommended notify watcher, with
/// events coalesced by `notify-debouncer-mini`.
///
/// Each debounced path is reported as `Modify` if it exists and `Delete`
/// otherwise. A notify error means events may have been lost and is reported
/// as an `Overflow` for every registered root.
pub struct NotifyWatcher {
    shared: Arc<Shared>,
}

impl NotifyWatcher {
    /// Create a watcher delivering events to `callback`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watcher cannot be created.
    pub fn new(debounce: Duration, callback: EventCallback) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(WatchState::default()),
            debouncer: Mutex::new(None),
        });
        let handler_shared = Arc::clone(&shared);

        let debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            handle_debounced(&handler_shared, &callback, result);
        })
        .map_err(|e| WatcherError::WatchFailed {
            path: "init".to_string(),
            reason: e.to_string(),
        })?;
        *shared.debouncer.lock() = Some(debouncer);

        Ok(Self { shared })
    }

    /// Registered roots and their depths.
    #[must_use]
    pub fn registered(&self) -> Vec<(PathBuf, i32)> {
        self.shared
            .state
            .lock()
            .roots
            .iter()
            .map(|(p, d)| (p.clone(), *d))
            .collect()
    }

    /// Registered roots that do not exist yet.
    #[must_use]
    pub fn pending(&self) -> Vec<PathBuf> {
        self.shared.state.lock().pending.keys().cloned().collect()
    }
}

impl RawWatcher for NotifyWatcher {
    fn register(&self, path: &Path, max_depth: i32) -> Result<bool> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(WatcherError::Closed.into());
        }
        if state.roots.get(path).is_some_and(|&d| d >= max_depth) {
            return Ok(false);
        }
        self.shared.install(&mut state, path, max_depth)?;
        state.roots.insert(path.to_path_buf(), max_depth);
        tracing::info!(path = %path.display(), max_depth, "Watching directory");
        Ok(true)
    }

    fn unregister(&self, path: &Path) {
        let mut state = self.shared.state.lock();
        if state.roots.remove(path).is_none() {
            return;
        }
        if let Some(anchor) = state.pending.remove(path) {
            self.shared.release_anchor(&mut state, &anchor);
        } else if !state.is_anchor(path) {
            self.shared.unwatch(&mut state, path);
            self.shared.rewatch_uncovered(&mut state, path);
        }
        tracing::info!(path = %path.display(), "Stopped watching directory");
    }

    fn close(&self) {
        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.roots.clear();
        state.watches.clear();
        state.pending.clear();
        drop(state);

        let debouncer = self.shared.debouncer.lock().take();
        drop(debouncer);
        tracing::debug!("Watcher closed");
    }
}

impl Drop for NotifyWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn handle_debounced(shared: &Shared, callback: &EventCallback, result: DebounceEventResult) {
    let events = {
        let mut state = shared.state.lock();
        if state.closed {
            return;
        }
        match result {
            Ok(debounced) => {
                let mut batch = EventBatch::new();
                for event in debounced {
                    batch.add(Event::observed(event.path));
                }
                for root in shared.resolve_pending(&mut state) {
                    batch.add(Event::observed(root));
                }

                let roots: Vec<PathBuf> = state.roots.keys().cloned().collect();
                batch.retain(|p| is_under_watched(&roots, p));
                batch.into_iter().collect::<Vec<_>>()
            }
            Err(e) => {
                tracing::error!(error = ?e, "Watch error, rescanning all roots");
                state.roots.keys().cloned().map(Event::overflow).collect()
            }
        }
    };

    for event in events {
        callback(event);
    }
}

fn mode_for(path: &Path, max_depth: i32) -> RecursiveMode {
    if max_depth > 0 && path.is_dir() {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    }
}

fn nearest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .skip(1)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

/// Check if a path is under any watched directory.
fn is_under_watched(watched: &[PathBuf], path: &Path) -> bool {
    watched.iter().any(|dir| path.starts_with(dir))
}
