//! Forest of cached directory trees driven by raw watcher events.
//!
//! `FileTreeCache` owns one `CachedDirectory` per registered root that is not
//! already covered by another, maps every raw event onto the most specific
//! tree, and turns the resulting transitions into observer callbacks. All
//! root-level state sits behind one mutex that is only ever tried; under
//! contention an operation returns empty instead of waiting. Callbacks are
//! queued on a dedicated thread after that mutex is released.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::Mutex;

use super::diff::CacheUpdate;
use super::directory::{CachedDirectory, EntryFilter, ScanContext};
use super::dispatch::CallbackExecutor;
use super::entry::{CacheEntry, Converter};
use super::filter::IgnoreFilter;
use super::lister::{DirectoryLister, PathFilter, WalkDirLister};
use super::observers::{CacheEvent, CacheObserver, Observers};
use super::path::{absolute, distance, TypedPath};
use super::registry::DirectoryRegistry;
use super::UNBOUNDED_DEPTH;
use crate::error::{CacheError, WatcherError};
use crate::watcher::{Event, EventCallback, EventKind, RawWatcher, SymlinkWatcher};
use crate::Result;

/// Attempts made to scan a new root that keeps failing with access denied.
const MAX_SCAN_ATTEMPTS: usize = 3;

/// Builds the raw watcher used for symbolic link targets, given the callback
/// it must deliver events to.
pub type WatcherFactory = Box<dyn FnOnce(EventCallback) -> Result<Box<dyn RawWatcher>> + Send>;

/// Behavior switches for a `FileTreeCache`.
pub struct TreeOptions {
    /// Descend into symbolic links to directories.
    pub follow_links: bool,
    /// Rescan a directory on every event for it, not only on overflow.
    pub rescan_on_update: bool,
    /// Paths that are never cached.
    pub ignore: IgnoreFilter,
    /// Primitive used to read directories.
    pub lister: Arc<dyn DirectoryLister>,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            follow_links: true,
            rescan_on_update: false,
            ignore: IgnoreFilter::none(),
            lister: Arc::new(WalkDirLister),
        }
    }
}

struct TreeState<T> {
    directories: BTreeMap<PathBuf, Arc<CachedDirectory<T>>>,
    pending: BTreeSet<PathBuf>,
}

impl<T: Clone + Send + Sync + 'static> TreeState<T> {
    /// Most specific tree whose depth reaches `path`.
    fn find(&self, path: &Path) -> Option<Arc<CachedDirectory<T>>> {
        self.directories
            .iter()
            .rev()
            .find(|(root, dir)| {
                distance(root, path).is_some_and(|d| {
                    d == 0 || dir.max_depth() == UNBOUNDED_DEPTH || to_depth(d) - 1 <= dir.max_depth()
                })
            })
            .map(|(_, dir)| Arc::clone(dir))
    }

    /// A tree that already reaches `path` with at least `max_depth` levels
    /// to spare.
    fn covering(&self, path: &Path, max_depth: i32) -> Option<Arc<CachedDirectory<T>>> {
        self.directories
            .iter()
            .find(|(root, dir)| {
                distance(root, path).is_some_and(|d| {
                    dir.max_depth() == UNBOUNDED_DEPTH
                        || dir.max_depth().saturating_sub(to_depth(d)) >= max_depth
                })
            })
            .map(|(_, dir)| Arc::clone(dir))
    }
}

/// Transitions and link changes gathered while the tree lock is held.
struct Collected<T> {
    events: Vec<CacheEvent<T>>,
    symlinks: Vec<TypedPath>,
}

impl<T> Collected<T> {
    const fn new() -> Self {
        Self {
            events: Vec::new(),
            symlinks: Vec::new(),
        }
    }
}

/// Cache of every registered directory tree.
pub struct FileTreeCache<T> {
    registry: Arc<DirectoryRegistry>,
    context: Arc<ScanContext<T>>,
    executor: CallbackExecutor,
    observers: Arc<Observers<T>>,
    rescan_on_update: bool,
    follow_links: bool,
    closed: AtomicBool,
    state: Mutex<TreeState<T>>,
    /// Paths whose events arrived while `state` was busy.
    missed: Mutex<BTreeSet<PathBuf>>,
    symlinks: Option<SymlinkWatcher>,
}

impl<T: Clone + Send + Sync + 'static> FileTreeCache<T> {
    /// Create an empty cache.
    ///
    /// When `symlink_watcher` is given and links are followed, the targets of
    /// cached links are watched through it and their events are fed back into
    /// [`handle_event`](Self::handle_event).
    ///
    /// # Errors
    ///
    /// Returns an error if the callback thread or the symlink watcher cannot
    /// be started.
    pub fn new(
        converter: Arc<dyn Converter<T>>,
        options: TreeOptions,
        symlink_watcher: Option<WatcherFactory>,
    ) -> Result<Arc<Self>> {
        let registry = Arc::new(DirectoryRegistry::new());
        let filter_registry = Arc::clone(&registry);
        let ignore = options.ignore;
        let filter: Arc<PathFilter> = Arc::new(move |typed_path: &TypedPath| {
            filter_registry.accept(typed_path.path()) && !ignore.is_ignored(typed_path)
        });
        let context = Arc::new(ScanContext::new(
            converter,
            options.lister,
            filter,
            options.follow_links,
        ));
        let executor = CallbackExecutor::new("treecache-callbacks")?;
        let symlink_watcher = symlink_watcher.filter(|_| options.follow_links);

        let mut symlink_error = None;
        let tree = Arc::new_cyclic(|weak: &Weak<Self>| {
            let symlinks = symlink_watcher.and_then(|make| {
                let weak = weak.clone();
                let on_event: EventCallback = Arc::new(move |event| {
                    if let Some(tree) = weak.upgrade() {
                        tree.handle_event(event);
                    }
                });
                SymlinkWatcher::new(make, on_event)
                    .map_err(|e| symlink_error = Some(e))
                    .ok()
            });
            Self {
                registry,
                context,
                executor,
                observers: Arc::new(Observers::new()),
                rescan_on_update: options.rescan_on_update,
                follow_links: options.follow_links,
                closed: AtomicBool::new(false),
                state: Mutex::new(TreeState {
                    directories: BTreeMap::new(),
                    pending: BTreeSet::new(),
                }),
                missed: Mutex::new(BTreeSet::new()),
                symlinks,
            }
        });

        if let Some(e) = symlink_error {
            tree.close();
            return Err(e);
        }
        Ok(tree)
    }

    /// Register `path` with `max_depth` and start watching it with `watcher`.
    ///
    /// Returns the tree that now covers `path`: an existing tree if one
    /// already reaches it deeply enough, otherwise a fresh scan. A path that
    /// does not exist yet becomes pending and is returned as an unscanned
    /// leaf. Returns `None` if the path is already registered at the same or
    /// a greater depth and no tree covers it, or if the cache is busy.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is closed, the watcher refuses the path,
    /// or the scan fails for a reason other than absence.
    pub fn register(
        &self,
        path: &Path,
        max_depth: i32,
        watcher: &dyn RawWatcher,
    ) -> Result<Option<Arc<CachedDirectory<T>>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WatcherError::Closed.into());
        }
        let path = absolute(path);
        let max_depth = max_depth.max(-1);
        let Some(mut state) = self.state.try_lock() else {
            tracing::debug!(path = %path.display(), "Cache busy, registration skipped");
            return Ok(None);
        };

        if self.registry.depth_of(&path).is_some_and(|d| d >= max_depth) {
            return Ok(state.find(&path));
        }
        watcher.register(&path, max_depth)?;
        self.registry.add_directory(&path, max_depth);

        let dir = if let Some(existing) = state.covering(&path, max_depth) {
            if let Err(e) = existing.update(&TypedPath::stat(&path), false) {
                tracing::debug!(path = %path.display(), error = %e, "Refresh of covered path failed");
            }
            existing
        } else {
            self.cover(&mut state, &path, max_depth)?
        };

        self.cleanup_directories(&mut state, &path, max_depth);
        drop(state);
        self.follow_existing_links(&dir, &path);
        tracing::debug!(path = %path.display(), max_depth, "Registered directory");
        Ok(Some(dir))
    }

    /// Scan a new tree for `path`. A missing path becomes pending and is
    /// returned as an unscanned leaf.
    fn cover(
        &self,
        state: &mut TreeState<T>,
        path: &Path,
        max_depth: i32,
    ) -> Result<Arc<CachedDirectory<T>>> {
        match self.scan(path, max_depth) {
            Ok(dir) => {
                insert(state, path, Arc::clone(&dir));
                Ok(dir)
            }
            Err(e) if e.is_not_a_directory() => {
                let leaf = self.leaf(path);
                insert(state, path, Arc::clone(&leaf));
                Ok(leaf)
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(path = %path.display(), "Registered path is pending");
                state.pending.insert(path.to_path_buf());
                Ok(self.leaf(path))
            }
            Err(e) => Err(e),
        }
    }

    /// Hand every cached link at or below `path` to the symlink watcher.
    fn follow_existing_links(&self, dir: &CachedDirectory<T>, path: &Path) {
        let Some(symlinks) = &self.symlinks else {
            return;
        };
        let depth = self.registry.max_depth_for(path);
        for entry in dir.list(path, depth, &|entry| entry.typed_path().is_symlink()) {
            let link = entry.path();
            if let Err(e) = symlinks.add_symlink(link, self.registry.max_depth_for(link)) {
                tracing::debug!(path = %link.display(), error = %e, "Failed to follow link");
            }
        }
    }

    /// Drop the registration for `path`. Cached entries are released once no
    /// other registration covers the path.
    pub fn unregister(&self, path: &Path) {
        let path = absolute(path);
        let Some(mut state) = self.state.try_lock() else {
            tracing::debug!(path = %path.display(), "Cache busy, unregistration skipped");
            return;
        };
        self.registry.remove_directory(&path);
        state.pending.remove(&path);
        if !self.registry.accept(&path) {
            if let Some(dir) = state.find(&path) {
                if dir.path() == path {
                    state.directories.remove(&path);
                } else {
                    drop(dir.remove(&path));
                }
            }
        }
        self.restore_uncovered(&mut state, &path);
        tracing::debug!(path = %path.display(), "Unregistered directory");
    }

    /// Give a tree back to every registration below `removed` that lost the
    /// tree covering it.
    fn restore_uncovered(&self, state: &mut TreeState<T>, removed: &Path) {
        for (root, depth) in self.registry.registered() {
            if !root.starts_with(removed)
                || state.pending.contains(&root)
                || state.covering(&root, depth).is_some()
            {
                continue;
            }
            tracing::debug!(path = %root.display(), "Rescanning uncovered registration");
            if let Err(e) = self.cover(state, &root, depth) {
                tracing::warn!(path = %root.display(), error = %e, "Rescan failed, path is pending");
                state.pending.insert(root);
            }
        }
    }

    /// Apply one raw watcher event.
    pub fn handle_event(&self, event: Event) {
        tracing::debug!(path = %event.path().display(), kind = ?event.kind, "Received event");
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut collected = Collected::new();
        {
            let Some(mut state) = self.state.try_lock() else {
                tracing::debug!(path = %event.path().display(), "Cache busy, event deferred");
                self.missed.lock().insert(event.path().to_path_buf());
                return;
            };
            self.replay_missed(&mut state, &mut collected);
            self.apply(&mut state, event, &mut collected);
        }

        self.sync_symlinks(&mut collected);
        self.run_callbacks(collected.events);
    }

    /// Apply events deferred while the cache was busy, rescanning each path
    /// since intermediate changes may have been lost.
    fn replay_missed(&self, state: &mut TreeState<T>, collected: &mut Collected<T>) {
        let missed = std::mem::take(&mut *self.missed.lock());
        for path in missed {
            tracing::debug!(path = %path.display(), "Replaying deferred event");
            self.apply(state, Event::overflow(path), collected);
        }
    }

    fn apply(&self, state: &mut TreeState<T>, event: Event, collected: &mut Collected<T>) {
        let typed_path = event.typed_path;
        let path = typed_path.path().to_path_buf();

        if typed_path.exists() {
            if let Some(dir) = state.find(&path) {
                let rescan = self.rescan_on_update || event.kind == EventKind::Overflow;
                tracing::debug!(
                    path = %path.display(),
                    root = %dir.path().display(),
                    rescan,
                    "Updating cached path"
                );
                match dir.update(&typed_path, rescan) {
                    Ok(updates) => {
                        for update in updates {
                            self.collect(collected, update);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "Update failed, treating as deleted");
                        self.handle_delete(state, &path, collected);
                    }
                }
            } else if state.pending.remove(&path) {
                self.materialize(state, &path, collected);
            }
        } else {
            self.handle_delete(state, &path, collected);
        }
    }

    /// Scan a pending root that has just appeared and report all of it as
    /// created.
    fn materialize(&self, state: &mut TreeState<T>, path: &Path, collected: &mut Collected<T>) {
        tracing::debug!(path = %path.display(), "Found pending path");
        let depth = self.registry.max_depth_for(path);
        let dir = match self.scan(path, depth) {
            Ok(dir) => dir,
            Err(e) if e.is_not_a_directory() => self.leaf(path),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to scan pending path");
                state.pending.insert(path.to_path_buf());
                return;
            }
        };
        insert(state, path, Arc::clone(&dir));

        self.collect(collected, CacheUpdate::Create(dir.entry()));
        if dir.max_depth() >= 0 {
            for entry in dir.list(path, dir.max_depth(), &|_| true) {
                self.collect(collected, CacheUpdate::Create(entry));
            }
        }
    }

    /// Remove `path` from every tree rooted at or above it.
    fn handle_delete(&self, state: &mut TreeState<T>, path: &Path, collected: &mut Collected<T>) {
        let affected: Vec<(PathBuf, Arc<CachedDirectory<T>>)> = state
            .directories
            .iter()
            .filter(|(root, _)| path.starts_with(root))
            .map(|(root, dir)| (root.clone(), Arc::clone(dir)))
            .collect();

        for (root, dir) in affected {
            let is_root = root == path;
            let mut removed = if is_root && dir.max_depth() >= 0 {
                dir.list(&root, UNBOUNDED_DEPTH, &|_| true)
            } else {
                Vec::new()
            };
            removed.extend(dir.remove(path));
            if self.registry.is_registered(path) {
                state.pending.insert(path.to_path_buf());
            }
            if is_root {
                tracing::debug!(path = %path.display(), "Registered root deleted");
                state.directories.remove(&root);
                removed.push(dir.entry());
            }
            for entry in removed {
                self.collect(collected, CacheUpdate::Delete(entry.into_missing()));
            }
        }
    }

    /// Turn a transition into an observer callback. Entries whose value
    /// failed to convert are reported as errors instead.
    fn collect(&self, collected: &mut Collected<T>, update: CacheUpdate<T>) {
        let (entry, event) = match update {
            CacheUpdate::Create(new) => {
                let event = match new.value() {
                    Ok(_) => CacheEvent::Create(new.clone()),
                    Err(e) => CacheEvent::Error(e.clone()),
                };
                (new, event)
            }
            CacheUpdate::Update { old, new } => {
                let event = match new.value() {
                    Ok(_) => CacheEvent::Update {
                        old,
                        new: new.clone(),
                    },
                    Err(e) => CacheEvent::Error(e.clone()),
                };
                (new, event)
            }
            CacheUpdate::Delete(old) => (old.clone(), CacheEvent::Delete(old)),
        };
        if self.follow_links && entry.typed_path().is_symlink() {
            collected.symlinks.push(entry.typed_path().clone());
        }
        collected.events.push(event);
    }

    /// Follow new links and drop deleted ones.
    fn sync_symlinks(&self, collected: &mut Collected<T>) {
        let Some(symlinks) = &self.symlinks else {
            return;
        };
        for typed_path in collected.symlinks.drain(..) {
            let path = typed_path.path();
            if typed_path.exists() {
                let depth = self.registry.max_depth_for(path);
                if let Err(e) = symlinks.add_symlink(path, depth) {
                    tracing::debug!(path = %path.display(), error = %e, "Failed to follow link");
                    collected
                        .events
                        .push(CacheEvent::Error(e.into_cache_error(path)));
                }
            } else {
                symlinks.remove(path);
            }
        }
    }

    /// Queue callbacks on the executor, sorted by path.
    fn run_callbacks(&self, mut events: Vec<CacheEvent<T>>) {
        if events.is_empty()
            || self.observers.is_empty()
            || self.closed.load(Ordering::Acquire)
        {
            return;
        }
        events.sort_by(|a, b| a.path().cmp(b.path()));
        let observers = Arc::clone(&self.observers);
        let queued = self.executor.run(move || {
            for event in &events {
                tracing::debug!(path = %event.path().display(), "Running callback");
                if catch_unwind(AssertUnwindSafe(|| observers.notify(event))).is_err() {
                    tracing::error!(path = %event.path().display(), "Observer panicked");
                }
            }
        });
        if let Err(e) = queued {
            tracing::debug!(error = %e, "Callbacks dropped");
        }
    }

    /// Drop trees below `path` that the registration of `path` now covers.
    fn cleanup_directories(&self, state: &mut TreeState<T>, path: &Path, max_depth: i32) {
        let redundant: Vec<PathBuf> = state
            .directories
            .iter()
            .filter(|(root, dir)| {
                root.as_path() != path
                    && distance(path, root).is_some_and(|d| {
                        max_depth == UNBOUNDED_DEPTH
                            || max_depth.saturating_sub(to_depth(d)) >= dir.max_depth()
                    })
            })
            .map(|(root, _)| root.clone())
            .collect();
        for root in redundant {
            tracing::debug!(path = %root.display(), covered_by = %path.display(), "Pruning subsumed tree");
            state.directories.remove(&root);
        }
    }

    /// Scan a new tree, retrying while access is denied.
    fn scan(&self, path: &Path, max_depth: i32) -> Result<Arc<CachedDirectory<T>>> {
        for attempt in 1..=MAX_SCAN_ATTEMPTS {
            let dir = CachedDirectory::new(TypedPath::stat(path), max_depth, Arc::clone(&self.context));
            match dir.init() {
                Ok(()) => return Ok(Arc::new(dir)),
                Err(e) if e.is_access_denied() => {
                    tracing::debug!(path = %path.display(), attempt, "Access denied, retrying scan");
                    thread::yield_now();
                }
                Err(e) => return Err(e),
            }
        }
        Err(CacheError::NotFound {
            path: path.display().to_string(),
        }
        .into())
    }

    fn leaf(&self, path: &Path) -> Arc<CachedDirectory<T>> {
        Arc::new(CachedDirectory::new(
            TypedPath::stat(path),
            -1,
            Arc::clone(&self.context),
        ))
    }

    /// Cached entries at or below `path`, at most `max_depth` levels down and
    /// never deeper than the registrations covering `path` allow.
    pub fn list_entries(
        &self,
        path: &Path,
        max_depth: i32,
        filter: &EntryFilter<'_, T>,
    ) -> Vec<CacheEntry<T>> {
        let path = absolute(path);
        let mut collected = Collected::new();
        let entries = {
            let Some(mut state) = self.state.try_lock() else {
                return Vec::new();
            };
            self.replay_missed(&mut state, &mut collected);
            self.list_locked(&state, &path, max_depth, filter)
        };
        self.sync_symlinks(&mut collected);
        self.run_callbacks(collected.events);
        entries
    }

    fn list_locked(
        &self,
        state: &TreeState<T>,
        path: &Path,
        max_depth: i32,
        filter: &EntryFilter<'_, T>,
    ) -> Vec<CacheEntry<T>> {
        let Some(dir) = state.find(path) else {
            return Vec::new();
        };
        if dir.path() == path && dir.max_depth() < 0 {
            let entry = dir.entry();
            return if filter(&entry) { vec![entry] } else { Vec::new() };
        }
        let depth = self.registry.max_depth_for(path).min(max_depth);
        dir.list(path, depth, filter)
    }

    /// Like [`list_entries`](Self::list_entries), returning typed paths.
    pub fn list(
        &self,
        path: &Path,
        max_depth: i32,
        filter: &dyn Fn(&TypedPath) -> bool,
    ) -> Vec<TypedPath> {
        self.list_entries(path, max_depth, &|entry| filter(entry.typed_path()))
            .into_iter()
            .map(|entry| entry.typed_path().clone())
            .collect()
    }

    /// Subscribe to cache transitions. Returns a handle for
    /// [`remove_observer`](Self::remove_observer).
    pub fn add_observer(&self, observer: Arc<dyn CacheObserver<T>>) -> usize {
        self.observers.add(observer)
    }

    /// Unsubscribe. Returns false if the handle was unknown.
    pub fn remove_observer(&self, handle: usize) -> bool {
        self.observers.remove(handle)
    }

    /// Roots that currently own a tree.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.state
            .try_lock()
            .map(|state| state.directories.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Registered paths still waiting to appear.
    pub fn pending(&self) -> Vec<PathBuf> {
        self.state
            .try_lock()
            .map(|state| state.pending.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// True once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release every resource. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.executor.close();
        if let Some(symlinks) = &self.symlinks {
            symlinks.close();
        }
        let mut state = self.state.lock();
        for dir in state.directories.values() {
            dir.close();
        }
        state.directories.clear();
        state.pending.clear();
        drop(state);
        self.missed.lock().clear();
        self.observers.clear();
        self.registry.clear();
        tracing::debug!("Cache closed");
    }
}

fn insert<T: Clone + Send + Sync + 'static>(
    state: &mut TreeState<T>,
    path: &Path,
    dir: Arc<CachedDirectory<T>>,
) {
    if let Some(previous) = state.directories.insert(path.to_path_buf(), dir) {
        previous.close();
    }
}

fn to_depth(distance: usize) -> i32 {
    i32::try_from(distance).unwrap_or(i32::MAX)
}
