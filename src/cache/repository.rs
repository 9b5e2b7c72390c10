//! A `FileTreeCache` kept live by a notify watcher.

use std::path::Path;
use std::sync::Arc;

use super::directory::{CachedDirectory, EntryFilter};
use super::entry::{CacheEntry, Converter};
use super::filter::IgnoreFilter;
use super::lister::WalkDirLister;
use super::observers::CacheObserver;
use super::path::{absolute, TypedPath};
use super::tree::{FileTreeCache, TreeOptions, WatcherFactory};
use crate::config::Config;
use crate::watcher::{EventCallback, NotifyWatcher, RawWatcher};
use crate::Result;

/// Live cache of the directories named in a `Config`.
pub struct FileTreeRepository<T: Clone + Send + Sync + 'static> {
    tree: Arc<FileTreeCache<T>>,
    watcher: NotifyWatcher,
}

impl<T: Clone + Send + Sync + 'static> FileTreeRepository<T> {
    /// Build a repository and register every directory in
    /// `config.watch_dirs` at `config.max_depth`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a watcher cannot be
    /// created, or an initial registration fails.
    pub fn new(config: &Config, converter: Arc<dyn Converter<T>>) -> Result<Self> {
        config.validate()?;
        let debounce = config.debounce();
        let options = TreeOptions {
            follow_links: config.follow_links,
            rescan_on_update: config.rescan_on_update,
            ignore: IgnoreFilter::with_patterns(config.ignore_patterns.as_slice())?,
            lister: Arc::new(WalkDirLister),
        };
        let symlink_watcher: Option<WatcherFactory> = if config.follow_links {
            Some(Box::new(move |callback: EventCallback| {
                let watcher = NotifyWatcher::new(debounce, callback)?;
                Ok(Box::new(watcher) as Box<dyn RawWatcher>)
            }))
        } else {
            None
        };

        let tree = FileTreeCache::new(converter, options, symlink_watcher)?;
        let weak = Arc::downgrade(&tree);
        let callback: EventCallback = Arc::new(move |event| {
            if let Some(tree) = weak.upgrade() {
                tree.handle_event(event);
            }
        });
        let watcher = NotifyWatcher::new(debounce, callback)?;

        let repository = Self { tree, watcher };
        for dir in &config.watch_dirs {
            repository.register(dir, config.max_depth)?;
        }
        tracing::info!(
            dirs = config.watch_dirs.len(),
            max_depth = config.max_depth,
            "File tree repository ready"
        );
        Ok(repository)
    }

    /// Register and watch `path`. See [`FileTreeCache::register`].
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be watched or scanned.
    pub fn register(
        &self,
        path: impl AsRef<Path>,
        max_depth: i32,
    ) -> Result<Option<Arc<CachedDirectory<T>>>> {
        self.tree.register(path.as_ref(), max_depth, &self.watcher)
    }

    /// Stop watching `path` and release what only it covered.
    pub fn unregister(&self, path: impl AsRef<Path>) {
        let path = absolute(path.as_ref());
        self.tree.unregister(&path);
        self.watcher.unregister(&path);
    }

    /// See [`FileTreeCache::list`].
    pub fn list(
        &self,
        path: impl AsRef<Path>,
        max_depth: i32,
        filter: &dyn Fn(&TypedPath) -> bool,
    ) -> Vec<TypedPath> {
        self.tree.list(path.as_ref(), max_depth, filter)
    }

    /// See [`FileTreeCache::list_entries`].
    pub fn list_entries(
        &self,
        path: impl AsRef<Path>,
        max_depth: i32,
        filter: &EntryFilter<'_, T>,
    ) -> Vec<CacheEntry<T>> {
        self.tree.list_entries(path.as_ref(), max_depth, filter)
    }

    /// Subscribe to cache transitions.
    pub fn add_observer(&self, observer: Arc<dyn CacheObserver<T>>) -> usize {
        self.tree.add_observer(observer)
    }

    /// Unsubscribe by handle.
    pub fn remove_observer(&self, handle: usize) -> bool {
        self.tree.remove_observer(handle)
    }

    /// The underlying cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<FileTreeCache<T>> {
        &self.tree
    }

    /// Stop watching and release the cache. Idempotent.
    pub fn close(&self) {
        self.watcher.close();
        self.tree.close();
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for FileTreeRepository<T> {
    fn drop(&mut self) {
        self.close();
    }
}
