//! Recursive in-memory cache of a single directory tree.
//!
//! A `CachedDirectory` owns its subdirectories by value. Every node guards
//! its own children with a mutex that is only ever *tried*: if a node is busy
//! the operation degrades to an empty result instead of blocking. Absolute
//! paths are carried in each node's own entry, so no node needs a reference
//! to its parent.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::diff::{diff_entries, CacheUpdates};
use super::entry::{CacheEntry, Converter};
use super::lister::{DirectoryLister, PathFilter};
use super::path::{is_loop, relative_parts, TypedPath};
use super::UNBOUNDED_DEPTH;
use crate::Result;

/// Predicate over cache entries used by listings.
pub type EntryFilter<'a, T> = dyn Fn(&CacheEntry<T>) -> bool + 'a;

/// Collaborators shared by every node of a tree.
pub struct ScanContext<T> {
    converter: Arc<dyn Converter<T>>,
    lister: Arc<dyn DirectoryLister>,
    filter: Arc<PathFilter>,
    follow_links: bool,
}

impl<T> ScanContext<T> {
    /// Create a scan context.
    pub fn new(
        converter: Arc<dyn Converter<T>>,
        lister: Arc<dyn DirectoryLister>,
        filter: Arc<PathFilter>,
        follow_links: bool,
    ) -> Self {
        Self {
            converter,
            lister,
            filter,
            follow_links,
        }
    }

    /// Whether symbolic links to directories are descended into.
    #[must_use]
    pub const fn follow_links(&self) -> bool {
        self.follow_links
    }

    fn entry(&self, typed_path: TypedPath) -> CacheEntry<T> {
        CacheEntry::new(typed_path, self.converter.as_ref())
    }

    fn accepts(&self, typed_path: &TypedPath) -> bool {
        (self.filter)(typed_path)
    }
}

struct Children<T> {
    subdirectories: BTreeMap<OsString, CachedDirectory<T>>,
    files: BTreeMap<OsString, CacheEntry<T>>,
}

impl<T> Default for Children<T> {
    fn default() -> Self {
        Self {
            subdirectories: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }
}

impl<T> Children<T> {
    fn clear(&mut self) {
        self.subdirectories.clear();
        self.files.clear();
    }
}

/// Mutable cache of the files and subdirectories below one directory.
///
/// `max_depth` bounds the scan: `-1` caches only the node's own entry, `0`
/// caches the immediate children without descending, and `N > 0` recurses
/// with `N - 1` (`UNBOUNDED_DEPTH` never decreases). A symbolic link that
/// points back at one of its ancestors is always kept as a `-1` leaf.
pub struct CachedDirectory<T> {
    entry: RwLock<CacheEntry<T>>,
    max_depth: i32,
    context: Arc<ScanContext<T>>,
    children: Mutex<Children<T>>,
}

impl<T: Clone + Send + Sync + 'static> CachedDirectory<T> {
    /// Create an uninitialized node. Call [`init`](Self::init) to scan it.
    pub fn new(typed_path: TypedPath, max_depth: i32, context: Arc<ScanContext<T>>) -> Self {
        let entry = context.entry(typed_path);
        Self::with_entry(entry, max_depth, context)
    }

    fn with_entry(entry: CacheEntry<T>, max_depth: i32, context: Arc<ScanContext<T>>) -> Self {
        Self {
            entry: RwLock::new(entry),
            max_depth,
            context,
            children: Mutex::new(Children::default()),
        }
    }

    /// The node's own entry.
    pub fn entry(&self) -> CacheEntry<T> {
        self.entry.read().clone()
    }

    /// The node's own typed path.
    pub fn typed_path(&self) -> TypedPath {
        self.entry.read().typed_path().clone()
    }

    /// Absolute path of this node.
    pub fn path(&self) -> PathBuf {
        self.entry.read().path().to_path_buf()
    }

    /// Depth this node was created with.
    pub const fn max_depth(&self) -> i32 {
        self.max_depth
    }

    fn set_entry(&self, entry: CacheEntry<T>) {
        *self.entry.write() = entry;
    }

    const fn subdirectory_depth(&self) -> i32 {
        if self.max_depth == UNBOUNDED_DEPTH {
            UNBOUNDED_DEPTH
        } else if self.max_depth > 0 {
            self.max_depth - 1
        } else {
            0
        }
    }

    fn child(&self, typed_path: TypedPath, max_depth: i32) -> Self {
        Self::new(typed_path, max_depth, Arc::clone(&self.context))
    }

    fn is_traversable(&self, typed_path: &TypedPath) -> bool {
        typed_path.is_directory() && (self.context.follow_links || !typed_path.is_symlink())
    }

    /// True if `typed_path`, a child of this node, is a link back into its
    /// own ancestry.
    fn closes_loop(&self, typed_path: &TypedPath) -> bool {
        if !typed_path.is_symlink() {
            return false;
        }
        let real = typed_path.expanded();
        if is_loop(typed_path.path(), &real) {
            return true;
        }
        let here = self.path();
        let canonical = fs::canonicalize(&here).unwrap_or(here);
        typed_path
            .path()
            .file_name()
            .is_some_and(|name| is_loop(&canonical.join(name), &real))
    }

    /// Clear and rescan this node's children.
    ///
    /// Subdirectories that fail to scan but still exist are kept as leaves;
    /// ones that vanished mid-scan are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if this directory itself cannot be listed.
    pub fn init(&self) -> Result<()> {
        let Some(mut children) = self.children.try_lock() else {
            tracing::debug!(path = %self.path().display(), "Directory busy, skipping scan");
            return Ok(());
        };
        self.init_locked(&mut children)
    }

    fn init_locked(&self, children: &mut Children<T>) -> Result<()> {
        children.clear();
        if self.max_depth < 0 {
            return Ok(());
        }

        let path = self.path();
        let listed = self
            .context
            .lister
            .list(&path, 0, self.context.filter.as_ref())?;

        for typed in listed {
            let Some(key) = typed.path().file_name().map(OsStr::to_os_string) else {
                continue;
            };
            if !self.is_traversable(&typed) || self.max_depth == 0 {
                children.files.insert(key, self.context.entry(typed));
            } else if self.closes_loop(&typed) {
                children.subdirectories.insert(key, self.child(typed, -1));
            } else {
                let dir = self.child(typed, self.subdirectory_depth());
                match dir.init() {
                    Ok(()) => {
                        children.subdirectories.insert(key, dir);
                    }
                    Err(e) if dir.path().exists() => {
                        tracing::warn!(
                            path = %dir.path().display(),
                            error = %e,
                            "Failed to scan subdirectory, caching it as a leaf"
                        );
                        let leaf = Self::with_entry(dir.entry(), -1, Arc::clone(&self.context));
                        children.subdirectories.insert(key, leaf);
                    }
                    Err(e) => {
                        tracing::debug!(
                            path = %dir.path().display(),
                            error = %e,
                            "Subdirectory vanished during scan"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Apply a change to `typed_path` and return the resulting transitions.
    ///
    /// A path that no longer exists is removed. A directory that is new, or
    /// any directory when `rescan` is set, is rescanned and reconciled against
    /// its previous contents. Anything else is stored as a single entry.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory rescan fails.
    pub fn update(&self, typed_path: &TypedPath, rescan: bool) -> Result<CacheUpdates<T>> {
        let mut updates = CacheUpdates::new();
        if !self.context.accepts(typed_path) {
            return Ok(updates);
        }

        if !typed_path.exists() {
            for entry in self.remove(typed_path.path()) {
                updates.on_delete(entry);
            }
            return Ok(updates);
        }

        let Some(parts) = relative_parts(&self.path(), typed_path.path()) else {
            return Ok(updates);
        };
        let Some(mut children) = self.children.try_lock() else {
            return Ok(updates);
        };

        if !parts.is_empty() {
            self.update_in(&mut children, &parts, typed_path, rescan, &mut updates)?;
        } else if rescan && self.is_traversable(typed_path) {
            let mut old = vec![self.entry()];
            self.collect_locked(&children, UNBOUNDED_DEPTH, &|_| true, &mut old);
            self.set_entry(self.context.entry(typed_path.clone()));
            self.init_locked(&mut children)?;
            let mut new = vec![self.entry()];
            self.collect_locked(&children, UNBOUNDED_DEPTH, &|_| true, &mut new);
            diff_entries(old, new, &mut updates);
        } else {
            let old = self.entry();
            let new = self.context.entry(typed_path.clone());
            self.set_entry(new.clone());
            updates.on_update(old, new);
        }

        Ok(updates)
    }

    fn update_in(
        &self,
        children: &mut Children<T>,
        parts: &[OsString],
        typed_path: &TypedPath,
        rescan: bool,
        updates: &mut CacheUpdates<T>,
    ) -> Result<()> {
        if self.max_depth < 0 {
            return Ok(());
        }
        let Some((name, rest)) = parts.split_first() else {
            return Ok(());
        };
        let resolved = self.path().join(name);

        if rest.is_empty() {
            return self.update_child(children, name, typed_path.with_path(resolved), rescan, updates);
        }

        if let Some(dir) = children.subdirectories.get(name) {
            match dir.children.try_lock() {
                Some(mut grandchildren) => {
                    dir.update_in(&mut grandchildren, rest, typed_path, rescan, updates)
                }
                None => Ok(()),
            }
        } else if self.max_depth > 0 {
            // The new intermediate directory is scanned in full, which already
            // covers the rest of the path.
            self.add_directory(children, name, TypedPath::stat(&resolved), updates)
        } else {
            Ok(())
        }
    }

    fn update_child(
        &self,
        children: &mut Children<T>,
        name: &OsStr,
        typed: TypedPath,
        rescan: bool,
        updates: &mut CacheUpdates<T>,
    ) -> Result<()> {
        let traversable = self.is_traversable(&typed);
        let looped = traversable && self.closes_loop(&typed);

        if traversable && !looped && self.max_depth > 0 {
            if !rescan {
                if let Some(previous) = children.subdirectories.get(name) {
                    let new = self.context.entry(typed);
                    updates.on_update(previous.entry(), new.clone());
                    previous.set_entry(new);
                    return Ok(());
                }
            }
            return self.add_directory(children, name, typed, updates);
        }

        let new = self.context.entry(typed);
        let old = Self::take_existing(children, name, updates);
        if looped && self.max_depth > 0 {
            let leaf = Self::with_entry(new.clone(), -1, Arc::clone(&self.context));
            children.subdirectories.insert(name.to_os_string(), leaf);
        } else {
            children.files.insert(name.to_os_string(), new.clone());
        }
        record(updates, old, new);
        Ok(())
    }

    /// Replace the child `name` with a freshly scanned directory and diff the
    /// old and new subtrees.
    fn add_directory(
        &self,
        children: &mut Children<T>,
        name: &OsStr,
        typed: TypedPath,
        updates: &mut CacheUpdates<T>,
    ) -> Result<()> {
        if !typed.exists() {
            Self::take_existing(children, name, updates)
                .into_iter()
                .for_each(|old| updates.on_delete(old));
            return Ok(());
        }

        if !self.is_traversable(&typed) {
            let new = self.context.entry(typed);
            let old = Self::take_existing(children, name, updates);
            children.files.insert(name.to_os_string(), new.clone());
            record(updates, old, new);
            return Ok(());
        }

        let dir = self.child(typed, self.subdirectory_depth());
        match dir.init() {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                Self::take_existing(children, name, updates)
                    .into_iter()
                    .for_each(|old| updates.on_delete(old));
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(
                    path = %dir.path().display(),
                    error = %e,
                    "Partial scan of new directory"
                );
            }
        }

        let mut old = Vec::new();
        if let Some(previous) = children.subdirectories.remove(name) {
            old.push(previous.entry());
            old.extend(previous.descendants());
        }
        if let Some(previous) = children.files.remove(name) {
            old.push(previous);
        }
        let mut new = vec![dir.entry()];
        new.extend(dir.descendants());
        children.subdirectories.insert(name.to_os_string(), dir);
        diff_entries(old, new, updates);
        Ok(())
    }

    /// Detach whatever is cached at `name`, emitting deletes for the
    /// descendants of a detached subdirectory. Returns the detached entry.
    fn take_existing(
        children: &mut Children<T>,
        name: &OsStr,
        updates: &mut CacheUpdates<T>,
    ) -> Option<CacheEntry<T>> {
        let file = children.files.remove(name);
        let dir = children.subdirectories.remove(name).map(|dir| {
            for entry in dir.descendants() {
                updates.on_delete(entry);
            }
            dir.entry()
        });
        file.or(dir)
    }

    /// Remove `path` and everything below it.
    ///
    /// Returns the removed entries marked as no longer existing. Empty if
    /// `path` is this node's root or is not below it.
    pub fn remove(&self, path: &Path) -> Vec<CacheEntry<T>> {
        let mut result = Vec::new();
        let Some(parts) = relative_parts(&self.path(), path) else {
            return result;
        };
        if parts.is_empty() {
            return result;
        }
        if let Some(mut children) = self.children.try_lock() {
            Self::remove_in(&mut children, &parts, &mut result);
        }
        result
    }

    fn remove_in(children: &mut Children<T>, parts: &[OsString], result: &mut Vec<CacheEntry<T>>) {
        let Some((name, rest)) = parts.split_first() else {
            return;
        };
        if rest.is_empty() {
            if let Some(entry) = children.files.remove(name) {
                result.push(entry.into_missing());
            }
            if let Some(dir) = children.subdirectories.remove(name) {
                result.extend(dir.descendants().into_iter().map(CacheEntry::into_missing));
                result.push(dir.entry().into_missing());
            }
        } else if let Some(dir) = children.subdirectories.get(name) {
            if let Some(mut grandchildren) = dir.children.try_lock() {
                Self::remove_in(&mut grandchildren, rest, result);
            }
        }
    }

    /// List cached entries at or below `path`.
    ///
    /// Files come first, then each subdirectory's own entry followed by its
    /// contents while `max_depth` allows. A negative `max_depth` or a leaf
    /// node yields only the node's own entry.
    pub fn list(&self, path: &Path, max_depth: i32, filter: &EntryFilter<'_, T>) -> Vec<CacheEntry<T>> {
        let mut result = Vec::new();
        let Some(children) = self.children.try_lock() else {
            return result;
        };
        if !self.entry.read().exists() {
            return result;
        }
        let parts = if path.as_os_str().is_empty() {
            Vec::new()
        } else {
            match relative_parts(&self.path(), path) {
                Some(parts) => parts,
                None => return result,
            }
        };
        if parts.is_empty() {
            self.list_from(&children, max_depth, filter, &mut result);
        } else {
            Self::find_and_list(&children, &parts, max_depth, filter, &mut result);
        }
        result
    }

    /// Every cached descendant, at unlimited depth.
    pub fn descendants(&self) -> Vec<CacheEntry<T>> {
        let mut result = Vec::new();
        if let Some(children) = self.children.try_lock() {
            self.collect_locked(&children, UNBOUNDED_DEPTH, &|_| true, &mut result);
        }
        result
    }

    fn list_from(
        &self,
        children: &Children<T>,
        max_depth: i32,
        filter: &EntryFilter<'_, T>,
        result: &mut Vec<CacheEntry<T>>,
    ) {
        if self.max_depth < 0 || max_depth < 0 {
            let entry = self.entry();
            if filter(&entry) {
                result.push(entry);
            }
        } else {
            self.collect_locked(children, max_depth, filter, result);
        }
    }

    fn find_and_list(
        children: &Children<T>,
        parts: &[OsString],
        max_depth: i32,
        filter: &EntryFilter<'_, T>,
        result: &mut Vec<CacheEntry<T>>,
    ) {
        let Some((name, rest)) = parts.split_first() else {
            return;
        };
        if let Some(dir) = children.subdirectories.get(name) {
            if let Some(grandchildren) = dir.children.try_lock() {
                if rest.is_empty() {
                    dir.list_from(&grandchildren, max_depth, filter, result);
                } else {
                    Self::find_and_list(&grandchildren, rest, max_depth, filter, result);
                }
            }
        } else if rest.is_empty() {
            if let Some(entry) = children.files.get(name) {
                if filter(entry) {
                    result.push(entry.clone());
                }
            }
        }
    }

    fn collect_locked(
        &self,
        children: &Children<T>,
        max_depth: i32,
        filter: &EntryFilter<'_, T>,
        result: &mut Vec<CacheEntry<T>>,
    ) {
        for entry in children.files.values() {
            if filter(entry) {
                result.push(entry.clone());
            }
        }
        for dir in children.subdirectories.values() {
            let entry = dir.entry();
            if filter(&entry) {
                result.push(entry);
            }
            if max_depth > 0 && dir.max_depth >= 0 {
                if let Some(grandchildren) = dir.children.try_lock() {
                    dir.collect_locked(&grandchildren, max_depth - 1, filter, result);
                }
            }
        }
    }

    /// Release every cached descendant.
    pub fn close(&self) {
        if let Some(mut children) = self.children.try_lock() {
            children.clear();
        }
    }
}

fn record<T>(updates: &mut CacheUpdates<T>, old: Option<CacheEntry<T>>, new: CacheEntry<T>) {
    match old {
        Some(old) => updates.on_update(old, new),
        None => updates.on_create(new),
    }
}

impl<T> fmt::Debug for CachedDirectory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedDirectory")
            .field("path", &self.entry.read().path())
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::diff::CacheUpdate;
    use crate::cache::lister::WalkDirLister;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn context(follow_links: bool) -> Arc<ScanContext<()>> {
        Arc::new(ScanContext::new(
            Arc::new(crate::cache::entry::unit),
            Arc::new(WalkDirLister),
            Arc::new(|_: &TypedPath| true),
            follow_links,
        ))
    }

    fn scanned(root: &Path, depth: i32) -> CachedDirectory<()> {
        let dir = CachedDirectory::new(TypedPath::stat(root), depth, context(true));
        dir.init().unwrap();
        dir
    }

    fn rel(root: &Path, entries: &[CacheEntry<()>]) -> BTreeSet<String> {
        entries
            .iter()
            .map(|e| e.path().strip_prefix(root).unwrap().display().to_string())
            .collect()
    }

    fn all(_: &CacheEntry<()>) -> bool {
        true
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(ToString::to_string).collect()
    }

    fn tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        fs::write(tmp.path().join("top.txt"), "t").unwrap();
        fs::write(tmp.path().join("a/mid.txt"), "m").unwrap();
        fs::write(tmp.path().join("a/b/deep.txt"), "d").unwrap();
        tmp
    }

    #[test]
    fn test_init_unbounded() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        let listed = dir.list(tmp.path(), UNBOUNDED_DEPTH, &all);
        assert_eq!(
            rel(tmp.path(), &listed),
            set(&["top.txt", "a", "a/mid.txt", "a/b", "a/b/deep.txt"])
        );
    }

    #[test]
    fn test_init_respects_depth() {
        let tmp = tree();

        let leaf = scanned(tmp.path(), -1);
        let listed = leaf.list(tmp.path(), UNBOUNDED_DEPTH, &all);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path(), tmp.path());

        let shallow = scanned(tmp.path(), 0);
        assert_eq!(
            rel(tmp.path(), &shallow.list(tmp.path(), UNBOUNDED_DEPTH, &all)),
            set(&["top.txt", "a"])
        );

        let one = scanned(tmp.path(), 1);
        assert_eq!(
            rel(tmp.path(), &one.list(tmp.path(), UNBOUNDED_DEPTH, &all)),
            set(&["top.txt", "a", "a/mid.txt", "a/b"])
        );
    }

    #[test]
    fn test_list_depth_and_subpath() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);

        assert_eq!(
            rel(tmp.path(), &dir.list(tmp.path(), 0, &all)),
            set(&["top.txt", "a"])
        );
        assert_eq!(
            rel(tmp.path(), &dir.list(&tmp.path().join("a"), 0, &all)),
            set(&["a/mid.txt", "a/b"])
        );
        let single = dir.list(&tmp.path().join("a/mid.txt"), UNBOUNDED_DEPTH, &all);
        assert_eq!(rel(tmp.path(), &single), set(&["a/mid.txt"]));
        assert_eq!(dir.list(tmp.path(), -1, &all).len(), 1);
        assert!(dir.list(Path::new("/elsewhere"), 0, &all).is_empty());
    }

    #[test]
    fn test_list_files_before_subdirectories() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        let listed = dir.list(tmp.path(), 0, &all);
        assert!(listed[0].path().ends_with("top.txt"));
        assert!(listed[1].path().ends_with("a"));
    }

    #[test]
    fn test_list_filter() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        let txt = |e: &CacheEntry<()>| e.path().extension().is_some_and(|x| x == "txt");
        assert_eq!(
            rel(tmp.path(), &dir.list(tmp.path(), UNBOUNDED_DEPTH, &txt)),
            set(&["top.txt", "a/mid.txt", "a/b/deep.txt"])
        );
    }

    #[test]
    fn test_update_new_file() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        let new_file = tmp.path().join("a/b/new.txt");
        fs::write(&new_file, "n").unwrap();

        let updates = dir.update(&TypedPath::stat(&new_file), false).unwrap();
        assert_eq!(updates.counts(), (1, 0, 0));

        let again = dir.update(&TypedPath::stat(&new_file), false).unwrap();
        assert_eq!(again.counts(), (0, 1, 0));
    }

    #[test]
    fn test_update_new_directory_creates_descendants() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        fs::create_dir_all(tmp.path().join("n/m")).unwrap();
        fs::write(tmp.path().join("n/m/f.txt"), "").unwrap();

        let updates = dir.update(&TypedPath::stat(tmp.path().join("n")), false).unwrap();
        let created: BTreeSet<String> = updates
            .iter()
            .filter_map(|u| match u {
                CacheUpdate::Create(e) => Some(e.path().strip_prefix(tmp.path()).unwrap().display().to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(created, set(&["n", "n/m", "n/m/f.txt"]));
    }

    #[test]
    fn test_update_existing_directory_without_rescan_is_single_update() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        let a = TypedPath::stat(tmp.path().join("a"));

        let first = dir.update(&a, false).unwrap();
        let second = dir.update(&a, false).unwrap();
        assert_eq!(first.counts(), (0, 1, 0));
        assert_eq!(second.counts(), (0, 1, 0));
    }

    #[test]
    fn test_update_with_rescan_reconciles_missed_changes() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        fs::remove_file(tmp.path().join("a/mid.txt")).unwrap();
        fs::write(tmp.path().join("a/b/extra.txt"), "").unwrap();

        let updates = dir.update(&TypedPath::stat(tmp.path().join("a")), true).unwrap();
        let (creates, _, deletes) = updates.counts();
        assert_eq!(creates, 1);
        assert_eq!(deletes, 1);
    }

    #[test]
    fn test_update_root_rescan() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        fs::write(tmp.path().join("missed.txt"), "").unwrap();

        let updates = dir.update(&TypedPath::stat(tmp.path()), true).unwrap();
        assert_eq!(updates.counts().0, 1);

        let quiet = dir.update(&TypedPath::stat(tmp.path()), false).unwrap();
        assert_eq!(quiet.counts(), (0, 1, 0));
    }

    #[test]
    fn test_update_beyond_depth_is_ignored() {
        let tmp = tree();
        let dir = scanned(tmp.path(), 0);
        fs::write(tmp.path().join("a/b/new.txt"), "").unwrap();

        let updates = dir
            .update(&TypedPath::stat(tmp.path().join("a/b/new.txt")), false)
            .unwrap();
        assert!(updates.is_empty());
    }

    #[test]
    fn test_update_creates_missing_intermediate_directory() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        fs::create_dir_all(tmp.path().join("x/y")).unwrap();
        fs::write(tmp.path().join("x/y/z.txt"), "").unwrap();

        let updates = dir
            .update(&TypedPath::stat(tmp.path().join("x/y/z.txt")), false)
            .unwrap();
        assert_eq!(updates.counts(), (3, 0, 0));
        assert_eq!(
            dir.list(&tmp.path().join("x"), UNBOUNDED_DEPTH, &all).len(),
            2
        );
    }

    #[test]
    fn test_update_missing_path_removes() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        fs::remove_dir_all(tmp.path().join("a")).unwrap();

        let updates = dir
            .update(&TypedPath::stat(tmp.path().join("a")), false)
            .unwrap();
        assert_eq!(updates.counts(), (0, 0, 4));
    }

    #[test]
    fn test_directory_replaced_by_file() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        fs::remove_dir_all(tmp.path().join("a")).unwrap();
        fs::write(tmp.path().join("a"), "now a file").unwrap();

        let updates = dir
            .update(&TypedPath::stat(tmp.path().join("a")), false)
            .unwrap();
        // a/mid.txt, a/b, a/b/deep.txt go away; a itself is updated.
        assert_eq!(updates.counts(), (0, 1, 3));
        assert_eq!(
            rel(tmp.path(), &dir.list(tmp.path(), UNBOUNDED_DEPTH, &all)),
            set(&["top.txt", "a"])
        );
    }

    #[test]
    fn test_remove() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);

        let removed = dir.remove(&tmp.path().join("a"));
        assert_eq!(
            rel(tmp.path(), &removed),
            set(&["a", "a/mid.txt", "a/b", "a/b/deep.txt"])
        );
        assert!(removed.iter().all(|e| !e.exists()));

        assert!(dir.remove(tmp.path()).is_empty());
        assert!(dir.remove(Path::new("/not/here")).is_empty());
        assert_eq!(
            rel(tmp.path(), &dir.list(tmp.path(), UNBOUNDED_DEPTH, &all)),
            set(&["top.txt"])
        );
    }

    #[test]
    fn test_busy_node_degrades_to_empty() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        let _guard = dir.children.lock();
        assert!(dir.list(tmp.path(), UNBOUNDED_DEPTH, &all).is_empty());
        assert!(dir.remove(&tmp.path().join("a")).is_empty());
        assert!(dir
            .update(&TypedPath::stat(tmp.path().join("top.txt")), false)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_close_releases_children() {
        let tmp = tree();
        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        dir.close();
        assert!(dir.list(tmp.path(), UNBOUNDED_DEPTH, &all).is_empty());
        assert_eq!(dir.entry().path(), tmp.path());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_terminates() {
        let tmp = tree();
        std::os::unix::fs::symlink(tmp.path().join("a"), tmp.path().join("a/b/loop")).unwrap();

        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        let listed = dir.list(tmp.path(), UNBOUNDED_DEPTH, &all);
        let loops = listed
            .iter()
            .filter(|e| e.path().ends_with("loop"))
            .count();
        assert_eq!(loops, 1);
        assert_eq!(listed.len(), 6);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_not_followed_is_file_entry() {
        let tmp = tree();
        std::os::unix::fs::symlink(tmp.path().join("a"), tmp.path().join("alias")).unwrap();

        let dir = CachedDirectory::new(TypedPath::stat(tmp.path()), UNBOUNDED_DEPTH, context(false));
        dir.init().unwrap();
        let listed = dir.list(&tmp.path().join("alias"), UNBOUNDED_DEPTH, &all);
        assert_eq!(listed.len(), 1);
        assert!(listed[0].typed_path().is_symlink());
    }

    #[cfg(unix)]
    #[test]
    fn test_followed_symlink_is_scanned() {
        let tmp = tree();
        std::os::unix::fs::symlink(tmp.path().join("a/b"), tmp.path().join("alias")).unwrap();

        let dir = scanned(tmp.path(), UNBOUNDED_DEPTH);
        let listed = dir.list(&tmp.path().join("alias"), UNBOUNDED_DEPTH, &all);
        assert_eq!(rel(tmp.path(), &listed), set(&["alias/deep.txt"]));
    }
}
