//! Integration tests for the directory tree cache.
//!
//! Events are fed to the cache directly so every scenario is deterministic;
//! the last test drives the cache from a live notify watcher.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use tempfile::TempDir;
use treecache::cache::{
    diff_entries, unit, CacheEntry, CacheEvent, CacheUpdates, FileKind, FileTreeCache,
    FileTreeRepository, TreeOptions, TypedPath, UNBOUNDED_DEPTH,
};
use treecache::watcher::{Event, RawWatcher};
use treecache::{Config, Result};

/// Raw watcher that never produces events on its own.
struct ManualWatcher;

impl RawWatcher for ManualWatcher {
    fn register(&self, _path: &Path, _max_depth: i32) -> Result<bool> {
        Ok(true)
    }

    fn unregister(&self, _path: &Path) {}

    fn close(&self) {}
}

fn cache() -> (Arc<FileTreeCache<()>>, Receiver<CacheEvent<()>>) {
    let tree = FileTreeCache::new(Arc::new(unit), TreeOptions::default(), None).unwrap();
    let (tx, rx) = unbounded();
    tree.add_observer(Arc::new(tx));
    (tree, rx)
}

/// Collect events until the callback thread goes quiet.
fn drain(rx: &Receiver<CacheEvent<()>>) -> Vec<CacheEvent<()>> {
    let mut events = Vec::new();
    while let Ok(event) = rx.recv_timeout(Duration::from_millis(300)) {
        events.push(event);
    }
    events
}

fn rel(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap().display().to_string()
}

fn created(root: &Path, events: &[CacheEvent<()>]) -> BTreeSet<String> {
    events
        .iter()
        .filter_map(|e| match e {
            CacheEvent::Create(entry) => Some(rel(root, entry.path())),
            _ => None,
        })
        .collect()
}

fn deleted(root: &Path, events: &[CacheEvent<()>]) -> BTreeSet<String> {
    events
        .iter()
        .filter_map(|e| match e {
            CacheEvent::Delete(entry) => Some(rel(root, entry.path())),
            _ => None,
        })
        .collect()
}

fn listed(tree: &FileTreeCache<()>, root: &Path) -> BTreeSet<String> {
    tree.list(root, UNBOUNDED_DEPTH, &|_| true)
        .iter()
        .map(|t| rel(root, t.path()))
        .collect()
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(ToString::to_string).collect()
}

fn component_distance(root: &Path, path: &Path) -> usize {
    path.strip_prefix(root).unwrap().components().count()
}

/// Depth 1 caches `a` and `a/b` but never `a/b/c.txt`.
#[test]
fn test_new_nested_file_is_capped_by_depth() {
    let tmp = TempDir::new().unwrap();
    let (tree, rx) = cache();
    tree.register(tmp.path(), 1, &ManualWatcher).unwrap();

    fs::create_dir_all(tmp.path().join("a/b")).unwrap();
    fs::write(tmp.path().join("a/b/c.txt"), "c").unwrap();
    tree.handle_event(Event::observed(tmp.path().join("a")));
    tree.handle_event(Event::observed(tmp.path().join("a/b/c.txt")));

    let events = drain(&rx);
    assert_eq!(created(tmp.path(), &events), set(&["a", "a/b"]));
    assert_eq!(listed(&tree, tmp.path()), set(&["a", "a/b"]));
}

#[test]
fn test_deleted_directory_reports_every_descendant_in_one_batch() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("a")).unwrap();
    fs::write(tmp.path().join("a/x"), "").unwrap();
    fs::write(tmp.path().join("a/y"), "").unwrap();
    let (tree, rx) = cache();
    tree.register(tmp.path(), UNBOUNDED_DEPTH, &ManualWatcher)
        .unwrap();

    fs::remove_dir_all(tmp.path().join("a")).unwrap();
    tree.handle_event(Event::observed(tmp.path().join("a")));

    let events = drain(&rx);
    assert_eq!(events.len(), 3);
    assert_eq!(deleted(tmp.path(), &events), set(&["a", "a/x", "a/y"]));
    assert!(events
        .iter()
        .all(|e| matches!(e, CacheEvent::Delete(entry) if !entry.exists())));
}

#[test]
fn test_missing_root_materializes_with_children() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("missing");
    let (tree, rx) = cache();
    tree.register(&missing, UNBOUNDED_DEPTH, &ManualWatcher)
        .unwrap();
    assert_eq!(tree.pending(), vec![missing.clone()]);

    fs::create_dir_all(missing.join("sub")).unwrap();
    fs::write(missing.join("one.txt"), "").unwrap();
    fs::write(missing.join("sub/two.txt"), "").unwrap();
    tree.handle_event(Event::observed(&missing));

    let events = drain(&rx);
    assert_eq!(
        created(tmp.path(), &events),
        set(&["missing", "missing/one.txt", "missing/sub", "missing/sub/two.txt"])
    );
    assert_eq!(events[0].path(), missing.as_path());
    assert!(tree.pending().is_empty());
}

#[test]
fn test_broader_registration_prunes_subsumed_tree() {
    let tmp = TempDir::new().unwrap();
    let sub = tmp.path().join("sub");
    fs::create_dir_all(sub.join("deep/er")).unwrap();
    fs::write(sub.join("deep/er/f.txt"), "").unwrap();
    let (tree, _rx) = cache();

    tree.register(&sub, 1, &ManualWatcher).unwrap();
    assert_eq!(tree.roots(), vec![sub.clone()]);

    tree.register(tmp.path(), UNBOUNDED_DEPTH, &ManualWatcher)
        .unwrap();
    assert_eq!(tree.roots(), vec![tmp.path().to_path_buf()]);
    assert_eq!(
        listed(&tree, &sub),
        set(&["deep", "deep/er", "deep/er/f.txt"])
    );
}

#[test]
fn test_shallow_broader_registration_keeps_deeper_tree() {
    let tmp = TempDir::new().unwrap();
    let sub = tmp.path().join("sub");
    fs::create_dir_all(sub.join("deep/er")).unwrap();
    fs::write(sub.join("deep/er/f.txt"), "").unwrap();
    let (tree, _rx) = cache();

    tree.register(&sub, UNBOUNDED_DEPTH, &ManualWatcher).unwrap();
    tree.register(tmp.path(), 1, &ManualWatcher).unwrap();

    let roots: BTreeSet<PathBuf> = tree.roots().into_iter().collect();
    assert_eq!(
        roots,
        [tmp.path().to_path_buf(), sub.clone()].into_iter().collect()
    );
    assert_eq!(
        listed(&tree, &sub),
        set(&["deep", "deep/er", "deep/er/f.txt"])
    );
}

#[test]
fn test_overflow_reconciles_missed_changes() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("a")).unwrap();
    fs::write(tmp.path().join("a/old.txt"), "").unwrap();
    let (tree, rx) = cache();
    tree.register(tmp.path(), UNBOUNDED_DEPTH, &ManualWatcher)
        .unwrap();

    fs::remove_file(tmp.path().join("a/old.txt")).unwrap();
    fs::write(tmp.path().join("a/new.txt"), "").unwrap();
    tree.handle_event(Event::overflow(tmp.path()));

    let events = drain(&rx);
    assert_eq!(created(tmp.path(), &events), set(&["a/new.txt"]));
    assert_eq!(deleted(tmp.path(), &events), set(&["a/old.txt"]));
    assert_eq!(listed(&tree, tmp.path()), set(&["a", "a/new.txt"]));
}

#[test]
fn test_list_never_exceeds_registered_depth() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("1/2/3/4/5")).unwrap();
    fs::write(tmp.path().join("1/2/3/4/5/f.txt"), "").unwrap();

    for depth in -1..4 {
        let (tree, _rx) = cache();
        tree.register(tmp.path(), depth, &ManualWatcher).unwrap();
        let limit = usize::try_from(depth + 1).unwrap();
        for typed in tree.list(tmp.path(), UNBOUNDED_DEPTH, &|_| true) {
            assert!(
                component_distance(tmp.path(), typed.path()) <= limit,
                "{} listed at depth {depth}",
                typed.path().display()
            );
        }
        tree.close();
    }
}

#[cfg(unix)]
#[test]
fn test_symlink_cycle_terminates() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("a")).unwrap();
    std::os::unix::fs::symlink(tmp.path().join("a"), tmp.path().join("a/link")).unwrap();
    let (tree, _rx) = cache();
    tree.register(tmp.path(), UNBOUNDED_DEPTH, &ManualWatcher)
        .unwrap();

    let listing = tree.list(tmp.path(), UNBOUNDED_DEPTH, &|_| true);
    let links: Vec<_> = listing.iter().filter(|t| t.path().ends_with("link")).collect();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].kind(), FileKind::SymbolicLink);
    assert_eq!(listing.len(), 2);
}

#[test]
fn test_diff_counts_cover_union() {
    fn entries(paths: &[&str]) -> Vec<CacheEntry<()>> {
        paths
            .iter()
            .map(|p| CacheEntry::from_value(TypedPath::new(*p, FileKind::File, false), ()))
            .collect()
    }

    let old = entries(&["/r/a", "/r/b", "/r/c"]);
    let new = entries(&["/r/b", "/r/c", "/r/d", "/r/e"]);
    let mut updates = CacheUpdates::new();
    diff_entries(old, new, &mut updates);

    assert_eq!(updates.counts(), (2, 2, 1));
    let paths: BTreeSet<_> = updates.iter().map(|u| u.path().to_path_buf()).collect();
    assert_eq!(paths.len(), 5);
}

#[test]
fn test_repeated_event_only_updates_itself() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("a")).unwrap();
    fs::write(tmp.path().join("a/f.txt"), "").unwrap();
    let (tree, rx) = cache();
    tree.register(tmp.path(), UNBOUNDED_DEPTH, &ManualWatcher)
        .unwrap();

    tree.handle_event(Event::observed(tmp.path().join("a")));
    tree.handle_event(Event::observed(tmp.path().join("a")));

    let events = drain(&rx);
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|e| matches!(e, CacheEvent::Update { new, .. } if new.path() == tmp.path().join("a"))));
}

#[test]
fn test_live_watcher_keeps_cache_in_sync() {
    let tmp = TempDir::new().unwrap();
    let config = Config {
        watch_dirs: vec![tmp.path().to_path_buf()],
        debounce_ms: 50,
        ..Config::default()
    };
    let repo = FileTreeRepository::new(&config, Arc::new(unit)).unwrap();

    fs::create_dir(tmp.path().join("dir")).unwrap();
    fs::write(tmp.path().join("dir/file.txt"), "x").unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let expected = set(&["dir", "dir/file.txt"]);
    loop {
        let now: BTreeSet<String> = repo
            .list(tmp.path(), UNBOUNDED_DEPTH, &|_| true)
            .iter()
            .map(|t| rel(tmp.path(), t.path()))
            .collect();
        if now == expected {
            break;
        }
        assert!(Instant::now() < deadline, "cache never caught up: {now:?}");
        std::thread::sleep(Duration::from_millis(50));
    }
    repo.close();
}
