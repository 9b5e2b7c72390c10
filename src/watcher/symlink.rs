//! Watches the targets of followed symbolic links.
//!
//! A link's target may live outside every registered root, so changes under
//! it would never be reported. The symlink watcher registers each target with
//! its own raw watcher and rewrites target events into the link's namespace.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::events::Event;
use super::watcher::{EventCallback, RawWatcher};
use crate::cache::TypedPath;
use crate::error::{CacheError, WatcherError};
use crate::Result;

/// Canonical targets and the links that resolve to them.
#[derive(Debug, Default)]
struct LinkMap {
    targets: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    links: BTreeMap<PathBuf, PathBuf>,
}

impl LinkMap {
    /// Insert `link -> target`. Returns the target it previously pointed at
    /// if that target lost its last link.
    fn insert(&mut self, link: &Path, target: &Path) -> Option<PathBuf> {
        let orphaned = match self.links.get(link) {
            Some(previous) if previous == target => return None,
            Some(_) => self.remove(link),
            None => None,
        };
        self.links.insert(link.to_path_buf(), target.to_path_buf());
        self.targets
            .entry(target.to_path_buf())
            .or_default()
            .insert(link.to_path_buf());
        orphaned
    }

    /// Drop `link`. Returns its target if no other link uses it.
    fn remove(&mut self, link: &Path) -> Option<PathBuf> {
        let target = self.links.remove(link)?;
        let links = self.targets.get_mut(&target)?;
        links.remove(link);
        if links.is_empty() {
            self.targets.remove(&target);
            Some(target)
        } else {
            None
        }
    }

    /// Rewrite a target-space event for every link that reaches it.
    fn translate(&self, event: &Event) -> Vec<Event> {
        let mut translated = Vec::new();
        for (target, links) in &self.targets {
            let Ok(rel) = event.path().strip_prefix(target) else {
                continue;
            };
            for link in links {
                let path = if rel.as_os_str().is_empty() {
                    link.clone()
                } else {
                    link.join(rel)
                };
                translated.push(Event::new(TypedPath::stat(path), event.kind));
            }
        }
        translated
    }
}

/// Raw watcher for the targets of symbolic links.
pub struct SymlinkWatcher {
    links: Arc<RwLock<LinkMap>>,
    watcher: Box<dyn RawWatcher>,
    closed: AtomicBool,
}

impl SymlinkWatcher {
    /// Create a symlink watcher. `make_watcher` builds the raw watcher for
    /// link targets from the callback it must deliver to; translated events
    /// are forwarded to `on_event`.
    ///
    /// # Errors
    ///
    /// Returns an error if the raw watcher cannot be created.
    pub fn new<F>(make_watcher: F, on_event: EventCallback) -> Result<Self>
    where
        F: FnOnce(EventCallback) -> Result<Box<dyn RawWatcher>>,
    {
        let links = Arc::new(RwLock::new(LinkMap::default()));
        let forward_links = Arc::clone(&links);
        let forward: EventCallback = Arc::new(move |event: Event| {
            let translated = forward_links.read().translate(&event);
            for link_event in translated {
                tracing::debug!(
                    target_path = %event.path().display(),
                    path = %link_event.path().display(),
                    "Forwarding link target event"
                );
                on_event(link_event);
            }
        });

        Ok(Self {
            links,
            watcher: make_watcher(forward)?,
            closed: AtomicBool::new(false),
        })
    }

    /// Follow `link`, watching its target down to `max_depth`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be resolved or its target cannot
    /// be watched.
    pub fn add_symlink(&self, link: &Path, max_depth: i32) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WatcherError::Closed.into());
        }
        let target = fs::canonicalize(link).map_err(|e| CacheError::from_io(link, &e))?;

        let orphaned = self.links.write().insert(link, &target);
        if let Some(orphaned) = orphaned {
            self.watcher.unregister(&orphaned);
        }

        if let Err(e) = self.watcher.register(&target, max_depth) {
            self.links.write().remove(link);
            return Err(e);
        }
        tracing::debug!(
            path = %link.display(),
            target_path = %target.display(),
            "Following symbolic link"
        );
        Ok(())
    }

    /// Stop following `link`.
    pub fn remove(&self, link: &Path) {
        let orphaned = self.links.write().remove(link);
        if let Some(target) = orphaned {
            self.watcher.unregister(&target);
            tracing::debug!(path = %link.display(), "Stopped following symbolic link");
        }
    }

    /// Release the raw watcher and forget every link. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.watcher.close();
        let mut links = self.links.write();
        links.targets.clear();
        links.links.clear();
    }
}
