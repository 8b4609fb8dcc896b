//! File watcher for live updates.
//!
//! Wraps a notify watcher and turns its events into [`WatchEvent`]s sent
//! to the session loop. The set of watched paths follows the resolved
//! configuration: every existing root base, and the directory of every
//! structural dependency.

use crate::session::{ResolvedConfiguration, SessionMessage};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Type of file change detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
}

/// A single change reported by the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
    pub timestamp: SystemTime,
}

impl WatchEvent {
    pub fn new(path: impl Into<PathBuf>, kind: WatchEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            timestamp: SystemTime::now(),
        }
    }
}

/// Called on the notify thread for every event, before it is queued.
pub type EventHook = Box<dyn Fn(&WatchEvent) + Send + Sync>;

/// Watches root bases and structural dependencies.
pub struct FileWatcher {
    watcher: notify::RecommendedWatcher,
    watched: BTreeMap<PathBuf, RecursiveMode>,
}

impl FileWatcher {
    /// Creates a watcher that forwards events to `tx`.
    ///
    /// Nothing is watched until [`FileWatcher::sync`] is called.
    pub fn new(tx: Sender<SessionMessage>, hook: EventHook) -> Result<Self, notify::Error> {
        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    for change in translate(event) {
                        debug!("{:?}: {}", change.kind, change.path.display());
                        hook(&change);
                        if tx.send(SessionMessage::Event(change)).is_err() {
                            warn!("Failed to send file change event");
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(SessionMessage::WatchError(e.to_string()));
                }
            }
        })?;

        Ok(Self {
            watcher,
            watched: BTreeMap::new(),
        })
    }

    /// Brings the watched paths in line with a configuration.
    pub fn sync(&mut self, config: &ResolvedConfiguration) {
        let wanted = desired_watches(config);

        let stale: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|(path, mode)| wanted.get(*path) != Some(*mode))
            .map(|(path, _)| path.clone())
            .collect();
        for path in stale {
            if let Err(e) = self.watcher.unwatch(&path) {
                debug!("Could not unwatch {}: {}", path.display(), e);
            }
            self.watched.remove(&path);
        }

        for (path, mode) in wanted {
            if self.watched.contains_key(&path) {
                continue;
            }
            match self.watcher.watch(&path, mode) {
                Ok(()) => {
                    info!("Watching {} for changes", path.display());
                    self.watched.insert(path, mode);
                }
                Err(e) => warn!("Could not watch {}: {}", path.display(), e),
            }
        }
    }

    /// Makes sure a directory that just appeared is watched.
    ///
    /// Usually a no-op: a recursive watch on an ancestor covers it. Some
    /// backends only see new subdirectories once they are added
    /// explicitly.
    pub fn extend(&mut self, dir: &Path) {
        if self.is_covered(dir) {
            return;
        }
        match self.watcher.watch(dir, RecursiveMode::Recursive) {
            Ok(()) => {
                debug!("Extended watch to {}", dir.display());
                self.watched.insert(dir.to_path_buf(), RecursiveMode::Recursive);
            }
            Err(e) => warn!("Could not watch {}: {}", dir.display(), e),
        }
    }

    /// The watched paths and whether each watch is recursive.
    pub fn watched(&self) -> impl Iterator<Item = (&Path, bool)> {
        self.watched
            .iter()
            .map(|(path, mode)| (path.as_path(), *mode == RecursiveMode::Recursive))
    }

    fn is_covered(&self, path: &Path) -> bool {
        covered(&self.watched, path)
    }
}

fn covered(watched: &BTreeMap<PathBuf, RecursiveMode>, path: &Path) -> bool {
    if watched.contains_key(path) {
        return true;
    }
    path.ancestors()
        .skip(1)
        .any(|a| watched.get(a) == Some(&RecursiveMode::Recursive))
}

/// The watches a configuration needs.
///
/// Existing root bases get a recursive watch, or a flat one for
/// single-level explicit roots. A missing base is approached through its
/// nearest existing ancestor so its creation is noticed. Dependencies are
/// watched through their parent directory, since editors often replace a
/// file rather than write to it.
fn desired_watches(config: &ResolvedConfiguration) -> BTreeMap<PathBuf, RecursiveMode> {
    let mut wanted = BTreeMap::new();

    for policy in &config.roots {
        let root = policy.root();
        if root.base.is_dir() {
            let mode = match root.explicit_depth() {
                Some(1) => RecursiveMode::NonRecursive,
                _ => RecursiveMode::Recursive,
            };
            wanted.insert(root.base.clone(), mode);
        } else if let Some(existing) = root.base.ancestors().skip(1).find(|a| a.is_dir()) {
            wanted
                .entry(existing.to_path_buf())
                .or_insert(RecursiveMode::NonRecursive);
        }
    }

    // Recursive watches make nested ones redundant
    let recursive: BTreeMap<PathBuf, RecursiveMode> = wanted
        .iter()
        .filter(|(_, mode)| **mode == RecursiveMode::Recursive)
        .map(|(path, mode)| (path.clone(), *mode))
        .collect();
    wanted.retain(|path, _| {
        !path
            .ancestors()
            .skip(1)
            .any(|a| recursive.contains_key(a))
    });

    for dependency in &config.dependencies {
        if let Some(parent) = dependency.parent() {
            if parent.is_dir() && !covered(&wanted, parent) {
                wanted.insert(parent.to_path_buf(), RecursiveMode::NonRecursive);
            }
        }
    }

    wanted
}

/// Converts a notify event into our own events.
///
/// Renames become a delete of the old path and a create of the new one.
/// Access events and anything else we don't understand are dropped.
pub fn translate(event: Event) -> Vec<WatchEvent> {
    let mut paths = event.paths;
    let kinds: Vec<WatchEventKind> = match event.kind {
        EventKind::Create(_) => vec![WatchEventKind::Created; paths.len()],
        EventKind::Remove(_) => vec![WatchEventKind::Deleted; paths.len()],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            vec![WatchEventKind::Deleted; paths.len()]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            vec![WatchEventKind::Created; paths.len()]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            vec![WatchEventKind::Deleted, WatchEventKind::Created]
        }
        // Not told which side of the rename this is, so look
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .map(|p| {
                if p.exists() {
                    WatchEventKind::Created
                } else {
                    WatchEventKind::Deleted
                }
            })
            .collect(),
        EventKind::Modify(_) => vec![WatchEventKind::Modified; paths.len()],
        _ => {
            paths.clear();
            Vec::new()
        }
    };

    paths
        .into_iter()
        .zip(kinds)
        .map(|(path, kind)| WatchEvent::new(path, kind))
        .collect()
}
