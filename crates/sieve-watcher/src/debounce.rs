//! Event debouncing.
//!
//! Raw watch events arrive in bursts: an editor save can be a create, a
//! handful of modifies and a rename. The [`Debouncer`] collapses each
//! path's events into one and releases a batch once the burst has been
//! quiet for a whole window. A burst that never goes quiet is still
//! released after `max_wait`, so a chatty writer can't stall the build.

use crate::watcher::{WatchEvent, WatchEventKind};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Default quiet window before a batch is released.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// How many windows a continuous burst may hold a batch back.
const MAX_WAIT_WINDOWS: u32 = 10;

/// Collects events until they settle.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    max_wait: Duration,
    pending: BTreeMap<PathBuf, WatchEvent>,
    first: Option<Instant>,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            max_wait: window * MAX_WAIT_WINDOWS,
            pending: BTreeMap::new(),
            first: None,
            deadline: None,
        }
    }

    /// Caps how long events may keep postponing a batch.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait.max(self.window);
        self
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Adds an event and restarts the quiet window, but never past
    /// `max_wait` from the first pending event.
    pub fn push(&mut self, event: WatchEvent, now: Instant) {
        match self.pending.get_mut(&event.path) {
            Some(existing) => {
                existing.kind = combine(existing.kind, event.kind);
                existing.timestamp = event.timestamp;
            }
            None => {
                self.pending.insert(event.path.clone(), event);
            }
        }
        let first = *self.first.get_or_insert(now);
        self.deadline = Some((now + self.window).min(first + self.max_wait));
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// How long until the pending batch is due. None when idle.
    pub fn time_until_ready(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Takes the batch if the window has passed, sorted by path.
    pub fn ready(&mut self, now: Instant) -> Option<Vec<WatchEvent>> {
        match self.deadline {
            Some(deadline) if deadline <= now => Some(self.flush()),
            _ => None,
        }
    }

    /// Takes whatever is pending right away.
    pub fn flush(&mut self) -> Vec<WatchEvent> {
        self.first = None;
        self.deadline = None;
        std::mem::take(&mut self.pending).into_values().collect()
    }
}

/// What one path's sequence of events amounts to.
fn combine(earlier: WatchEventKind, later: WatchEventKind) -> WatchEventKind {
    use WatchEventKind::*;
    match (earlier, later) {
        (_, Deleted) => Deleted,
        (Created, _) => Created,
        // Deleted and back again: treat it as new
        (Deleted, _) => Created,
        (Modified, later) => later,
    }
}

/// Reduces a set of directories to the minimal cover: drops any path with
/// an ancestor already in the set. Output is sorted shallowest first.
pub fn coalesce_dirs(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut candidates = paths;
    candidates.sort_unstable_by(|a, b| {
        depth(a).cmp(&depth(b)).then_with(|| a.cmp(b))
    });
    candidates.dedup();

    let mut selected: Vec<PathBuf> = Vec::with_capacity(candidates.len());
    let mut selected_set: HashSet<PathBuf> = HashSet::with_capacity(candidates.len());
    for path in candidates {
        if path.ancestors().skip(1).any(|a| selected_set.contains(a)) {
            continue;
        }
        selected_set.insert(path.clone());
        selected.push(path);
    }
    selected
}

fn depth(path: &Path) -> usize {
    path.components().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn event(path: &str, kind: WatchEventKind) -> WatchEvent {
        WatchEvent {
            path: PathBuf::from(path),
            kind,
            timestamp: SystemTime::now(),
        }
    }

    #[test]
    fn test_waits_for_quiet_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        assert_eq!(debouncer.time_until_ready(start), None);

        debouncer.push(event("/a.html", WatchEventKind::Modified), start);
        assert!(debouncer.ready(start + Duration::from_millis(30)).is_none());

        // Another event restarts the window
        debouncer.push(
            event("/b.html", WatchEventKind::Modified),
            start + Duration::from_millis(30),
        );
        assert!(debouncer.ready(start + Duration::from_millis(60)).is_none());

        let batch = debouncer.ready(start + Duration::from_millis(80)).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(debouncer.is_empty());
        assert_eq!(debouncer.time_until_ready(start), None);
    }

    #[test]
    fn test_continuous_events_still_release_a_batch() {
        let start = Instant::now();
        let window = Duration::from_millis(50);
        let mut debouncer = Debouncer::new(window);
        assert_eq!(debouncer.max_wait(), Duration::from_millis(500));

        // An autosave every 20ms never leaves a quiet window
        let mut released = Vec::new();
        for i in 0..200u32 {
            let now = start + Duration::from_millis(20) * i;
            debouncer.push(event("/a.html", WatchEventKind::Modified), now);
            if let Some(batch) = debouncer.ready(now) {
                released.push((now - start, batch.len()));
            }
        }

        assert!(!released.is_empty());
        assert_eq!(released[0], (Duration::from_millis(500), 1));
        // The next burst starts one event after the release
        for pair in released.windows(2) {
            assert_eq!(pair[1].0 - pair[0].0, Duration::from_millis(520));
        }
    }

    #[test]
    fn test_max_wait_is_never_below_the_window() {
        let debouncer = Debouncer::new(Duration::from_millis(50)).with_max_wait(Duration::ZERO);
        assert_eq!(debouncer.max_wait(), Duration::from_millis(50));
    }

    #[test]
    fn test_coalesces_per_path() {
        let now = Instant::now();
        let mut debouncer = Debouncer::new(Duration::ZERO);
        debouncer.push(event("/a.html", WatchEventKind::Created), now);
        debouncer.push(event("/a.html", WatchEventKind::Modified), now);
        debouncer.push(event("/b.html", WatchEventKind::Modified), now);
        debouncer.push(event("/b.html", WatchEventKind::Deleted), now);
        debouncer.push(event("/c.html", WatchEventKind::Deleted), now);
        debouncer.push(event("/c.html", WatchEventKind::Created), now);

        let batch = debouncer.ready(now).unwrap();
        let kinds: Vec<_> = batch.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                WatchEventKind::Created,
                WatchEventKind::Deleted,
                WatchEventKind::Created
            ]
        );
    }

    #[test]
    fn test_coalesce_dirs_keeps_minimal_cover() {
        let dirs = coalesce_dirs(vec![
            PathBuf::from("/p/a/b"),
            PathBuf::from("/p/a"),
            PathBuf::from("/p/ab"),
            PathBuf::from("/p/a"),
        ]);
        assert_eq!(dirs, vec![PathBuf::from("/p/a"), PathBuf::from("/p/ab")]);
    }
}
