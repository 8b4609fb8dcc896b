//! Watch sessions.
//!
//! A [`WatchSession`] owns the live state of one build: the resolved
//! configuration, the candidate set and the last output. It classifies
//! each debounced batch of filesystem events and does the least work that
//! keeps the output correct:
//!
//! - a structural dependency changed: reconfigure from scratch
//! - an ignore file changed inside an auto root: rescan that root
//! - a directory appeared inside an auto root: scan just that subtree
//! - a file in scope changed: re-extract that one file
//! - anything else: ignore it
//!
//! The resolved configuration is published as an immutable, versioned
//! snapshot over a `tokio::sync::watch` channel. Readers always see a
//! whole configuration, never a half-updated one.

use crate::candidates::CandidateSet;
use crate::collab::{CandidateExtractor, OutputTarget, StylesheetBuilder};
use crate::debounce::{coalesce_dirs, Debouncer, DEFAULT_DEBOUNCE};
use crate::error::{Result, SessionError};
use crate::scanner::{
    scan_parallel, scan_subtree, CancelToken, RootPolicy, ScanOptions, ScanOutcome, ScanReport,
};
use crate::watcher::{FileWatcher, WatchEvent, WatchEventKind};
use sieve_core::{resolve_roots, CandidateFile, EntryLoader, RootId, RootMode};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// One immutable, fully resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfiguration {
    /// Bumped every time a new configuration is published.
    pub version: u64,
    pub roots: Vec<RootPolicy>,
    /// Files whose change invalidates the whole configuration.
    pub dependencies: BTreeSet<PathBuf>,
    /// Never scanned, changes never acted on. Holds the build output.
    pub excluded: BTreeSet<PathBuf>,
}

impl ResolvedConfiguration {
    pub fn is_structural(&self, path: &Path) -> bool {
        self.dependencies.contains(path)
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|e| path.starts_with(e))
    }

    pub fn root(&self, id: RootId) -> Option<&RootPolicy> {
        self.roots.iter().find(|p| p.root().id == id)
    }
}

/// Read-only access to the published configuration.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    rx: watch::Receiver<Arc<ResolvedConfiguration>>,
}

impl SnapshotHandle {
    /// The configuration as of now.
    pub fn current(&self) -> Arc<ResolvedConfiguration> {
        Arc::clone(&self.rx.borrow())
    }

    pub fn version(&self) -> u64 {
        self.rx.borrow().version
    }
}

/// Where the session is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Reconfiguring,
    Rescanning,
    Merging,
    Stopped,
}

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Quiet window before a burst of events is processed.
    pub debounce: Duration,
    pub scan: ScanOptions,
    /// Extra paths to keep out of the session. The output file is always
    /// added.
    pub excluded: Vec<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            scan: ScanOptions::default(),
            excluded: Vec::new(),
        }
    }
}

/// What handling a batch amounted to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// The whole configuration was rebuilt.
    pub reconfigured: bool,
    /// Roots rescanned after an ignore file change.
    pub rescanned_roots: usize,
    /// Files whose candidates were added, changed or removed.
    pub files_changed: usize,
    /// New output was written.
    pub rebuilt: bool,
}

/// Messages for the session loop.
#[derive(Debug)]
pub enum SessionMessage {
    Event(WatchEvent),
    WatchError(String),
    Shutdown,
}

/// The live state of one watched build.
pub struct WatchSession<L, E, B> {
    loader: L,
    extractor: E,
    builder: B,
    output: OutputTarget,
    options: SessionOptions,
    snapshot_tx: watch::Sender<Arc<ResolvedConfiguration>>,
    epoch: Arc<AtomicU64>,
    candidates: CandidateSet,
    state: SessionState,
    config_broken: bool,
    last_output: Option<String>,
    resync_watches: bool,
    reclassify: bool,
    new_dirs: Vec<PathBuf>,
}

impl<L, E, B> WatchSession<L, E, B>
where
    L: EntryLoader,
    E: CandidateExtractor,
    B: StylesheetBuilder,
{
    pub fn new(loader: L, extractor: E, builder: B, output: OutputTarget, options: SessionOptions) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(ResolvedConfiguration::default()));
        Self {
            loader,
            extractor,
            builder,
            output,
            options,
            snapshot_tx,
            epoch: Arc::new(AtomicU64::new(0)),
            candidates: CandidateSet::new(),
            state: SessionState::Idle,
            config_broken: false,
            last_output: None,
            resync_watches: false,
            reclassify: false,
            new_dirs: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// A handle that follows every published configuration.
    pub fn snapshot(&self) -> SnapshotHandle {
        SnapshotHandle {
            rx: self.snapshot_tx.subscribe(),
        }
    }

    pub fn current(&self) -> Arc<ResolvedConfiguration> {
        Arc::clone(&self.snapshot_tx.borrow())
    }

    pub fn candidates(&self) -> &CandidateSet {
        &self.candidates
    }

    /// Bumping this counter marks any scan in flight as stale. The
    /// watcher does it when a structural dependency changes.
    pub fn structural_epoch(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.epoch)
    }

    /// Resolves, scans and builds for the first time.
    pub fn initialize(&mut self) -> Result<UpdateSummary> {
        let start = Instant::now();
        self.reconfigure()?;
        let rebuilt = self.merge()?;
        info!(
            "Initial build: {} files, {} candidates in {:?}",
            self.candidates.len(),
            self.candidates.merged().len(),
            start.elapsed()
        );
        Ok(UpdateSummary {
            reconfigured: true,
            rescanned_roots: 0,
            files_changed: self.candidates.len(),
            rebuilt,
        })
    }

    /// Classifies a batch of events and applies the smallest update that
    /// keeps the candidate set correct.
    pub fn handle_batch(&mut self, events: Vec<WatchEvent>) -> Result<UpdateSummary> {
        let snapshot = self.current();
        let mut summary = UpdateSummary::default();

        let events: Vec<WatchEvent> = events
            .into_iter()
            .filter(|e| !snapshot.is_excluded(&e.path))
            .collect();
        if events.is_empty() {
            return Ok(summary);
        }

        if let Some(event) = events.iter().find(|e| snapshot.is_structural(&e.path)) {
            info!("{} changed, reloading configuration", event.path.display());
            return self.reload(summary);
        }

        let mut policies: BTreeMap<RootId, RootPolicy> = snapshot
            .roots
            .iter()
            .map(|p| (p.root().id, p.clone()))
            .collect();
        let mut replaced: BTreeSet<RootId> = BTreeSet::new();
        let mut dirty: BTreeSet<RootId> = BTreeSet::new();

        // New directories first, their subtree scans cover any file
        // events beneath them
        let created_dirs = coalesce_dirs(
            events
                .iter()
                .filter(|e| e.kind == WatchEventKind::Created && e.path.is_dir())
                .map(|e| e.path.clone())
                .collect(),
        );
        for dir in &created_dirs {
            summary.files_changed += self.grow_into(dir, &mut policies, &mut replaced, &mut dirty);
        }
        if std::mem::take(&mut self.reclassify) {
            info!("A listed source path is now a directory, reloading configuration");
            return self.reload(summary);
        }

        for event in &events {
            if created_dirs.iter().any(|d| event.path.starts_with(d)) {
                continue;
            }
            summary.files_changed += self.apply_file_event(event, &policies, &mut dirty);
        }

        for id in dirty {
            let Some(policy) = policies.get(&id).cloned() else {
                continue;
            };
            if let Some((fresh, changed)) = self.rescan_root(&policy) {
                policies.insert(id, fresh);
                replaced.insert(id);
                summary.rescanned_roots += 1;
                summary.files_changed += changed;
            }
        }

        if !replaced.is_empty() {
            let roots = snapshot
                .roots
                .iter()
                .map(|p| policies.get(&p.root().id).cloned().unwrap_or_else(|| p.clone()))
                .collect();
            self.publish(ResolvedConfiguration {
                version: snapshot.version + 1,
                roots,
                dependencies: snapshot.dependencies.clone(),
                excluded: snapshot.excluded.clone(),
            });
        }

        if summary.files_changed > 0 {
            summary.rebuilt = self.merge()?;
        }
        debug!("Batch of {} events: {:?}", events.len(), summary);
        Ok(summary)
    }

    fn reload(&mut self, mut summary: UpdateSummary) -> Result<UpdateSummary> {
        summary.reconfigured = true;
        self.resync_watches = true;
        self.reconfigure()?;
        summary.files_changed = self.candidates.len();
        summary.rebuilt = self.merge()?;
        Ok(summary)
    }

    /// Starts watching in the background.
    ///
    /// Call [`WatchSession::initialize`] first; the session picks up from
    /// whatever configuration was last published.
    pub fn spawn(self) -> Result<SessionHandle>
    where
        L: 'static,
        E: 'static,
        B: 'static,
    {
        let (tx, rx) = mpsc::channel();

        let config_rx = self.snapshot_tx.subscribe();
        let epoch = self.structural_epoch();
        let hook = move |event: &WatchEvent| {
            if config_rx.borrow().is_structural(&event.path) {
                epoch.fetch_add(1, Ordering::SeqCst);
            }
        };
        let watcher = FileWatcher::new(tx.clone(), Box::new(hook))?;
        let snapshot = self.snapshot();

        let thread = thread::Builder::new()
            .name("sieve-session".to_string())
            .spawn(move || self.run(rx, watcher))
            .map_err(SessionError::Spawn)?;

        Ok(SessionHandle {
            tx,
            thread: Some(thread),
            snapshot,
        })
    }

    fn run(mut self, rx: Receiver<SessionMessage>, mut watcher: FileWatcher) {
        let mut debouncer = Debouncer::new(self.options.debounce);
        watcher.sync(&self.current());

        loop {
            let message = match debouncer.time_until_ready(Instant::now()) {
                Some(wait) => rx.recv_timeout(wait),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match message {
                Ok(SessionMessage::Event(event)) => debouncer.push(event, Instant::now()),
                Ok(SessionMessage::WatchError(e)) => warn!("Watch error: {}", e),
                Ok(SessionMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            if let Some(batch) = debouncer.ready(Instant::now()) {
                match self.handle_batch(batch) {
                    Ok(summary) if summary.rebuilt => info!(
                        "Rebuilt: {} files, {} candidates",
                        self.candidates.len(),
                        self.candidates.merged().len()
                    ),
                    Ok(_) => {}
                    Err(e) => warn!("{}", e),
                }
                self.apply_watch_changes(&mut watcher);
            }
        }

        self.transition(SessionState::Stopped);
        info!("Watch session stopped");
    }

    fn apply_watch_changes(&mut self, watcher: &mut FileWatcher) {
        if std::mem::take(&mut self.resync_watches) {
            watcher.sync(&self.current());
        }
        for dir in self.new_dirs.drain(..) {
            watcher.extend(&dir);
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("Session {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn publish(&self, config: ResolvedConfiguration) {
        debug!("Publishing configuration v{}", config.version);
        self.snapshot_tx.send_replace(Arc::new(config));
    }

    /// Rebuilds roots, ignore sets and candidates from scratch and
    /// publishes the result. Retries while a structural change keeps
    /// making the scan stale.
    fn reconfigure(&mut self) -> Result<()> {
        loop {
            self.transition(SessionState::Reconfiguring);
            let cancel = CancelToken::new(self.structural_epoch());

            let entry = match self.loader.load() {
                Ok(entry) => entry,
                Err(e) => {
                    self.config_broken = true;
                    self.transition(SessionState::Idle);
                    return Err(e.into());
                }
            };
            let resolution = resolve_roots(&entry.directives);
            for error in &resolution.errors {
                warn!("{}", error);
            }

            let excluded = self.excluded_paths();
            let roots: Vec<RootPolicy> = resolution
                .roots
                .into_iter()
                .map(|root| RootPolicy::prepare(root, &self.options.scan).0)
                .collect();
            for policy in &roots {
                debug!("Resolved root {}", policy.root());
            }

            let Some(files) = self.scan_all(&roots, &cancel) else {
                debug!("Configuration changed while scanning, starting over");
                continue;
            };

            let mut candidates = CandidateSet::new();
            for file in files.iter().filter(|f| !is_excluded(&excluded, &f.path)) {
                if let Some(tokens) = self.extract(file) {
                    candidates.insert(file, tokens);
                }
            }
            if cancel.is_cancelled() {
                debug!("Configuration changed while extracting, starting over");
                continue;
            }

            self.candidates = candidates;
            self.publish(ResolvedConfiguration {
                version: self.current().version + 1,
                roots,
                dependencies: entry.dependencies,
                excluded,
            });

            self.config_broken = !resolution.errors.is_empty();
            if self.config_broken {
                self.transition(SessionState::Idle);
                return Err(SessionError::Config(resolution.errors));
            }
            return Ok(());
        }
    }

    /// Scans every root at once. None if the scan went stale.
    fn scan_all(&self, roots: &[RootPolicy], cancel: &CancelToken) -> Option<Vec<CandidateFile>> {
        let options = &self.options.scan;
        let outcomes: Vec<ScanOutcome> = thread::scope(|scope| {
            let handles: Vec<_> = roots
                .iter()
                .map(|policy| scope.spawn(move || scan_parallel(policy, options, cancel)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        warn!("Scan worker panicked, its root contributes nothing");
                        ScanOutcome::Complete(ScanReport::default())
                    })
                })
                .collect()
        });

        let mut files = Vec::new();
        for outcome in outcomes {
            match outcome {
                ScanOutcome::Complete(report) => files.extend(report.files),
                ScanOutcome::Stale => return None,
            }
        }
        Some(files)
    }

    fn excluded_paths(&self) -> BTreeSet<PathBuf> {
        let mut excluded: BTreeSet<PathBuf> = self.options.excluded.iter().cloned().collect();
        if let Some(path) = self.output.path() {
            let absolute = match std::env::current_dir() {
                Ok(cwd) if path.is_relative() => {
                    sieve_core::paths::resolve_against(&cwd, path).unwrap_or_else(|| path.to_path_buf())
                }
                _ => path.to_path_buf(),
            };
            excluded.insert(absolute);
        }
        excluded
    }

    fn extract(&self, file: &CandidateFile) -> Option<HashSet<String>> {
        match fs::read(&file.path) {
            Ok(contents) => Some(self.extractor.extract(file, &contents)),
            Err(e) => {
                warn!("{}", sieve_core::ScanWarning::unreadable(&file.path, e));
                None
            }
        }
    }

    /// A directory appeared. Extends every auto root that would walk into
    /// it, and notices bases that only now exist.
    fn grow_into(
        &mut self,
        dir: &Path,
        policies: &mut BTreeMap<RootId, RootPolicy>,
        replaced: &mut BTreeSet<RootId>,
        dirty: &mut BTreeSet<RootId>,
    ) -> usize {
        let mut changed = 0;
        let ids: Vec<RootId> = policies.keys().copied().collect();

        for id in ids {
            let Some(policy) = policies.get(&id).cloned() else {
                continue;
            };
            let root = policy.root().clone();

            if root.base.starts_with(dir) {
                debug!("Base of {} appeared", root);
                self.resync_watches = true;
                dirty.insert(id);
                continue;
            }

            match &root.mode {
                RootMode::Auto { .. } => {
                    if !policy.accepts_dir(dir) {
                        debug!("Ignoring new directory {} for {}", dir.display(), root.id);
                        continue;
                    }
                    self.transition(SessionState::Rescanning);

                    let mut ignores = policy.ignores().clone();
                    let warnings = self
                        .options
                        .scan
                        .ignore_loader
                        .clone()
                        .with_follow_symlinks(self.options.scan.follow_symlinks)
                        .load_into(&mut ignores, dir);
                    let policy = if ignores.files().len() != policy.ignores().files().len() {
                        let grown = policy.with_ignores(ignores);
                        policies.insert(id, grown.clone());
                        replaced.insert(id);
                        grown
                    } else {
                        policy
                    };
                    debug!(
                        "Scanning new directory {} ({} warnings)",
                        dir.display(),
                        warnings.len()
                    );

                    let excluded = self.current().excluded.clone();
                    for file in scan_subtree(&policy, dir, &self.options.scan) {
                        if is_excluded(&excluded, &file.path) {
                            continue;
                        }
                        if let Some(tokens) = self.extract(&file) {
                            if self.candidates.insert(&file, tokens) {
                                changed += 1;
                            }
                        }
                    }
                    self.new_dirs.push(dir.to_path_buf());
                }
                RootMode::Explicit { .. } if root.names_literal(dir) => {
                    // Resolved as a file while it didn't exist yet
                    debug!("{} named {}, which is now a directory", root, dir.display());
                    self.reclassify = true;
                }
                RootMode::Explicit { .. } => {
                    // Deeper patterns may now match inside the new directory
                    if root.relative(dir).is_some() && root.explicit_depth().unwrap_or(1) > 1 {
                        dirty.insert(id);
                    }
                }
            }
        }

        changed
    }

    /// Handles one file-level event. Returns how many files changed.
    fn apply_file_event(
        &mut self,
        event: &WatchEvent,
        policies: &BTreeMap<RootId, RootPolicy>,
        dirty: &mut BTreeSet<RootId>,
    ) -> usize {
        let path = &event.path;
        self.mark_ignore_file(path, policies, dirty);

        let exists = match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => return 0,
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!("{}", sieve_core::ScanWarning::unreadable(path, e));
                return 0;
            }
        };

        if !exists {
            if policies.values().any(|p| p.root().base.starts_with(path)) {
                self.resync_watches = true;
            }
            let removed = self.candidates.remove_under(path);
            if removed > 0 {
                debug!("Removed {} files under {}", removed, path.display());
            }
            return removed;
        }

        let accepting: Vec<&RootPolicy> = policies.values().filter(|p| p.accepts_file(path)).collect();
        if accepting.is_empty() {
            debug!("Ignoring change outside every root: {}", path.display());
            return 0;
        }

        let Some(tokens) = self.extract(&accepting[0].candidate(path.as_path())) else {
            return 0;
        };
        let mut changed = false;
        for policy in accepting {
            changed |= self
                .candidates
                .insert(&policy.candidate(path.as_path()), tokens.clone());
        }
        usize::from(changed)
    }

    /// Flags auto roots whose ignore rules this path may change.
    fn mark_ignore_file(
        &self,
        path: &Path,
        policies: &BTreeMap<RootId, RootPolicy>,
        dirty: &mut BTreeSet<RootId>,
    ) {
        if !self.options.scan.ignore_loader.is_ignore_file(path) {
            return;
        }
        let Some(dir) = path.parent() else {
            return;
        };
        for (id, policy) in policies {
            let root = policy.root();
            let inside = dir == root.base || policy.accepts_dir(dir);
            if root.is_auto() && inside {
                debug!("Ignore file {} changed, rescanning {}", path.display(), id);
                dirty.insert(*id);
            }
        }
    }

    /// Reloads a root's ignore rules and walks it again. None if a
    /// structural change made the scan stale; reconfiguration will follow.
    fn rescan_root(&mut self, policy: &RootPolicy) -> Option<(RootPolicy, usize)> {
        self.transition(SessionState::Rescanning);
        let cancel = CancelToken::new(self.structural_epoch());
        let (fresh, _) = RootPolicy::prepare(policy.root().clone(), &self.options.scan);

        let report = match scan_parallel(&fresh, &self.options.scan, &cancel) {
            ScanOutcome::Complete(report) => report,
            ScanOutcome::Stale => return None,
        };

        let before = self.candidates.len();
        self.candidates.detach_root(policy.root().id);
        let excluded = self.current().excluded.clone();
        for file in report.files.iter().filter(|f| !is_excluded(&excluded, &f.path)) {
            if let Some(tokens) = self.extract(file) {
                self.candidates.insert(file, tokens);
            }
        }

        let changed = before.abs_diff(self.candidates.len()).max(1);
        debug!("Rescanned {}: {} files", fresh.root(), report.files.len());
        Some((fresh, changed))
    }

    /// Hands the merged candidates to the builder and writes the result
    /// if it changed. Returns whether anything was written.
    fn merge(&mut self) -> Result<bool> {
        if self.config_broken {
            warn!("Skipping build until the configuration is fixed");
            self.transition(SessionState::Idle);
            return Ok(false);
        }

        self.transition(SessionState::Merging);
        let merged = self.candidates.merged();
        let output = match self.builder.build(&merged) {
            Ok(output) => output,
            Err(e) => {
                self.transition(SessionState::Idle);
                return Err(e.into());
            }
        };

        if self.last_output.as_deref() == Some(output.as_str()) {
            debug!("Output unchanged, not writing");
            self.transition(SessionState::Idle);
            return Ok(false);
        }

        let written = self.output.write(&output).map_err(|source| SessionError::Output {
            path: self.output.path().map(Path::to_path_buf),
            source,
        });
        self.transition(SessionState::Idle);
        written?;

        self.last_output = Some(output);
        Ok(true)
    }
}

fn is_excluded(excluded: &BTreeSet<PathBuf>, path: &Path) -> bool {
    excluded.iter().any(|e| path.starts_with(e))
}

/// Control over a session running in the background.
pub struct SessionHandle {
    tx: Sender<SessionMessage>,
    thread: Option<JoinHandle<()>>,
    snapshot: SnapshotHandle,
}

impl SessionHandle {
    pub fn snapshot(&self) -> &SnapshotHandle {
        &self.snapshot
    }

    /// Stops the session and waits for it to finish.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(SessionMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Session thread panicked");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(SessionMessage::Shutdown);
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::BuildError;
    use sieve_core::{BaseDirective, ConfigError, EntryConfiguration, SourceDirectives};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Loader that serves fixed directives and counts its calls.
    struct FixedLoader {
        directives: SourceDirectives,
        dependencies: BTreeSet<PathBuf>,
        calls: Arc<AtomicUsize>,
        /// Bumped on the first call to simulate a concurrent structural change.
        interfere: Option<Arc<AtomicU64>>,
    }

    impl EntryLoader for FixedLoader {
        fn load(&self) -> std::result::Result<EntryConfiguration, ConfigError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let (0, Some(epoch)) = (call, &self.interfere) {
                epoch.fetch_add(1, Ordering::SeqCst);
            }
            Ok(EntryConfiguration {
                directives: self.directives.clone(),
                dependencies: self.dependencies.clone(),
            })
        }
    }

    fn words(_: &CandidateFile, contents: &[u8]) -> HashSet<String> {
        String::from_utf8_lossy(contents)
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    type Builds = Arc<Mutex<Vec<Vec<String>>>>;

    fn recording_builder(builds: Builds) -> impl FnMut(&[String]) -> std::result::Result<String, BuildError> + Send {
        move |candidates: &[String]| {
            builds.lock().unwrap().push(candidates.to_vec());
            Ok(candidates.join("\n"))
        }
    }

    fn loader(root: &Path) -> FixedLoader {
        FixedLoader {
            directives: SourceDirectives::new(root),
            dependencies: BTreeSet::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            interfere: None,
        }
    }

    #[test]
    fn test_initialize_builds_sorted_candidates() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "p-4 flex").unwrap();
        fs::write(dir.path().join("b.html"), "flex block").unwrap();

        let builds: Builds = Arc::default();
        let mut session = WatchSession::new(
            loader(dir.path()),
            words,
            recording_builder(Arc::clone(&builds)),
            OutputTarget::Discard,
            SessionOptions::default(),
        );

        let summary = session.initialize().unwrap();
        assert!(summary.rebuilt);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.snapshot().version(), 1);
        assert_eq!(builds.lock().unwrap()[0], vec!["block", "flex", "p-4"]);
    }

    #[test]
    fn test_file_events_update_incrementally() {
        let dir = tempdir().unwrap();
        let page = dir.path().join("page.html");
        fs::write(&page, "flex").unwrap();

        let builds: Builds = Arc::default();
        let mut session = WatchSession::new(
            loader(dir.path()),
            words,
            recording_builder(Arc::clone(&builds)),
            OutputTarget::Discard,
            SessionOptions::default(),
        );
        session.initialize().unwrap();

        fs::write(&page, "grid").unwrap();
        let summary = session
            .handle_batch(vec![WatchEvent::new(&page, WatchEventKind::Modified)])
            .unwrap();
        assert!(!summary.reconfigured);
        assert!(summary.rebuilt);
        assert_eq!(session.candidates().merged(), vec!["grid"]);
        assert_eq!(session.snapshot().version(), 1);

        fs::remove_file(&page).unwrap();
        session
            .handle_batch(vec![WatchEvent::new(&page, WatchEventKind::Deleted)])
            .unwrap();
        assert!(session.candidates().is_empty());
    }

    #[test]
    fn test_unchanged_output_is_not_rewritten() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.html");
        fs::write(&a, "flex").unwrap();
        let b = dir.path().join("b.html");

        let mut session = WatchSession::new(
            loader(dir.path()),
            words,
            recording_builder(Arc::default()),
            OutputTarget::Discard,
            SessionOptions::default(),
        );
        session.initialize().unwrap();

        // New file, same candidates: the set changes, the output doesn't
        fs::write(&b, "flex").unwrap();
        let summary = session
            .handle_batch(vec![WatchEvent::new(&b, WatchEventKind::Created)])
            .unwrap();
        assert_eq!(summary.files_changed, 1);
        assert!(!summary.rebuilt);
    }

    #[test]
    fn test_ignored_and_excluded_events_do_nothing() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.css");
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        let hidden = dir.path().join("node_modules/x.html");

        let mut session = WatchSession::new(
            loader(dir.path()),
            words,
            recording_builder(Arc::default()),
            OutputTarget::File(output.clone()),
            SessionOptions::default(),
        );
        session.initialize().unwrap();
        assert!(output.exists());

        fs::write(&hidden, "flex").unwrap();
        fs::write(&output, "changed").unwrap();
        let summary = session
            .handle_batch(vec![
                WatchEvent::new(&hidden, WatchEventKind::Created),
                WatchEvent::new(&output, WatchEventKind::Modified),
            ])
            .unwrap();
        assert_eq!(summary, UpdateSummary::default());
        assert!(session.candidates().is_empty());
    }

    #[test]
    fn test_ignore_file_change_rescans_root() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "flex").unwrap();
        fs::write(dir.path().join("b.html"), "grid").unwrap();

        let mut session = WatchSession::new(
            loader(dir.path()),
            words,
            recording_builder(Arc::default()),
            OutputTarget::Discard,
            SessionOptions::default(),
        );
        session.initialize().unwrap();
        assert_eq!(session.candidates().len(), 2);

        let gitignore = dir.path().join(".gitignore");
        fs::write(&gitignore, "b.html\n").unwrap();
        let summary = session
            .handle_batch(vec![WatchEvent::new(&gitignore, WatchEventKind::Created)])
            .unwrap();

        assert_eq!(summary.rescanned_roots, 1);
        assert!(!summary.reconfigured);
        assert!(!session.candidates().contains(&dir.path().join("b.html")));
        assert_eq!(session.snapshot().version(), 2);
    }

    #[test]
    fn test_stale_reconfiguration_is_retried() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "flex").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let mut session = WatchSession::new(
            FixedLoader {
                directives: SourceDirectives::new(dir.path()),
                dependencies: BTreeSet::new(),
                calls: Arc::clone(&calls),
                interfere: None,
            },
            words,
            recording_builder(Arc::default()),
            OutputTarget::Discard,
            SessionOptions::default(),
        );
        session.loader.interfere = Some(session.structural_epoch());

        session.initialize().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.snapshot().version(), 1);
        assert_eq!(session.candidates().len(), 1);
    }

    #[test]
    fn test_directive_errors_are_reported_but_roots_survive() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "flex").unwrap();

        let mut fixed = loader(dir.path());
        fixed.directives = SourceDirectives::new(dir.path())
            .with_base(BaseDirective::Inherit)
            .with_source("./{broken");

        let builds: Builds = Arc::default();
        let mut session = WatchSession::new(
            fixed,
            words,
            recording_builder(Arc::clone(&builds)),
            OutputTarget::Discard,
            SessionOptions::default(),
        );

        let err = session.initialize().unwrap_err();
        assert!(matches!(err, SessionError::Config(ref errors) if errors.len() == 1));
        assert_eq!(session.current().roots.len(), 1);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(builds.lock().unwrap().is_empty());
    }

    #[test]
    fn test_spawned_session_shuts_down() {
        let dir = tempdir().unwrap();
        let mut session = WatchSession::new(
            loader(dir.path()),
            words,
            recording_builder(Arc::default()),
            OutputTarget::Discard,
            SessionOptions::default(),
        );
        session.initialize().unwrap();

        let handle = session.spawn().unwrap();
        assert_eq!(handle.snapshot().version(), 1);
        handle.shutdown();
    }
}
