//! Filesystem scanning.
//!
//! Walks a scan root and yields the files it puts in scope. Auto roots use
//! the `ignore` walker with all of its own filtering switched off; our
//! [`IgnoreSet`] decides what gets pruned. Explicit roots are a shallow
//! `walkdir` expansion of their patterns and skip every filter.

use ignore::{ParallelVisitor, ParallelVisitorBuilder, WalkBuilder, WalkState};
use sieve_core::{
    CandidateFile, ExtensionPolicy, IgnoreLoader, IgnoreSet, RootMode, ScanRoot, ScanWarning,
};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Options for scanning.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Follow symbolic links when walking directories.
    pub follow_symlinks: bool,

    /// Walker threads for auto roots. 0 picks a number automatically.
    pub threads: usize,

    /// Extensions auto roots skip.
    pub extensions: ExtensionPolicy,

    /// Which ignore files to read and which directories to deny.
    pub ignore_loader: IgnoreLoader,
}

/// A scan root with its ignore rules loaded.
///
/// Cheap to clone; everything inside is shared.
#[derive(Debug, Clone)]
pub struct RootPolicy {
    root: Arc<ScanRoot>,
    ignores: Arc<IgnoreSet>,
    extensions: Arc<ExtensionPolicy>,
}

impl RootPolicy {
    /// Loads ignore files for auto roots. Explicit roots don't need any.
    pub fn prepare(root: ScanRoot, options: &ScanOptions) -> (Self, Vec<ScanWarning>) {
        let (ignores, warnings) = match &root.mode {
            RootMode::Auto { .. } => options
                .ignore_loader
                .clone()
                .with_follow_symlinks(options.follow_symlinks)
                .load(&root.base),
            RootMode::Explicit { .. } => (
                IgnoreSet::with_denied_dirs(&root.base, std::iter::empty()),
                Vec::new(),
            ),
        };

        let policy = Self {
            root: Arc::new(root),
            ignores: Arc::new(ignores),
            extensions: Arc::new(options.extensions.clone()),
        };
        (policy, warnings)
    }

    pub fn root(&self) -> &ScanRoot {
        &self.root
    }

    pub fn ignores(&self) -> &IgnoreSet {
        &self.ignores
    }

    /// Same root, different ignore rules.
    pub fn with_ignores(&self, ignores: IgnoreSet) -> Self {
        Self {
            root: Arc::clone(&self.root),
            ignores: Arc::new(ignores),
            extensions: Arc::clone(&self.extensions),
        }
    }

    /// Would a walk of this root descend into `dir`?
    ///
    /// Only auto roots grow with new directories; explicit roots always
    /// answer no.
    pub fn accepts_dir(&self, dir: &Path) -> bool {
        match &self.root.mode {
            RootMode::Auto { .. } => {
                self.root.relative(dir).is_some() && !self.ignores.is_ignored(dir, true)
            }
            RootMode::Explicit { .. } => false,
        }
    }

    /// Is this file in scope for this root?
    pub fn accepts_file(&self, path: &Path) -> bool {
        match &self.root.mode {
            RootMode::Auto { extensions, .. } => {
                self.root.pattern_matches(path)
                    && self.extensions.allows(path, extensions)
                    && !self.ignores.is_ignored(path, false)
            }
            RootMode::Explicit { .. } => self.root.pattern_matches(path),
        }
    }

    /// Wraps a path in a CandidateFile for this root.
    pub fn candidate(&self, path: impl Into<PathBuf>) -> CandidateFile {
        CandidateFile {
            path: path.into(),
            root: self.root.id,
            explicit: !self.root.is_auto(),
        }
    }

    /// The file-level checks a pruning walk still has to make; ignore
    /// rules were already applied on the way down.
    fn passes_file_filters(&self, path: &Path) -> bool {
        match &self.root.mode {
            RootMode::Auto { extensions, .. } => {
                self.root.pattern_matches(path) && self.extensions.allows(path, extensions)
            }
            RootMode::Explicit { .. } => self.root.pattern_matches(path),
        }
    }
}

/// Lets a long scan notice that its results are no longer wanted.
///
/// Remembers the epoch it was created at; bumping the shared counter
/// cancels every token taken before the bump.
#[derive(Debug, Clone)]
pub struct CancelToken {
    epoch: Arc<AtomicU64>,
    observed: u64,
}

impl CancelToken {
    pub fn new(epoch: Arc<AtomicU64>) -> Self {
        let observed = epoch.load(Ordering::SeqCst);
        Self { epoch, observed }
    }

    /// A token nothing can cancel.
    pub fn never() -> Self {
        Self::new(Arc::new(AtomicU64::new(0)))
    }

    pub fn is_cancelled(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) != self.observed
    }
}

/// Files and warnings from one finished scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub files: Vec<CandidateFile>,
    pub warnings: Vec<ScanWarning>,
}

/// Result of a cancellable scan.
#[derive(Debug)]
pub enum ScanOutcome {
    Complete(ScanReport),
    /// Superseded while running. The partial results were dropped.
    Stale,
}

/// A lazy, restartable scan of one root.
///
/// Every call to [`Scan::iter`] walks the filesystem again.
///
/// # Example
///
/// ```no_run
/// use sieve_core::{RootId, ScanRoot};
/// use sieve_watcher::{RootPolicy, Scan, ScanOptions};
///
/// let options = ScanOptions::default();
/// let (policy, _warnings) = RootPolicy::prepare(ScanRoot::auto(RootId(0), "./src", "./src"), &options);
/// for file in &Scan::new(policy, options) {
///     println!("{}", file.path.display());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Scan {
    policy: RootPolicy,
    options: ScanOptions,
    start: PathBuf,
}

impl Scan {
    pub fn new(policy: RootPolicy, options: ScanOptions) -> Self {
        let start = policy.root().base.clone();
        Self {
            policy,
            options,
            start,
        }
    }

    /// Scans only `dir`, which must lie inside an auto root.
    pub fn subtree(policy: RootPolicy, dir: impl Into<PathBuf>, options: ScanOptions) -> Self {
        Self {
            policy,
            options,
            start: dir.into(),
        }
    }

    pub fn iter(&self) -> ScanIter {
        let inner = match &self.policy.root().mode {
            RootMode::Auto { .. } => {
                if self.start != self.policy.root().base && !self.policy.accepts_dir(&self.start) {
                    Inner::Empty
                } else {
                    let walk = auto_builder(&self.policy, &self.start, &self.options).build();
                    Inner::Auto(walk)
                }
            }
            RootMode::Explicit { .. } => Inner::Explicit(explicit_walk(&self.policy, &self.options)),
        };
        ScanIter {
            policy: self.policy.clone(),
            inner,
        }
    }
}

impl<'a> IntoIterator for &'a Scan {
    type Item = CandidateFile;
    type IntoIter = ScanIter;

    fn into_iter(self) -> ScanIter {
        self.iter()
    }
}

type ExplicitFilter = Box<dyn FnMut(&walkdir::DirEntry) -> bool + Send>;

enum Inner {
    Auto(ignore::Walk),
    Explicit(walkdir::FilterEntry<walkdir::IntoIter, ExplicitFilter>),
    Empty,
}

/// Iterator over the files of one scan.
pub struct ScanIter {
    policy: RootPolicy,
    inner: Inner,
}

impl Iterator for ScanIter {
    type Item = CandidateFile;

    fn next(&mut self) -> Option<CandidateFile> {
        loop {
            match &mut self.inner {
                Inner::Empty => return None,
                Inner::Auto(walk) => match walk.next()? {
                    Ok(entry) => {
                        if let Some(file) = self.policy.auto_candidate(&entry) {
                            return Some(file);
                        }
                    }
                    Err(e) if is_missing(&e) => debug!("Nothing to scan: {}", e),
                    Err(e) => {
                        warn!("{}", walk_warning(&self.policy, &e));
                    }
                },
                Inner::Explicit(walk) => match walk.next()? {
                    Ok(entry) => {
                        if let Some(file) = self.policy.explicit_candidate(&entry) {
                            return Some(file);
                        }
                    }
                    Err(e) => report_walkdir_error(&e),
                },
            }
        }
    }
}

impl RootPolicy {
    fn auto_candidate(&self, entry: &ignore::DirEntry) -> Option<CandidateFile> {
        let path = entry.path();
        let is_file = match entry.file_type() {
            Some(t) if t.is_file() => true,
            Some(t) if t.is_symlink() => path.is_file(),
            _ => false,
        };
        (is_file && self.passes_file_filters(path)).then(|| self.candidate(path))
    }

    fn explicit_candidate(&self, entry: &walkdir::DirEntry) -> Option<CandidateFile> {
        let path = entry.path();
        let is_file = entry.file_type().is_file()
            || (entry.file_type().is_symlink() && path.is_file());
        (is_file && self.passes_file_filters(path)).then(|| self.candidate(path))
    }
}

/// Prunes ignored entries during an auto walk, and remembers visited
/// directories when symlinks are followed so a link cycle can't loop.
struct EntryFilter {
    policy: RootPolicy,
    visited: Option<Mutex<HashSet<PathBuf>>>,
}

impl EntryFilter {
    fn keep(&self, entry: &ignore::DirEntry) -> bool {
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());

        if entry.depth() > 0 && self.policy.ignores.check_entry(entry.path(), is_dir) {
            return false;
        }

        if let (true, Some(visited)) = (is_dir, &self.visited) {
            if let Ok(canonical) = entry.path().canonicalize() {
                let Ok(mut visited) = visited.lock() else {
                    return true;
                };
                if !visited.insert(canonical) {
                    debug!("Already visited {}, skipping", entry.path().display());
                    return false;
                }
            }
        }

        true
    }
}

fn auto_builder(policy: &RootPolicy, start: &Path, options: &ScanOptions) -> WalkBuilder {
    let mut builder = WalkBuilder::new(start);
    builder
        .standard_filters(false)
        .follow_links(options.follow_symlinks)
        .threads(options.threads);

    let filter = EntryFilter {
        policy: policy.clone(),
        visited: options.follow_symlinks.then(|| Mutex::new(HashSet::new())),
    };
    builder.filter_entry(move |entry| filter.keep(entry));
    builder
}

fn explicit_walk(
    policy: &RootPolicy,
    options: &ScanOptions,
) -> walkdir::FilterEntry<walkdir::IntoIter, ExplicitFilter> {
    let root = Arc::clone(&policy.root);
    let depth = root.explicit_depth().unwrap_or(1);

    // Only descend into directories some pattern can still match
    let filter: ExplicitFilter = Box::new(move |entry: &walkdir::DirEntry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        let level = entry.depth() - 1;
        entry.depth() < depth
            && match &root.mode {
                RootMode::Explicit { patterns } => {
                    patterns.iter().any(|g| g.matches_segment(level, &name))
                }
                RootMode::Auto { .. } => false,
            }
    });

    WalkDir::new(&policy.root.base)
        .min_depth(1)
        .max_depth(depth)
        .follow_links(options.follow_symlinks)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(filter)
}

fn report_walkdir_error(e: &walkdir::Error) {
    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
    if e.io_error().map(|io| io.kind()) == Some(ErrorKind::NotFound) {
        debug!("Nothing to expand at {}", path.display());
    } else {
        warn!("{}", ScanWarning::unreadable(path, e));
    }
}

fn error_path(e: &ignore::Error) -> Option<PathBuf> {
    match e {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::WithDepth { err, .. } => error_path(err),
        ignore::Error::WithLineNumber { err, .. } => error_path(err),
        ignore::Error::Loop { child, .. } => Some(child.clone()),
        _ => None,
    }
}

/// Roots may point at directories that don't exist yet.
fn is_missing(e: &ignore::Error) -> bool {
    e.io_error().map(|io| io.kind()) == Some(ErrorKind::NotFound)
}

fn walk_warning(policy: &RootPolicy, e: &ignore::Error) -> ScanWarning {
    let path = error_path(e).unwrap_or_else(|| policy.root().base.clone());
    ScanWarning::unreadable(path, e)
}

/// Scans a whole root, in parallel for auto roots.
///
/// Each walker thread keeps its own buffer; buffers are concatenated when
/// the walk ends. Returns [`ScanOutcome::Stale`] if `cancel` fires first.
pub fn scan_parallel(policy: &RootPolicy, options: &ScanOptions, cancel: &CancelToken) -> ScanOutcome {
    let report = match &policy.root().mode {
        RootMode::Auto { .. } => {
            let files = Mutex::new(Vec::new());
            let warnings = Mutex::new(Vec::new());
            let mut collector = Collector {
                policy,
                cancel,
                files: &files,
                warnings: &warnings,
            };
            auto_builder(policy, &policy.root().base, options)
                .build_parallel()
                .visit(&mut collector);

            ScanReport {
                files: files.into_inner().unwrap_or_default(),
                warnings: warnings.into_inner().unwrap_or_default(),
            }
        }
        RootMode::Explicit { .. } => {
            let scan = Scan::new(policy.clone(), options.clone());
            ScanReport {
                files: scan.iter().collect(),
                warnings: Vec::new(),
            }
        }
    };

    if cancel.is_cancelled() {
        debug!("Scan of {} went stale", policy.root().base.display());
        return ScanOutcome::Stale;
    }

    debug!(
        "Scanned {}: {} files, {} warnings",
        policy.root(),
        report.files.len(),
        report.warnings.len()
    );
    ScanOutcome::Complete(report)
}

/// Scans a directory that just appeared inside an auto root.
pub fn scan_subtree(policy: &RootPolicy, dir: &Path, options: &ScanOptions) -> Vec<CandidateFile> {
    if !policy.accepts_dir(dir) {
        return Vec::new();
    }
    Scan::subtree(policy.clone(), dir, options.clone())
        .iter()
        .collect()
}

struct Collector<'s> {
    policy: &'s RootPolicy,
    cancel: &'s CancelToken,
    files: &'s Mutex<Vec<CandidateFile>>,
    warnings: &'s Mutex<Vec<ScanWarning>>,
}

impl<'s> ParallelVisitorBuilder<'s> for Collector<'s> {
    fn build(&mut self) -> Box<dyn ParallelVisitor + 's> {
        Box::new(Worker {
            policy: self.policy,
            cancel: self.cancel,
            files: self.files,
            warnings: self.warnings,
            found: Vec::new(),
            problems: Vec::new(),
        })
    }
}

struct Worker<'s> {
    policy: &'s RootPolicy,
    cancel: &'s CancelToken,
    files: &'s Mutex<Vec<CandidateFile>>,
    warnings: &'s Mutex<Vec<ScanWarning>>,
    found: Vec<CandidateFile>,
    problems: Vec<ScanWarning>,
}

impl ParallelVisitor for Worker<'_> {
    fn visit(&mut self, entry: Result<ignore::DirEntry, ignore::Error>) -> WalkState {
        if self.cancel.is_cancelled() {
            return WalkState::Quit;
        }
        match entry {
            Ok(entry) => {
                if let Some(file) = self.policy.auto_candidate(&entry) {
                    self.found.push(file);
                }
            }
            Err(e) if is_missing(&e) => debug!("Nothing to scan: {}", e),
            Err(e) => {
                let warning = walk_warning(self.policy, &e);
                warn!("{}", warning);
                self.problems.push(warning);
            }
        }
        WalkState::Continue
    }
}

impl Drop for Worker<'_> {
    fn drop(&mut self) {
        if let Ok(mut files) = self.files.lock() {
            files.append(&mut self.found);
        }
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.append(&mut self.problems);
        }
    }
}
