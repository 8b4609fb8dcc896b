//! Sieve Watcher - scanning and live watch sessions
//!
//! This crate handles the file system side of things:
//! - Walking scan roots to find candidate files
//! - Watching roots and structural dependencies for changes
//! - Keeping the candidate set and the build output up to date
//!
//! Which files are in scope is decided by `sieve-core`; this crate only
//! walks, watches and reacts.

mod candidates;
mod collab;
mod debounce;
mod error;
mod scanner;
mod session;
mod watcher;

pub use candidates::CandidateSet;
pub use collab::{BuildError, CandidateExtractor, OutputTarget, StylesheetBuilder};
pub use debounce::{coalesce_dirs, Debouncer, DEFAULT_DEBOUNCE};
pub use error::{Result, SessionError};
pub use scanner::{
    scan_parallel, scan_subtree, CancelToken, RootPolicy, Scan, ScanIter, ScanOptions, ScanOutcome,
    ScanReport,
};
pub use session::{
    ResolvedConfiguration, SessionHandle, SessionMessage, SessionOptions, SessionState,
    SnapshotHandle, UpdateSummary, WatchSession,
};
pub use watcher::{translate, EventHook, FileWatcher, WatchEvent, WatchEventKind};
