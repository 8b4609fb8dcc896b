//! Scan roots and candidate files.
//!
//! A ScanRoot is where the scanner starts and the policy it applies. The
//! two modes are deliberately an enum: the scanner and the watch session
//! match on it, so a new mode can't be half-handled.

use crate::pattern::Glob;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Identifies a root within one resolved configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RootId(pub u32);

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a root decides what's in scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RootMode {
    /// Recursive walk filtered by ignore files, the directory denylist
    /// and the extension policy. `patterns` narrows the walk further when
    /// non-empty; `extensions` lists extensions the pattern named
    /// explicitly, which bypass the extension denylist.
    Auto {
        patterns: Vec<Glob>,
        extensions: BTreeSet<String>,
    },

    /// Direct expansion of the patterns against the filesystem. Every
    /// match is included, no questions asked.
    Explicit { patterns: Vec<Glob> },
}

/// A directory to scan and the policy to scan it with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRoot {
    pub id: RootId,
    /// Absolute directory the patterns are relative to.
    pub base: PathBuf,
    pub mode: RootMode,
    /// The source directive this root came from, for diagnostics.
    pub directive: String,
}

impl ScanRoot {
    /// Creates an auto-detected root covering everything under `base`.
    pub fn auto(id: RootId, base: impl Into<PathBuf>, directive: impl Into<String>) -> Self {
        Self {
            id,
            base: base.into(),
            mode: RootMode::Auto {
                patterns: Vec::new(),
                extensions: BTreeSet::new(),
            },
            directive: directive.into(),
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self.mode, RootMode::Auto { .. })
    }

    /// The path relative to this root's base, if it's underneath it.
    pub fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.base)
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty())
    }

    /// Checks the root's own patterns against a file path.
    ///
    /// Auto roots without patterns accept everything below the base.
    /// This says nothing about ignore rules or extensions.
    pub fn pattern_matches(&self, path: &Path) -> bool {
        let Some(relative) = self.relative(path) else {
            return false;
        };
        match &self.mode {
            RootMode::Auto { patterns, .. } => {
                patterns.is_empty() || patterns.iter().any(|g| g.matches(relative))
            }
            RootMode::Explicit { patterns } => patterns.iter().any(|g| g.matches(relative)),
        }
    }

    /// Does a literal explicit pattern name exactly this path?
    pub fn names_literal(&self, path: &Path) -> bool {
        let Some(relative) = self.relative(path) else {
            return false;
        };
        match &self.mode {
            RootMode::Explicit { patterns } => patterns
                .iter()
                .any(|g| g.is_literal() && g.matches(relative)),
            RootMode::Auto { .. } => false,
        }
    }

    /// How deep an explicit expansion needs to look.
    pub fn explicit_depth(&self) -> Option<usize> {
        match &self.mode {
            RootMode::Auto { .. } => None,
            RootMode::Explicit { patterns } => patterns.iter().map(Glob::segment_count).max(),
        }
    }
}

impl fmt::Display for ScanRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (mode, patterns) = match &self.mode {
            RootMode::Auto { patterns, .. } => ("auto", patterns),
            RootMode::Explicit { patterns } => ("explicit", patterns),
        };
        write!(f, "{} {} {}", self.id, mode, self.base.display())?;
        if !patterns.is_empty() {
            let list: Vec<&str> = patterns.iter().map(Glob::as_str).collect();
            write!(f, " [{}]", list.join(", "))?;
        }
        Ok(())
    }
}

/// A file the scanner decided is in scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub root: RootId,
    /// True when the file came from an explicit root.
    pub explicit: bool,
}
