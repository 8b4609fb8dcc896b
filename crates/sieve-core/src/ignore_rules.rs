//! Ignore files and the built-in directory denylist.
//!
//! The loader walks a scan root from the top down, picking up every ignore
//! file it finds. Each file's rules are scoped to the directory holding it.
//! Nothing above the root is ever read.

use crate::error::ScanWarning;
use crate::pattern::{evaluate, IgnoreRule, Verdict};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directory names never descended into by auto-detected roots.
///
/// Version control metadata and dependency caches.
pub fn default_ignored_dirs() -> &'static [&'static str] {
    &[
        ".git",
        ".hg",
        ".svn",
        ".jj",
        ".sl",
        "node_modules",
        "bower_components",
        ".yarn",
        ".pnpm-store",
        "__pycache__",
        ".venv",
    ]
}

/// All ignore rules that apply below one scan root.
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    root: PathBuf,
    rules: Vec<IgnoreRule>,
    denied_dirs: BTreeSet<String>,
    files: Vec<PathBuf>,
    next_order: usize,
}

impl IgnoreSet {
    /// Creates an empty set with the default directory denylist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_denied_dirs(root, default_ignored_dirs().iter().copied())
    }

    /// Creates an empty set with a custom directory denylist.
    pub fn with_denied_dirs<'a>(
        root: impl Into<PathBuf>,
        denied: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            root: root.into(),
            rules: Vec::new(),
            denied_dirs: denied.into_iter().map(str::to_string).collect(),
            files: Vec::new(),
            next_order: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rules in ascending source order.
    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    /// Ignore files that contributed rules (or tried to).
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn is_denylisted_dir(&self, name: &str) -> bool {
        self.denied_dirs.contains(name)
    }

    /// Parses an ignore file's contents and appends its rules.
    ///
    /// Malformed lines are skipped and reported; the rest still apply.
    pub fn add_file(&mut self, file: &Path, contents: &str) -> Vec<ScanWarning> {
        let scope = file.parent().unwrap_or(&self.root).to_path_buf();
        let mut warnings = Vec::new();

        for (index, line) in contents.lines().enumerate() {
            match IgnoreRule::parse(line, &scope, self.next_order) {
                Ok(Some(rule)) => {
                    self.rules.push(rule);
                    self.next_order += 1;
                }
                Ok(None) => {}
                Err(source) => {
                    let warning = ScanWarning::MalformedIgnoreLine {
                        path: file.to_path_buf(),
                        line: index + 1,
                        source,
                    };
                    warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }

        self.files.push(file.to_path_buf());
        warnings
    }

    /// Checks a single entry, assuming its ancestors were already checked.
    ///
    /// This is what a pruning walk wants: if a parent directory had been
    /// excluded, we'd never have reached this entry.
    pub fn check_entry(&self, path: &Path, is_dir: bool) -> bool {
        if is_dir && path != self.root {
            let denied = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| self.denied_dirs.contains(name));
            if denied {
                return true;
            }
        }
        evaluate(&self.rules, path, is_dir) == Some(Verdict::Ignore)
    }

    /// Full check for a path anywhere under the root.
    ///
    /// Walks every ancestor between the root and the path, so a file
    /// inside an excluded directory is excluded too, whatever its own
    /// rules say. Paths outside the root are never ignored.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };

        let parts: Vec<_> = relative.components().collect();
        let mut current = self.root.clone();
        for (index, part) in parts.iter().enumerate() {
            current.push(part);
            let last = index + 1 == parts.len();
            if self.check_entry(&current, if last { is_dir } else { true }) {
                return true;
            }
        }
        false
    }
}

/// Discovers ignore files below a scan root.
#[derive(Debug, Clone)]
pub struct IgnoreLoader {
    file_names: Vec<String>,
    denied_dirs: Vec<String>,
    follow_symlinks: bool,
}

impl Default for IgnoreLoader {
    fn default() -> Self {
        Self {
            file_names: vec![".gitignore".to_string(), ".ignore".to_string()],
            denied_dirs: default_ignored_dirs().iter().map(|d| d.to_string()).collect(),
            follow_symlinks: false,
        }
    }
}

impl IgnoreLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the ignore file names to look for.
    pub fn with_file_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.file_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the built-in directory denylist.
    pub fn with_denied_dirs<S: Into<String>>(mut self, dirs: impl IntoIterator<Item = S>) -> Self {
        self.denied_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Is this file one of the ignore files we read?
    pub fn is_ignore_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.file_names.iter().any(|f| f == name))
    }

    /// Loads every ignore file from `root` down.
    ///
    /// Missing files are fine. Unreadable ones are logged and skipped.
    pub fn load(&self, root: &Path) -> (IgnoreSet, Vec<ScanWarning>) {
        let mut set = IgnoreSet::with_denied_dirs(root, self.denied_dirs.iter().map(String::as_str));
        let warnings = self.load_into(&mut set, root);
        debug!(
            "Loaded {} ignore rules from {} files under {}",
            set.rules.len(),
            set.files.len(),
            root.display()
        );
        (set, warnings)
    }

    /// Loads ignore files found in `dir` and below into an existing set.
    ///
    /// Used when a new directory shows up under a root that's already
    /// being watched. Does nothing if `dir` is itself excluded.
    pub fn load_into(&self, set: &mut IgnoreSet, dir: &Path) -> Vec<ScanWarning> {
        let mut warnings = Vec::new();

        if dir != set.root && set.is_ignored(dir, true) {
            return warnings;
        }

        let mut walker = WalkDir::new(dir)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(dir).to_path_buf();
                    let warning = ScanWarning::unreadable(path, &e);
                    warn!("{}", warning);
                    warnings.push(warning);
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            // Parent rules are already loaded, so this sees them
            if entry.depth() > 0 && set.check_entry(entry.path(), true) {
                walker.skip_current_dir();
                continue;
            }

            self.read_dir_files(set, entry.path(), &mut warnings);
        }

        warnings
    }

    fn read_dir_files(&self, set: &mut IgnoreSet, dir: &Path, warnings: &mut Vec<ScanWarning>) {
        for name in &self.file_names {
            let path = dir.join(name);
            match fs::read_to_string(&path) {
                Ok(contents) => {
                    debug!("Reading ignore file {}", path.display());
                    warnings.extend(set.add_file(&path, &contents));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    let warning = ScanWarning::UnreadableIgnoreFile { path, source };
                    warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_ignore_files_are_fine() {
        let dir = tempdir().unwrap();
        let (set, warnings) = IgnoreLoader::new().load(dir.path());
        assert!(set.rules().is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_rules_scoped_to_their_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::write(root.join("a/.gitignore"), "secret.html\n").unwrap();

        let (set, _) = IgnoreLoader::new().load(root);
        assert!(set.is_ignored(&root.join("a/secret.html"), false));
        assert!(set.is_ignored(&root.join("a/deep/secret.html"), false));
        assert!(!set.is_ignored(&root.join("b/secret.html"), false));
    }

    #[test]
    fn test_does_not_read_above_root() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "*.html\n").unwrap();
        let root = dir.path().join("project");
        fs::create_dir_all(&root).unwrap();

        let (set, _) = IgnoreLoader::new().load(&root);
        assert!(set.files().is_empty());
        assert!(!set.is_ignored(&root.join("index.html"), false));
    }

    #[test]
    fn test_excluded_directory_hides_its_children() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(".gitignore"), "/generated\n!/generated/keep.html\n").unwrap();

        let (set, _) = IgnoreLoader::new().load(root);
        // Like git, a file can't be re-included once its parent is out
        assert!(set.is_ignored(&root.join("generated/keep.html"), false));
    }

    #[test]
    fn test_negation_reincludes_file() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(".gitignore"), "*.html\n!index.html\n").unwrap();

        let (set, _) = IgnoreLoader::new().load(root);
        assert!(set.is_ignored(&root.join("about.html"), false));
        assert!(!set.is_ignored(&root.join("index.html"), false));
    }

    #[test]
    fn test_nested_file_overrides_parent() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join(".gitignore"), "*.md\n").unwrap();
        fs::write(root.join("docs/.gitignore"), "!guide.md\n").unwrap();

        let (set, _) = IgnoreLoader::new().load(root);
        assert!(set.is_ignored(&root.join("README.md"), false));
        assert!(!set.is_ignored(&root.join("docs/guide.md"), false));
    }

    #[test]
    fn test_denylisted_dirs() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let set = IgnoreSet::new(root);
        assert!(set.is_denylisted_dir("node_modules"));
        assert!(set.is_ignored(&root.join("node_modules/lib/index.html"), false));
        assert!(set.is_ignored(&root.join("a/b/.git/config"), false));
        // The root itself is never denied, even if it is named like one
        let inside = IgnoreSet::new(root.join("node_modules"));
        assert!(!inside.is_ignored(&root.join("node_modules/lib/index.html"), false));
    }

    #[test]
    fn test_skips_ignore_files_in_excluded_dirs() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/.gitignore"), "*\n").unwrap();

        let (set, _) = IgnoreLoader::new().load(root);
        assert!(set.files().is_empty());
    }

    #[test]
    fn test_malformed_line_is_reported_and_skipped() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(".gitignore"), "broken[\n*.log\n").unwrap();

        let (set, warnings) = IgnoreLoader::new().load(root);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            warnings[0],
            ScanWarning::MalformedIgnoreLine { line: 1, .. }
        ));
        assert!(set.is_ignored(&root.join("debug.log"), false));
    }

    #[test]
    fn test_load_into_new_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let loader = IgnoreLoader::new();
        let (mut set, _) = loader.load(root);

        fs::create_dir_all(root.join("fresh")).unwrap();
        fs::write(root.join("fresh/.ignore"), "draft.html\n").unwrap();
        loader.load_into(&mut set, &root.join("fresh"));

        assert!(set.is_ignored(&root.join("fresh/draft.html"), false));
        assert!(loader.is_ignore_file(&root.join("fresh/.ignore")));
    }
}
