//! The live candidate set.
//!
//! Maps every in-scope file to the class-name candidates extracted from
//! it. A file may belong to several roots at once; it stays in the set
//! until the last of them lets go.

use sieve_core::{CandidateFile, RootId};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct Contribution {
    roots: BTreeSet<RootId>,
    explicit: bool,
    tokens: HashSet<String>,
}

/// Per-file candidates, merged on demand.
#[derive(Debug, Default, Clone)]
pub struct CandidateSet {
    files: HashMap<PathBuf, Contribution>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the candidates of a file.
    ///
    /// Returns true when the merged output could have changed: the file
    /// is new or its candidates differ from last time.
    pub fn insert(&mut self, file: &CandidateFile, tokens: HashSet<String>) -> bool {
        match self.files.get_mut(&file.path) {
            Some(existing) => {
                existing.roots.insert(file.root);
                existing.explicit |= file.explicit;
                if existing.tokens == tokens {
                    false
                } else {
                    existing.tokens = tokens;
                    true
                }
            }
            None => {
                self.files.insert(
                    file.path.clone(),
                    Contribution {
                        roots: BTreeSet::from([file.root]),
                        explicit: file.explicit,
                        tokens,
                    },
                );
                true
            }
        }
    }

    /// Forgets a file. Returns true if it was there.
    pub fn remove(&mut self, path: &Path) -> bool {
        self.files.remove(path).is_some()
    }

    /// Forgets `dir` and every file below it. Returns how many went.
    pub fn remove_under(&mut self, dir: &Path) -> usize {
        let before = self.files.len();
        self.files.retain(|path, _| !path.starts_with(dir));
        before - self.files.len()
    }

    /// Drops a root's claim on every file. Files no other root claims are
    /// removed; returns how many.
    pub fn detach_root(&mut self, root: RootId) -> usize {
        let before = self.files.len();
        self.files.retain(|_, contribution| {
            contribution.roots.remove(&root);
            !contribution.roots.is_empty()
        });
        before - self.files.len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Did this file come in through an explicit root?
    pub fn is_explicit(&self, path: &Path) -> bool {
        self.files.get(path).is_some_and(|c| c.explicit)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Every file in the set, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// All candidates from all files, deduplicated and sorted.
    pub fn merged(&self) -> Vec<String> {
        self.files
            .values()
            .flat_map(|c| c.tokens.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
