//! Entry configuration.
//!
//! The entry configuration says where to look for sources and which files
//! it depends on. The watch session only cares about the result: a set of
//! directives and a flat list of structural dependencies. [`EntryLoader`]
//! is that seam.
//!
//! [`ManifestLoader`] is the JSON flavour used by the command line:
//!
//! ```json
//! {
//!   "source": "./src",
//!   "sources": ["./components", "./pages/**/*.html"],
//!   "imports": ["../shared/sieve.json"],
//!   "references": ["./theme.css"]
//! }
//! ```
//!
//! `source` may be `"none"` to disable the implicit root. Imported
//! manifests contribute their `sources`, resolved against their own
//! directory. Every manifest visited and every referenced file is a
//! structural dependency.

use crate::error::ConfigError;
use crate::paths::resolve_against;
use crate::resolver::{BaseDirective, SourceDirective, SourceDirectives};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sentinel for a disabled implicit root.
pub const SOURCE_NONE: &str = "none";

/// Parsed directives plus the files that, when changed, invalidate them.
#[derive(Debug, Clone)]
pub struct EntryConfiguration {
    pub directives: SourceDirectives,
    pub dependencies: BTreeSet<PathBuf>,
}

/// Produces the entry configuration. Called again on every structural
/// change, so implementations must re-read from disk each time.
pub trait EntryLoader: Send {
    fn load(&self) -> Result<EntryConfiguration, ConfigError>;
}

/// On-disk manifest format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryManifest {
    /// Base directory override, or `"none"`. Only read from the entry
    /// manifest.
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub sources: Vec<String>,

    /// Other manifests whose sources are pulled in.
    #[serde(default)]
    pub imports: Vec<PathBuf>,

    /// Plain files whose changes require a full reconfiguration.
    #[serde(default)]
    pub references: Vec<PathBuf>,
}

impl EntryManifest {
    /// Reads and parses a manifest file.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::unreadable(path, e))?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::ManifestParse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn base_directive(&self) -> BaseDirective {
        match self.source.as_deref() {
            None => BaseDirective::Inherit,
            Some(SOURCE_NONE) => BaseDirective::Disabled,
            Some(path) => BaseDirective::Path(PathBuf::from(path)),
        }
    }
}

/// Loads an [`EntryManifest`] and everything it imports.
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    entry: PathBuf,
}

impl ManifestLoader {
    pub fn new(entry: impl Into<PathBuf>) -> Self {
        Self {
            entry: entry.into(),
        }
    }

    pub fn entry(&self) -> &Path {
        &self.entry
    }

    fn absolute_entry(&self) -> Result<PathBuf, ConfigError> {
        let cwd = std::env::current_dir().map_err(|e| ConfigError::unreadable(&self.entry, e))?;
        resolve_against(&cwd, &self.entry).ok_or_else(|| {
            ConfigError::unreadable(
                &self.entry,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path escapes root"),
            )
        })
    }
}

impl EntryLoader for ManifestLoader {
    fn load(&self) -> Result<EntryConfiguration, ConfigError> {
        let entry = self.absolute_entry()?;
        let entry_dir = entry.parent().unwrap_or(Path::new("/")).to_path_buf();
        let manifest = EntryManifest::read(&entry)?;

        let mut directives = SourceDirectives::new(&entry_dir).with_base(manifest.base_directive());
        let mut dependencies = BTreeSet::new();
        dependencies.insert(entry.clone());

        let mut visited = BTreeSet::new();
        visited.insert(entry.clone());
        collect(&entry, &manifest, &mut directives, &mut dependencies, &mut visited)?;

        debug!(
            "Loaded {} with {} sources and {} structural dependencies",
            entry.display(),
            directives.sources.len(),
            dependencies.len()
        );

        Ok(EntryConfiguration {
            directives,
            dependencies,
        })
    }
}

fn collect(
    path: &Path,
    manifest: &EntryManifest,
    directives: &mut SourceDirectives,
    dependencies: &mut BTreeSet<PathBuf>,
    visited: &mut BTreeSet<PathBuf>,
) -> Result<(), ConfigError> {
    let dir = path.parent().unwrap_or(Path::new("/"));

    for source in &manifest.sources {
        directives
            .sources
            .push(SourceDirective::new(dir, source.clone()));
    }

    for reference in &manifest.references {
        let referenced = resolve_dependency(dir, reference)?;
        fs::metadata(&referenced).map_err(|e| ConfigError::unreadable(&referenced, e))?;
        dependencies.insert(referenced);
    }

    for import in &manifest.imports {
        let imported = resolve_dependency(dir, import)?;
        // Cycles are fine, each manifest is read once
        if !visited.insert(imported.clone()) {
            continue;
        }
        let nested = EntryManifest::read(&imported)?;
        dependencies.insert(imported.clone());
        collect(&imported, &nested, directives, dependencies, visited)?;
    }

    Ok(())
}

fn resolve_dependency(dir: &Path, path: &Path) -> Result<PathBuf, ConfigError> {
    resolve_against(dir, path).ok_or_else(|| {
        ConfigError::unreadable(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path escapes root"),
        )
    })
}
