//! Root resolution.
//!
//! Turns parsed source directives into the list of roots a build scans.
//! The interesting part is classification: whether a pattern becomes an
//! auto-detected root (ignore files and denylists apply) or an explicit
//! one (the pattern is the only filter).
//!
//! The rule is about the shape of the pattern:
//! - a directory with no glob is auto-detected
//! - a literal file path is explicit
//! - a glob with a `**` segment is auto-detected, rooted at its fixed prefix
//! - any other glob (`*`, `?`, `[...]` within segments) is explicit

use crate::error::{ConfigError, PatternError};
use crate::paths::resolve_against;
use crate::pattern::{has_wildcard, Glob};
use crate::root::{RootId, RootMode, ScanRoot};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Where the implicit auto-detected root goes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseDirective {
    /// Scan the entry configuration's own directory.
    #[default]
    Inherit,
    /// Scan this directory instead (relative to the entry directory).
    Path(PathBuf),
    /// No implicit root; only explicitly listed sources are scanned.
    Disabled,
}

/// One additional source pattern and the directory it's relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDirective {
    /// Directory of the file that declared this source.
    pub origin: PathBuf,
    pub pattern: String,
}

impl SourceDirective {
    pub fn new(origin: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            pattern: pattern.into(),
        }
    }
}

/// Everything the resolver needs, already parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDirectives {
    /// Directory of the entry configuration.
    pub entry_dir: PathBuf,
    pub base: BaseDirective,
    pub sources: Vec<SourceDirective>,
}

impl SourceDirectives {
    pub fn new(entry_dir: impl Into<PathBuf>) -> Self {
        Self {
            entry_dir: entry_dir.into(),
            base: BaseDirective::Inherit,
            sources: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: BaseDirective) -> Self {
        self.base = base;
        self
    }

    /// Adds a source declared by the entry configuration itself.
    pub fn with_source(mut self, pattern: impl Into<String>) -> Self {
        let origin = self.entry_dir.clone();
        self.sources.push(SourceDirective::new(origin, pattern));
        self
    }
}

/// Result of resolution. A bad directive ends up in `errors` without
/// taking the others down with it.
#[derive(Debug, Default)]
pub struct Resolution {
    pub roots: Vec<ScanRoot>,
    pub errors: Vec<ConfigError>,
}

impl Resolution {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Resolves directives into scan roots.
///
/// # Example
///
/// ```no_run
/// use sieve_core::{resolve_roots, BaseDirective, SourceDirectives};
///
/// let directives = SourceDirectives::new("/work/app")
///     .with_base(BaseDirective::Disabled)
///     .with_source("./pages/**/*.html");
/// let resolution = resolve_roots(&directives);
/// for root in &resolution.roots {
///     println!("{}", root);
/// }
/// ```
pub fn resolve_roots(directives: &SourceDirectives) -> Resolution {
    let mut resolution = Resolution::default();
    let mut roots: Vec<ScanRoot> = Vec::new();

    match &directives.base {
        BaseDirective::Disabled => debug!("Implicit source root disabled"),
        BaseDirective::Inherit => {
            roots.push(ScanRoot::auto(RootId(0), &directives.entry_dir, "."));
        }
        BaseDirective::Path(path) => {
            let directive = path.display().to_string();
            match resolve_base(&directives.entry_dir, path, &directive) {
                Ok(base) => roots.push(ScanRoot::auto(RootId(0), base, directive)),
                Err(e) => resolution.errors.push(e),
            }
        }
    }

    for source in &directives.sources {
        match classify(source) {
            Ok(classified) => roots.extend(classified),
            Err(e) => {
                warn!("{}", e);
                resolution.errors.push(e);
            }
        }
    }

    // Exact duplicates only. Nested roots stay: they can differ in which
    // ignore files they see.
    for root in roots {
        if resolution
            .roots
            .iter()
            .any(|r| r.base == root.base && r.mode == root.mode)
        {
            debug!("Skipping duplicate source root {}", root.base.display());
            continue;
        }
        resolution.roots.push(root);
    }

    for (index, root) in resolution.roots.iter_mut().enumerate() {
        root.id = RootId(index as u32);
        debug!("Resolved source '{}' to {}", root.directive, root);
    }

    resolution
}

fn resolve_base(entry_dir: &Path, path: &Path, directive: &str) -> Result<PathBuf, ConfigError> {
    let base =
        resolve_against(entry_dir, path).ok_or_else(|| ConfigError::EscapesFilesystemRoot {
            directive: directive.to_string(),
        })?;
    check_accessible(&base, directive)?;
    Ok(base)
}

fn check_accessible(path: &Path, directive: &str) -> Result<(), ConfigError> {
    match fs::metadata(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Source base {} does not exist (yet)", path.display());
            Ok(())
        }
        Err(source) => Err(ConfigError::Inaccessible {
            directive: directive.to_string(),
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Classifies one directive. Brace alternatives that land on the same
/// base and mode share a root.
fn classify(source: &SourceDirective) -> Result<Vec<ScanRoot>, ConfigError> {
    let expanded =
        expand_braces(&source.pattern).map_err(|e| ConfigError::invalid(&source.pattern, e))?;

    let mut roots: Vec<ScanRoot> = Vec::new();
    for alternative in expanded {
        let root = classify_one(&source.origin, &alternative, &source.pattern)?;
        merge_alternative(&mut roots, root);
    }
    Ok(roots)
}

fn merge_alternative(roots: &mut Vec<ScanRoot>, root: ScanRoot) {
    for existing in roots.iter_mut() {
        if existing.base != root.base {
            continue;
        }
        match (&mut existing.mode, &root.mode) {
            (
                RootMode::Auto {
                    patterns,
                    extensions,
                },
                RootMode::Auto {
                    patterns: more,
                    extensions: more_ext,
                },
            ) if !patterns.is_empty() && !more.is_empty() => {
                patterns.extend(more.iter().cloned());
                extensions.extend(more_ext.iter().cloned());
                return;
            }
            (RootMode::Explicit { patterns }, RootMode::Explicit { patterns: more }) => {
                patterns.extend(more.iter().cloned());
                return;
            }
            _ => {}
        }
    }
    if !roots.contains(&root) {
        roots.push(root);
    }
}

fn classify_one(origin: &Path, pattern: &str, directive: &str) -> Result<ScanRoot, ConfigError> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::invalid(directive, PatternError::Empty));
    }

    let absolute = resolve_against(origin, Path::new(trimmed)).ok_or_else(|| {
        ConfigError::EscapesFilesystemRoot {
            directive: directive.to_string(),
        }
    })?;

    let mut base = PathBuf::new();
    let mut rest: Vec<String> = Vec::new();
    for component in absolute.components() {
        let text = component.as_os_str().to_string_lossy();
        let wild = matches!(component, Component::Normal(_)) && has_wildcard(&text);
        if rest.is_empty() && !wild {
            base.push(component);
        } else {
            rest.push(text.into_owned());
        }
    }

    if rest.is_empty() {
        return classify_literal(base, directive);
    }

    check_accessible(&base, directive)?;
    let glob = Glob::parse(&rest.join("/")).map_err(|e| ConfigError::invalid(directive, e))?;

    let mode = if glob.is_recursive() {
        RootMode::Auto {
            extensions: glob.literal_extension().into_iter().collect(),
            patterns: vec![glob],
        }
    } else {
        RootMode::Explicit {
            patterns: vec![glob],
        }
    };

    Ok(ScanRoot {
        id: RootId(0),
        base,
        mode,
        directive: directive.to_string(),
    })
}

/// A path with no glob: a directory becomes an auto root, anything else
/// (including a file that doesn't exist yet) an explicit one.
fn classify_literal(path: PathBuf, directive: &str) -> Result<ScanRoot, ConfigError> {
    match fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => return Ok(ScanRoot::auto(RootId(0), path, directive)),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ConfigError::Inaccessible {
                directive: directive.to_string(),
                path,
                source,
            })
        }
    }

    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(ConfigError::EscapesFilesystemRoot {
            directive: directive.to_string(),
        });
    };
    let glob = Glob::parse(&name.to_string_lossy()).map_err(|e| ConfigError::invalid(directive, e))?;

    Ok(ScanRoot {
        id: RootId(0),
        base: parent.to_path_buf(),
        mode: RootMode::Explicit {
            patterns: vec![glob],
        },
        directive: directive.to_string(),
    })
}

/// Expands `{a,b}` alternatives, including nested ones.
///
/// `src/*.{html,jsx}` becomes `src/*.html` and `src/*.jsx`. A `\` escapes
/// a brace or comma.
pub fn expand_braces(pattern: &str) -> Result<Vec<String>, PatternError> {
    let chars: Vec<char> = pattern.chars().collect();
    let unbalanced = || PatternError::UnbalancedBraces(pattern.to_string());

    let mut depth = 0usize;
    let mut open = None;
    let mut close = None;
    let mut commas = Vec::new();
    let mut escaped = false;

    for (index, c) in chars.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '{' => {
                if depth == 0 {
                    open = Some(index);
                }
                depth += 1;
            }
            '}' => {
                if depth == 0 {
                    return Err(unbalanced());
                }
                depth -= 1;
                if depth == 0 {
                    close = Some(index);
                    break;
                }
            }
            ',' if depth == 1 => commas.push(index),
            _ => {}
        }
    }

    let (open, close) = match (open, close) {
        (None, _) => return Ok(vec![pattern.to_string()]),
        (Some(open), Some(close)) => (open, close),
        (Some(_), None) => return Err(unbalanced()),
    };

    let prefix: String = chars[..open].iter().collect();
    let suffix: String = chars[close + 1..].iter().collect();

    let mut bounds = vec![open];
    bounds.extend(commas);
    bounds.push(close);

    let mut expanded: Vec<String> = Vec::new();
    for window in bounds.windows(2) {
        let alternative: String = chars[window[0] + 1..window[1]].iter().collect();
        for candidate in expand_braces(&format!("{}{}{}", prefix, alternative, suffix))? {
            if !expanded.contains(&candidate) {
                expanded.push(candidate);
            }
        }
    }
    Ok(expanded)
}
