//! Gitignore-style glob matching.
//!
//! Everything here is pure: a compiled [`Glob`] or [`IgnoreRule`] looks at a
//! path and says yes or no. No filesystem access, no state between calls.
//!
//! Source globs compile through `globset` with `*` kept inside one path
//! segment. Ignore-file lines compile through `ignore::gitignore`, one
//! matcher per line, so each rule keeps its own scope and position.
//!
//! Supported syntax:
//! - `*` matches any run of characters within one path segment
//! - `?` matches a single character
//! - `[abc]`, `[a-z]`, `[!a-z]` character classes
//! - `**` as a whole segment matches zero or more segments (one or more
//!   when it is the last segment, so `dir/**` never matches `dir` itself)
//! - `\` escapes the next character

use crate::error::PatternError;
use globset::{ErrorKind, GlobBuilder, GlobMatcher};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
enum Segment {
    AnyDepth,
    Part { text: String, matcher: GlobMatcher },
}

/// A compiled glob, matched against `/`-separated relative paths.
#[derive(Debug, Clone)]
pub struct Glob {
    source: String,
    segments: Vec<Segment>,
    matcher: GlobMatcher,
}

/// Returns true if the text contains an unescaped glob metacharacter.
pub fn has_wildcard(text: &str) -> bool {
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '*' | '?' | '[' => return true,
            _ => {}
        }
    }
    false
}

fn compile(pattern: &str) -> Result<GlobMatcher, PatternError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| match e.kind() {
            ErrorKind::UnclosedClass => PatternError::UnterminatedClass(pattern.to_string()),
            ErrorKind::DanglingEscape => PatternError::DanglingEscape(pattern.to_string()),
            _ => PatternError::Syntax {
                pattern: pattern.to_string(),
                reason: e.kind().to_string(),
            },
        })
}

/// Collapses unescaped star runs inside a segment: `a**b` is just `a*b`.
fn collapse_stars(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut escaped = false;
    let mut prev_star = false;
    for c in segment.chars() {
        if escaped {
            escaped = false;
            prev_star = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                prev_star = false;
            }
            '*' if prev_star => continue,
            '*' => prev_star = true,
            _ => prev_star = false,
        }
        out.push(c);
    }
    out
}

fn relative_text(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

impl Glob {
    /// Compiles a glob pattern.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.trim().is_empty() {
            return Err(PatternError::Empty);
        }

        let mut segments: Vec<Segment> = Vec::new();
        let mut texts: Vec<String> = Vec::new();
        for raw in pattern.split('/').filter(|s| !s.is_empty()) {
            if raw == "**" {
                if !matches!(segments.last(), Some(Segment::AnyDepth)) {
                    segments.push(Segment::AnyDepth);
                    texts.push(raw.to_string());
                }
                continue;
            }
            let text = collapse_stars(raw);
            let matcher = compile(&text)?;
            texts.push(text.clone());
            segments.push(Segment::Part { text, matcher });
        }

        if segments.is_empty() {
            return Err(PatternError::Empty);
        }

        let matcher = compile(&texts.join("/"))?;
        Ok(Self {
            source: pattern.to_string(),
            segments,
            matcher,
        })
    }

    /// The pattern text this glob was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when the pattern names one path and nothing else.
    pub fn is_literal(&self) -> bool {
        !has_wildcard(&self.source)
    }

    /// Does this glob cross directory boundaries (`**`)?
    pub fn is_recursive(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::AnyDepth))
    }

    /// Number of path segments a non-recursive glob spans.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Returns the extension if the last segment has the shape `*.ext`.
    pub fn literal_extension(&self) -> Option<String> {
        let Some(Segment::Part { text, .. }) = self.segments.last() else {
            return None;
        };
        let ext = text.strip_prefix("*.")?;
        if ext.is_empty() || ext.contains(['.', '\\', '{', '}']) || has_wildcard(ext) {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Matches a relative path.
    pub fn matches(&self, relative: &Path) -> bool {
        let text = relative_text(relative);
        !text.is_empty() && self.matcher.is_match(text.as_str())
    }

    /// Checks whether the segment at `index` could match `name`.
    ///
    /// Used to prune directories while expanding a non-recursive glob.
    pub fn matches_segment(&self, index: usize, name: &str) -> bool {
        match self.segments.get(index) {
            Some(Segment::AnyDepth) => true,
            Some(Segment::Part { matcher, .. }) => matcher.is_match(name),
            None => false,
        }
    }
}

impl PartialEq for Glob {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Glob {}

impl fmt::Display for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Glob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

/// One line of an ignore file, compiled and scoped to its directory.
#[derive(Debug, Clone)]
pub struct IgnoreRule {
    /// Directory holding the ignore file. The rule only applies below it.
    pub scope_dir: PathBuf,
    /// The rule as written (minus trailing whitespace).
    pub pattern: String,
    pub is_negation: bool,
    pub is_dir_only: bool,
    /// Position across every loaded ignore file; higher wins.
    pub source_order: usize,
    matcher: Gitignore,
}

/// Outcome of evaluating ignore rules against a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ignore,
    Include,
}

impl IgnoreRule {
    /// Parses one ignore-file line.
    ///
    /// Returns `Ok(None)` for blank lines and comments.
    pub fn parse(
        line: &str,
        scope_dir: &Path,
        source_order: usize,
    ) -> Result<Option<Self>, PatternError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let line = trim_unescaped_trailing_spaces(line);
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let (is_negation, body) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };

        let is_dir_only = body.ends_with('/') && !body.ends_with("\\/");
        if body.trim_matches('/').is_empty() {
            return Ok(None);
        }

        let invalid = |e: ignore::Error| PatternError::Syntax {
            pattern: line.to_string(),
            reason: e.to_string(),
        };
        let mut builder = GitignoreBuilder::new(scope_dir);
        builder.add_line(None, line).map_err(invalid)?;
        let matcher = builder.build().map_err(invalid)?;
        if matcher.is_empty() {
            return Ok(None);
        }

        Ok(Some(Self {
            scope_dir: scope_dir.to_path_buf(),
            pattern: line.to_string(),
            is_negation,
            is_dir_only,
            source_order,
            matcher,
        }))
    }

    /// Checks an absolute path against this rule.
    pub fn matches(&self, path: &Path, is_dir: bool) -> bool {
        match path.strip_prefix(&self.scope_dir) {
            Ok(relative) => self.matches_relative(relative, is_dir),
            Err(_) => false,
        }
    }

    /// Checks a path relative to the rule's scope directory.
    pub fn matches_relative(&self, relative: &Path, is_dir: bool) -> bool {
        let text = relative_text(relative);
        if text.is_empty() {
            return false;
        }
        !self.matcher.matched(Path::new(&text), is_dir).is_none()
    }
}

fn trim_unescaped_trailing_spaces(line: &str) -> &str {
    let mut end = line.len();
    while end > 0 && line.as_bytes()[end - 1] == b' ' {
        if end >= 2 && line.as_bytes()[end - 2] == b'\\' {
            break;
        }
        end -= 1;
    }
    &line[..end]
}

/// Evaluates rules against one path: the matching rule with the highest
/// `source_order` decides. `None` means no rule spoke about the path.
pub fn evaluate<'a, I>(rules: I, path: &Path, is_dir: bool) -> Option<Verdict>
where
    I: IntoIterator<Item = &'a IgnoreRule>,
{
    rules
        .into_iter()
        .filter(|rule| rule.matches(path, is_dir))
        .max_by_key(|rule| rule.source_order)
        .map(|rule| {
            if rule.is_negation {
                Verdict::Include
            } else {
                Verdict::Ignore
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(p: &str) -> Glob {
        Glob::parse(p).unwrap()
    }

    fn rule(line: &str, order: usize) -> IgnoreRule {
        IgnoreRule::parse(line, Path::new("/repo"), order)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_star_stays_in_one_segment() {
        let g = glob("*.html");
        assert!(g.matches(Path::new("index.html")));
        assert!(!g.matches(Path::new("nested/index.html")));
        assert!(!g.matches(Path::new("index.jsx")));
    }

    #[test]
    fn test_double_star_crosses_segments() {
        let g = glob("**/*.html");
        assert!(g.matches(Path::new("index.html")));
        assert!(g.matches(Path::new("a/b/c/index.html")));
        assert!(!g.matches(Path::new("a/b/index.js")));
    }

    #[test]
    fn test_trailing_double_star_needs_a_child() {
        let g = glob("src/**");
        assert!(g.matches(Path::new("src/a.rs")));
        assert!(g.matches(Path::new("src/a/b.rs")));
        assert!(!g.matches(Path::new("src")));
    }

    #[test]
    fn test_character_class_and_question_mark() {
        let g = glob("file-[a-c]?.txt");
        assert!(g.matches(Path::new("file-a1.txt")));
        assert!(!g.matches(Path::new("file-d1.txt")));

        let negated = glob("[!_]*.md");
        assert!(negated.matches(Path::new("readme.md")));
        assert!(!negated.matches(Path::new("_draft.md")));
    }

    #[test]
    fn test_unterminated_class_is_an_error() {
        assert_eq!(
            Glob::parse("file[abc"),
            Err(PatternError::UnterminatedClass("file[abc".to_string()))
        );
    }

    #[test]
    fn test_many_stars_match_in_linear_time() {
        let r = rule("*a*a*a*a*a*a*a*a*b", 0);
        let g = glob("*a*a*a*a*a*a*a*a*b");
        let name = "a".repeat(64);
        let path = PathBuf::from("/repo").join(&name);

        let start = std::time::Instant::now();
        assert!(!r.matches(&path, false));
        assert!(!g.matches(Path::new(&name)));
        assert!(!g.matches_segment(0, &name));
        assert!(start.elapsed() < std::time::Duration::from_secs(1));

        assert!(r.matches(&PathBuf::from("/repo").join(format!("{}b", name)), false));
    }

    #[test]
    fn test_doubled_star_inside_a_segment_is_one_star() {
        let g = glob("a**b.html");
        assert!(g.matches(Path::new("axyzb.html")));
        assert!(!g.matches(Path::new("ax/yb.html")));
        assert!(!g.is_recursive());
    }

    #[test]
    fn test_middle_double_star_matches_zero_segments() {
        let g = glob("src/**/page.html");
        assert!(g.matches(Path::new("src/page.html")));
        assert!(g.matches(Path::new("src/a/b/page.html")));
        assert!(!g.matches(Path::new("lib/page.html")));
    }

    #[test]
    fn test_literal_extension() {
        assert_eq!(glob("**/*.html").literal_extension(), Some("html".to_string()));
        assert_eq!(glob("*.JSX").literal_extension(), Some("jsx".to_string()));
        assert_eq!(glob("**/*").literal_extension(), None);
        assert_eq!(glob("index.html").literal_extension(), None);
        assert_eq!(glob("*.tar.gz").literal_extension(), None);
    }

    #[test]
    fn test_has_wildcard() {
        assert!(has_wildcard("*.html"));
        assert!(has_wildcard("page[0-9]"));
        assert!(!has_wildcard("src/index.html"));
        assert!(!has_wildcard("literal\\*star"));
    }

    #[test]
    fn test_anchored_rule_matches_from_scope() {
        let r = rule("/node_modules", 0);
        assert!(r.matches(Path::new("/repo/node_modules"), true));
        assert!(!r.matches(Path::new("/repo/pkg/node_modules"), true));
    }

    #[test]
    fn test_unanchored_rule_matches_any_depth() {
        let r = rule("foo.html", 0);
        assert!(r.matches(Path::new("/repo/foo.html"), false));
        assert!(r.matches(Path::new("/repo/a/b/foo.html"), false));
        assert!(!r.matches(Path::new("/elsewhere/foo.html"), false));
    }

    #[test]
    fn test_dir_only_rule() {
        let r = rule("build/", 0);
        assert!(r.is_dir_only);
        assert!(r.matches(Path::new("/repo/build"), true));
        assert!(!r.matches(Path::new("/repo/build"), false));
    }

    #[test]
    fn test_comments_and_blank_lines_are_skipped() {
        let scope = Path::new("/repo");
        assert!(IgnoreRule::parse("# comment", scope, 0).unwrap().is_none());
        assert!(IgnoreRule::parse("   ", scope, 0).unwrap().is_none());
        assert!(IgnoreRule::parse("/", scope, 0).unwrap().is_none());
    }

    #[test]
    fn test_escaped_hash_and_bang_are_literal() {
        let hash = rule("\\#notes", 0);
        assert!(hash.matches(Path::new("/repo/#notes"), false));

        let bang = rule("\\!important", 0);
        assert!(!bang.is_negation);
        assert!(bang.matches(Path::new("/repo/!important"), false));
    }

    #[test]
    fn test_last_match_wins() {
        let rules = vec![rule("*.log", 0), rule("!keep.log", 1)];
        assert_eq!(
            evaluate(&rules, Path::new("/repo/keep.log"), false),
            Some(Verdict::Include)
        );
        assert_eq!(
            evaluate(&rules, Path::new("/repo/other.log"), false),
            Some(Verdict::Ignore)
        );
        assert_eq!(evaluate(&rules, Path::new("/repo/main.rs"), false), None);
    }

    #[test]
    fn test_source_order_beats_iteration_order() {
        // Same rules, handed over in reverse
        let rules = vec![rule("!keep.log", 1), rule("*.log", 0)];
        assert_eq!(
            evaluate(&rules, Path::new("/repo/keep.log"), false),
            Some(Verdict::Include)
        );
    }
}
