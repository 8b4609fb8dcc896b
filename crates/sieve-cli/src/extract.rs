//! Stand-in collaborators for the command line.
//!
//! Real class extraction and stylesheet generation live in other tools.
//! These are deliberately simple: split file contents into plausible
//! class tokens, and emit one empty rule per candidate.

use sieve_core::CandidateFile;
use sieve_watcher::{BuildError, CandidateExtractor, StylesheetBuilder};
use std::collections::HashSet;
use std::fmt::Write;

/// Splits contents on anything that can't appear in a utility class.
#[derive(Debug, Clone)]
pub struct TokenExtractor {
    max_len: usize,
}

impl Default for TokenExtractor {
    fn default() -> Self {
        Self { max_len: 128 }
    }
}

impl TokenExtractor {
    fn is_token_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '/' | '.' | '[' | ']' | '%' | '#' | '!')
    }

    fn is_candidate(&self, token: &str) -> bool {
        token.len() <= self.max_len
            && token.starts_with(|c: char| c.is_ascii_alphabetic() || c == '-' || c == '!')
            && token.chars().any(|c| c.is_ascii_alphabetic())
    }
}

impl CandidateExtractor for TokenExtractor {
    fn extract(&self, _file: &CandidateFile, contents: &[u8]) -> HashSet<String> {
        String::from_utf8_lossy(contents)
            .split(|c: char| !Self::is_token_char(c))
            .map(|token| token.trim_end_matches(['.', ':', '/']))
            .filter(|token| self.is_candidate(token))
            .map(str::to_string)
            .collect()
    }
}

/// Emits an empty rule for every candidate, in the order given.
#[derive(Debug, Clone, Default)]
pub struct CandidateListBuilder;

impl StylesheetBuilder for CandidateListBuilder {
    fn build(&mut self, candidates: &[String]) -> Result<String, BuildError> {
        let mut css = format!("/* {} candidates */\n", candidates.len());
        for candidate in candidates {
            writeln!(css, ".{} {{}}", escape_class(candidate))
                .map_err(|e| BuildError(e.to_string()))?;
        }
        Ok(css)
    }
}

/// Escapes a class name for use in a selector.
fn escape_class(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        let plain = c.is_ascii_alphabetic() || c == '_' || c == '-' || (i > 0 && c.is_ascii_digit());
        if !plain {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
