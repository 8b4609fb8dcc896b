//! Error types for source resolution and scanning.
//!
//! We keep errors simple and actionable. A `ConfigError` always names the
//! directive or file that caused it, so the user knows what to fix.
//! A `ScanWarning` is never fatal; it gets logged and the walk moves on.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience type for functions that can fail during resolution.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Problems with a glob or ignore pattern's syntax.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,

    #[error("unbalanced braces in '{0}'")]
    UnbalancedBraces(String),

    #[error("unterminated character class in '{0}'")]
    UnterminatedClass(String),

    #[error("dangling escape at the end of '{0}'")]
    DanglingEscape(String),

    #[error("invalid pattern '{pattern}': {reason}")]
    Syntax { pattern: String, reason: String },
}

/// Things that make a build attempt fail.
///
/// These abort the current build or rebuild, but never the watch
/// session itself.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A `..` segment climbed above the filesystem root.
    #[error("source '{directive}' resolves outside the filesystem root")]
    EscapesFilesystemRoot { directive: String },

    /// The directive isn't a valid pattern.
    #[error("source '{directive}' is not a valid pattern: {source}")]
    InvalidPattern {
        directive: String,
        #[source]
        source: PatternError,
    },

    /// The base of a directive exists but can't be inspected.
    #[error("source '{directive}' points at '{path}', which is not accessible: {source}")]
    Inaccessible {
        directive: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The entry file, or something it references, couldn't be read.
    #[error("failed to read structural dependency '{path}': {source}")]
    DependencyUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A manifest was read but isn't valid JSON for our schema.
    #[error("failed to parse manifest '{path}': {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Creates an unreadable-dependency error with the path for context.
    pub fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DependencyUnreadable {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid-pattern error for a directive.
    pub fn invalid(directive: impl Into<String>, source: PatternError) -> Self {
        Self::InvalidPattern {
            directive: directive.into(),
            source,
        }
    }
}

/// Non-fatal problems met while walking or loading ignore files.
#[derive(Error, Debug)]
pub enum ScanWarning {
    /// A directory or file in the walk couldn't be read.
    #[error("skipping unreadable entry '{path}': {message}")]
    UnreadableEntry { path: PathBuf, message: String },

    /// An ignore file exists but couldn't be read.
    #[error("skipping unreadable ignore file '{path}': {source}")]
    UnreadableIgnoreFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A single line in an ignore file didn't parse. The rest of the
    /// file still applies.
    #[error("{path}:{line}: ignoring malformed rule: {source}")]
    MalformedIgnoreLine {
        path: PathBuf,
        line: usize,
        #[source]
        source: PatternError,
    },
}

impl ScanWarning {
    /// Creates an unreadable-entry warning.
    pub fn unreadable(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::UnreadableEntry {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
