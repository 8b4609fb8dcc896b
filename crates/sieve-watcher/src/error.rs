//! Error types for watch sessions.

use crate::collab::BuildError;
use sieve_core::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors that end a build attempt. None of them end the session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The entry configuration or one of its directives is broken.
    #[error("{}", describe(.0))]
    Config(Vec<ConfigError>),

    /// The filesystem watcher couldn't be set up.
    #[error("failed to watch for changes: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("failed to write {}: {source}", display_target(.path))]
    Output {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start the session thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl From<ConfigError> for SessionError {
    fn from(e: ConfigError) -> Self {
        SessionError::Config(vec![e])
    }
}

fn describe(errors: &[ConfigError]) -> String {
    match errors {
        [single] => format!("configuration error: {}", single),
        many => {
            let lines: Vec<String> = many.iter().map(|e| format!("  {}", e)).collect();
            format!("{} configuration errors:\n{}", many.len(), lines.join("\n"))
        }
    }
}

fn display_target(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None => "stdout".to_string(),
    }
}
