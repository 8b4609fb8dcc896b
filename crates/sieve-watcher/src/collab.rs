//! The collaborators a session hands work to.
//!
//! Reading class names out of a file and turning them into a stylesheet
//! both happen elsewhere. The session only decides when to call them and
//! where the result goes.

use sieve_core::CandidateFile;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The stylesheet builder rejected the candidate set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("stylesheet build failed: {0}")]
pub struct BuildError(pub String);

/// Pulls candidate tokens out of a file's contents.
///
/// Must not have side effects the session could observe.
pub trait CandidateExtractor: Send + Sync {
    fn extract(&self, file: &CandidateFile, contents: &[u8]) -> HashSet<String>;
}

impl<F> CandidateExtractor for F
where
    F: Fn(&CandidateFile, &[u8]) -> HashSet<String> + Send + Sync,
{
    fn extract(&self, file: &CandidateFile, contents: &[u8]) -> HashSet<String> {
        self(file, contents)
    }
}

/// Turns the merged, sorted candidate list into output.
pub trait StylesheetBuilder: Send {
    fn build(&mut self, candidates: &[String]) -> Result<String, BuildError>;
}

impl<F> StylesheetBuilder for F
where
    F: FnMut(&[String]) -> Result<String, BuildError> + Send,
{
    fn build(&mut self, candidates: &[String]) -> Result<String, BuildError> {
        self(candidates)
    }
}

/// Where a build's output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    File(PathBuf),
    Stdout,
    /// Build but throw the result away.
    Discard,
}

impl OutputTarget {
    /// The file written to, if any. Sessions exclude it from scanning.
    pub fn path(&self) -> Option<&Path> {
        match self {
            OutputTarget::File(path) => Some(path),
            _ => None,
        }
    }

    pub fn write(&self, contents: &str) -> io::Result<()> {
        match self {
            OutputTarget::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, contents)
            }
            OutputTarget::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(contents.as_bytes())?;
                stdout.flush()
            }
            OutputTarget::Discard => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_core::RootId;
    use tempfile::tempdir;

    #[test]
    fn test_closures_are_collaborators() {
        let extractor = |_: &CandidateFile, contents: &[u8]| -> HashSet<String> {
            String::from_utf8_lossy(contents)
                .split_whitespace()
                .map(str::to_string)
                .collect()
        };
        let file = CandidateFile {
            path: PathBuf::from("/a.html"),
            root: RootId(0),
            explicit: false,
        };
        assert_eq!(extractor.extract(&file, b"flex  grid").len(), 2);

        let mut builder = |c: &[String]| -> Result<String, BuildError> { Ok(c.join("\n")) };
        assert_eq!(
            builder.build(&["a".to_string(), "b".to_string()]).unwrap(),
            "a\nb"
        );
    }

    #[test]
    fn test_file_output_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let target = OutputTarget::File(dir.path().join("dist/out.css"));
        target.write(".flex{}").unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("dist/out.css")).unwrap(),
            ".flex{}"
        );
        assert!(OutputTarget::Discard.path().is_none());
    }
}
