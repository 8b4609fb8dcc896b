//! Lexical path helpers.

use std::path::{Component, Path, PathBuf};

/// Resolves `.` and `..` without touching the filesystem.
///
/// Returns `None` if an absolute path climbs above its root. Leading `..`
/// segments of a relative path are kept as-is.
pub fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut parts: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => return None,
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    let normalized: PathBuf = parts.iter().collect();
    if normalized.as_os_str().is_empty() {
        Some(PathBuf::from("."))
    } else {
        Some(normalized)
    }
}

/// Joins a possibly-relative path onto a base and normalizes it.
pub fn resolve_against(base: &Path, path: &Path) -> Option<PathBuf> {
    if path.is_absolute() {
        normalize_lexically(path)
    } else {
        normalize_lexically(&base.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_segments() {
        assert_eq!(
            normalize_lexically(Path::new("/a/./b/../c")),
            Some(PathBuf::from("/a/c"))
        );
    }

    #[test]
    fn test_trailing_parent() {
        assert_eq!(
            normalize_lexically(Path::new("/work/project-e/nested/..")),
            Some(PathBuf::from("/work/project-e"))
        );
    }

    #[test]
    fn test_escape_above_root() {
        assert_eq!(normalize_lexically(Path::new("/a/../..")), None);
    }

    #[test]
    fn test_relative_keeps_leading_parents() {
        assert_eq!(
            normalize_lexically(Path::new("../x/./y")),
            Some(PathBuf::from("../x/y"))
        );
        assert_eq!(normalize_lexically(Path::new("a/..")), Some(PathBuf::from(".")));
    }

    #[test]
    fn test_resolve_against() {
        assert_eq!(
            resolve_against(Path::new("/repo/project-a/src"), Path::new("../../project-b")),
            Some(PathBuf::from("/repo/project-b"))
        );
        assert_eq!(
            resolve_against(Path::new("/repo"), Path::new("/abs/./dir")),
            Some(PathBuf::from("/abs/dir"))
        );
    }
}
