//! Extension policy.
//!
//! Auto-detected roots skip files that can't contain class names: images,
//! fonts, archives, media, compiled artifacts. A root can opt specific
//! extensions back in by naming them in its pattern (`**/*.{jpg,png}`).

use std::collections::BTreeSet;
use std::path::Path;

/// Extensions skipped by default in auto-detected roots.
pub fn default_ignored_extensions() -> &'static [&'static str] {
    &[
        // Images
        "png", "jpg", "jpeg", "gif", "webp", "avif", "bmp", "ico", "tif", "tiff", "heic", "psd",
        // Fonts
        "woff", "woff2", "ttf", "otf", "eot",
        // Audio and video
        "mp3", "mp4", "m4a", "m4v", "wav", "ogg", "flac", "webm", "mov", "avi", "mkv",
        // Archives
        "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "jar",
        // Documents
        "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
        // Compiled and binary
        "exe", "dll", "so", "dylib", "a", "o", "obj", "bin", "class", "pyc", "wasm", "node",
        // Databases and lockfiles
        "db", "sqlite", "lock",
    ]
}

/// Which file extensions an auto-detected root skips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPolicy {
    denied: BTreeSet<String>,
}

impl Default for ExtensionPolicy {
    fn default() -> Self {
        Self {
            denied: default_ignored_extensions()
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl ExtensionPolicy {
    /// A policy that denies nothing.
    pub fn permissive() -> Self {
        Self {
            denied: BTreeSet::new(),
        }
    }

    /// Adds an extension to the denylist.
    pub fn deny(mut self, extension: &str) -> Self {
        self.denied.insert(extension.to_ascii_lowercase());
        self
    }

    /// Is this extension on the denylist?
    pub fn is_denied(&self, extension: &str) -> bool {
        self.denied.contains(&extension.to_ascii_lowercase())
    }

    /// Checks a file against the policy.
    ///
    /// Files without an extension always pass. An extension listed in
    /// `allowlist` passes even when the denylist names it.
    pub fn allows(&self, path: &Path, allowlist: &BTreeSet<String>) -> bool {
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            return true;
        };
        let extension = extension.to_ascii_lowercase();
        !self.denied.contains(&extension) || allowlist.contains(&extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_extensions_are_denied() {
        let policy = ExtensionPolicy::default();
        let none = BTreeSet::new();
        assert!(!policy.allows(Path::new("src/logo.jpg"), &none));
        assert!(!policy.allows(Path::new("src/nested/index.tar"), &none));
        assert!(policy.allows(Path::new("src/index.html"), &none));
        assert!(policy.allows(Path::new("Makefile"), &none));
    }

    #[test]
    fn test_case_insensitive() {
        let policy = ExtensionPolicy::default();
        assert!(!policy.allows(Path::new("LOGO.PNG"), &BTreeSet::new()));
    }

    #[test]
    fn test_allowlist_overrides_denylist() {
        let policy = ExtensionPolicy::default();
        let allow: BTreeSet<String> = ["jpg".to_string()].into_iter().collect();
        assert!(policy.allows(Path::new("logo.jpg"), &allow));
        assert!(!policy.allows(Path::new("logo.png"), &allow));
    }

    #[test]
    fn test_permissive_and_custom_deny() {
        let policy = ExtensionPolicy::permissive().deny("LOG");
        assert!(policy.is_denied("log"));
        assert!(policy.allows(Path::new("photo.jpg"), &BTreeSet::new()));
        assert!(!policy.allows(Path::new("debug.log"), &BTreeSet::new()));
    }
}
