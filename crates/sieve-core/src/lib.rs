//! Sieve Core - deciding which files feed a stylesheet build
//!
//! This crate answers one question: given the source directives of an
//! entry configuration, which files on disk may contain class names?
//! It doesn't read those files and doesn't watch anything. It provides:
//! - gitignore-style pattern matching ([`Glob`], [`IgnoreRule`])
//! - ignore file discovery ([`IgnoreLoader`], [`IgnoreSet`])
//! - the default binary extension denylist ([`ExtensionPolicy`])
//! - root resolution ([`resolve_roots`]) into auto-detected and explicit
//!   [`ScanRoot`]s
//!
//! # Example
//!
//! ```no_run
//! use sieve_core::{resolve_roots, EntryLoader, ManifestLoader};
//!
//! let entry = ManifestLoader::new("sieve.json").load().unwrap();
//! let resolution = resolve_roots(&entry.directives);
//! for root in &resolution.roots {
//!     println!("{}", root);
//! }
//! ```

pub mod config;
pub mod error;
pub mod extensions;
pub mod ignore_rules;
pub mod paths;
pub mod pattern;
pub mod resolver;
pub mod root;

pub use config::{EntryConfiguration, EntryLoader, EntryManifest, ManifestLoader};
pub use error::{ConfigError, PatternError, Result, ScanWarning};
pub use extensions::ExtensionPolicy;
pub use ignore_rules::{IgnoreLoader, IgnoreSet};
pub use paths::{normalize_lexically, resolve_against};
pub use pattern::{evaluate, Glob, IgnoreRule, Verdict};
pub use resolver::{
    expand_braces, resolve_roots, BaseDirective, Resolution, SourceDirective, SourceDirectives,
};
pub use root::{CandidateFile, RootId, RootMode, ScanRoot};
