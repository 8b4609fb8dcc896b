//! CLI command implementations.

use crate::extract::{CandidateListBuilder, TokenExtractor};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use sieve_core::{resolve_roots, CandidateFile, EntryLoader, ManifestLoader};
use sieve_watcher::{
    scan_parallel, CancelToken, OutputTarget, RootPolicy, ScanOptions, ScanOutcome, SessionError,
    SessionOptions, WatchSession,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Default manifest name.
pub const MANIFEST: &str = "sieve.json";

/// Write a starter manifest.
pub fn init(path: &Path) -> Result<()> {
    let manifest = path.join(MANIFEST);

    if manifest.exists() {
        println!("{} Already initialized", "✓".green());
        return Ok(());
    }

    fs::create_dir_all(path)?;
    let default_manifest = serde_json::json!({
        "sources": [],
        "imports": [],
        "references": []
    });
    fs::write(&manifest, serde_json::to_string_pretty(&default_manifest)?)?;

    println!("{} Created {}", "✓".green(), manifest.display());
    println!("  Run {} to see what gets scanned", "sieve files".cyan());

    Ok(())
}

/// Print the scan roots a manifest resolves to.
pub fn resolve(config: &Path, json: bool) -> Result<()> {
    let entry = ManifestLoader::new(config).load()?;
    let resolution = resolve_roots(&entry.directives);

    if json {
        let report = serde_json::json!({
            "roots": resolution.roots,
            "dependencies": entry.dependencies,
            "errors": resolution.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for root in &resolution.roots {
            let label = if root.is_auto() {
                "auto".green()
            } else {
                "explicit".yellow()
            };
            println!(
                "  {} {} {}",
                label,
                root.to_string().cyan(),
                format!("({})", root.directive).dimmed()
            );
        }
        if resolution.roots.is_empty() {
            println!("No scan roots. Check the manifest's source and sources.");
        }
        for error in &resolution.errors {
            eprintln!("{} {}", "⚠".yellow(), error);
        }
    }

    if resolution.errors.is_empty() {
        Ok(())
    } else {
        Err(format!("{} source directive(s) failed to resolve", resolution.errors.len()).into())
    }
}

/// List every file the build would read.
pub fn files(config: &Path, options: ScanOptions, json: bool) -> Result<()> {
    let start = Instant::now();
    let entry = ManifestLoader::new(config).load()?;
    let resolution = resolve_roots(&entry.directives);
    for error in &resolution.errors {
        eprintln!("{} {}", "⚠".yellow(), error);
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message("Scanning files...");

    // The same file can come from several roots; show it once
    let mut found: BTreeMap<std::path::PathBuf, CandidateFile> = BTreeMap::new();
    let mut warnings = 0;
    for root in resolution.roots {
        let (policy, ignore_warnings) = RootPolicy::prepare(root, &options);
        debug!("Scanning {}", policy.root());
        warnings += ignore_warnings.len();
        if let ScanOutcome::Complete(report) = scan_parallel(&policy, &options, &CancelToken::never()) {
            warnings += report.warnings.len();
            for file in report.files {
                found.entry(file.path.clone()).or_insert(file);
            }
        }
    }

    spinner.finish_and_clear();

    if json {
        let files: Vec<&CandidateFile> = found.values().collect();
        println!("{}", serde_json::to_string_pretty(&files)?);
        return Ok(());
    }

    for file in found.values() {
        if file.explicit {
            println!("{} {}", file.path.display(), "(explicit)".dimmed());
        } else {
            println!("{}", file.path.display());
        }
    }
    eprintln!(
        "{} {} files in {}ms",
        "✓".green(),
        found.len().to_string().cyan(),
        start.elapsed().as_millis()
    );
    if warnings > 0 {
        eprintln!("{} {} entries skipped, run with --verbose for details", "⚠".yellow(), warnings);
    }

    Ok(())
}

/// Build once, or keep building as files change.
pub async fn build(config: &Path, output: OutputTarget, options: SessionOptions, watch: bool) -> Result<()> {
    let mut session = WatchSession::new(
        ManifestLoader::new(config),
        TokenExtractor::default(),
        CandidateListBuilder,
        output,
        options,
    );

    let start = Instant::now();
    match session.initialize() {
        Ok(_) => eprintln!(
            "{} Built {} candidates from {} files in {}ms",
            "✓".green(),
            session.candidates().merged().len().to_string().cyan(),
            session.candidates().len().to_string().cyan(),
            start.elapsed().as_millis()
        ),
        // A broken configuration can be fixed while we watch
        Err(e @ SessionError::Config(_)) if watch => {
            eprintln!("{} {}", "error:".red().bold(), e);
        }
        Err(e) => return Err(e.into()),
    }

    if !watch {
        return Ok(());
    }

    let handle = session.spawn()?;
    eprintln!(
        "{} Watching {} roots, press {} to stop",
        "✓".green(),
        handle.snapshot().current().roots.len(),
        "Ctrl+C".cyan()
    );

    tokio::signal::ctrl_c().await?;
    handle.shutdown();
    eprintln!("{} Stopped", "✓".green());

    Ok(())
}
