//! Sieve CLI - Command-line interface for Sieve
//!
//! Resolves scan roots from a manifest, lists the files a build reads,
//! and builds (or keeps rebuilding) a stylesheet from them.

use clap::{Parser, Subcommand};
use colored::Colorize;
use sieve_core::{ExtensionPolicy, IgnoreLoader};
use sieve_watcher::{OutputTarget, ScanOptions, SessionOptions};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod extract;

#[derive(Parser)]
#[command(name = "sieve")]
#[command(author = "Sieve Contributors")]
#[command(version)]
#[command(about = "Decides which files feed a stylesheet build", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a sieve.json in a directory
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Show the scan roots a manifest resolves to
    Resolve {
        /// Entry manifest
        #[arg(default_value = commands::MANIFEST)]
        config: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List every file a build would read
    Files {
        /// Entry manifest
        #[arg(default_value = commands::MANIFEST)]
        config: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Follow symbolic links when walking directories
        #[arg(long)]
        follow_symlinks: bool,
    },

    /// Build the stylesheet
    Build {
        /// Entry manifest
        #[arg(default_value = commands::MANIFEST)]
        config: PathBuf,

        /// Output file, or - for stdout
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Keep rebuilding as files change
        #[arg(short, long)]
        watch: bool,

        /// Quiet period before reacting to changes
        #[arg(long, default_value = "50")]
        debounce_ms: u64,

        /// Follow symbolic links when walking directories
        #[arg(long)]
        follow_symlinks: bool,
    },
}

fn scan_options(follow_symlinks: bool) -> ScanOptions {
    ScanOptions {
        follow_symlinks,
        threads: 0,
        extensions: ExtensionPolicy::default(),
        ignore_loader: IgnoreLoader::default(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for output
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let result = match cli.command {
        Commands::Init { path } => commands::init(&path),
        Commands::Resolve { config, json } => commands::resolve(&config, json),
        Commands::Files {
            config,
            json,
            follow_symlinks,
        } => commands::files(&config, scan_options(follow_symlinks), json),
        Commands::Build {
            config,
            output,
            watch,
            debounce_ms,
            follow_symlinks,
        } => {
            let output = if output.as_os_str() == "-" {
                OutputTarget::Stdout
            } else {
                OutputTarget::File(output)
            };
            let options = SessionOptions {
                debounce: Duration::from_millis(debounce_ms),
                scan: scan_options(follow_symlinks),
                excluded: Vec::new(),
            };
            commands::build(&config, output, options, watch).await
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
