//! Command-line interface definitions.
//!
//! Defines the argument parser and subcommands using clap's derive API.
//! Each subcommand corresponds to a distinct operation: listing scan
//! targets, inspecting the reference graph, detecting migratable
//! candidates, or performing the migration.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Migrate self-contained package definitions into the by-name layout.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List files that would be scanned without processing them.
    Scan {
        /// Tree root to scan.
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Glob patterns for entries to exclude. Dot-prefixed entries are
        /// excluded by default.
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Disable the default exclusion of dot-prefixed entries.
        #[arg(long)]
        no_default_excludes: bool,
    },

    /// Build the reference graph and report its size and invalid references.
    Graph {
        /// Tree root to scan.
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Glob patterns for entries to exclude.
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Disable the default exclusion of dot-prefixed entries.
        #[arg(long)]
        no_default_excludes: bool,

        /// Emit JSON instead of human-readable output.
        #[arg(long)]
        json: bool,
    },

    /// Analyze the registry and report which candidates could migrate.
    Detect {
        /// Tree root containing the registry and package definitions.
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Registry file, relative to the root.
        #[arg(long, default_value = "pkgs/top-level/all-packages.nix")]
        registry: PathBuf,

        /// Constructor identifier a qualifying binding must call.
        #[arg(long, default_value = "callPackage")]
        constructor: String,

        /// Entry-point filename inside candidate directories.
        #[arg(long, default_value = "default.nix")]
        entry_point: String,

        /// Glob patterns for entries to exclude.
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Disable the default exclusion of dot-prefixed entries.
        #[arg(long)]
        no_default_excludes: bool,

        /// Additional names to exclude from migration.
        #[arg(long)]
        deny: Vec<String>,

        /// Emit JSON instead of human-readable output.
        #[arg(long)]
        json: bool,

        /// Print per-candidate rejection reasons.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Verify and migrate eligible candidates, then rewrite the registry.
    Migrate {
        /// Actually modify the tree (default is a dry run).
        #[arg(long)]
        write: bool,

        /// Tree root containing the registry and package definitions.
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Registry file, relative to the root.
        #[arg(long, default_value = "pkgs/top-level/all-packages.nix")]
        registry: PathBuf,

        /// Destination root for migrated directories, relative to the root.
        #[arg(long, default_value = "pkgs/by-name")]
        target_root: PathBuf,

        /// Constructor identifier a qualifying binding must call.
        #[arg(long, default_value = "callPackage")]
        constructor: String,

        /// Entry-point filename inside candidate directories.
        #[arg(long, default_value = "default.nix")]
        entry_point: String,

        /// Entry-point filename in the target layout.
        #[arg(long, default_value = "package.nix")]
        target_entry_point: String,

        /// Glob patterns for entries to exclude.
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Disable the default exclusion of dot-prefixed entries.
        #[arg(long)]
        no_default_excludes: bool,

        /// Additional names to exclude from migration.
        #[arg(long)]
        deny: Vec<String>,

        /// Candidates per evaluator batch.
        #[arg(long, default_value_t = crate::verifier::DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Emit JSON instead of human-readable output.
        #[arg(long)]
        json: bool,
    },
}
