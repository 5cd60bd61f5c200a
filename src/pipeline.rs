//! Pipeline orchestration.
//!
//! Runs the stages in their fixed forward order: collect files, build the
//! reference graph, parse the registry, filter duplicates and denylisted
//! names, analyze eligibility, then (on write runs) verify equivalence,
//! execute the moves and rewrite the registry once at the very end. The
//! graph and registry scan are built up front and read-only for the rest of
//! the run.

use crate::analyzer::{self, Analyzer, MigrationCandidate, Rejection};
use crate::graph::ReferenceGraph;
use crate::migrator::{self, ExecutedMove, FailedMove};
use crate::registry;
use crate::rewriter;
use crate::scanner;
use crate::verifier::{DEFAULT_BATCH_SIZE, Evaluator, Verifier};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Everything a run needs to know. Paths other than `root` are relative to
/// the tree root.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub root: PathBuf,
    /// The single top-level declaration file with the binding list.
    pub registry: PathBuf,
    /// Where migrated directories land.
    pub target_root: PathBuf,
    /// Constructor identifier a qualifying binding must call.
    pub constructor: String,
    /// Canonical definition filename inside a candidate directory.
    pub entry_point: String,
    /// What the entry point is renamed to in the target layout.
    pub target_entry_point: String,
    pub exclude: Vec<String>,
    pub default_excludes: bool,
    /// Extra names to deny on top of the built-in denylist.
    pub denylist: Vec<String>,
    pub batch_size: usize,
    /// False = dry run: stop after eligibility analysis, touch nothing.
    pub write: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            root: PathBuf::from("."),
            registry: PathBuf::from("pkgs/top-level/all-packages.nix"),
            target_root: PathBuf::from("pkgs/by-name"),
            constructor: "callPackage".to_string(),
            entry_point: "default.nix".to_string(),
            target_entry_point: "package.nix".to_string(),
            exclude: Vec::new(),
            default_excludes: true,
            denylist: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            write: false,
        }
    }
}

/// Serializable summary of one run.
#[derive(Debug, Default, Serialize)]
pub struct MigrationReport {
    pub files_scanned: usize,
    pub reference_edges: usize,
    pub invalid_files: usize,
    pub bindings_seen: usize,
    pub bindings_qualifying: usize,
    /// Candidates that passed filtering and eligibility analysis.
    pub candidates: Vec<MigrationCandidate>,
    pub rejected: Vec<Rejection>,
    /// Names whose relocated copy produced a different derivation.
    pub divergent: Vec<String>,
    pub evaluator_faults: Vec<String>,
    pub executed: Vec<ExecutedMove>,
    pub failed_moves: Vec<FailedMove>,
    pub registry_lines_removed: usize,
    pub dry_run: bool,
}

/// Runs the whole pipeline once.
///
/// Nothing is migrated without passing both structural eligibility and
/// semantic equivalence; the registry is rewritten only from moves that
/// actually happened, so a crash mid-run leaves a tree a second run can
/// safely continue from.
pub fn run(options: &PipelineOptions, evaluator: &dyn Evaluator) -> Result<MigrationReport> {
    let root = std::fs::canonicalize(&options.root)
        .with_context(|| format!("Failed to resolve tree root {}", options.root.display()))?;
    let registry_path = scanner::normalize(&root.join(&options.registry));

    let files = scanner::collect_nix_files(
        &[root.clone()],
        &options.exclude,
        options.default_excludes,
    )?;
    let graph = ReferenceGraph::build(&files);
    let scan = registry::parse(&registry_path, &options.constructor)?;

    let mut report = MigrationReport {
        files_scanned: files.len(),
        reference_edges: graph.edge_count(),
        invalid_files: graph.invalid_references().len(),
        bindings_seen: scan.bindings_seen,
        bindings_qualifying: scan.bindings.len(),
        dry_run: !options.write,
        ..Default::default()
    };

    let (kept, filtered) = analyzer::filter_candidates(&scan, &options.denylist);
    report.rejected.extend(filtered);

    let analyzer = Analyzer::new(&graph, &scan.registry_path, &options.entry_point);
    let (candidates, rejected) = analyzer.analyze(&kept);
    report.rejected.extend(rejected);
    report.candidates = candidates;

    if !options.write {
        return Ok(report);
    }

    let verifier = Verifier::new(
        evaluator,
        options.batch_size,
        &options.entry_point,
        &options.target_entry_point,
    );
    let outcome = verifier.verify(&report.candidates)?;
    report.divergent = outcome.divergent;
    report.evaluator_faults = outcome.faults;

    let target_root = root.join(&options.target_root);
    let (executed, failed) = migrator::execute(
        &outcome.verified,
        &target_root,
        &options.entry_point,
        &options.target_entry_point,
    );

    let consumed: BTreeSet<usize> = executed.iter().map(|m| m.line).collect();
    report.registry_lines_removed = consumed.len();
    if !consumed.is_empty() {
        rewriter::apply(&scan.registry_path, &scan.source, &consumed)?;
    }
    report.executed = executed;
    report.failed_moves = failed;

    Ok(report)
}
