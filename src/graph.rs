//! Bidirectional reference graph over a source tree.
//!
//! Runs the scanner over every collected file and records which files
//! reference which other files through relative path literals. Anything the
//! rewriter could not safely follow (foreign syntax, interpolation, missing
//! targets, unparseable files) lands in the invalid-reference set instead of
//! the graph. Built once per run; read-only afterwards.

use crate::scanner::{self, FileScan, PathTokenKind};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Why a reference was excluded from the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// Not a `./`/`../` literal (absolute, home or search-path syntax).
    ForeignSyntax,
    /// The literal contains `${...}` interpolation.
    Interpolated,
    /// Relative syntax, but the resolved target does not exist.
    MissingTarget,
    /// The whole file failed to read or parse; its references are unknown.
    Unparseable,
}

/// One reference that could not be entered into the graph.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidReference {
    /// Literal text as written; empty for interpolated tokens and whole-file
    /// failures.
    pub text: String,
    pub reason: InvalidReason,
}

/// Forward and reverse reference maps plus the invalid-reference set.
///
/// Invariant: `target ∈ forward[src]` iff `src ∈ reverse[target]`.
/// Self-references are dropped during construction.
#[derive(Debug, Default)]
pub struct ReferenceGraph {
    forward: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    reverse: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    invalid: BTreeMap<PathBuf, Vec<InvalidReference>>,
}

impl ReferenceGraph {
    /// Builds the graph from the given source files.
    ///
    /// Files parse in parallel; results merge sequentially under this single
    /// aggregation barrier, so construction order never affects the maps.
    pub fn build(files: &[PathBuf]) -> ReferenceGraph {
        let scans: Vec<FileScan> = files.par_iter().map(|f| scanner::scan_file(f)).collect();

        let mut graph = ReferenceGraph::default();
        for scan in scans {
            graph.merge_scan(scan);
        }
        graph
    }

    fn merge_scan(&mut self, scan: FileScan) {
        let file = scanner::normalize(&scan.file);

        if scan.unparseable {
            self.flag(
                file,
                InvalidReference {
                    text: String::new(),
                    reason: InvalidReason::Unparseable,
                },
            );
            return;
        }

        for token in scan.tokens {
            match token.kind {
                PathTokenKind::Relative => {
                    let target = scanner::resolve_token(&file, &token.text);
                    if target == file {
                        continue;
                    }
                    if target.exists() {
                        self.insert_edge(&file, &target);
                    } else {
                        self.flag(
                            file.clone(),
                            InvalidReference {
                                text: token.text,
                                reason: InvalidReason::MissingTarget,
                            },
                        );
                    }
                }
                PathTokenKind::Foreign => self.flag(
                    file.clone(),
                    InvalidReference {
                        text: token.text,
                        reason: InvalidReason::ForeignSyntax,
                    },
                ),
                PathTokenKind::Interpolated => self.flag(
                    file.clone(),
                    InvalidReference {
                        text: token.text,
                        reason: InvalidReason::Interpolated,
                    },
                ),
            }
        }
    }

    fn insert_edge(&mut self, src: &Path, target: &Path) {
        self.forward
            .entry(src.to_path_buf())
            .or_default()
            .insert(target.to_path_buf());
        self.reverse
            .entry(target.to_path_buf())
            .or_default()
            .insert(src.to_path_buf());
    }

    fn flag(&mut self, file: PathBuf, invalid: InvalidReference) {
        self.invalid.entry(file).or_default().push(invalid);
    }

    /// Files that `file` references.
    pub fn references(&self, file: &Path) -> Option<&BTreeSet<PathBuf>> {
        self.forward.get(file)
    }

    /// Files that reference `file` (or the directory `file`).
    pub fn referenced_by(&self, file: &Path) -> Option<&BTreeSet<PathBuf>> {
        self.reverse.get(file)
    }

    /// Whether `file` used any reference style the engine cannot follow.
    pub fn is_flagged(&self, file: &Path) -> bool {
        self.invalid.contains_key(file)
    }

    /// The invalid-reference set, keyed by referencing file.
    pub fn invalid_references(&self) -> &BTreeMap<PathBuf, Vec<InvalidReference>> {
        &self.invalid
    }

    /// Number of distinct (source, target) edges.
    pub fn edge_count(&self) -> usize {
        self.forward.values().map(|s| s.len()).sum()
    }

    /// Number of files with at least one outgoing edge.
    pub fn referencing_file_count(&self) -> usize {
        self.forward.len()
    }

    /// Checks the forward/reverse mirror invariant. Test support.
    pub fn is_symmetric(&self) -> bool {
        let forward_ok = self.forward.iter().all(|(src, targets)| {
            targets
                .iter()
                .all(|t| self.reverse.get(t).is_some_and(|r| r.contains(src)))
        });
        let reverse_ok = self.reverse.iter().all(|(target, sources)| {
            sources
                .iter()
                .all(|s| self.forward.get(s).is_some_and(|f| f.contains(target)))
        });
        forward_ok && reverse_ok
    }
}
