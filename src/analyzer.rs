//! Candidate eligibility analysis.
//!
//! Consults the reference graph and the invalid-reference set to decide,
//! binding by binding, whether a package directory can be relocated without
//! changing what any other file resolves to. Verdicts are data, not errors:
//! every rejected candidate carries a [`RejectReason`] and the run continues.
//!
//! All checks are whole-subtree: one violating file anywhere under the
//! candidate directory vetoes the entire candidate. There are no partial
//! moves.

use crate::graph::ReferenceGraph;
use crate::registry::{RegistryBinding, RegistryScan};
use crate::scanner::{self, normalize};
use regex::Regex;
use rnix::SyntaxKind;
use rowan::ast::AstNode;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

/// Names excluded from migration regardless of what the analysis says.
/// Escape valve for packages whose relocation is known to break consumers
/// in ways the reference graph cannot see.
pub const DENYLIST: &[&str] = &["zig-hook", "libredirect"];

/// Target layout naming rule: a letter, or `_` followed by a digit, then
/// letters/digits/`_`/`-`. Two characters minimum (the destination sharding
/// prefix needs them).
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]|_[0-9])[A-Za-z0-9_-]*$").unwrap());

/// Why a candidate was not migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// The definition path is not an existing directory.
    NotADirectory,
    /// The directory lacks the canonical entry-point file.
    MissingEntryPoint,
    /// The name does not fit the target layout's naming rule.
    InvalidName,
    /// Nothing references the directory; it is assumed dead, not migratable.
    Unreferenced,
    /// A file other than the registry references the directory itself.
    ExternalDirectoryReference { referrer: PathBuf },
    /// A file under the directory is referenced from outside it.
    ExternalFileReference { file: PathBuf, referrer: PathBuf },
    /// A file under the directory uses a reference style the rewriter
    /// cannot safely follow.
    UnsupportedReferenceStyle { file: PathBuf },
    /// A file under the directory references something outside it (the
    /// directory itself counts: that import resolves through the entry
    /// point, which is renamed by the move).
    EscapingReference { file: PathBuf, target: PathBuf },
    /// A file under the directory references the entry point by its old name.
    EntryPointReference { file: PathBuf },
    /// A non-source file's raw text mentions the entry-point filename.
    EntryPointMention { file: PathBuf },
    /// A non-source file looks like update tooling.
    UpdateTooling { file: PathBuf },
    /// A source file declares an update script pointing at the entry point.
    UpdateScript { file: PathBuf },
    /// A file under the directory could not be inspected.
    Unreadable { file: PathBuf },
    /// More than one registry binding uses this definition path.
    DuplicateDefinition,
    /// The name is on the denylist.
    Denylisted,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotADirectory => write!(f, "definition path is not a directory"),
            RejectReason::MissingEntryPoint => write!(f, "no entry-point file in directory"),
            RejectReason::InvalidName => write!(f, "name not valid in the target layout"),
            RejectReason::Unreferenced => write!(f, "directory is not referenced by anything"),
            RejectReason::ExternalDirectoryReference { referrer } => {
                write!(f, "directory referenced by {}", referrer.display())
            }
            RejectReason::ExternalFileReference { file, referrer } => write!(
                f,
                "{} referenced from outside by {}",
                file.display(),
                referrer.display()
            ),
            RejectReason::UnsupportedReferenceStyle { file } => {
                write!(f, "{} uses an unsupported reference style", file.display())
            }
            RejectReason::EscapingReference { file, target } => write!(
                f,
                "{} references {} outside the directory",
                file.display(),
                target.display()
            ),
            RejectReason::EntryPointReference { file } => {
                write!(f, "{} references the entry point by its old name", file.display())
            }
            RejectReason::EntryPointMention { file } => {
                write!(f, "{} mentions the entry-point filename", file.display())
            }
            RejectReason::UpdateTooling { file } => {
                write!(f, "{} looks like update tooling", file.display())
            }
            RejectReason::UpdateScript { file } => {
                write!(f, "{} declares an update script for the entry point", file.display())
            }
            RejectReason::Unreadable { file } => {
                write!(f, "{} could not be inspected", file.display())
            }
            RejectReason::DuplicateDefinition => {
                write!(f, "definition path shared by multiple bindings")
            }
            RejectReason::Denylisted => write!(f, "name is denylisted"),
        }
    }
}

/// A binding that passed filtering and analysis and may be verified.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationCandidate {
    pub name: String,
    pub directory: PathBuf,
    /// 0-indexed registry line of the originating binding.
    pub line: usize,
}

/// A binding that was dropped, and why.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub name: String,
    pub directory: PathBuf,
    pub line: usize,
    pub reason: RejectReason,
}

fn rejection(binding: &RegistryBinding, reason: RejectReason) -> Rejection {
    Rejection {
        name: binding.name.clone(),
        directory: binding.definition_path.clone(),
        line: binding.line,
        reason,
    }
}

/// Drops duplicate-path and denylisted bindings before analysis.
///
/// A definition path used by more than one binding anywhere in the registry
/// has ambiguous ownership; every binding pointing at it is dropped rather
/// than silently picking a winner.
pub fn filter_candidates<'a>(
    scan: &'a RegistryScan,
    extra_denylist: &[String],
) -> (Vec<&'a RegistryBinding>, Vec<Rejection>) {
    let mut kept = Vec::new();
    let mut rejected = Vec::new();

    for binding in &scan.bindings {
        if DENYLIST.contains(&binding.name.as_str())
            || extra_denylist.iter().any(|d| *d == binding.name)
        {
            rejected.push(rejection(binding, RejectReason::Denylisted));
        } else if scan
            .path_uses
            .get(&binding.definition_path)
            .is_some_and(|n| *n > 1)
        {
            rejected.push(rejection(binding, RejectReason::DuplicateDefinition));
        } else {
            kept.push(binding);
        }
    }

    (kept, rejected)
}

/// Eligibility decisions over an immutable reference graph.
pub struct Analyzer<'a> {
    graph: &'a ReferenceGraph,
    registry_path: PathBuf,
    entry_point: String,
}

impl<'a> Analyzer<'a> {
    pub fn new(graph: &'a ReferenceGraph, registry_path: &Path, entry_point: &str) -> Self {
        Analyzer {
            graph,
            registry_path: normalize(registry_path),
            entry_point: entry_point.to_string(),
        }
    }

    /// Splits bindings into accepted candidates and rejections.
    pub fn analyze(
        &self,
        bindings: &[&RegistryBinding],
    ) -> (Vec<MigrationCandidate>, Vec<Rejection>) {
        let mut candidates = Vec::new();
        let mut rejected = Vec::new();

        for binding in bindings {
            match self.assess(binding) {
                None => candidates.push(MigrationCandidate {
                    name: binding.name.clone(),
                    directory: binding.definition_path.clone(),
                    line: binding.line,
                }),
                Some(reason) => rejected.push(rejection(binding, reason)),
            }
        }

        (candidates, rejected)
    }

    /// Decides a single candidate. `None` means migratable.
    pub fn assess(&self, binding: &RegistryBinding) -> Option<RejectReason> {
        let dir = &binding.definition_path;
        if !dir.is_dir() {
            return Some(RejectReason::NotADirectory);
        }
        let entry_point = dir.join(&self.entry_point);
        if !entry_point.is_file() {
            return Some(RejectReason::MissingEntryPoint);
        }
        if !valid_package_name(&binding.name) {
            return Some(RejectReason::InvalidName);
        }

        // The directory as a whole: someone must point at it (otherwise it
        // is unreachable and not ours to move), and that someone must be the
        // registry alone.
        match self.graph.referenced_by(dir) {
            None => return Some(RejectReason::Unreferenced),
            Some(referrers) => {
                for referrer in referrers {
                    if *referrer != self.registry_path && !referrer.starts_with(dir) {
                        return Some(RejectReason::ExternalDirectoryReference {
                            referrer: referrer.clone(),
                        });
                    }
                }
            }
        }

        for entry in WalkDir::new(dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => {
                    return Some(RejectReason::Unreadable { file: dir.clone() });
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let path = entry.path().to_path_buf();

            if let Some(referrers) = self.graph.referenced_by(&path) {
                for referrer in referrers {
                    if *referrer != self.registry_path && !referrer.starts_with(dir) {
                        return Some(RejectReason::ExternalFileReference {
                            file: path,
                            referrer: referrer.clone(),
                        });
                    }
                }
            }

            if self.graph.is_flagged(&path) {
                return Some(RejectReason::UnsupportedReferenceStyle { file: path });
            }

            if let Some(targets) = self.graph.references(&path) {
                for target in targets {
                    if !target.starts_with(dir) || target == dir {
                        return Some(RejectReason::EscapingReference {
                            file: path,
                            target: target.clone(),
                        });
                    }
                    if *target == entry_point {
                        return Some(RejectReason::EntryPointReference { file: path });
                    }
                }
            }

            if entry.file_type().is_file() {
                let is_source = path.extension().is_some_and(|ext| ext == "nix");
                if is_source {
                    if declares_update_script(&path, &entry_point) {
                        return Some(RejectReason::UpdateScript { file: path });
                    }
                } else {
                    if has_update_like_filename(&path) {
                        return Some(RejectReason::UpdateTooling { file: path });
                    }
                    match raw_text_mentions(&path, &self.entry_point) {
                        Ok(true) => {
                            return Some(RejectReason::EntryPointMention { file: path });
                        }
                        Ok(false) => {}
                        Err(_) => return Some(RejectReason::Unreadable { file: path }),
                    }
                }
            }
        }

        None
    }
}

/// Whether `name` fits the target layout's naming rule.
pub fn valid_package_name(name: &str) -> bool {
    name.len() >= 2 && NAME_PATTERN.is_match(name)
}

/// Heuristic: a non-source, non-patch file with "update" in its name is
/// treated as update tooling that depends on the package's current location.
/// Coarse text matching, not a semantic guarantee.
pub fn has_update_like_filename(file: &Path) -> bool {
    let exempt = file
        .extension()
        .is_some_and(|ext| ext == "nix" || ext == "patch" || ext == "diff");
    !exempt
        && file
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains("update"))
}

/// Heuristic: a raw substring search for `needle` in a file's bytes. Guards
/// against non-structural references, e.g. an embedded shell script that
/// rebuilds paths to the entry point itself.
pub fn raw_text_mentions(file: &Path, needle: &str) -> std::io::Result<bool> {
    let bytes = std::fs::read(file)?;
    let needle = needle.as_bytes();
    Ok(bytes.windows(needle.len()).any(|window| window == needle))
}

/// Heuristic: whether a source file binds `updateScript` (at any attrpath
/// depth) to a value whose subtree contains a path literal resolving to
/// `entry_point`. Such packages carry external tooling dependent on the old
/// filename. Structural, but not exhaustive: indirection through variables
/// or writer scripts is not followed.
pub fn declares_update_script(file: &Path, entry_point: &Path) -> bool {
    let Ok(source) = std::fs::read_to_string(file) else {
        return false;
    };
    let tree = rnix::Root::parse(&source).tree();

    for node in tree.syntax().descendants() {
        if node.kind() != SyntaxKind::NODE_ATTRPATH_VALUE {
            continue;
        }
        let Some(attrpath) = node.first_child() else {
            continue;
        };
        if attrpath.kind() != SyntaxKind::NODE_ATTRPATH {
            continue;
        }
        let is_update_script = attrpath
            .children()
            .last()
            .is_some_and(|ident| {
                ident.kind() == SyntaxKind::NODE_IDENT
                    && ident.text().to_string() == "updateScript"
            });
        if !is_update_script {
            continue;
        }
        let Some(value) = node.children().nth(1) else {
            continue;
        };
        for path_node in value
            .descendants()
            .filter(|n| n.kind() == SyntaxKind::NODE_PATH)
        {
            if path_node
                .children()
                .any(|c| c.kind() == SyntaxKind::NODE_INTERPOL)
            {
                continue;
            }
            let text = path_node.text().to_string();
            if !(text.starts_with("./") || text.starts_with("../")) {
                continue;
            }
            if scanner::resolve_token(file, &text) == *entry_point {
                return true;
            }
        }
    }

    false
}
