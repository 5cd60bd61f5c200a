//! Nix file scanner.
//!
//! Recursively walks directories to collect `.nix` files, then uses rnix to
//! parse each file and extract every path-literal token from the AST. Tokens
//! are classified, not resolved, here: `./`- or `../`-prefixed literals are
//! the only style the migration understands, everything else (absolute, home,
//! search-path, interpolated) is surfaced so the graph builder can flag the
//! containing file.

use anyhow::{Context, Result};
use glob::Pattern;
use rnix::SyntaxKind;
use rowan::{WalkEvent, ast::AstNode};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// How a path token relates to the reference styles the engine supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathTokenKind {
    /// Starts with `./` or `../` and can be resolved against the file's directory.
    Relative,
    /// Absolute, home-relative (`~/`) or search-path (`<...>`) literal.
    Foreign,
    /// Contains `${...}` interpolation; the final text is unknowable statically.
    Interpolated,
}

/// One path literal found in a source file.
#[derive(Debug, Clone, Serialize)]
pub struct PathToken {
    /// Literal text as written, e.g. `../foo` (empty for interpolated tokens).
    pub text: String,
    pub kind: PathTokenKind,
}

/// Everything extracted from a single source file.
#[derive(Debug, Clone)]
pub struct FileScan {
    pub file: PathBuf,
    pub tokens: Vec<PathToken>,
    /// True when the file could not be read or rnix reported parse errors.
    /// Such a file contributes no tokens and must be treated as opaque.
    pub unparseable: bool,
}

/// Collects all `.nix` files under `paths`.
///
/// Dot-prefixed entries are skipped unless `default_excludes` is false;
/// `excludes` holds additional glob patterns matched against both the entry
/// name and its full path.
pub fn collect_nix_files(
    paths: &[PathBuf],
    excludes: &[String],
    default_excludes: bool,
) -> Result<Vec<PathBuf>> {
    let patterns: Vec<Pattern> = excludes
        .iter()
        .map(|e| Pattern::new(e).with_context(|| format!("Invalid exclude pattern '{}'", e)))
        .collect::<Result<_>>()?;

    let mut files = Vec::new();
    for path in paths {
        for entry in WalkDir::new(path)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_excluded(e, &patterns, default_excludes))
        {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "nix")
            {
                files.push(entry.into_path());
            }
        }
    }

    Ok(files)
}

fn is_excluded(entry: &walkdir::DirEntry, patterns: &[Pattern], default_excludes: bool) -> bool {
    let name = entry.file_name().to_str();
    if default_excludes && name.is_some_and(|s| s.starts_with('.')) {
        return true;
    }
    patterns
        .iter()
        .any(|p| name.is_some_and(|s| p.matches(s)) || p.matches_path(entry.path()))
}

/// Reads and scans a single file.
///
/// Never fails: unreadable or unparseable files come back with
/// `unparseable = true` so the caller can quarantine them instead of
/// aborting the whole run.
pub fn scan_file(file: &Path) -> FileScan {
    let source = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(_) => {
            return FileScan {
                file: file.to_path_buf(),
                tokens: Vec::new(),
                unparseable: true,
            };
        }
    };

    let parse = rnix::Root::parse(&source);
    if !parse.errors().is_empty() {
        eprintln!(
            "warn: Parse errors in {}: {:?}",
            file.display(),
            parse.errors()
        );
        return FileScan {
            file: file.to_path_buf(),
            tokens: Vec::new(),
            unparseable: true,
        };
    }

    FileScan {
        file: file.to_path_buf(),
        tokens: extract_path_tokens(&source),
        unparseable: false,
    }
}

/// Extracts every path-literal token from Nix source.
///
/// Walks the rnix tree preorder looking for `NODE_PATH` nodes. A path token
/// has no nested path tokens, so descent stops at each match. A node with an
/// interpolation child is yielded as [`PathTokenKind::Interpolated`]; plain
/// nodes classify by their literal text.
pub fn extract_path_tokens(source: &str) -> Vec<PathToken> {
    let parse = rnix::Root::parse(source);
    let root = parse.tree();
    let mut tokens = Vec::new();

    let mut preorder = root.syntax().preorder();
    while let Some(event) = preorder.next() {
        if let WalkEvent::Enter(node) = event {
            if node.kind() != SyntaxKind::NODE_PATH {
                continue;
            }
            preorder.skip_subtree();

            let interpolated = node
                .children()
                .any(|c| c.kind() == SyntaxKind::NODE_INTERPOL);
            if interpolated {
                tokens.push(PathToken {
                    text: String::new(),
                    kind: PathTokenKind::Interpolated,
                });
                continue;
            }

            let text = node.text().to_string();
            let kind = if text.starts_with("./") || text.starts_with("../") {
                PathTokenKind::Relative
            } else {
                PathTokenKind::Foreign
            };
            tokens.push(PathToken { text, kind });
        }
    }

    tokens
}

/// Resolves a relative path token against the directory containing `file`.
pub fn resolve_token(file: &Path, text: &str) -> PathBuf {
    let dir = file.parent().unwrap_or_else(|| Path::new("/"));
    normalize(&dir.join(text))
}

/// Lexically normalizes a path: folds `.` and `..` components without
/// touching the filesystem, so nonexistent targets can still be compared.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
