//! Registry file parsing.
//!
//! The registry is the one top-level file whose binding list maps package
//! names to constructor calls. Its outer shape is a structural constant:
//! four curried lambdas, a `with` wrapper, then the main attribute set. This
//! module anchors into that shape (aborting if it is absent, since the
//! rewrite would have no anchor) and yields one [`RegistryBinding`] per
//! binding that matches the exact single-line `name = callPackage <path> { };`
//! form. Everything else in the file stays untouched.

use crate::scanner::{self, normalize};
use anyhow::{Context, Result, bail};
use rnix::SyntaxKind;
use rowan::ast::AstNode;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

type SyntaxNode = rowan::SyntaxNode<rnix::NixLanguage>;

/// Curried function parameters between the file root and the binding set.
const REGISTRY_LAMBDA_DEPTH: usize = 4;

/// One qualifying `name = callPackage <path> { };` binding.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryBinding {
    /// Bound identifier text.
    pub name: String,
    /// Path argument resolved against the registry file's directory.
    pub definition_path: PathBuf,
    /// 0-indexed line in the registry file; the unit the rewriter consumes.
    pub line: usize,
}

/// Result of parsing the registry file once, up front.
#[derive(Debug)]
pub struct RegistryScan {
    pub registry_path: PathBuf,
    /// Original file contents, kept for the final rewrite.
    pub source: String,
    /// Bindings matching the constructor-call shape, in file order.
    pub bindings: Vec<RegistryBinding>,
    /// How often each resolved path literal occurs anywhere in the binding
    /// list, including inside bindings that did not qualify. Used by the
    /// duplicate filter: shared definition paths have ambiguous ownership.
    pub path_uses: BTreeMap<PathBuf, usize>,
    /// Total bindings inspected, qualifying or not.
    pub bindings_seen: usize,
}

/// Parses the registry file and extracts its qualifying bindings.
///
/// Parse errors and shape mismatches are fatal here: unlike ordinary source
/// files, the registry cannot be treated as opaque because the rewrite needs
/// its exact line structure.
pub fn parse(registry_path: &Path, constructor: &str) -> Result<RegistryScan> {
    let registry_path = normalize(registry_path);
    let source = std::fs::read_to_string(&registry_path)
        .with_context(|| format!("Failed to read registry {}", registry_path.display()))?;

    let parse = rnix::Root::parse(&source);
    if !parse.errors().is_empty() {
        bail!(
            "Registry {} has parse errors: {:?}",
            registry_path.display(),
            parse.errors()
        );
    }

    let root = parse.tree();
    let binding_set = locate_binding_set(root.syntax())
        .with_context(|| format!("Registry {} does not have the expected shape", registry_path.display()))?;

    let lines: Vec<&str> = source.lines().collect();
    let mut bindings = Vec::new();
    let mut path_uses: BTreeMap<PathBuf, usize> = BTreeMap::new();
    let mut bindings_seen = 0;

    for binding in binding_set
        .children()
        .filter(|c| c.kind() == SyntaxKind::NODE_ATTRPATH_VALUE)
    {
        bindings_seen += 1;

        for text in path_literals(&binding) {
            let resolved = scanner::resolve_token(&registry_path, &text);
            *path_uses.entry(resolved).or_insert(0) += 1;
        }

        // Conservative: one line only, nothing but indentation to its left.
        if binding.text().to_string().contains('\n') {
            continue;
        }
        let start: usize = binding.text_range().start().into();
        let (start_line, start_col) = position(&source, start);
        let indent = &lines[start_line][..start_col];
        if !indent.chars().all(|c| c == ' ' || c == '\t') {
            continue;
        }

        let Some(name) = simple_attr_name(&binding) else {
            continue;
        };
        let Some(path_text) = constructor_call_path(&binding, constructor) else {
            continue;
        };

        bindings.push(RegistryBinding {
            name,
            definition_path: scanner::resolve_token(&registry_path, &path_text),
            line: start_line,
        });
    }

    Ok(RegistryScan {
        registry_path,
        source,
        bindings,
        path_uses,
        bindings_seen,
    })
}

/// Descends through the registry's known nesting to the main binding set.
fn locate_binding_set(root: &SyntaxNode) -> Result<SyntaxNode> {
    let mut node = root
        .first_child()
        .context("registry file is empty")?;

    for level in 0..REGISTRY_LAMBDA_DEPTH {
        if node.kind() != SyntaxKind::NODE_LAMBDA {
            bail!(
                "expected lambda at nesting level {}, found {:?}",
                level,
                node.kind()
            );
        }
        node = node
            .last_child()
            .with_context(|| format!("lambda at nesting level {} has no body", level))?;
    }

    if node.kind() != SyntaxKind::NODE_WITH {
        bail!("expected `with` wrapper, found {:?}", node.kind());
    }
    node = node.last_child().context("`with` has no body")?;

    if node.kind() != SyntaxKind::NODE_ATTR_SET {
        bail!("expected binding set, found {:?}", node.kind());
    }
    Ok(node)
}

/// Name of a binding whose attrpath is a single plain identifier.
fn simple_attr_name(binding: &SyntaxNode) -> Option<String> {
    let attrpath = binding.first_child()?;
    if attrpath.kind() != SyntaxKind::NODE_ATTRPATH {
        return None;
    }
    let mut parts = attrpath.children();
    let ident = parts.next()?;
    if ident.kind() != SyntaxKind::NODE_IDENT || parts.next().is_some() {
        return None;
    }
    Some(ident.text().to_string())
}

/// Matches the exact value shape `constructor <path> { }` and returns the
/// path literal's text.
///
/// The value must be a two-argument application: the inner application's
/// function is the constructor identifier, its argument a path literal
/// without interpolation, and the outer argument an empty attribute set.
fn constructor_call_path(binding: &SyntaxNode, constructor: &str) -> Option<String> {
    let value = binding.children().nth(1)?;
    if value.kind() != SyntaxKind::NODE_APPLY {
        return None;
    }

    let mut outer = value.children();
    let inner = outer.next()?;
    let args = outer.next()?;
    if inner.kind() != SyntaxKind::NODE_APPLY || args.kind() != SyntaxKind::NODE_ATTR_SET {
        return None;
    }
    // `{ }` only: any contained binding or inherit disqualifies.
    if args.children().next().is_some() {
        return None;
    }

    let mut parts = inner.children();
    let function = parts.next()?;
    let path = parts.next()?;
    if function.kind() != SyntaxKind::NODE_IDENT || function.text().to_string() != constructor {
        return None;
    }
    if path.kind() != SyntaxKind::NODE_PATH {
        return None;
    }
    if path.children().any(|c| c.kind() == SyntaxKind::NODE_INTERPOL) {
        return None;
    }

    Some(path.text().to_string())
}

/// Every non-interpolated relative path literal inside a binding's subtree.
fn path_literals(binding: &SyntaxNode) -> Vec<String> {
    binding
        .descendants()
        .filter(|n| n.kind() == SyntaxKind::NODE_PATH)
        .filter(|n| !n.children().any(|c| c.kind() == SyntaxKind::NODE_INTERPOL))
        .map(|n| n.text().to_string())
        .filter(|t| t.starts_with("./") || t.starts_with("../"))
        .collect()
}

/// 0-indexed (line, byte column) of a byte offset.
fn position(source: &str, offset: usize) -> (usize, usize) {
    let prefix = &source[..offset.min(source.len())];
    let line = prefix.matches('\n').count();
    let col = prefix.len() - prefix.rfind('\n').map_or(0, |i| i + 1);
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const REGISTRY: &str = r#"/* Autogenerated header. */
{ lib, noSysDirs, config, overlays }:
res: pkgs: super:

with pkgs;

{
  foo = callPackage ../foo { };

  spanning = callPackage
    ../spanning { };
  withargs = callPackage ../withargs { inherit lib; };
  other = mkDerivation ../other { };
  interp = callPackage ../${variant} { };
  wrapped = { inner = callPackage ../wrapped { }; };
  first = callPackage ../first { }; second = callPackage ../second { };
  dup-a = callPackage ../shared { };
  dup-b = callPackage ../shared { };
}
"#;

    fn parse_fixture(content: &str) -> Result<RegistryScan> {
        let dir = tempfile::tempdir().unwrap();
        let top = dir.path().join("pkgs/top-level");
        fs::create_dir_all(&top).unwrap();
        let registry = top.join("all-packages.nix");
        fs::write(&registry, content).unwrap();
        parse(&registry, "callPackage")
    }

    fn line_of(content: &str, needle: &str) -> usize {
        content.lines().position(|l| l.contains(needle)).unwrap()
    }

    #[test]
    fn extracts_qualifying_bindings() {
        let scan = parse_fixture(REGISTRY).unwrap();
        let names: Vec<_> = scan.bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["foo", "first", "dup-a", "dup-b"]);
    }

    #[test]
    fn resolves_definition_paths_against_registry_dir() {
        let scan = parse_fixture(REGISTRY).unwrap();
        let foo = &scan.bindings[0];
        assert!(foo.definition_path.ends_with("pkgs/foo"));
        assert!(!foo.definition_path.to_string_lossy().contains(".."));
    }

    #[test]
    fn records_line_numbers() {
        let scan = parse_fixture(REGISTRY).unwrap();
        assert_eq!(scan.bindings[0].line, line_of(REGISTRY, "foo = callPackage"));
        assert_eq!(
            scan.bindings[1].line,
            line_of(REGISTRY, "first = callPackage")
        );
    }

    #[test]
    fn skips_multi_line_bindings() {
        let scan = parse_fixture(REGISTRY).unwrap();
        assert!(scan.bindings.iter().all(|b| b.name != "spanning"));
    }

    #[test]
    fn skips_bindings_with_arguments() {
        let scan = parse_fixture(REGISTRY).unwrap();
        assert!(scan.bindings.iter().all(|b| b.name != "withargs"));
    }

    #[test]
    fn skips_other_constructors_and_interpolated_paths() {
        let scan = parse_fixture(REGISTRY).unwrap();
        let names: Vec<_> = scan.bindings.iter().map(|b| b.name.as_str()).collect();
        assert!(!names.contains(&"other"));
        assert!(!names.contains(&"interp"));
        assert!(!names.contains(&"wrapped"));
    }

    #[test]
    fn skips_second_binding_on_shared_line() {
        let scan = parse_fixture(REGISTRY).unwrap();
        let names: Vec<_> = scan.bindings.iter().map(|b| b.name.as_str()).collect();
        assert!(names.contains(&"first"));
        assert!(!names.contains(&"second"));
    }

    #[test]
    fn counts_every_path_literal_in_the_binding_list() {
        let scan = parse_fixture(REGISTRY).unwrap();
        let shared = scan
            .path_uses
            .iter()
            .find(|(p, _)| p.ends_with("pkgs/shared"))
            .unwrap();
        assert_eq!(*shared.1, 2);
        // Non-qualifying bindings still contribute their literals.
        assert!(scan.path_uses.keys().any(|p| p.ends_with("pkgs/withargs")));
        assert!(scan.path_uses.keys().any(|p| p.ends_with("pkgs/other")));
    }

    #[test]
    fn counts_all_bindings_seen() {
        let scan = parse_fixture(REGISTRY).unwrap();
        assert_eq!(scan.bindings_seen, 10);
    }

    #[test]
    fn rejects_registry_without_expected_nesting() {
        let err = parse_fixture("{ foo = callPackage ../foo { }; }").unwrap_err();
        assert!(err.to_string().contains("expected shape"));
    }

    #[test]
    fn rejects_unparseable_registry() {
        let err = parse_fixture("{ lib }: res: pkgs: super: with pkgs; {").unwrap_err();
        assert!(err.to_string().contains("parse errors"));
    }
}
