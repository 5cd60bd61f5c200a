//! Registry file rewriting.
//!
//! The final stage of a run: stream the registry's original lines, omit every
//! line consumed by a migrated binding, and swallow blank lines made adjacent
//! by an omission so no blank-line scars accumulate. The rewrite is a
//! full-file replace from the content captured when the registry was parsed,
//! performed exactly once per run.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;

/// Produces the registry content with `consumed` lines (0-indexed) removed.
///
/// A blank line directly following a skipped line is skipped as well, and a
/// skip chains through any further blanks, so an omission never leaves two
/// adjacent blank lines behind. Blank runs that were already in the file are
/// kept as-is.
pub fn rewrite_registry(content: &str, consumed: &BTreeSet<usize>) -> String {
    let mut out = String::with_capacity(content.len());
    let mut last_skipped = false;

    for (number, line) in content.lines().enumerate() {
        let is_blank = line.is_empty();
        if !consumed.contains(&number) && !(last_skipped && is_blank) {
            out.push_str(line);
            out.push('\n');
            last_skipped = false;
        } else {
            last_skipped = true;
        }
    }

    out
}

/// Rewrites the registry file on disk from its captured original content.
pub fn apply(registry_path: &Path, content: &str, consumed: &BTreeSet<usize>) -> Result<()> {
    std::fs::write(registry_path, rewrite_registry(content, consumed))
        .with_context(|| format!("Failed to rewrite {}", registry_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumed(lines: &[usize]) -> BTreeSet<usize> {
        lines.iter().copied().collect()
    }

    #[test]
    fn removes_exactly_the_consumed_lines() {
        let content = "a\nb\nc\nd\n";
        assert_eq!(rewrite_registry(content, &consumed(&[1, 3])), "a\nc\n");
    }

    #[test]
    fn empty_consumed_set_is_identity() {
        let content = "a\n\nb\n";
        assert_eq!(rewrite_registry(content, &consumed(&[])), content);
    }

    #[test]
    fn collapses_blank_made_adjacent_by_removal() {
        let content = "a\n\nfoo = callPackage ../foo { };\n\nb\n";
        assert_eq!(rewrite_registry(content, &consumed(&[2])), "a\n\nb\n");
    }

    #[test]
    fn preserves_preexisting_blank_runs() {
        let content = "a\n\n\nb\nc\n";
        assert_eq!(rewrite_registry(content, &consumed(&[3])), "a\n\n\nc\n");
    }

    #[test]
    fn chains_through_consecutive_removals() {
        let content = "a\nx\ny\n\nb\n";
        assert_eq!(rewrite_registry(content, &consumed(&[1, 2])), "a\nb\n");
    }

    #[test]
    fn line_count_invariant_holds() {
        let content = "one\n\ntwo\n\nthree\nfour\n";
        let remove = consumed(&[2]);
        let result = rewrite_registry(content, &remove);

        let original = content.lines().count();
        let removed = remove.len();
        let collapsed = 1; // the blank on line 3 becomes adjacent to line 1's
        assert_eq!(result.lines().count(), original - removed - collapsed);
        // Every surviving non-blank line is one of the originals.
        for line in result.lines().filter(|l| !l.is_empty()) {
            assert!(content.lines().any(|o| o == line));
        }
    }

    #[test]
    fn realistic_registry_rewrite() {
        let content = "\
{
  alpha = callPackage ../alpha { };

  beta = callPackage ../beta { };

  gamma = callPackage ../gamma { };
}
";
        let result = rewrite_registry(content, &consumed(&[3]));
        insta::assert_snapshot!(result, @r"
{
  alpha = callPackage ../alpha { };

  gamma = callPackage ../gamma { };
}
");
    }
}
