//! Semantic-equivalence verification.
//!
//! Before any move touches the real tree, each candidate is staged in a
//! scratch copy with its entry point renamed, and an external evaluator is
//! asked whether the relocated definition still produces the same derivation
//! as the original name resolved against the untouched tree. Queries go out
//! in fixed-size batches; a batch-level fault discards the whole batch (the
//! reply protocol is ordered, so a faulted batch's indexing cannot be
//! trusted) without stopping the run.

use crate::analyzer::MigrationCandidate;
use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

/// Bound on candidates per evaluator query. A tunable, not a correctness
/// parameter.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// One original-vs-relocated comparison submitted to the evaluator.
#[derive(Debug, Clone)]
pub struct EquivalencePair {
    /// Attribute name resolved against the untouched full tree.
    pub name: String,
    /// Entry-point file of the relocated scratch copy, invoked directly.
    pub staged_entry: PathBuf,
}

/// External evaluator boundary.
///
/// A successful reply carries one verdict per pair, in submission order.
/// Evaluation errors (malformed expression, timeout, resource exhaustion)
/// surface as an `Err` covering the whole batch.
pub trait Evaluator {
    fn verify_batch(&self, pairs: &[EquivalencePair]) -> Result<Vec<bool>>;
}

/// Evaluator backed by the `nix` CLI.
///
/// Composes a single `nix eval --json` expression per batch that imports the
/// tree root once and compares `drvPath`s pairwise.
pub struct NixEvaluator {
    tree_root: PathBuf,
    constructor: String,
}

impl NixEvaluator {
    pub fn new(tree_root: &Path, constructor: &str) -> Self {
        NixEvaluator {
            tree_root: tree_root.to_path_buf(),
            constructor: constructor.to_string(),
        }
    }
}

impl Evaluator for NixEvaluator {
    fn verify_batch(&self, pairs: &[EquivalencePair]) -> Result<Vec<bool>> {
        let expr = batch_expression(&self.tree_root, &self.constructor, pairs);
        let output = Command::new("nix")
            .args(["eval", "--json", "--impure", "--expr", &expr])
            .output()
            .context("Failed to run nix eval")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("nix eval failed: {}", stderr);
        }

        serde_json::from_slice(&output.stdout).context("Failed to parse evaluator reply")
    }
}

/// Builds the composite per-batch query expression.
fn batch_expression(tree_root: &Path, constructor: &str, pairs: &[EquivalencePair]) -> String {
    let mut expr = format!("let pkgs = import {} {{ }}; in [", tree_root.display());
    for pair in pairs {
        let _ = write!(
            expr,
            " (pkgs.\"{}\".drvPath == (pkgs.{} {} {{ }}).drvPath)",
            pair.name,
            constructor,
            pair.staged_entry.display()
        );
    }
    expr.push_str(" ]");
    expr
}

/// A candidate confirmed output-identical after relocation.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedMove {
    pub candidate: MigrationCandidate,
}

/// What a verification run produced.
#[derive(Debug, Default)]
pub struct VerificationOutcome {
    pub verified: Vec<VerifiedMove>,
    /// Names whose relocated copy evaluated to a different derivation.
    pub divergent: Vec<String>,
    /// Evaluator faults, one entry per discarded batch.
    pub faults: Vec<String>,
}

/// Stages candidates in scratch space and runs the batch protocol.
pub struct Verifier<'a> {
    evaluator: &'a dyn Evaluator,
    batch_size: usize,
    entry_point: String,
    target_entry_point: String,
}

impl<'a> Verifier<'a> {
    pub fn new(
        evaluator: &'a dyn Evaluator,
        batch_size: usize,
        entry_point: &str,
        target_entry_point: &str,
    ) -> Self {
        Verifier {
            evaluator,
            batch_size: batch_size.max(1),
            entry_point: entry_point.to_string(),
            target_entry_point: target_entry_point.to_string(),
        }
    }

    /// Verifies all candidates, returning the survivors as [`VerifiedMove`]s.
    ///
    /// Candidate directories are copied, never moved; the scratch area lives
    /// only for the duration of this call and is purged regardless of
    /// outcome.
    pub fn verify(&self, candidates: &[MigrationCandidate]) -> Result<VerificationOutcome> {
        let mut outcome = VerificationOutcome::default();
        if candidates.is_empty() {
            return Ok(outcome);
        }

        let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;

        let mut pairs = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let staged_dir = scratch.path().join(&candidate.name);
            copy_dir(&candidate.directory, &staged_dir)?;

            let old_entry = staged_dir.join(&self.entry_point);
            let staged_entry = staged_dir.join(&self.target_entry_point);
            std::fs::rename(&old_entry, &staged_entry).with_context(|| {
                format!("Failed to rename staged entry point for {}", candidate.name)
            })?;

            pairs.push(EquivalencePair {
                name: candidate.name.clone(),
                staged_entry,
            });
        }

        for (chunk, pair_chunk) in candidates
            .chunks(self.batch_size)
            .zip(pairs.chunks(self.batch_size))
        {
            match self.evaluator.verify_batch(pair_chunk) {
                Ok(verdicts) if verdicts.len() == chunk.len() => {
                    for (candidate, verdict) in chunk.iter().zip(verdicts) {
                        if verdict {
                            outcome.verified.push(VerifiedMove {
                                candidate: candidate.clone(),
                            });
                        } else {
                            outcome.divergent.push(candidate.name.clone());
                        }
                    }
                }
                Ok(verdicts) => {
                    outcome.faults.push(format!(
                        "evaluator returned {} verdicts for {} candidates",
                        verdicts.len(),
                        chunk.len()
                    ));
                }
                Err(err) => outcome.faults.push(err.to_string()),
            }
        }

        Ok(outcome)
    }
}

/// Recursively copies a candidate directory into scratch space.
fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("Walked outside {}", src.display()))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;

    struct FnEvaluator<F>(F);

    impl<F> Evaluator for FnEvaluator<F>
    where
        F: Fn(&[EquivalencePair]) -> Result<Vec<bool>>,
    {
        fn verify_batch(&self, pairs: &[EquivalencePair]) -> Result<Vec<bool>> {
            (self.0)(pairs)
        }
    }

    fn candidate(dir: &Path, name: &str) -> MigrationCandidate {
        let directory = dir.join(name);
        fs::create_dir_all(&directory).unwrap();
        fs::write(directory.join("default.nix"), "{ }").unwrap();
        MigrationCandidate {
            name: name.to_string(),
            directory,
            line: 0,
        }
    }

    #[test]
    fn stages_renamed_copy_without_touching_original() {
        let dir = tempfile::tempdir().unwrap();
        let cand = candidate(dir.path(), "foo");
        fs::write(cand.directory.join("fix.patch"), "--- a\n").unwrap();

        let seen = RefCell::new(Vec::new());
        let evaluator = FnEvaluator(|pairs: &[EquivalencePair]| -> Result<Vec<bool>> {
            for pair in pairs {
                assert!(pair.staged_entry.is_file(), "staged entry must exist");
                assert!(pair.staged_entry.ends_with("foo/package.nix"));
                assert!(pair.staged_entry.with_file_name("fix.patch").is_file());
                seen.borrow_mut().push(pair.staged_entry.clone());
            }
            Ok(vec![true; pairs.len()])
        });

        let verifier = Verifier::new(&evaluator, DEFAULT_BATCH_SIZE, "default.nix", "package.nix");
        let outcome = verifier.verify(std::slice::from_ref(&cand)).unwrap();

        assert_eq!(outcome.verified.len(), 1);
        assert_eq!(outcome.verified[0].candidate.name, "foo");
        // Original untouched.
        assert!(cand.directory.join("default.nix").is_file());
        // Scratch purged after the run.
        assert!(!seen.borrow()[0].exists());
    }

    #[test]
    fn negative_verdict_discards_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let cand = candidate(dir.path(), "foo");

        let evaluator =
            FnEvaluator(|pairs: &[EquivalencePair]| -> Result<Vec<bool>> {
                Ok(vec![false; pairs.len()])
            });
        let verifier = Verifier::new(&evaluator, DEFAULT_BATCH_SIZE, "default.nix", "package.nix");
        let outcome = verifier.verify(std::slice::from_ref(&cand)).unwrap();

        assert!(outcome.verified.is_empty());
        assert_eq!(outcome.divergent, vec!["foo".to_string()]);
    }

    #[test]
    fn faulted_batch_drops_only_that_batch() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = vec![
            candidate(dir.path(), "aa"),
            candidate(dir.path(), "bb"),
            candidate(dir.path(), "cc"),
        ];

        // First batch (two pairs) faults; the final single-pair batch works.
        let evaluator = FnEvaluator(|pairs: &[EquivalencePair]| -> Result<Vec<bool>> {
            if pairs.len() == 2 {
                bail!("evaluator timeout");
            }
            Ok(vec![true; pairs.len()])
        });
        let verifier = Verifier::new(&evaluator, 2, "default.nix", "package.nix");
        let outcome = verifier.verify(&candidates).unwrap();

        assert_eq!(outcome.verified.len(), 1);
        assert_eq!(outcome.verified[0].candidate.name, "cc");
        assert_eq!(outcome.faults.len(), 1);
        assert!(outcome.faults[0].contains("timeout"));
    }

    #[test]
    fn reply_length_mismatch_counts_as_fault() {
        let dir = tempfile::tempdir().unwrap();
        let cand = candidate(dir.path(), "foo");

        let evaluator =
            FnEvaluator(|_: &[EquivalencePair]| -> Result<Vec<bool>> { Ok(Vec::new()) });
        let verifier = Verifier::new(&evaluator, DEFAULT_BATCH_SIZE, "default.nix", "package.nix");
        let outcome = verifier.verify(std::slice::from_ref(&cand)).unwrap();

        assert!(outcome.verified.is_empty());
        assert_eq!(outcome.faults.len(), 1);
    }

    #[test]
    fn batch_expression_pairs_original_and_relocated() {
        let pairs = vec![EquivalencePair {
            name: "foo".to_string(),
            staged_entry: PathBuf::from("/scratch/foo/package.nix"),
        }];
        let expr = batch_expression(Path::new("/tree"), "callPackage", &pairs);
        assert!(expr.starts_with("let pkgs = import /tree { };"));
        assert!(expr.contains("pkgs.\"foo\".drvPath"));
        assert!(expr.contains("pkgs.callPackage /scratch/foo/package.nix { }"));
    }
}
