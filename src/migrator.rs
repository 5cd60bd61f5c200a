//! Filesystem migration execution.
//!
//! Applies verified moves to the real tree: destination directory under the
//! sharded target root, atomic directory rename, entry-point rename. Moves
//! are independent and non-transactional across candidates; a candidate that
//! fails (notably a destination that already exists) is reported loudly and
//! keeps its registry line, while the rest of the run proceeds.

use crate::analyzer::MigrationCandidate;
use crate::verifier::VerifiedMove;
use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A move that has been applied to the tree.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedMove {
    pub name: String,
    pub destination: PathBuf,
    /// Registry line consumed by this move.
    pub line: usize,
}

/// A move that could not be applied; its registry line stays.
#[derive(Debug, Clone, Serialize)]
pub struct FailedMove {
    pub name: String,
    pub error: String,
}

/// Target layout location: `<target-root>/<first-two-chars-lowercased>/<name>`.
pub fn destination(target_root: &Path, name: &str) -> PathBuf {
    let prefix: String = name.chars().take(2).flat_map(|c| c.to_lowercase()).collect();
    target_root.join(prefix).join(name)
}

/// Applies all verified moves, in any order.
pub fn execute(
    moves: &[VerifiedMove],
    target_root: &Path,
    entry_point: &str,
    target_entry_point: &str,
) -> (Vec<ExecutedMove>, Vec<FailedMove>) {
    let mut executed = Vec::new();
    let mut failed = Vec::new();

    for verified in moves {
        let candidate = &verified.candidate;
        match execute_one(candidate, target_root, entry_point, target_entry_point) {
            Ok(dest) => executed.push(ExecutedMove {
                name: candidate.name.clone(),
                destination: dest,
                line: candidate.line,
            }),
            Err(err) => failed.push(FailedMove {
                name: candidate.name.clone(),
                error: format!("{err:#}"),
            }),
        }
    }

    (executed, failed)
}

fn execute_one(
    candidate: &MigrationCandidate,
    target_root: &Path,
    entry_point: &str,
    target_entry_point: &str,
) -> Result<PathBuf> {
    let dest = destination(target_root, &candidate.name);
    if dest.exists() {
        bail!("destination {} already exists", dest.display());
    }

    let parent = dest
        .parent()
        .with_context(|| format!("destination {} has no parent", dest.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    std::fs::rename(&candidate.directory, &dest).with_context(|| {
        format!(
            "Failed to move {} to {}",
            candidate.directory.display(),
            dest.display()
        )
    })?;

    std::fs::rename(dest.join(entry_point), dest.join(target_entry_point)).with_context(|| {
        format!("Failed to rename entry point of {}", candidate.name)
    })?;

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn verified(root: &Path, name: &str) -> VerifiedMove {
        let directory = root.join("pkgs").join(name);
        fs::create_dir_all(&directory).unwrap();
        fs::write(directory.join("default.nix"), "{ }").unwrap();
        VerifiedMove {
            candidate: MigrationCandidate {
                name: name.to_string(),
                directory,
                line: 0,
            },
        }
    }

    #[test]
    fn destination_uses_lowercased_two_char_prefix() {
        assert_eq!(
            destination(Path::new("/tree/pkgs/by-name"), "foo"),
            PathBuf::from("/tree/pkgs/by-name/fo/foo")
        );
        assert_eq!(
            destination(Path::new("/tree/pkgs/by-name"), "Xorg-lib"),
            PathBuf::from("/tree/pkgs/by-name/xo/Xorg-lib")
        );
    }

    #[test]
    fn moves_directory_and_renames_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mv = verified(root, "foo");
        fs::write(mv.candidate.directory.join("fix.patch"), "--- a\n").unwrap();
        let target_root = root.join("pkgs/by-name");

        let (executed, failed) = execute(
            std::slice::from_ref(&mv),
            &target_root,
            "default.nix",
            "package.nix",
        );

        assert!(failed.is_empty());
        assert_eq!(executed.len(), 1);
        let dest = target_root.join("fo/foo");
        assert_eq!(executed[0].destination, dest);
        assert!(dest.join("package.nix").is_file());
        assert!(dest.join("fix.patch").is_file());
        assert!(!dest.join("default.nix").exists());
        assert!(!mv.candidate.directory.exists());
    }

    #[test]
    fn existing_destination_fails_that_candidate_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let blocked = verified(root, "foo");
        let clean = verified(root, "bar");
        let target_root = root.join("pkgs/by-name");
        fs::create_dir_all(target_root.join("fo/foo")).unwrap();

        let (executed, failed) = execute(
            &[blocked.clone(), clean.clone()],
            &target_root,
            "default.nix",
            "package.nix",
        );

        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].name, "bar");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "foo");
        assert!(failed[0].error.contains("already exists"));
        // The blocked candidate's source is untouched.
        assert!(blocked.candidate.directory.join("default.nix").is_file());
    }
}
