//! byname-migrate library for relocating package definitions into the
//! by-name layout.
//!
//! This library provides programmatic access to the migration pipeline.
//! The core workflow involves four phases:
//!
//! 1. **Scanning**: Collect `.nix` files and extract their path literals
//! 2. **Graph construction**: Build the bidirectional reference graph and
//!    the invalid-reference set
//! 3. **Analysis**: Parse the registry's binding list and decide, per
//!    candidate, whether its directory can move without breaking references
//! 4. **Migration**: Verify output identity against the external evaluator,
//!    move the survivors, and rewrite the registry
//!
//! # Example
//!
//! ```no_run
//! use byname_migrate::pipeline::{self, PipelineOptions};
//! use byname_migrate::verifier::NixEvaluator;
//! use std::path::PathBuf;
//!
//! let options = PipelineOptions {
//!     root: PathBuf::from("./nixpkgs"),
//!     ..PipelineOptions::default()
//! };
//!
//! // Dry run: analyze only, touch nothing.
//! let evaluator = NixEvaluator::new(&options.root, &options.constructor);
//! let report = pipeline::run(&options, &evaluator).unwrap();
//!
//! println!("{} candidate(s) could migrate", report.candidates.len());
//! ```

pub mod analyzer;
pub mod cli;
pub mod graph;
pub mod migrator;
pub mod pipeline;
pub mod registry;
pub mod rewriter;
pub mod scanner;
pub mod verifier;

// Re-export commonly used types at crate root
pub use analyzer::{MigrationCandidate, RejectReason, Rejection};
pub use graph::ReferenceGraph;
pub use pipeline::{MigrationReport, PipelineOptions};
pub use registry::RegistryBinding;
pub use verifier::{Evaluator, NixEvaluator, VerifiedMove};
