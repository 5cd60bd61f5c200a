//! byname-migrate: relocate self-contained package definitions into the
//! by-name layout.
//!
//! Scans a declarative source tree, builds a bidirectional reference graph
//! over every `.nix` file, and migrates exactly those registry bindings
//! whose directories can move without breaking a single cross-file
//! reference, verifying output identity with the external evaluator before
//! touching the real tree.

use anyhow::{Result, bail};
use byname_migrate::cli::{Args, Commands};
use byname_migrate::graph::ReferenceGraph;
use byname_migrate::pipeline::{self, MigrationReport, PipelineOptions};
use byname_migrate::scanner;
use byname_migrate::verifier::NixEvaluator;
use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Scan {
            root,
            exclude,
            no_default_excludes,
        } => cmd_scan(root, exclude, !no_default_excludes),
        Commands::Graph {
            root,
            exclude,
            no_default_excludes,
            json,
        } => cmd_graph(root, exclude, !no_default_excludes, json),
        Commands::Detect {
            root,
            registry,
            constructor,
            entry_point,
            exclude,
            no_default_excludes,
            deny,
            json,
            verbose,
        } => {
            let options = PipelineOptions {
                root,
                registry,
                constructor,
                entry_point,
                exclude,
                default_excludes: !no_default_excludes,
                denylist: deny,
                write: false,
                ..PipelineOptions::default()
            };
            cmd_migrate(options, json, verbose)
        }
        Commands::Migrate {
            write,
            root,
            registry,
            target_root,
            constructor,
            entry_point,
            target_entry_point,
            exclude,
            no_default_excludes,
            deny,
            batch_size,
            json,
        } => {
            let options = PipelineOptions {
                root,
                registry,
                target_root,
                constructor,
                entry_point,
                target_entry_point,
                exclude,
                default_excludes: !no_default_excludes,
                denylist: deny,
                batch_size,
                write,
            };
            cmd_migrate(options, json, false)
        }
    }
}

fn cmd_scan(root: PathBuf, exclude: Vec<String>, default_excludes: bool) -> Result<()> {
    let files = scanner::collect_nix_files(&[root], &exclude, default_excludes)?;

    println!("Would scan {} files:", files.len());
    for file in files {
        println!("  {}", file.display());
    }

    Ok(())
}

#[derive(Serialize)]
struct GraphReport<'a> {
    files_scanned: usize,
    reference_edges: usize,
    invalid_files: usize,
    invalid_references: &'a std::collections::BTreeMap<
        PathBuf,
        Vec<byname_migrate::graph::InvalidReference>,
    >,
}

fn cmd_graph(
    root: PathBuf,
    exclude: Vec<String>,
    default_excludes: bool,
    json: bool,
) -> Result<()> {
    eprintln!(
        "{} Building reference graph, this can take a while",
        "info:".blue().bold()
    );
    let files = scanner::collect_nix_files(&[root], &exclude, default_excludes)?;
    let graph = ReferenceGraph::build(&files);

    if json {
        let report = GraphReport {
            files_scanned: files.len(),
            reference_edges: graph.edge_count(),
            invalid_files: graph.invalid_references().len(),
            invalid_references: graph.invalid_references(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Scanned {} files: {} reference edges from {} files",
        files.len(),
        graph.edge_count(),
        graph.referencing_file_count()
    );

    if graph.invalid_references().is_empty() {
        println!("{} No unsupported references found", "ok:".green().bold());
    } else {
        println!(
            "\n{} {} file(s) with unsupported references:",
            "Found".yellow().bold(),
            graph.invalid_references().len()
        );
        for (file, invalid) in graph.invalid_references() {
            println!("  {}", file.display());
            for reference in invalid {
                println!("    {:?} {}", reference.reason, reference.text.dimmed());
            }
        }
    }

    Ok(())
}

fn cmd_migrate(options: PipelineOptions, json: bool, verbose: bool) -> Result<()> {
    eprintln!(
        "{} Building reference graph, this can take a while",
        "info:".blue().bold()
    );
    let root = std::fs::canonicalize(&options.root)?;
    let evaluator = NixEvaluator::new(&root, &options.constructor);
    let report = pipeline::run(&options, &evaluator)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, verbose);
    }

    if !report.failed_moves.is_empty() {
        bail!("{} move(s) failed", report.failed_moves.len());
    }

    Ok(())
}

fn print_report(report: &MigrationReport, verbose: bool) {
    println!(
        "Scanned {} files ({} reference edges, {} flagged); {} of {} bindings qualify",
        report.files_scanned,
        report.reference_edges,
        report.invalid_files,
        report.bindings_qualifying,
        report.bindings_seen
    );

    if report.dry_run {
        if report.candidates.is_empty() {
            println!("{} Nothing is migratable", "ok:".green().bold());
        } else {
            println!(
                "\n{} {} migratable candidate(s):\n",
                "Found".green().bold(),
                report.candidates.len()
            );
            for candidate in &report.candidates {
                println!(
                    "  {} {}",
                    candidate.name.green(),
                    candidate.directory.display().to_string().dimmed()
                );
            }
            println!("\n{} Use `migrate --write` to apply", "hint:".cyan().bold());
        }
    } else {
        for mv in &report.executed {
            println!(
                "  {} {} -> {}",
                "moved:".green().bold(),
                mv.name,
                mv.destination.display()
            );
        }
        for name in &report.divergent {
            println!("  {} {} produced a different derivation", "skip:".yellow().bold(), name);
        }
        for fault in &report.evaluator_faults {
            println!("  {} {}", "fault:".yellow().bold(), fault);
        }
        for failed in &report.failed_moves {
            println!("  {} {}: {}", "failed:".red().bold(), failed.name, failed.error);
        }
        println!(
            "\nMigrated {} package(s), removed {} registry line(s)",
            report.executed.len(),
            report.registry_lines_removed
        );
    }

    if verbose && !report.rejected.is_empty() {
        println!("\n{} {} rejected:", "Skipped".yellow().bold(), report.rejected.len());
        for rejection in &report.rejected {
            println!(
                "  {} {} ({})",
                format!("{}:", rejection.line + 1).dimmed(),
                rejection.name,
                rejection.reason
            );
        }
    }
}
