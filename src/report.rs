//! Run summaries.
//!
//! Two formats:
//! - Pretty: colored terminal output for humans
//! - JSON: structured output for scripts and CI

use colored::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::dispatch::{DispatchReport, Outcome, WorkItem};
use crate::source::FileSet;

/// JSON summary of a run.
#[derive(Serialize)]
pub struct JsonReport<'a> {
    pub version: &'static str,
    pub input: &'a str,
    pub output_dir: &'a Path,
    pub solidity_files: &'a [PathBuf],
    pub rust_files: &'a [PathBuf],
    pub planned: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub completed: bool,
    pub outcomes: &'a [crate::dispatch::WorkOutcome],
}

impl<'a> JsonReport<'a> {
    pub fn new(
        input: &'a str,
        output_dir: &'a Path,
        files: &'a FileSet,
        report: &'a DispatchReport,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            input,
            output_dir,
            solidity_files: &files.solidity_files,
            rust_files: &files.rust_files,
            planned: report.planned,
            succeeded: report.succeeded(),
            failed: report.failed(),
            completed: report.is_clean(),
            outcomes: &report.outcomes,
        }
    }
}

/// Write the run summary as JSON to stdout.
pub fn write_json(
    input: &str,
    output_dir: &Path,
    files: &FileSet,
    report: &DispatchReport,
) -> anyhow::Result<()> {
    let json = JsonReport::new(input, output_dir, files, report);
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Write a human-readable run summary to stdout.
pub fn write_pretty(input: &str, output_dir: &Path, files: &FileSet, report: &DispatchReport) {
    write_header(input, files);
    print!("  {}", "Output:   ".dimmed());
    println!("{}", output_dir.display());
    println!();

    let mut current: Option<&Path> = None;
    for outcome in &report.outcomes {
        if current != Some(outcome.item.file.as_path()) {
            current = Some(outcome.item.file.as_path());
            println!("  {}", outcome.item.file.display().to_string().bold());
        }
        match &outcome.outcome {
            Outcome::Succeeded { artifacts } => {
                print!("    {} {:<9}", "✓".green(), outcome.item.stage.to_string());
                let names: Vec<String> = artifacts.iter().map(|a| short_name(a, output_dir)).collect();
                println!("{}", names.join(", ").dimmed());
            }
            Outcome::Failed { error } => {
                print!("    {} {:<9}", "✗".red(), outcome.item.stage.to_string());
                println!("{}", error.red());
            }
        }
    }
    println!();

    if report.failed() == 0 {
        println!(
            "  {} {} work item(s) completed",
            "✓ DONE".green().bold(),
            report.succeeded()
        );
    } else {
        println!(
            "  {} {} succeeded, {} failed",
            "✗ INCOMPLETE".red().bold(),
            report.succeeded(),
            report.failed()
        );
    }
    println!();
}

/// Print the planned work items without running them.
pub fn write_plan(input: &str, files: &FileSet, items: &[WorkItem]) {
    write_header(input, files);
    println!("  {} {} work item(s)", "Plan:".dimmed(), items.len());
    for item in items {
        println!(
            "    {:<9} {:<9} {}",
            item.language.as_str(),
            item.stage.to_string(),
            item.file.display()
        );
    }
    println!();
}

fn write_header(input: &str, files: &FileSet) {
    println!();
    print!("  ");
    print!("{}", "chainaudit".cyan().bold());
    println!(" v{}", env!("CARGO_PKG_VERSION"));
    println!();
    print!("  {}", "Input:    ".dimmed());
    println!("{}", input);
    print!("  {}", "Files:    ".dimmed());
    println!(
        "{} Solidity, {} Rust",
        files.solidity_files.len(),
        files.rust_files.len()
    );
}

/// Artifact path relative to the output directory when possible.
fn short_name(path: &Path, output_dir: &Path) -> String {
    path.strip_prefix(output_dir)
        .unwrap_or(path)
        .display()
        .to_string()
}
