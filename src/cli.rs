//! Command-line interface for chainaudit.

use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{self, Settings};
use crate::dispatch::{self, Dispatcher, FailurePolicy};
use crate::error::DispatchError;
use crate::llm::LlmClient;
use crate::report;
use crate::source::{self, Fetcher, InputReference};
use crate::stages::{Stage, StageRegistry, StageSelection};

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Smart contract audit driver.
///
/// Resolves a file, directory, git repository or download URL into Solidity
/// and Rust sources, then runs diagram, analysis, semgrep, static and
/// explain stages over each file.
#[derive(Parser)]
#[command(name = "chainaudit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze a file, directory, git repository or URL
    #[command(visible_alias = "audit")]
    Analyze(AnalyzeArgs),
    /// Write a default configuration file
    Init(InitArgs),
}

/// Arguments for the analyze command.
#[derive(Parser)]
pub struct AnalyzeArgs {
    /// File path, directory path, git repository URL or download URL
    pub input: String,

    /// Output directory for artifacts (overrides config)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Path to config file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Treat the input as a git repository to clone
    #[arg(long)]
    pub force_git: bool,

    /// Run the diagram stage
    #[arg(long)]
    pub diagram: bool,

    /// Run the functional/security analysis stage
    #[arg(long)]
    pub analysis: bool,

    /// Run the semgrep rule generation stage
    #[arg(long)]
    pub semgrep: bool,

    /// Run the static analysis stage
    #[arg(long = "static")]
    pub static_analysis: bool,

    /// Run the explanation and vulnerability stage
    #[arg(long)]
    pub explain: bool,

    /// Keep going after a stage fails instead of aborting the run
    #[arg(long)]
    pub keep_going: bool,

    /// Output format: pretty or json
    #[arg(short, long, default_value = "pretty")]
    pub format: String,

    /// Resolve and discover only; print the planned work
    #[arg(long)]
    pub dry_run: bool,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl AnalyzeArgs {
    /// Requested stages; no stage flag means every stage.
    pub fn stage_selection(&self) -> StageSelection {
        let flags = [
            (self.diagram, Stage::Diagram),
            (self.analysis, Stage::Analysis),
            (self.semgrep, Stage::Semgrep),
            (self.static_analysis, Stage::Static),
            (self.explain, Stage::Explain),
        ];
        StageSelection::from_requested(
            flags
                .into_iter()
                .filter_map(|(on, stage)| on.then_some(stage)),
        )
    }
}

/// Arguments for the init command.
#[derive(Parser)]
pub struct InitArgs {
    /// Output file path
    #[arg(short, long, default_value = "chainaudit.yaml")]
    pub output: PathBuf,

    /// Write to the per-user config location instead
    #[arg(long)]
    pub user: bool,
}

/// Apply command-line overrides on top of loaded settings.
fn apply_overrides(settings: &mut Settings, args: &AnalyzeArgs) {
    if let Some(output) = &args.output {
        settings.output_dir = output.clone();
    }
    if args.keep_going {
        settings.failure_policy = FailurePolicy::Continue;
    }
}

/// Run the analyze command.
pub async fn run_analyze(args: &AnalyzeArgs) -> anyhow::Result<i32> {
    // Validate format
    if args.format != "pretty" && args.format != "json" {
        eprintln!(
            "Error: invalid format {:?}, must be 'pretty' or 'json'",
            args.format
        );
        return Ok(EXIT_ERROR);
    }

    let (mut settings, config_path) = match Settings::load(args.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };
    if let Err(e) = config::validate(&settings) {
        eprintln!("Error: invalid config: {}", e);
        return Ok(EXIT_ERROR);
    }
    apply_overrides(&mut settings, args);
    if let Some(path) = &config_path {
        tracing::info!(config = %path.display(), "using config file");
    }

    let selection = args.stage_selection();
    let options = settings.discovery_options()?;

    // Classify, fetch, discover
    let fetcher = match Fetcher::new(&settings.repos_dir, &settings.downloads_dir) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };
    let reference = InputReference::new(&args.input).force_git(args.force_git);
    let resolved = match source::resolve(&reference, &fetcher).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };
    let files = match source::collect(&resolved, &options) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };

    if files.is_empty() {
        eprintln!("Error: {}", DispatchError::NothingToAnalyze);
        return Ok(EXIT_ERROR);
    }

    if args.dry_run {
        let items = dispatch::plan(&files, &selection);
        report::write_plan(&args.input, &files, &items);
        return Ok(EXIT_SUCCESS);
    }

    let llm = match LlmClient::new(settings.llm.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };
    if !llm.has_credential() && needs_llm(&selection) {
        tracing::warn!(
            env = %settings.llm.api_key_env,
            "no language model credential configured; model-backed stages will fail"
        );
    }

    let dispatcher = Dispatcher::new(StageRegistry::standard(llm))
        .failure_policy(settings.failure_policy)
        .show_progress(!args.no_progress);

    let run = match dispatcher
        .run(&files, &selection, &settings.output_dir)
        .await
    {
        Ok(run) => run,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };

    match args.format.as_str() {
        "json" => report::write_json(&args.input, &settings.output_dir, &files, &run)?,
        _ => report::write_pretty(&args.input, &settings.output_dir, &files, &run),
    }

    if run.failed() > 0 {
        Ok(EXIT_FAILED)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

fn needs_llm(selection: &StageSelection) -> bool {
    [Stage::Analysis, Stage::Semgrep, Stage::Explain]
        .into_iter()
        .any(|s| selection.contains(s))
}

/// Run the init command.
pub fn run_init(args: &InitArgs) -> anyhow::Result<i32> {
    let output = if args.user {
        match config::user_config_path() {
            Some(p) => p,
            None => {
                eprintln!("Error: no per-user config directory on this platform");
                return Ok(EXIT_ERROR);
            }
        }
    } else {
        args.output.clone()
    };

    // Check if output already exists
    if output.exists() {
        eprintln!("Error: file already exists: {}", output.display());
        eprintln!("Remove it or use --output to specify a different path");
        return Ok(EXIT_ERROR);
    }

    // Create output directory if needed
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() && parent != Path::new(".") {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("Error: failed to create directory: {}", e);
                return Ok(EXIT_ERROR);
            }
        }
    }

    if let Err(e) = std::fs::write(&output, config::DEFAULT_TEMPLATE) {
        eprintln!("Error: failed to write config: {}", e);
        return Ok(EXIT_ERROR);
    }

    println!("Created {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Export your API key: export OPENAI_API_KEY=...");
    println!("  2. Run: chainaudit analyze <path-or-url>");

    Ok(EXIT_SUCCESS)
}
