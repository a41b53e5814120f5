//! Chainaudit CLI entry point.

use clap::Parser;
use chainaudit::cli::{self, Cli, Commands, EXIT_ERROR};
use chainaudit::logging;
use tracing::Level;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    logging::init(cli.log_json, level);

    let result = match &cli.command {
        Commands::Analyze(args) => cli::run_analyze(args).await,
        Commands::Init(args) => cli::run_init(args),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_ERROR
        }
    };

    std::process::exit(exit_code);
}
