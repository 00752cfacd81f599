//! Stepwright CLI - Main Entry Point
//!
//! Compiles journey documents into Playwright tests, and optionally runs and
//! heals them.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;
mod signal;

use commands::{check, compile, verify};
use signal::ExitSignal;
use stepwright_compiler::DEFAULT_CONFIG_FILE;

/// Stepwright - journey to Playwright test compiler
#[derive(Parser)]
#[command(name = "stepwright")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile journeys into tests and modules
    Compile(compile::CompileArgs),

    /// Compile, run the generated tests and heal failures
    Verify(verify::VerifyArgs),

    /// Parse and match journeys and print the IR; writes nothing
    Check(check::CheckArgs),

    /// Show version information
    Version,
}

async fn run(cli: Cli) -> anyhow::Result<ExitSignal> {
    let config = commands::load_config(&cli.config)?;
    match cli.command {
        Commands::Compile(args) => compile::execute(args, config, cli.format).await,
        Commands::Verify(args) => verify::execute(args, config, cli.format).await,
        Commands::Check(args) => check::execute(args, config, cli.format).await,
        Commands::Version => {
            println!("Stepwright v{}", stepwright_compiler::VERSION);
            Ok(ExitSignal::Success)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let signal = match run(cli).await {
        Ok(signal) => signal,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitSignal::HardError
        }
    };
    std::process::exit(signal.code());
}
