//! Virtback CLI - thin-provisioned virtual machine disk backups
//!
//! This is the main entry point for the virtback command-line interface.

mod cli;
mod commands;
mod hypervisor;
mod output;
mod version;

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use virtback_core::ExitStatus;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI args
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose, cli.quiet);

    let config_dir = cli.config_dir.clone();
    let result = match cli.command {
        Commands::Version(args) => commands::version::run(args),
        Commands::Config(args) => commands::config::run(args, config_dir.as_deref()),
        Commands::Backup(args) => commands::backup::run(args, config_dir.as_deref()).await,
        Commands::Restore(args) => commands::restore::run(args, config_dir.as_deref()).await,
        Commands::Map(args) => commands::map::run(args),
        Commands::Replay(args) => commands::replay::run(args).await,
        Commands::Info(args) => commands::info::run(args),
        Commands::Verify(args) => commands::verify::run(args),
    };

    let status = match result {
        Ok(outcome) => {
            for warning in &outcome.warnings {
                output::warning(warning);
            }
            ExitStatus::from_outcome(false, outcome.warnings.len(), cli.strict)
        }
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitStatus::Failure
        }
    };
    status.into()
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            // Stage logs are shown by default; -v adds per-extent detail
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
