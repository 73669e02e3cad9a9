//! # AISC CLI
//!
//! Entry point of the `aisc` binary:
//! - configuration loading and validation
//! - controller orchestration and lifecycle
//! - graceful shutdown on Ctrl-C / SIGTERM

mod cli;
mod commands;
mod error;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use observability::LoggingConfig;

use cli::{Cli, Commands};
use commands::{run_controllers, run_info, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli)?;

    let command = match &cli.command {
        Commands::Run(_) => "run",
        Commands::Validate(_) => "validate",
        Commands::Info(_) => "info",
    };
    info!(version = env!("CARGO_PKG_VERSION"), command, "aisc starting");

    let result = match &cli.command {
        Commands::Run(args) => run_controllers(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        error!(error = %e, command, "command failed");
    }
    result
}

/// Logging from CLI flags; `RUST_LOG` wins unless `--quiet`.
fn init_logging(cli: &Cli) -> Result<()> {
    let config =
        LoggingConfig::from_verbosity(cli.log_format.clone().into(), cli.verbose, cli.quiet);
    observability::init_logging(&config)
}
