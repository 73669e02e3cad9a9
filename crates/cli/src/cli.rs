//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// AISC - adaptive intersection signal controller
#[derive(Parser, Debug)]
#[command(
    name = "aisc",
    author,
    version,
    about = "Adaptive intersection signal controller",
    long_about = "Runs one signal controller per configured intersection.\n\n\
                  Green times follow per-lane vehicle counts, emergency alerts \n\
                  preempt the normal cycle, and every state change is pushed \n\
                  to the configured observers."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "AISC_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "AISC_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the intersection controllers
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "aisc.toml", env = "AISC_CONFIG")]
    pub config: PathBuf,

    /// Stop after this many seconds (0 = run until Ctrl-C)
    #[arg(long, default_value = "0", env = "AISC_DURATION")]
    pub duration: u64,

    /// Replay a JSON-lines scenario file
    #[arg(long, env = "AISC_SCENARIO")]
    pub scenario: Option<PathBuf>,

    /// Scenario replay speed multiplier (1.0 = recorded timing)
    #[arg(long, default_value = "1.0")]
    pub replay_speed: f64,

    /// Feed every intersection from the mock detector at this interval
    /// in milliseconds (0 = disabled)
    #[arg(long, default_value = "0", env = "AISC_MOCK_FEED_MS")]
    pub mock_feed_ms: u64,

    /// Mock detector RNG seed
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "AISC_METRICS_PORT")]
    pub metrics_port: u16,
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "aisc.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "aisc.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show phase groups of every intersection
    #[arg(long)]
    pub groups: bool,

    /// Show observer configuration
    #[arg(long)]
    pub observers: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
