//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Trigger Sync - trigger-aligned multi-camera inspection pipeline
#[derive(Parser, Debug)]
#[command(
    name = "trigger-sync",
    author,
    version,
    about = "Trigger-driven multi-camera synchronization and inspection",
    long_about = "Counts trigger edges from a digital I/O line, tags every camera frame with \n\
                  the current trigger index, aligns frames into complete batches and gates \n\
                  them into a scorer, writing OK/NG back to the I/O line.\n\n\
                  Devices that cannot be opened are replaced by synthetic generators."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TRIGGER_SYNC_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "TRIGGER_SYNC_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the inspection pipeline
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "inspection.toml",
        env = "TRIGGER_SYNC_CONFIG"
    )]
    pub config: PathBuf,

    /// Run without a configuration file, using N synthetic channels
    #[arg(long, value_name = "N", env = "TRIGGER_SYNC_SYNTHETIC_CHANNELS")]
    pub synthetic_channels: Option<u16>,

    /// Override the synthetic trigger rate (Hz)
    #[arg(long, env = "TRIGGER_SYNC_SYNTHETIC_HZ")]
    pub synthetic_hz: Option<f64>,

    /// Override the accept threshold
    #[arg(long, env = "TRIGGER_SYNC_OK_THRESHOLD")]
    pub ok_threshold: Option<f64>,

    /// Stop after this many decisions (0 = unlimited)
    #[arg(long, default_value = "0", env = "TRIGGER_SYNC_MAX_BATCHES")]
    pub max_batches: u64,

    /// Pipeline timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "TRIGGER_SYNC_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without running pipeline
    #[arg(long)]
    pub dry_run: bool,

    /// Buffer size of the batch and results bus queues
    #[arg(long, default_value = "100", env = "TRIGGER_SYNC_BUFFER_SIZE")]
    pub buffer_size: usize,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "TRIGGER_SYNC_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "inspection.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "inspection.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show detailed channel information
    #[arg(long)]
    pub channels: bool,

    /// Show sink configuration
    #[arg(long)]
    pub sinks: bool,
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
