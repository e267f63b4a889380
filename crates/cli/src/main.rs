//! LLM Telemetry Monitor CLI
//!
//! A command-line tool for replaying captured telemetry through the
//! detection engine, for tuning sensitivity against recorded traffic
//! without a running monitor.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// LLM Telemetry Monitor CLI
#[derive(Parser)]
#[command(name = "ltm")]
#[command(author, version, about = "CLI for the LLM Telemetry Monitor", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay an NDJSON telemetry capture through the engine
    Replay {
        /// Path to the capture file (one event per line)
        file: PathBuf,

        /// Detection threshold in standard deviations
        #[arg(long, default_value_t = 3.0)]
        sensitivity: f64,

        /// Recent points evaluated by the synchronous detectors
        #[arg(long, default_value_t = 100)]
        window_size: usize,

        /// Points required before statistical checks run
        #[arg(long, default_value_t = 30)]
        min_data_points: usize,

        /// Points retained per metric series
        #[arg(long, default_value_t = 1000)]
        lookback: usize,

        /// Skip the final periodic analysis pass
        #[arg(long)]
        skip_periodic: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            file,
            sensitivity,
            window_size,
            min_data_points,
            lookback,
            skip_periodic,
        } => commands::replay::run(
            &file,
            commands::replay::ReplayOptions {
                sensitivity,
                window_size,
                min_data_points,
                lookback,
                include_periodic: !skip_periodic,
            },
            cli.format,
        ),
    }
}
