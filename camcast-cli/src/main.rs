//! camcast CLI
//!
//! Drives a V4L2 hardware H.264 encoder and inspects its output.
//!
//! # Usage
//!
//! ```bash
//! # Show what the encoder node supports
//! camcast info --device /dev/video11
//!
//! # Print SPS/PPS and an SDP fmtp line
//! camcast params
//!
//! # Pull GOP-paced units until Ctrl+C
//! camcast probe -n 300
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// camcast - V4L2 hardware H.264 capture for live streaming
#[derive(Parser)]
#[command(name = "camcast")]
#[command(version)]
#[command(about = "V4L2 hardware H.264 capture and GOP-paced delivery", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Encoder device node (overrides the config file)
    #[arg(short, long, global = true)]
    device: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show device capabilities and the effective configuration
    Info,

    /// Extract SPS/PPS and print them for session descriptions
    Params(commands::ParamsArgs),

    /// Pull GOP-paced units and print their timing
    Probe(commands::ProbeArgs),

    /// Manage the configuration file
    Config(commands::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("camcast={}", level).parse()?),
        )
        .with_target(false)
        .init();

    let source = commands::ConfigSource {
        device: cli.device,
        config: cli.config,
    };

    match cli.command {
        Commands::Info => commands::info(&source).await?,
        Commands::Params(args) => commands::params(&source, args).await?,
        Commands::Probe(args) => commands::probe(&source, args).await?,
        Commands::Config(args) => commands::config(&source, args).await?,
    }

    Ok(())
}
