//! Config command - inspect and create the capture settings file

use anyhow::{Context, Result};
use camcast_core::config::sample_config;
use camcast_core::{CaptureConfig, ConfigFile};
use clap::{Args, Subcommand};

use super::ConfigSource;

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show where the settings file is read from
    Path,

    /// Show the capture settings camcast would use
    Show {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Write a commented settings file
    Init {
        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the commented settings file to stdout
    Sample,
}

/// Run config subcommand
pub async fn config(source: &ConfigSource, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Path => {
            let path = source.path();
            let state = if path.exists() { "present" } else { "missing, defaults apply" };
            println!("{} ({})", path.display(), state);
        }
        ConfigCommand::Show { json } => {
            let config = source.load()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(());
            }

            let path = source.path();
            if path.exists() {
                println!("Settings from {}", path.display());
            } else {
                println!("No file at {}, built-in defaults", path.display());
            }
            if source.device.is_some() {
                println!("Device overridden on the command line");
            }
            println!();
            print_settings(&config);
        }
        ConfigCommand::Init { force } => {
            let path = source.path();

            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to replace it)",
                    path.display()
                );
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
            std::fs::write(&path, sample_config()).context("Failed to write config file")?;

            let written = ConfigFile::load_from(path.clone())?.to_capture_config()?;
            println!("Wrote {}", path.display());
            println!();
            print_settings(&written);
            for warning in written.validate() {
                println!("Warning: {}", warning);
            }
        }
        ConfigCommand::Sample => {
            print!("{}", sample_config());
        }
    }

    Ok(())
}

fn print_settings(config: &CaptureConfig) {
    for (name, value) in settings(config) {
        println!("  {:<20} {}", name, value);
    }
}

/// Effective capture settings as label/value rows
fn settings(config: &CaptureConfig) -> Vec<(&'static str, String)> {
    let interval = config.frame_interval;
    vec![
        ("device", config.device.display().to_string()),
        ("resolution", format!("{}x{}", config.width, config.height)),
        (
            "frame interval",
            format!("{} ({} fps, {} ticks)", interval, interval.fps(), interval.ticks()),
        ),
        ("bitrate", format!("{} kbit/s", config.bitrate / 1000)),
        ("gop", format!("{} frames", config.gop_size)),
        ("profile", config.profile.to_string()),
        ("rotation", format!("{} deg", config.rotation)),
        ("buffers", config.buffer_count.to_string()),
        (
            "sps/pps budget",
            format!(
                "{} pulls ({} after key frame request)",
                config.extraction_attempts, config.immediate_attempts
            ),
        ),
        ("key frame search", format!("{} pulls", config.keyframe_search_limit)),
    ]
}
