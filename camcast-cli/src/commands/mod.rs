//! CLI command implementations

mod config;
mod info;
mod params;
mod probe;

use std::path::PathBuf;

use anyhow::{Context, Result};
use camcast_core::{CaptureConfig, CaptureDevice, ConfigFile, ConfigureReport};
use tracing::warn;

pub use config::{config, ConfigArgs};
pub use info::info;
pub use params::{params, ParamsArgs};
pub use probe::{probe, ProbeArgs};

/// Where the effective configuration comes from
pub struct ConfigSource {
    /// `--device` override
    pub device: Option<PathBuf>,
    /// `--config` override
    pub config: Option<PathBuf>,
}

impl ConfigSource {
    /// Path of the config file in use
    pub fn path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(ConfigFile::default_path)
    }

    /// Load the config file and apply command-line overrides
    pub fn load(&self) -> Result<CaptureConfig> {
        let file = ConfigFile::load_from(self.path()).context("Failed to load configuration")?;
        let mut config = file.to_capture_config()?;
        if let Some(device) = &self.device {
            config.device = device.clone();
        }

        config
            .validate_strict()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
        for warning in config.validate() {
            warn!("{}", warning);
        }
        Ok(config)
    }
}

/// Open and configure the encoder named by the configuration
fn open_capture(config: CaptureConfig) -> Result<(CaptureDevice, ConfigureReport)> {
    let mut capture = CaptureDevice::new(config);
    capture.open_configured()?;
    let report = capture.configure()?;

    for warning in &report.warnings {
        eprintln!("Warning: {}", warning);
    }
    Ok((capture, report))
}
