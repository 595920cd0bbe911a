//! Configuration file loading and merging
//!
//! Loads user configuration from `~/.config/camcast/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::{CaptureConfig, FrameInterval, H264Profile};
use crate::error::{CaptureError, Result};

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Device settings
    #[serde(default)]
    pub device: DeviceSettings,

    /// Encoder settings
    #[serde(default)]
    pub video: VideoSettings,

    /// Parameter-set extraction and delivery budgets
    #[serde(default)]
    pub extraction: ExtractionSettings,
}

/// Capture device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Device node
    #[serde(default = "default_device")]
    pub path: PathBuf,

    /// Number of kernel buffers
    #[serde(default = "default_buffers")]
    pub buffers: u32,
}

/// Hardware encoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSettings {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// Bitrate in bits per second
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    /// I-frame period in frames
    #[serde(default = "default_gop_size")]
    pub gop_size: u32,

    /// Time per frame, numerator
    #[serde(default = "default_one")]
    pub frame_interval_num: u32,

    /// Time per frame, denominator
    #[serde(default = "default_fps")]
    pub frame_interval_den: u32,

    /// Rotation in degrees
    #[serde(default = "default_rotation")]
    pub rotation: u32,

    /// H.264 profile (baseline, main, high)
    #[serde(default = "default_profile")]
    pub profile: String,
}

/// Retry budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Pulls for regular SPS/PPS extraction
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Pulls for extraction after a forced key frame
    #[serde(default = "default_immediate_attempts")]
    pub immediate_attempts: u32,

    /// Pulls one delivery call may spend waiting for an IDR
    #[serde(default = "default_keyframe_search_limit")]
    pub keyframe_search_limit: u32,
}

fn default_device() -> PathBuf {
    PathBuf::from(super::DEFAULT_DEVICE)
}

fn default_buffers() -> u32 {
    super::DEFAULT_BUFFER_COUNT
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_bitrate() -> u32 {
    1_000_000
}

fn default_gop_size() -> u32 {
    30
}

fn default_one() -> u32 {
    1
}

fn default_fps() -> u32 {
    30
}

fn default_rotation() -> u32 {
    180
}

fn default_profile() -> String {
    "high".to_string()
}

fn default_attempts() -> u32 {
    30
}

fn default_immediate_attempts() -> u32 {
    10
}

fn default_keyframe_search_limit() -> u32 {
    300
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            path: default_device(),
            buffers: default_buffers(),
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            bitrate: default_bitrate(),
            gop_size: default_gop_size(),
            frame_interval_num: default_one(),
            frame_interval_den: default_fps(),
            rotation: default_rotation(),
            profile: default_profile(),
        }
    }
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            immediate_attempts: default_immediate_attempts(),
            keyframe_search_limit: default_keyframe_search_limit(),
        }
    }
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("camcast").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("camcast")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/camcast/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| CaptureError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)
            .map_err(|e| CaptureError::Config(format!("Failed to parse config file: {}", e)))?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CaptureError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| CaptureError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)
            .map_err(|e| CaptureError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Build the runtime capture configuration from the file settings
    pub fn to_capture_config(&self) -> Result<CaptureConfig> {
        let profile: H264Profile = self.video.profile.parse().map_err(CaptureError::Config)?;

        Ok(CaptureConfig {
            device: self.device.path.clone(),
            width: self.video.width,
            height: self.video.height,
            bitrate: self.video.bitrate,
            gop_size: self.video.gop_size,
            frame_interval: FrameInterval {
                numerator: self.video.frame_interval_num,
                denominator: self.video.frame_interval_den,
            },
            rotation: self.video.rotation,
            profile,
            buffer_count: self.device.buffers,
            extraction_attempts: self.extraction.attempts,
            immediate_attempts: self.extraction.immediate_attempts,
            keyframe_search_limit: self.extraction.keyframe_search_limit,
        })
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# camcast configuration

[device]
# V4L2 node of the hardware H.264 encoder
path = "/dev/video0"

# Kernel buffers in the capture ring
buffers = 4

[video]
width = 640
height = 480

# Target bitrate in bits per second
bitrate = 1000000

# I-frame period in frames (30 = one second at 30 fps)
gop_size = 30

# Time per frame: frame_interval_num / frame_interval_den seconds
frame_interval_num = 1
frame_interval_den = 30

# Rotation in degrees: 0, 90, 180, 270
rotation = 180

# H.264 profile: baseline, main, high
profile = "high"

[extraction]
# Access units scanned for SPS/PPS before giving up
attempts = 30

# Access units scanned right after forcing a key frame
immediate_attempts = 10

# Access units one delivery call may discard while waiting for an IDR
keyframe_search_limit = 300
"#
    .to_string()
}
