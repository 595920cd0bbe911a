//! Configuration types for camcast
//!
//! Provides the capture/encoder settings and their defaults.

mod file;

pub use file::{sample_config, ConfigFile};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default capture device node
pub const DEFAULT_DEVICE: &str = "/dev/video0";

/// Default number of kernel buffers in the capture ring
pub const DEFAULT_BUFFER_COUNT: u32 = 4;

/// Rate of the presentation counter (ticks per second)
pub const CLOCK_RATE: u64 = 90_000;

/// H.264 profile requested from the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum H264Profile {
    /// Constrained Baseline
    Baseline,
    /// Main
    Main,
    /// High (most hardware encoders' best quality)
    #[default]
    High,
}

impl H264Profile {
    /// Value of `V4L2_CID_MPEG_VIDEO_H264_PROFILE`
    pub fn v4l2_value(&self) -> i32 {
        match self {
            Self::Baseline => 1, // CONSTRAINED_BASELINE
            Self::Main => 2,
            Self::High => 4,
        }
    }
}

impl std::fmt::Display for H264Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Baseline => write!(f, "baseline"),
            Self::Main => write!(f, "main"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for H264Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" | "cb" | "constrained-baseline" => Ok(Self::Baseline),
            "main" => Ok(Self::Main),
            "high" => Ok(Self::High),
            _ => Err(format!("Unknown H.264 profile: {}", s)),
        }
    }
}

/// Time per frame as a fraction of a second (e.g. 1/30)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameInterval {
    /// Numerator (seconds)
    pub numerator: u32,
    /// Denominator
    pub denominator: u32,
}

impl Default for FrameInterval {
    fn default() -> Self {
        Self {
            numerator: 1,
            denominator: 30,
        }
    }
}

impl FrameInterval {
    /// Interval for a whole number of frames per second
    pub fn from_fps(fps: u32) -> Self {
        Self {
            numerator: 1,
            denominator: fps,
        }
    }

    /// Frames per second (rounded down)
    pub fn fps(&self) -> u32 {
        if self.numerator == 0 {
            0
        } else {
            self.denominator / self.numerator
        }
    }

    /// Presentation-counter ticks per frame (3000 at 1/30)
    pub fn ticks(&self) -> u64 {
        if self.denominator == 0 {
            return 0;
        }
        CLOCK_RATE * self.numerator as u64 / self.denominator as u64
    }

    /// Wall-clock length of one frame
    pub fn duration(&self) -> Duration {
        if self.denominator == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(1_000_000 * self.numerator as u64 / self.denominator as u64)
    }
}

impl std::fmt::Display for FrameInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Complete capture configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Device node of the hardware encoder
    pub device: PathBuf,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// I-frame period in frames
    pub gop_size: u32,
    /// Time per frame
    pub frame_interval: FrameInterval,
    /// Rotation in degrees (0, 90, 180, 270)
    pub rotation: u32,
    /// H.264 profile
    pub profile: H264Profile,
    /// Number of kernel buffers
    pub buffer_count: u32,
    /// Pulls allowed for regular SPS/PPS extraction
    pub extraction_attempts: u32,
    /// Pulls allowed for extraction after a forced key frame
    pub immediate_attempts: u32,
    /// Pulls one delivery call may spend waiting for an IDR
    pub keyframe_search_limit: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            width: 640,
            height: 480,
            bitrate: 1_000_000,
            gop_size: 30,
            frame_interval: FrameInterval::default(),
            rotation: 180,
            profile: H264Profile::default(),
            buffer_count: DEFAULT_BUFFER_COUNT,
            extraction_attempts: 30,
            immediate_attempts: 10,
            keyframe_search_limit: 300,
        }
    }
}

impl CaptureConfig {
    /// Create a config for the given device node with default settings
    pub fn for_device(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            ..Self::default()
        }
    }

    /// Set the resolution
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the bitrate in bits per second
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Set the GOP length in frames
    pub fn with_gop_size(mut self, gop_size: u32) -> Self {
        self.gop_size = gop_size;
        self
    }

    /// Set the time per frame
    pub fn with_frame_interval(mut self, numerator: u32, denominator: u32) -> Self {
        self.frame_interval = FrameInterval {
            numerator,
            denominator,
        };
        self
    }

    /// Set the rotation in degrees
    pub fn with_rotation(mut self, degrees: u32) -> Self {
        self.rotation = degrees;
        self
    }

    /// Set the H.264 profile
    pub fn with_profile(mut self, profile: H264Profile) -> Self {
        self.profile = profile;
        self
    }

    /// Set the number of kernel buffers
    pub fn with_buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count;
        self
    }

    /// Set the regular and immediate extraction budgets
    pub fn with_extraction_attempts(mut self, regular: u32, immediate: u32) -> Self {
        self.extraction_attempts = regular;
        self.immediate_attempts = immediate;
        self
    }

    /// Set how many pulls delivery may spend waiting for an IDR
    pub fn with_keyframe_search_limit(mut self, limit: u32) -> Self {
        self.keyframe_search_limit = limit;
        self
    }

    /// Frames per second
    pub fn fps(&self) -> u32 {
        self.frame_interval.fps()
    }

    /// Validate the configuration and return any warnings
    ///
    /// An empty list means the configuration looks good.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.bitrate < 100_000 {
            warnings.push(format!(
                "Bitrate {} bit/s is very low; expect heavy artifacts.",
                self.bitrate
            ));
        }

        let fps = self.fps().max(1);
        if self.gop_size > fps * 10 {
            warnings.push(format!(
                "GOP size {} frames means clients may wait over 10 seconds for a key frame.",
                self.gop_size
            ));
        }

        // Extraction sees at most one GOP's worth of headers per attempt budget
        if self.extraction_attempts < self.gop_size {
            warnings.push(format!(
                "extraction_attempts ({}) is shorter than one GOP ({}); SPS/PPS extraction may time out.",
                self.extraction_attempts, self.gop_size
            ));
        }

        if self.keyframe_search_limit < self.gop_size {
            warnings.push(format!(
                "keyframe_search_limit ({}) is shorter than one GOP ({}); delivery may fail to bootstrap.",
                self.keyframe_search_limit, self.gop_size
            ));
        }

        if self.buffer_count > 32 {
            warnings.push(format!(
                "{} capture buffers adds latency without benefit.",
                self.buffer_count
            ));
        }

        warnings
    }

    /// Validate and return an error if configuration cannot work
    ///
    /// Unlike `validate()` which returns warnings, this returns hard errors.
    pub fn validate_strict(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err("Resolution cannot be zero".to_string());
        }

        if self.frame_interval.numerator == 0 || self.frame_interval.denominator == 0 {
            return Err(format!(
                "Frame interval {} must have a non-zero numerator and denominator",
                self.frame_interval
            ));
        }

        if self.gop_size == 0 {
            return Err("GOP size cannot be zero".to_string());
        }

        if !matches!(self.rotation, 0 | 90 | 180 | 270) {
            return Err(format!(
                "Rotation {} is not one of 0, 90, 180, 270",
                self.rotation
            ));
        }

        if self.buffer_count < 2 {
            return Err(format!(
                "At least 2 capture buffers are required, got {}",
                self.buffer_count
            ));
        }

        if self.extraction_attempts == 0 || self.keyframe_search_limit == 0 {
            return Err("Retry budgets cannot be zero".to_string());
        }

        Ok(())
    }
}
