//! Error types for camcast

use std::path::PathBuf;

use thiserror::Error;

use crate::device::Control;
use crate::types::{ConsumerId, NalType};

/// Result type alias using CaptureError
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Main error type for capture, extraction and delivery
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Device node could not be opened
    #[error("Cannot open device {}: {source}", .path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Operation attempted before a successful open
    #[error("Capture device is not open")]
    NotOpen,

    /// Format or buffer pool setup failed
    #[error("Device configuration failed: {0}")]
    DeviceConfig(String),

    /// Stream on/off failed
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// Transient dequeue failure; the caller may retry
    #[error("No frame available: {0}")]
    NoFrame(String),

    /// A dequeued buffer has not been returned to the kernel yet
    #[error("Buffer {index} is still held; release it before dequeuing again")]
    BufferHeld { index: u32 },

    /// The driver delivered a frame but flagged it as unusable
    #[error("Invalid frame (sequence {sequence})")]
    InvalidFrame { sequence: u32 },

    /// SPS/PPS not found within the retry budget
    #[error("SPS/PPS not found within {attempts} attempts")]
    ExtractionTimeout { attempts: u32 },

    /// No IDR access unit within the search budget of one pull
    #[error("No key frame within {pulls} access units")]
    KeyframeTimeout { pulls: u32 },

    /// A parameter set does not fit the consumer's buffer
    #[error("{kind} of {size} bytes exceeds the maximum deliverable size of {max} bytes")]
    UnitTooLarge { kind: NalType, size: usize, max: usize },

    /// Another consumer already owns the stream
    #[error("{active} is already streaming, rejecting {rejected}")]
    ConsumerBusy {
        active: ConsumerId,
        rejected: ConsumerId,
    },

    /// Pull from a consumer that never attached
    #[error("{0} is not attached")]
    UnknownConsumer(ConsumerId),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CaptureError>,
    },
}

impl CaptureError {
    /// Create a device configuration error
    pub fn device_config(msg: impl Into<String>) -> Self {
        Self::DeviceConfig(msg.into())
    }

    /// Create a streaming error
    pub fn streaming(msg: impl Into<String>) -> Self {
        Self::Streaming(msg.into())
    }

    /// Create a transient no-frame error
    pub fn no_frame(msg: impl Into<String>) -> Self {
        Self::NoFrame(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context wrappers
    pub fn root(&self) -> &CaptureError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether retrying the same operation later can succeed
    ///
    /// Dequeue and extraction failures are transient; format and
    /// buffer-pool failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            Self::NoFrame(_)
                | Self::ExtractionTimeout { .. }
                | Self::KeyframeTimeout { .. }
                | Self::ConsumerBusy { .. }
        )
    }

    /// Short hint for the user on how to resolve the error
    pub fn user_hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::DeviceOpen { .. } => Some(
                "Check that the device node exists and that you are in the 'video' group",
            ),
            Self::NotOpen => Some("Open the capture device before configuring or streaming"),
            Self::DeviceConfig(_) => Some(
                "The encoder rejected the format or buffer request; try a lower resolution or check `v4l2-ctl --all`",
            ),
            Self::ExtractionTimeout { .. } => Some(
                "The encoder did not emit SPS/PPS; increase extraction_attempts or lower gop_size",
            ),
            Self::KeyframeTimeout { .. } => {
                Some("The encoder did not emit an IDR frame; check the gop_size setting")
            }
            Self::UnitTooLarge { .. } => {
                Some("Increase the consumer's maximum unit size (e.g. `camcast probe --max-size`)")
            }
            Self::ConsumerBusy { .. } => {
                Some("Only one streaming client is supported; disconnect the other client first")
            }
            Self::Config(_) => Some("Check ~/.config/camcast/config.toml for syntax errors"),
            _ => None,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

/// A hardware control that could not be applied
///
/// Control failures never abort configuration; they are logged and
/// collected so callers can report them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlWarning {
    /// Which control failed
    pub control: Control,
    /// Value that was requested, as shown to the user
    pub value: String,
    /// OS error text
    pub reason: String,
}

impl std::fmt::Display for ControlWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Failed to set {} to {}: {}",
            self.control, self.value, self.reason
        )
    }
}
