//! camcast Core Library
//!
//! Live H.264 from a V4L2 hardware encoder, paced for streaming sessions.
//!
//! This library provides:
//! - Memory-mapped capture from a V4L2 H.264 encoder
//! - Annex-B scanning and SPS/PPS extraction
//! - GOP-paced delivery with counter-derived presentation times
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌───────────────┐    ┌─────────────┐    ┌──────────────────┐
//! │ VideoDevice │───▶│ CaptureDevice │───▶│  GopPacer   │───▶│ StreamController │
//! │ (V4L2 mmap) │    │ (buffer ring) │    │ (SPS/PPS/IDR│    │ (one consumer)   │
//! └─────────────┘    └───────────────┘    │  then P)    │    └──────────────────┘
//!                            │            └─────────────┘
//!                            ▼
//!                   ParameterSetExtractor
//! ```

pub mod bitstream;
pub mod capture;
pub mod config;
pub mod delivery;
pub mod device;
pub mod error;
pub mod session;
pub mod types;

pub use bitstream::{ParameterSetCache, ParameterSetExtractor};
pub use capture::{AccessUnit, CaptureDevice, ConfigureReport};
pub use config::{CaptureConfig, ConfigFile, FrameInterval, H264Profile};
pub use delivery::{DeliveryState, GopPacer, PresentationClock};
pub use device::{V4l2Device, VideoDevice};
pub use error::{CaptureError, ControlWarning, Result, ResultExt};
pub use session::StreamController;
pub use types::{ConsumerId, DeliveredUnit, FrameInfo, NalType, ParameterSets};
