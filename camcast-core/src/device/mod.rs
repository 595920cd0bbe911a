//! Video device abstraction
//!
//! The capture ring and capture device only talk to the hardware through
//! [`VideoDevice`]. [`V4l2Device`] implements it on the `v4l` crate; tests
//! implement it with a simulated encoder.

mod v4l2;

pub use v4l2::{V4l2Device, DEQUEUE_TIMEOUT};

use std::io;
use std::time::Duration;

use serde::Serialize;
use v4l::buffer::Flags as BufferFlags;
use v4l::capability::Flags as CapabilityFlags;
use v4l::v4l_sys;

/// H.264 elementary stream pixel format (`V4L2_PIX_FMT_H264`)
pub const PIX_FMT_H264: u32 = u32::from_le_bytes(*b"H264");

/// Driver flag marking a dequeued buffer as corrupted (`V4L2_BUF_FLAG_ERROR`)
pub const BUF_FLAG_ERROR: u32 = BufferFlags::ERROR.bits();

/// Encoder controls applied during configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    /// Target bitrate in bits per second
    Bitrate,
    /// I-frame period (GOP length)
    GopSize,
    /// H.264 profile
    Profile,
    /// Rotation in degrees
    Rotation,
    /// One-shot key frame request
    ForceKeyFrame,
    /// Time per frame; applied through `VIDIOC_S_PARM`, not a control id
    FrameInterval,
}

impl Control {
    /// V4L2 control id, `None` for settings applied by other ioctls
    pub fn cid(&self) -> Option<u32> {
        match self {
            Self::Bitrate => Some(v4l_sys::V4L2_CID_MPEG_VIDEO_BITRATE),
            Self::GopSize => Some(v4l_sys::V4L2_CID_MPEG_VIDEO_H264_I_PERIOD),
            Self::Profile => Some(v4l_sys::V4L2_CID_MPEG_VIDEO_H264_PROFILE),
            Self::Rotation => Some(v4l_sys::V4L2_CID_ROTATE),
            Self::ForceKeyFrame => Some(v4l_sys::V4L2_CID_MPEG_VIDEO_FORCE_KEY_FRAME),
            Self::FrameInterval => None,
        }
    }
}

impl std::fmt::Display for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bitrate => write!(f, "bitrate"),
            Self::GopSize => write!(f, "I-frame period"),
            Self::Profile => write!(f, "H.264 profile"),
            Self::Rotation => write!(f, "rotation"),
            Self::ForceKeyFrame => write!(f, "force key frame"),
            Self::FrameInterval => write!(f, "frame interval"),
        }
    }
}

/// Result of a capability query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceCapability {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    /// Kernel version the driver was built for, packed as `0x00MMmmpp`
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
}

impl DeviceCapability {
    /// Single-planar video capture supported
    pub fn is_video_capture(&self) -> bool {
        self.effective_caps() & CapabilityFlags::VIDEO_CAPTURE.bits() != 0
    }

    /// Streaming I/O (mmap) supported
    pub fn has_streaming(&self) -> bool {
        self.effective_caps() & CapabilityFlags::STREAMING.bits() != 0
    }

    /// Driver version as `major.minor.patch`
    pub fn version_string(&self) -> String {
        format!(
            "{}.{}.{}",
            (self.version >> 16) & 0xFF,
            (self.version >> 8) & 0xFF,
            self.version & 0xFF
        )
    }

    fn effective_caps(&self) -> u32 {
        if self.device_caps != 0 {
            self.device_caps
        } else {
            self.capabilities
        }
    }
}

/// Format the driver actually applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: u32,
    /// Maximum size of one encoded frame
    pub size_image: u32,
}

/// One filled buffer handed back by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DequeuedBuffer {
    pub index: u32,
    pub bytes_used: usize,
    pub sequence: u32,
    pub timestamp: Duration,
    pub flags: u32,
}

impl DequeuedBuffer {
    /// Driver flagged the buffer as errored
    pub fn is_error(&self) -> bool {
        self.flags & BUF_FLAG_ERROR != 0
    }
}

/// Kernel driver operations the capture ring depends on
///
/// Implementations own the memory mappings; `buffer()` exposes the mapped
/// bytes of one slot. All methods follow the V4L2 semantics of the ioctl they
/// are named after.
pub trait VideoDevice {
    /// `VIDIOC_QUERYCAP`
    fn query_capability(&mut self) -> io::Result<DeviceCapability>;

    /// `VIDIOC_S_FMT` for single-planar capture
    fn set_format(&mut self, width: u32, height: u32, fourcc: u32) -> io::Result<AppliedFormat>;

    /// `VIDIOC_S_CTRL`
    fn set_control(&mut self, control: Control, value: i32) -> io::Result<()>;

    /// `VIDIOC_S_PARM` time per frame
    fn set_frame_interval(&mut self, numerator: u32, denominator: u32) -> io::Result<()>;

    /// `VIDIOC_REQBUFS` with MMAP memory; returns the number granted.
    /// A count of zero frees the pool.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// `VIDIOC_QUERYBUF` + `mmap`; returns the mapped length
    fn map_buffer(&mut self, index: u32) -> io::Result<usize>;

    /// Unmap every mapped buffer
    fn unmap_buffers(&mut self);

    /// Mapped bytes of one slot
    fn buffer(&self, index: u32) -> Option<&[u8]>;

    /// `VIDIOC_QBUF`
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// `VIDIOC_DQBUF`, blocking
    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer>;

    /// `VIDIOC_STREAMON`
    fn stream_on(&mut self) -> io::Result<()>;

    /// `VIDIOC_STREAMOFF`
    fn stream_off(&mut self) -> io::Result<()>;
}
