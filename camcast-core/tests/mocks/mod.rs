//! Mock infrastructure for testing
//!
//! Provides a simulated hardware encoder implementing `VideoDevice` and
//! builders for Annex-B access units.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use camcast_core::capture::CaptureDevice;
use camcast_core::config::CaptureConfig;
use camcast_core::device::{
    AppliedFormat, Control, DequeuedBuffer, DeviceCapability, VideoDevice, BUF_FLAG_ERROR,
    PIX_FMT_H264,
};

/// Size of each simulated kernel buffer
pub const BUFFER_SIZE: usize = 64 * 1024;

/// High profile, level 3.0
pub const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x1E, 0xAC, 0xD9, 0x40, 0xA0, 0x3D, 0xA1];
pub const PPS: &[u8] = &[0x68, 0xEE, 0x3C, 0x80];

/// Baseline profile, level 3.1
pub const OTHER_SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1F, 0x8C, 0x8D];
pub const OTHER_PPS: &[u8] = &[0x68, 0xCE, 0x06, 0xE2];

/// NAL unit with the given header followed by `body_len` non-zero bytes
pub fn nal(header: u8, body_len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(body_len + 1);
    data.push(header);
    data.extend((0..body_len).map(|i| (i % 200 + 1) as u8));
    data
}

pub fn idr_nal(body_len: usize) -> Vec<u8> {
    nal(0x65, body_len)
}

pub fn p_nal(body_len: usize) -> Vec<u8> {
    nal(0x41, body_len)
}

/// Join NAL units with 4-byte start codes
pub fn annexb(nals: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    out
}

/// Join NAL units with 3-byte start codes
pub fn annexb_short(nals: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 1]);
        out.extend_from_slice(nal);
    }
    out
}

pub fn sps_frame() -> Vec<u8> {
    annexb(&[SPS])
}

pub fn pps_frame() -> Vec<u8> {
    annexb(&[PPS])
}

pub fn idr_frame() -> Vec<u8> {
    annexb(&[&idr_nal(120)])
}

pub fn p_frame() -> Vec<u8> {
    annexb(&[&p_nal(40)])
}

/// SPS, PPS and IDR in one access unit, as most encoders emit key frames
pub fn keyframe_unit() -> Vec<u8> {
    annexb(&[SPS, PPS, &idr_nal(120)])
}

/// `gops` key-frame units each followed by `inter` P frames
pub fn gop_stream(gops: usize, inter: usize) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    for _ in 0..gops {
        frames.push(keyframe_unit());
        frames.extend((0..inter).map(|_| p_frame()));
    }
    frames
}

/// One scripted encoder output
#[derive(Debug, Clone)]
pub struct ScriptedFrame {
    pub data: Vec<u8>,
    pub flags: u32,
}

impl From<Vec<u8>> for ScriptedFrame {
    fn from(data: Vec<u8>) -> Self {
        Self { data, flags: 0 }
    }
}

/// Simulated V4L2 H.264 encoder
///
/// Follows the V4L2 buffer protocol: buffers must be requested, mapped and
/// queued before streaming, a dequeue takes the oldest queued buffer and
/// fills it with the next scripted frame. An exhausted script behaves like
/// an encoder that stopped producing output.
#[derive(Debug, Default)]
pub struct SimulatedEncoder {
    script: VecDeque<ScriptedFrame>,
    /// Frames prepended to the script when a key frame is forced
    pub key_frame_burst: Vec<Vec<u8>>,
    buffers: Vec<Vec<u8>>,
    allocated: u32,
    queued: VecDeque<u32>,
    streaming: bool,
    sequence: u32,

    /// Maximum number of buffers the "driver" grants
    pub grant_limit: Option<u32>,
    pub fail_capability: bool,
    pub fail_format: bool,
    /// Pixel format reported back by S_FMT (defaults to H.264)
    pub reported_fourcc: Option<u32>,
    pub fail_controls: Vec<Control>,
    pub fail_frame_interval: bool,
    pub fail_map_at: Option<u32>,
    /// Number of upcoming QBUF calls that fail
    pub fail_queue: u32,
    /// Index the next dequeue reports instead of the real one
    pub misreport_index: Option<u32>,

    /// Controls applied so far, in order
    pub controls: Vec<(Control, i32)>,
    pub frame_interval: Option<(u32, u32)>,
    pub format: Option<(u32, u32)>,
    pub key_frame_requests: u32,
    pub dequeues: u32,
    pub stream_ons: u32,
    pub stream_offs: u32,
    pub unmaps: u32,
    /// Every REQBUFS count, in order
    pub buffer_requests: Vec<u32>,
    /// Every QBUF index, in order, including failed ones
    pub queue_attempts: Vec<u32>,
}

impl SimulatedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoder that will emit the given access units in order
    pub fn with_frames(frames: impl IntoIterator<Item = Vec<u8>>) -> Self {
        let mut encoder = Self::new();
        encoder.script = frames.into_iter().map(ScriptedFrame::from).collect();
        encoder
    }

    pub fn push_frame(&mut self, data: Vec<u8>) {
        self.script.push_back(data.into());
    }

    /// Frame the driver flags with `V4L2_BUF_FLAG_ERROR`
    pub fn push_error_frame(&mut self, data: Vec<u8>) {
        self.script.push_back(ScriptedFrame {
            data,
            flags: BUF_FLAG_ERROR,
        });
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    pub fn mapped(&self) -> usize {
        self.buffers.len()
    }

    pub fn control_value(&self, control: Control) -> Option<i32> {
        self.controls
            .iter()
            .rev()
            .find(|(c, _)| *c == control)
            .map(|(_, v)| *v)
    }
}

fn einval(what: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, what.into())
}

impl VideoDevice for SimulatedEncoder {
    fn query_capability(&mut self) -> io::Result<DeviceCapability> {
        if self.fail_capability {
            return Err(einval("QUERYCAP rejected"));
        }
        Ok(DeviceCapability {
            driver: "sim-h264".to_string(),
            card: "Simulated H.264 Encoder".to_string(),
            bus_info: "platform:sim".to_string(),
            version: 0x0006_0C00,
            capabilities: 0x8400_0001,
            device_caps: 0x0400_0001,
        })
    }

    fn set_format(&mut self, width: u32, height: u32, fourcc: u32) -> io::Result<AppliedFormat> {
        if self.fail_format {
            return Err(einval("S_FMT rejected"));
        }
        self.format = Some((width, height));
        Ok(AppliedFormat {
            width,
            height,
            fourcc: self.reported_fourcc.unwrap_or(fourcc),
            size_image: BUFFER_SIZE as u32,
        })
    }

    fn set_control(&mut self, control: Control, value: i32) -> io::Result<()> {
        if self.fail_controls.contains(&control) {
            return Err(einval(format!("{} not supported", control)));
        }
        if control == Control::ForceKeyFrame {
            self.key_frame_requests += 1;
            for frame in self.key_frame_burst.iter().rev() {
                self.script.push_front(frame.clone().into());
            }
        }
        self.controls.push((control, value));
        Ok(())
    }

    fn set_frame_interval(&mut self, numerator: u32, denominator: u32) -> io::Result<()> {
        if self.fail_frame_interval {
            return Err(einval("S_PARM rejected"));
        }
        self.frame_interval = Some((numerator, denominator));
        Ok(())
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.buffer_requests.push(count);
        if self.streaming {
            return Err(io::Error::new(io::ErrorKind::ResourceBusy, "REQBUFS while streaming"));
        }
        if count > 0 && !self.buffers.is_empty() {
            return Err(io::Error::new(io::ErrorKind::ResourceBusy, "buffers still mapped"));
        }

        let granted = match self.grant_limit {
            Some(limit) => count.min(limit),
            None => count,
        };
        self.allocated = granted;
        self.queued.clear();
        Ok(granted)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<usize> {
        if self.fail_map_at == Some(index) {
            return Err(io::Error::new(io::ErrorKind::OutOfMemory, "mmap failed"));
        }
        if index >= self.allocated || index as usize != self.buffers.len() {
            return Err(einval(format!("cannot map buffer {}", index)));
        }
        self.buffers.push(vec![0; BUFFER_SIZE]);
        Ok(BUFFER_SIZE)
    }

    fn unmap_buffers(&mut self) {
        self.unmaps += 1;
        self.buffers.clear();
    }

    fn buffer(&self, index: u32) -> Option<&[u8]> {
        self.buffers.get(index as usize).map(Vec::as_slice)
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        self.queue_attempts.push(index);
        if self.fail_queue > 0 {
            self.fail_queue -= 1;
            return Err(io::Error::other(format!("QBUF {} failed", index)));
        }
        if index as usize >= self.buffers.len() {
            return Err(einval(format!("buffer {} not mapped", index)));
        }
        if self.queued.contains(&index) {
            return Err(einval(format!("buffer {} already queued", index)));
        }
        self.queued.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        if !self.streaming {
            return Err(einval("not streaming"));
        }
        if self.script.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "encoder produced no frame"));
        }
        let index = self
            .queued
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "no buffer queued"))?;
        let Some(frame) = self.script.pop_front() else {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "encoder produced no frame"));
        };

        let buf = &mut self.buffers[index as usize];
        let used = frame.data.len().min(buf.len());
        buf[..used].copy_from_slice(&frame.data[..used]);

        self.dequeues += 1;
        self.sequence += 1;
        Ok(DequeuedBuffer {
            index: self.misreport_index.take().unwrap_or(index),
            bytes_used: used,
            sequence: self.sequence,
            timestamp: Duration::from_micros(self.sequence as u64 * 33_333),
            flags: frame.flags,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        if self.buffers.is_empty() {
            return Err(einval("no buffers"));
        }
        self.stream_ons += 1;
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.stream_offs += 1;
        self.streaming = false;
        self.queued.clear();
        Ok(())
    }
}

/// Check the H.264 format was requested
pub fn assert_h264(format: &AppliedFormat) {
    assert_eq!(format.fourcc, PIX_FMT_H264);
}

/// Capture device over a simulated encoder, configured but not started
pub fn configured_capture(
    frames: impl IntoIterator<Item = Vec<u8>>,
) -> CaptureDevice<SimulatedEncoder> {
    configured_capture_with(SimulatedEncoder::with_frames(frames), CaptureConfig::default())
}

pub fn configured_capture_with(
    encoder: SimulatedEncoder,
    config: CaptureConfig,
) -> CaptureDevice<SimulatedEncoder> {
    let mut capture = CaptureDevice::with_device(encoder, config);
    capture.configure().expect("simulated encoder configures");
    capture
}

/// Capture device over a simulated encoder, configured and streaming
pub fn streaming_capture(
    frames: impl IntoIterator<Item = Vec<u8>>,
) -> CaptureDevice<SimulatedEncoder> {
    let mut capture = configured_capture(frames);
    capture.start().expect("simulated encoder starts");
    capture
}

/// The simulated encoder behind a capture device
pub fn encoder(capture: &CaptureDevice<SimulatedEncoder>) -> &SimulatedEncoder {
    capture.device().expect("capture device is open")
}

pub fn encoder_mut(capture: &mut CaptureDevice<SimulatedEncoder>) -> &mut SimulatedEncoder {
    capture.device_mut().expect("capture device is open")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annexb_builder() {
        let au = annexb(&[SPS, PPS]);
        assert_eq!(au.len(), 4 + SPS.len() + 4 + PPS.len());
        assert_eq!(&au[..5], &[0, 0, 0, 1, 0x67]);
    }

    #[test]
    fn test_nal_body_has_no_zero_bytes() {
        assert!(idr_nal(1000).iter().all(|&b| b != 0));
    }

    #[test]
    fn test_gop_stream_shape() {
        let frames = gop_stream(2, 3);
        assert_eq!(frames.len(), 8);
        assert_eq!(frames[4], keyframe_unit());
    }
}
