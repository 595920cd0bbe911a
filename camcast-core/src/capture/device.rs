//! Hardware H.264 encoder capture device

use std::path::Path;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::ring::BufferRing;
use crate::bitstream::{strip_start_code, ParameterSetCache};
use crate::config::CaptureConfig;
use crate::device::{AppliedFormat, Control, DeviceCapability, V4l2Device, VideoDevice, PIX_FMT_H264};
use crate::error::{CaptureError, ControlWarning, Result};
use crate::types::{FrameInfo, ParameterSets};

/// Outcome of [`CaptureDevice::configure`]
#[derive(Debug, Clone)]
pub struct ConfigureReport {
    pub capability: DeviceCapability,
    pub format: AppliedFormat,
    /// Buffers granted by the driver
    pub buffers: usize,
    /// Controls the driver refused
    pub warnings: Vec<ControlWarning>,
}

/// Capture device driving a hardware H.264 encoder
///
/// Owns the device handle, the buffer ring and the parameter-set cache.
/// Every operation except `open` fails with `NotOpen` until a device is
/// attached.
pub struct CaptureDevice<D: VideoDevice = V4l2Device> {
    device: Option<D>,
    config: CaptureConfig,
    ring: BufferRing,
    params: ParameterSetCache,
}

impl CaptureDevice<V4l2Device> {
    /// Create an unopened device
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            device: None,
            config,
            ring: BufferRing::new(),
            params: ParameterSetCache::new(),
        }
    }

    /// Open a V4L2 node, replacing any device already open
    ///
    /// On failure the object stays usable for another attempt.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let device = V4l2Device::open(path).map_err(|source| CaptureError::DeviceOpen {
            path: path.to_path_buf(),
            source,
        })?;

        self.close();
        self.device = Some(device);
        info!("Opened capture device {}", path.display());
        Ok(())
    }

    /// Open the node named in the configuration
    pub fn open_configured(&mut self) -> Result<()> {
        let path = self.config.device.clone();
        self.open(path)
    }
}

impl<D: VideoDevice> CaptureDevice<D> {
    /// Wrap an already opened device
    pub fn with_device(device: D, config: CaptureConfig) -> Self {
        Self {
            device: Some(device),
            config,
            ring: BufferRing::new(),
            params: ParameterSetCache::new(),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn is_streaming(&self) -> bool {
        self.ring.is_streaming()
    }

    /// Read-only view of the buffer ring
    pub fn ring(&self) -> &BufferRing {
        &self.ring
    }

    /// The underlying device, if open
    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> Option<&mut D> {
        self.device.as_mut()
    }

    /// Query capabilities, set the H.264 format, apply encoder controls and
    /// map the buffer pool
    ///
    /// Control failures are collected in the report; format and buffer
    /// failures abort.
    pub fn configure(&mut self) -> Result<ConfigureReport> {
        let device = self.device.as_mut().ok_or(CaptureError::NotOpen)?;
        let config = &self.config;

        if self.ring.is_streaming() {
            self.ring.teardown(device);
        }

        let capability = device.query_capability().map_err(|e| {
            CaptureError::device_config(format!("Failed to query capabilities: {}", e))
        })?;
        debug!(
            "Driver {} ({}) at {}, caps {:#010x}",
            capability.driver, capability.card, capability.bus_info, capability.capabilities
        );
        if !capability.is_video_capture() || !capability.has_streaming() {
            warn!(
                "{} does not advertise streaming video capture",
                capability.card
            );
        }

        let format = device
            .set_format(config.width, config.height, PIX_FMT_H264)
            .map_err(|e| {
                CaptureError::device_config(format!(
                    "Failed to set H.264 format at {}x{}: {}",
                    config.width, config.height, e
                ))
            })?;
        if format.fourcc != PIX_FMT_H264 {
            return Err(CaptureError::device_config(format!(
                "Driver does not produce H.264 (got fourcc {:#010x})",
                format.fourcc
            )));
        }
        if (format.width, format.height) != (config.width, config.height) {
            warn!(
                "Requested {}x{}, driver chose {}x{}",
                config.width, config.height, format.width, format.height
            );
        }

        let mut warnings = Vec::new();
        apply_control(device, Control::Bitrate, clamp(config.bitrate), &mut warnings);
        apply_control(device, Control::GopSize, clamp(config.gop_size), &mut warnings);
        apply_control(
            device,
            Control::Profile,
            config.profile.v4l2_value(),
            &mut warnings,
        );
        let interval = config.frame_interval;
        if let Err(e) = device.set_frame_interval(interval.numerator, interval.denominator) {
            let warning = ControlWarning {
                control: Control::FrameInterval,
                value: interval.to_string(),
                reason: e.to_string(),
            };
            warn!("{}", warning);
            warnings.push(warning);
        }
        apply_control(device, Control::Rotation, clamp(config.rotation), &mut warnings);

        let buffers = self.ring.configure(device, config.buffer_count)?;

        info!(
            "Configured {}x{} H.264 @ {} fps, {} bit/s, GOP {}, {} buffers",
            format.width,
            format.height,
            config.fps(),
            config.bitrate,
            config.gop_size,
            buffers
        );

        Ok(ConfigureReport {
            capability,
            format,
            buffers,
            warnings,
        })
    }

    /// Queue all buffers and start streaming
    pub fn start(&mut self) -> Result<()> {
        let device = self.device.as_mut().ok_or(CaptureError::NotOpen)?;
        if self.ring.is_streaming() {
            return Ok(());
        }
        self.ring.enqueue_all(device)?;
        info!("Capture started");
        Ok(())
    }

    /// Stop streaming; a no-op when not started
    pub fn stop(&mut self) -> Result<()> {
        let device = self.device.as_mut().ok_or(CaptureError::NotOpen)?;
        if !self.ring.is_streaming() {
            return Ok(());
        }
        self.ring.stop(device)?;
        info!("Capture stopped");
        Ok(())
    }

    /// Tear the buffer pool down and build it again
    ///
    /// Used to recover the encoder between sessions. With `restart` the
    /// device is streaming again afterwards.
    pub fn reset(&mut self, restart: bool) -> Result<()> {
        let device = self.device.as_mut().ok_or(CaptureError::NotOpen)?;

        if let Err(e) = self.ring.stop(device) {
            debug!("Stop during reset failed: {}", e);
        }
        self.ring.teardown(device);
        self.ring.configure(device, self.config.buffer_count)?;

        if restart {
            self.ring.enqueue_all(device)?;
        }
        info!("Capture device reset{}", if restart { " and restarted" } else { "" });
        Ok(())
    }

    /// Dequeue one encoded access unit
    ///
    /// The returned guard holds the buffer; dropping it (or calling
    /// [`AccessUnit::release`]) queues the buffer back exactly once.
    pub fn pull_access_unit(&mut self) -> Result<AccessUnit<'_, D>> {
        let device = self.device.as_mut().ok_or(CaptureError::NotOpen)?;
        requeue_orphan(&mut self.ring, device)?;
        let (index, info) = self.ring.dequeue_one(device)?;

        Ok(AccessUnit {
            device,
            ring: &mut self.ring,
            index,
            info,
            released: false,
        })
    }

    /// Pull an access unit together with the parameter-set cache it may feed
    pub(crate) fn pull_with_cache(&mut self) -> Result<(AccessUnit<'_, D>, &mut ParameterSetCache)> {
        let device = self.device.as_mut().ok_or(CaptureError::NotOpen)?;
        requeue_orphan(&mut self.ring, device)?;
        let (index, info) = self.ring.dequeue_one(device)?;

        let unit = AccessUnit {
            device,
            ring: &mut self.ring,
            index,
            info,
            released: false,
        };
        Ok((unit, &mut self.params))
    }

    /// Return the held buffer, if any, to the kernel
    pub fn release_current(&mut self) -> Result<()> {
        let device = self.device.as_mut().ok_or(CaptureError::NotOpen)?;
        self.ring.release_current(device)
    }

    /// Ask the encoder for an IDR as soon as possible
    ///
    /// A driver that refuses the control yields a warning, not an error.
    pub fn request_key_frame(&mut self) -> Result<Option<ControlWarning>> {
        let device = self.device.as_mut().ok_or(CaptureError::NotOpen)?;
        let mut warnings = Vec::new();
        apply_control(device, Control::ForceKeyFrame, 1, &mut warnings);
        if warnings.is_empty() {
            debug!("Requested key frame");
        }
        Ok(warnings.pop())
    }

    pub fn has_parameter_sets(&self) -> bool {
        self.params.is_complete()
    }

    /// Cached SPS/PPS, if both are present
    pub fn parameter_sets(&self) -> Option<ParameterSets> {
        self.params.snapshot()
    }

    pub fn parameter_cache(&self) -> &ParameterSetCache {
        &self.params
    }

    pub fn parameter_cache_mut(&mut self) -> &mut ParameterSetCache {
        &mut self.params
    }

    /// Forget the cached SPS/PPS so the next extraction rescans the stream
    pub fn invalidate_parameter_sets(&mut self) {
        self.params.invalidate();
        debug!("Parameter sets invalidated");
    }

    /// Free the buffer pool and close the device
    pub fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            self.ring.teardown(&mut device);
            debug!("Capture device closed");
        }
    }
}

impl<D: VideoDevice> Drop for CaptureDevice<D> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<D: VideoDevice> std::fmt::Debug for CaptureDevice<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureDevice")
            .field("device", &self.config.device)
            .field("open", &self.device.is_some())
            .field("ring", &self.ring)
            .field("parameter_sets", &self.params.is_complete())
            .finish()
    }
}

/// Retry handing back a buffer whose earlier requeue failed
///
/// No `AccessUnit` can be alive here, so a held slot has no owner left.
fn requeue_orphan<D: VideoDevice>(ring: &mut BufferRing, device: &mut D) -> Result<()> {
    if let Some(index) = ring.held() {
        debug!("Retrying requeue of buffer {}", index);
        ring.release_current(device)?;
    }
    Ok(())
}

fn clamp(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn apply_control<D: VideoDevice>(
    device: &mut D,
    control: Control,
    value: i32,
    warnings: &mut Vec<ControlWarning>,
) {
    match device.set_control(control, value) {
        Ok(()) => debug!("Set {} to {}", control, value),
        Err(e) => {
            let warning = ControlWarning {
                control,
                value: value.to_string(),
                reason: e.to_string(),
            };
            warn!("{}", warning);
            warnings.push(warning);
        }
    }
}

/// One dequeued access unit
///
/// Borrows the capture device, so no other pull can start while it is alive.
/// The buffer goes back to the kernel when the guard is dropped or released.
pub struct AccessUnit<'a, D: VideoDevice> {
    device: &'a mut D,
    ring: &'a mut BufferRing,
    index: u32,
    info: FrameInfo,
    released: bool,
}

impl<'a, D: VideoDevice> AccessUnit<'a, D> {
    /// Encoded bytes as written by the driver, start code included
    pub fn raw(&self) -> &[u8] {
        self.device
            .buffer(self.index)
            .map(|buf| &buf[..self.info.size.min(buf.len())])
            .unwrap_or(&[])
    }

    /// Encoded bytes with the leading start code stripped
    pub fn data(&self) -> &[u8] {
        strip_start_code(self.raw())
    }

    /// Copy of [`data`](Self::data) that outlives the buffer
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.data())
    }

    pub fn info(&self) -> FrameInfo {
        self.info
    }

    /// Ring slot holding this unit
    pub fn index(&self) -> u32 {
        self.index
    }

    /// `InvalidFrame` when the driver flagged the buffer or left it empty
    pub fn ensure_valid(&self) -> Result<()> {
        if self.info.valid {
            Ok(())
        } else {
            Err(CaptureError::InvalidFrame {
                sequence: self.info.sequence,
            })
        }
    }

    /// Queue the buffer back to the kernel now
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.ring.release_current(&mut *self.device)
    }
}

impl<D: VideoDevice> Drop for AccessUnit<'_, D> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = self.ring.release_current(&mut *self.device) {
                warn!("Failed to release buffer {}: {}", self.index, e);
            }
        }
    }
}

impl<D: VideoDevice> std::fmt::Debug for AccessUnit<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessUnit")
            .field("index", &self.index)
            .field("info", &self.info)
            .finish()
    }
}
