//! V4L2 backend on top of the `v4l` crate
//!
//! Format, parameter and control setup go through `v4l`'s safe API. The
//! buffer pool is driven slot by slot with the crate's ioctl wrappers so the
//! capture ring can track which slot the kernel owns.

use std::io;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::time::Duration;

use tracing::{debug, trace};
use v4l::buffer::Type;
use v4l::control::{Control as V4lControl, Value};
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC, Fraction};

use super::{AppliedFormat, Control, DequeuedBuffer, DeviceCapability, VideoDevice};

/// How long a dequeue waits for the encoder before reporting no frame
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// One `mmap`ed kernel buffer, unmapped on drop
struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl MmapRegion {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len come from a successful mmap that lives as long as self
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: the region was mapped with exactly this address and length
        if let Err(e) = unsafe { v4l2::munmap(self.ptr.as_ptr().cast(), self.len) } {
            debug!("munmap failed: {}", e);
        }
    }
}

// The mapping is plain shared memory owned by this process
unsafe impl Send for MmapRegion {}

/// A V4L2 capture node (e.g. `/dev/video0`)
pub struct V4l2Device {
    // Unmapped before the device handle closes
    regions: Vec<MmapRegion>,
    device: Device,
    path: PathBuf,
    timeout: Duration,
}

impl V4l2Device {
    /// Open the device node
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let device = Device::with_path(path)?;
        debug!("Opened {:?} (fd {})", path, device.handle().fd());

        Ok(Self {
            regions: Vec::new(),
            device,
            path: path.to_path_buf(),
            timeout: DEQUEUE_TIMEOUT,
        })
    }

    /// Change how long `dequeue_buffer` waits for a frame
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Path of the opened node
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> RawFd {
        self.device.handle().fd()
    }

    /// Buffer ioctl on this device, retried when interrupted by a signal
    fn buffer_ioctl<T>(&self, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
        loop {
            // SAFETY: arg is the struct type the request is defined for
            match unsafe { v4l2::ioctl(self.fd(), request, (arg as *mut T).cast()) } {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }

    fn empty_buffer(index: u32) -> v4l2_buffer {
        // SAFETY: v4l2_buffer is a plain C struct; all-zero is a valid value
        let mut buf: v4l2_buffer = unsafe { std::mem::zeroed() };
        buf.index = index;
        buf.type_ = Type::VideoCapture as u32;
        buf.memory = Memory::Mmap as u32;
        buf
    }

    /// Wait until a filled buffer is ready; false on timeout
    fn wait_readable(&self) -> io::Result<bool> {
        let mut fds = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout = i32::try_from(self.timeout.as_millis()).unwrap_or(i32::MAX);
        loop {
            // SAFETY: one valid pollfd
            let ret = unsafe { libc::poll(&mut fds, 1, timeout) };
            if ret >= 0 {
                return Ok(ret > 0);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn stream_type() -> libc::c_int {
        Type::VideoCapture as libc::c_int
    }
}

impl VideoDevice for V4l2Device {
    fn query_capability(&mut self) -> io::Result<DeviceCapability> {
        let caps = self.device.query_caps()?;
        let (major, minor, patch) = caps.version;
        let flags = caps.capabilities.bits();

        Ok(DeviceCapability {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            version: (major as u32) << 16 | (minor as u32) << 8 | patch as u32,
            capabilities: flags,
            device_caps: flags,
        })
    }

    fn set_format(&mut self, width: u32, height: u32, fourcc: u32) -> io::Result<AppliedFormat> {
        let requested = Format::new(width, height, FourCC::from(fourcc));
        let applied = self.device.set_format(&requested)?;

        Ok(AppliedFormat {
            width: applied.width,
            height: applied.height,
            fourcc: u32::from(applied.fourcc),
            size_image: applied.size,
        })
    }

    fn set_control(&mut self, control: Control, value: i32) -> io::Result<()> {
        let id = control.cid().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a V4L2 control", control),
            )
        })?;
        self.device.set_control(V4lControl {
            id,
            value: Value::Integer(value as i64),
        })
    }

    fn set_frame_interval(&mut self, numerator: u32, denominator: u32) -> io::Result<()> {
        let params = Parameters::new(Fraction::new(numerator, denominator));
        let applied = self.device.set_params(&params)?;
        if (applied.interval.numerator, applied.interval.denominator) != (numerator, denominator) {
            debug!(
                "Requested frame interval {}/{}, driver chose {}/{}",
                numerator,
                denominator,
                applied.interval.numerator,
                applied.interval.denominator
            );
        }
        Ok(())
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        // SAFETY: v4l2_requestbuffers is a plain C struct; all-zero is valid
        let mut req: v4l2_requestbuffers = unsafe { std::mem::zeroed() };
        req.count = count;
        req.type_ = Type::VideoCapture as u32;
        req.memory = Memory::Mmap as u32;
        self.buffer_ioctl(vidioc::VIDIOC_REQBUFS, &mut req)?;
        Ok(req.count)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<usize> {
        if index as usize != self.regions.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "buffers must be mapped in order (expected {}, got {})",
                    self.regions.len(),
                    index
                ),
            ));
        }

        let mut buf = Self::empty_buffer(index);
        self.buffer_ioctl(vidioc::VIDIOC_QUERYBUF, &mut buf)?;

        let len = buf.length as usize;
        // SAFETY: QUERYBUF on MMAP memory fills `m.offset`
        let offset = unsafe { buf.m.offset };

        // SAFETY: mapping a driver-provided offset/length of our own fd
        let ptr = unsafe {
            v4l2::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd(),
                offset as _,
            )?
        };
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned null"))?;

        trace!("Mapped buffer {} ({} bytes at offset {})", index, len, offset);
        self.regions.push(MmapRegion { ptr, len });
        Ok(len)
    }

    fn unmap_buffers(&mut self) {
        self.regions.clear();
    }

    fn buffer(&self, index: u32) -> Option<&[u8]> {
        self.regions.get(index as usize).map(MmapRegion::as_slice)
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut buf = Self::empty_buffer(index);
        self.buffer_ioctl(vidioc::VIDIOC_QBUF, &mut buf)
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        if !self.wait_readable()? {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no frame within {:?}", self.timeout),
            ));
        }

        let mut buf = Self::empty_buffer(0);
        self.buffer_ioctl(vidioc::VIDIOC_DQBUF, &mut buf)?;

        let mapped = self
            .regions
            .get(buf.index as usize)
            .map(|r| r.len)
            .unwrap_or(0);

        Ok(DequeuedBuffer {
            index: buf.index,
            bytes_used: (buf.bytesused as usize).min(mapped),
            sequence: buf.sequence,
            timestamp: Duration::new(
                buf.timestamp.tv_sec.max(0) as u64,
                (buf.timestamp.tv_usec.max(0) as u32).saturating_mul(1000),
            ),
            flags: buf.flags,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut ty = Self::stream_type();
        self.buffer_ioctl(vidioc::VIDIOC_STREAMON, &mut ty)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut ty = Self::stream_type();
        self.buffer_ioctl(vidioc::VIDIOC_STREAMOFF, &mut ty)
    }
}

impl std::fmt::Debug for V4l2Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4l2Device")
            .field("path", &self.path)
            .field("fd", &self.fd())
            .field("mapped", &self.regions.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}
