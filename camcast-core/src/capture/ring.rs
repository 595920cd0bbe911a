//! Fixed pool of kernel-shared capture buffers
//!
//! Slots `0..N` are mapped once at configuration and torn down together.
//! Each slot is owned either by the kernel (queued) or by user code
//! (dequeued, or idle while streaming is off). At most one slot is held by
//! user code while streaming.

use tracing::{debug, info, trace, warn};

use crate::device::VideoDevice;
use crate::error::{CaptureError, Result};
use crate::types::FrameInfo;

/// Who may touch a slot's memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Queued; the driver may write into it
    Kernel,
    /// Dequeued or idle
    User,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    length: usize,
    owner: Owner,
}

/// Buffer ring over a [`VideoDevice`]
///
/// The ring tracks ownership only; the mapped memory lives in the device.
#[derive(Debug, Default)]
pub struct BufferRing {
    slots: Vec<Slot>,
    current: Option<u32>,
    streaming: bool,
}

impl BufferRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request `count` buffers and map each of them
    ///
    /// Any previously configured pool is torn down first. A partial mapping
    /// failure unmaps everything and frees the pool.
    pub fn configure<D: VideoDevice + ?Sized>(&mut self, device: &mut D, count: u32) -> Result<usize> {
        if !self.slots.is_empty() {
            debug!("Reconfiguring buffer ring, tearing down {} buffers", self.slots.len());
            self.teardown(device);
        }

        let granted = device.request_buffers(count).map_err(|e| {
            CaptureError::device_config(format!("Failed to request {} buffers: {}", count, e))
        })?;

        if granted < 2 {
            if let Err(e) = device.request_buffers(0) {
                debug!("Failed to free short buffer grant: {}", e);
            }
            return Err(CaptureError::device_config(format!(
                "Driver granted {} buffers, at least 2 are required",
                granted
            )));
        }
        if granted < count {
            warn!("Requested {} capture buffers, driver granted {}", count, granted);
        }

        let mut slots = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            match device.map_buffer(index) {
                Ok(length) => slots.push(Slot {
                    length,
                    owner: Owner::User,
                }),
                Err(e) => {
                    device.unmap_buffers();
                    if let Err(free_err) = device.request_buffers(0) {
                        debug!("Failed to free buffers after mapping error: {}", free_err);
                    }
                    return Err(CaptureError::device_config(format!(
                        "Failed to map buffer {}: {}",
                        index, e
                    )));
                }
            }
        }

        self.slots = slots;
        self.current = None;
        self.streaming = false;
        debug!("Buffer ring configured with {} buffers", granted);
        Ok(granted as usize)
    }

    /// Queue every user-owned slot and start streaming
    pub fn enqueue_all<D: VideoDevice + ?Sized>(&mut self, device: &mut D) -> Result<()> {
        if self.streaming {
            return Ok(());
        }
        if self.slots.is_empty() {
            return Err(CaptureError::streaming("No capture buffers configured"));
        }

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.owner == Owner::User {
                device.queue_buffer(index as u32).map_err(|e| {
                    CaptureError::streaming(format!("Failed to queue buffer {}: {}", index, e))
                })?;
                slot.owner = Owner::Kernel;
            }
        }

        device
            .stream_on()
            .map_err(|e| CaptureError::streaming(format!("Failed to start streaming: {}", e)))?;

        self.current = None;
        self.streaming = true;
        Ok(())
    }

    /// Take the next filled buffer
    ///
    /// Fails with `BufferHeld` while a previous buffer is outstanding and
    /// with `NoFrame` when nothing could be dequeued.
    pub fn dequeue_one<D: VideoDevice + ?Sized>(&mut self, device: &mut D) -> Result<(u32, FrameInfo)> {
        if let Some(index) = self.current {
            return Err(CaptureError::BufferHeld { index });
        }
        if !self.streaming {
            return Err(CaptureError::no_frame("not streaming"));
        }

        let buf = device
            .dequeue_buffer()
            .map_err(|e| CaptureError::no_frame(format!("dequeue failed: {}", e)))?;

        let Some(slot) = self.slots.get_mut(buf.index as usize) else {
            if let Err(e) = device.queue_buffer(buf.index) {
                warn!("Failed to hand back unknown buffer {}: {}", buf.index, e);
            }
            return Err(CaptureError::no_frame(format!(
                "driver returned unknown buffer {}",
                buf.index
            )));
        };
        slot.owner = Owner::User;
        self.current = Some(buf.index);

        let info = FrameInfo {
            timestamp: buf.timestamp,
            sequence: buf.sequence,
            size: buf.bytes_used.min(slot.length),
            valid: !buf.is_error() && buf.bytes_used > 0,
        };
        trace!(
            "Dequeued buffer {} (seq {}, {} bytes{})",
            buf.index,
            info.sequence,
            info.size,
            if info.valid { "" } else { ", invalid" }
        );

        Ok((buf.index, info))
    }

    /// Give the held buffer back to the kernel
    ///
    /// Without a held buffer this only logs a warning. If the driver refuses
    /// the buffer it stays held, so a later call retries.
    pub fn release_current<D: VideoDevice + ?Sized>(&mut self, device: &mut D) -> Result<()> {
        let Some(index) = self.current else {
            warn!("release_current called without a held buffer");
            return Ok(());
        };

        if !self.streaming {
            self.current = None;
            return Ok(());
        }

        device.queue_buffer(index).map_err(|e| {
            CaptureError::streaming(format!("Failed to requeue buffer {}: {}", index, e))
        })?;
        if let Some(slot) = self.slots.get_mut(index as usize) {
            slot.owner = Owner::Kernel;
        }
        self.current = None;
        trace!("Requeued buffer {}", index);
        Ok(())
    }

    /// Stop streaming; every slot becomes user-owned
    pub fn stop<D: VideoDevice + ?Sized>(&mut self, device: &mut D) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }

        device
            .stream_off()
            .map_err(|e| CaptureError::streaming(format!("Failed to stop streaming: {}", e)))?;

        self.mark_stopped();
        Ok(())
    }

    /// Stop, drain, unmap and free the pool. Errors are logged, never returned.
    pub fn teardown<D: VideoDevice + ?Sized>(&mut self, device: &mut D) {
        if self.streaming {
            if let Err(e) = device.stream_off() {
                debug!("STREAMOFF during teardown failed: {}", e);
            }
            self.mark_stopped();
        }

        if self.slots.is_empty() {
            return;
        }

        device.unmap_buffers();
        if let Err(e) = device.request_buffers(0) {
            warn!("Failed to free capture buffers: {}", e);
        }
        info!("Released {} capture buffers", self.slots.len());
        self.slots.clear();
        self.current = None;
    }

    fn mark_stopped(&mut self) {
        for slot in &mut self.slots {
            slot.owner = Owner::User;
        }
        self.current = None;
        self.streaming = false;
    }

    /// Number of mapped slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Index of the buffer currently held by user code
    pub fn held(&self) -> Option<u32> {
        self.current
    }

    /// Owner of a slot
    pub fn owner(&self, index: u32) -> Option<Owner> {
        self.slots.get(index as usize).map(|s| s.owner)
    }

    /// Mapped length of a slot
    pub fn buffer_len(&self, index: u32) -> Option<usize> {
        self.slots.get(index as usize).map(|s| s.length)
    }
}
