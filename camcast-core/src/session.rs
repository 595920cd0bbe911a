//! Consumer-facing side of the capture engine
//!
//! A session layer (RTSP server, CLI probe) attaches one consumer at a time,
//! pulls paced units for it and asks for the parameter sets it needs to
//! describe the stream.

use tracing::{debug, info, warn};

use crate::bitstream::ParameterSetExtractor;
use crate::capture::CaptureDevice;
use crate::delivery::GopPacer;
use crate::device::{V4l2Device, VideoDevice};
use crate::error::{CaptureError, Result};
use crate::types::{ConsumerId, DeliveredUnit, ParameterSets};

/// Owns the capture device and arbitrates its single streaming consumer
pub struct StreamController<D: VideoDevice = V4l2Device> {
    capture: CaptureDevice<D>,
    extractor: ParameterSetExtractor,
    active: Option<ConsumerId>,
    pacer: Option<GopPacer>,
}

impl<D: VideoDevice> StreamController<D> {
    /// Wrap a configured capture device
    pub fn new(capture: CaptureDevice<D>) -> Self {
        let extractor = ParameterSetExtractor::from_config(capture.config());
        Self {
            capture,
            extractor,
            active: None,
            pacer: None,
        }
    }

    pub fn capture(&self) -> &CaptureDevice<D> {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut CaptureDevice<D> {
        &mut self.capture
    }

    /// Consumer currently streaming, if any
    pub fn active_consumer(&self) -> Option<ConsumerId> {
        self.active
    }

    /// Delivery pacer of the active consumer
    pub fn pacer(&self) -> Option<&GopPacer> {
        self.pacer.as_ref()
    }

    /// Warm the parameter-set cache at startup
    ///
    /// Starts the encoder, tries a forced key frame first and falls back to
    /// regular extraction, then stops again. Extraction failure is logged
    /// only; a later consumer triggers a fresh attempt.
    pub fn prepare(&mut self) -> Result<Option<ParameterSets>> {
        self.capture.start()?;

        let sets = match self.extractor.extract_immediate(&mut self.capture) {
            Ok(sets) => Some(sets),
            Err(e) => {
                debug!("Immediate extraction failed ({}), scanning the stream", e);
                match self.extractor.extract(&mut self.capture) {
                    Ok(sets) => Some(sets),
                    Err(e) => {
                        warn!("Could not extract SPS/PPS at startup: {}", e);
                        None
                    }
                }
            }
        };

        self.capture.stop()?;
        Ok(sets)
    }

    /// Register a consumer
    ///
    /// The setup id only makes sure parameter sets exist. The first real
    /// consumer gets a freshly reset encoder and its own pacer; any other
    /// consumer is rejected while one is active.
    pub fn attach(&mut self, consumer: ConsumerId) -> Result<()> {
        if consumer.is_setup() {
            if self.active.is_some() || self.capture.has_parameter_sets() {
                return Ok(());
            }
            debug!("Setup query without parameter sets, restarting encoder");
            return self.restart_and_extract();
        }

        if let Some(active) = self.active {
            if active == consumer {
                return Ok(());
            }
            warn!("Rejecting {}: {} is already streaming", consumer, active);
            return Err(CaptureError::ConsumerBusy {
                active,
                rejected: consumer,
            });
        }

        self.active = Some(consumer);
        self.capture.invalidate_parameter_sets();
        if let Err(e) = self.restart_and_extract() {
            self.active = None;
            return Err(e);
        }

        self.pacer = Some(GopPacer::new(self.capture.config()));
        info!("{} attached", consumer);
        Ok(())
    }

    /// Unregister a consumer; unknown ids are ignored
    pub fn detach(&mut self, consumer: ConsumerId) {
        if self.active != Some(consumer) {
            debug!("Ignoring detach of inactive {}", consumer);
            return;
        }

        if let Err(e) = self.capture.stop() {
            warn!("Failed to stop capture on detach: {}", e);
        }
        self.active = None;
        self.pacer = None;
        if let Err(e) = self.capture.reset(false) {
            warn!("Failed to reset capture on detach: {}", e);
        }
        info!("{} detached", consumer);
    }

    /// Next unit for the active consumer; `None` at end of stream
    pub fn pull_next_unit(
        &mut self,
        consumer: ConsumerId,
        max_size: usize,
    ) -> Result<Option<DeliveredUnit>> {
        if self.active != Some(consumer) {
            return Err(CaptureError::UnknownConsumer(consumer));
        }
        let pacer = self
            .pacer
            .as_mut()
            .ok_or(CaptureError::UnknownConsumer(consumer))?;
        pacer.pull(&mut self.capture, max_size)
    }

    /// Current SPS/PPS, extracting them first if needed
    pub fn parameter_sets(&mut self) -> Result<ParameterSets> {
        if let Some(sets) = self.capture.parameter_sets() {
            return Ok(sets);
        }

        let was_streaming = self.capture.is_streaming();
        if !was_streaming {
            self.capture.start()?;
        }
        let result = self.extractor.extract(&mut self.capture);
        if !was_streaming {
            if let Err(e) = self.capture.stop() {
                warn!("Failed to stop capture after extraction: {}", e);
            }
        }
        result
    }

    fn restart_and_extract(&mut self) -> Result<()> {
        if let Err(e) = self.capture.stop() {
            debug!("Stop before reset failed: {}", e);
        }
        let result = self
            .capture
            .reset(true)
            .and_then(|()| self.extractor.extract(&mut self.capture).map(|_| ()));

        if let Err(e) = result {
            if let Err(stop_err) = self.capture.stop() {
                debug!("Stop after failed extraction failed: {}", stop_err);
            }
            return Err(e);
        }
        Ok(())
    }
}

impl<D: VideoDevice> std::fmt::Debug for StreamController<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("capture", &self.capture)
            .field("active", &self.active)
            .field("pacer", &self.pacer.as_ref().map(|p| p.state()))
            .finish()
    }
}
