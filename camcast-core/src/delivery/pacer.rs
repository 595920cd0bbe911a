//! GOP-paced delivery state machine
//!
//! Every consumer starts with SPS, PPS and an IDR sharing one presentation
//! time, followed by the inter frames of that GOP. Each new IDR in the stream
//! re-emits the parameter sets first, so a consumer never sees an inter
//! frame it cannot decode.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use super::clock::PresentationClock;
use crate::bitstream::{find_nal, strip_start_code};
use crate::capture::CaptureDevice;
use crate::config::CaptureConfig;
use crate::device::VideoDevice;
use crate::error::{CaptureError, Result};
use crate::types::{DeliveredUnit, NalType, ParameterSets};

/// Position of the pacer within a GOP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Discarding access units until an IDR arrives with parameter sets cached
    AwaitingFirstGop,
    SendSps,
    SendPps,
    SendIdr,
    /// Forwarding inter frames until the next IDR
    SteadyState,
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingFirstGop => write!(f, "awaiting first GOP"),
            Self::SendSps => write!(f, "send SPS"),
            Self::SendPps => write!(f, "send PPS"),
            Self::SendIdr => write!(f, "send IDR"),
            Self::SteadyState => write!(f, "steady state"),
        }
    }
}

/// Per-consumer delivery state machine
#[derive(Debug)]
pub struct GopPacer {
    state: DeliveryState,
    clock: PresentationClock,
    gop_base: u64,
    pending_idr: Option<Bytes>,
    keyframe_search_limit: u32,
    closed: bool,
    delivered: u64,
}

enum Pulled {
    Unit(Bytes, NalType),
    Idr(Bytes),
    Discarded,
    EndOfStream,
}

impl GopPacer {
    pub fn new(config: &CaptureConfig) -> Self {
        Self::with_clock(config, PresentationClock::new(config.frame_interval))
    }

    /// Pacer driven by an explicit clock (e.g. one with a fixed base)
    pub fn with_clock(config: &CaptureConfig, clock: PresentationClock) -> Self {
        Self {
            state: DeliveryState::AwaitingFirstGop,
            clock,
            gop_base: 0,
            pending_idr: None,
            keyframe_search_limit: config.keyframe_search_limit,
            closed: false,
            delivered: 0,
        }
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    /// End of stream was reached; every further pull returns `None`
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn clock(&self) -> &PresentationClock {
        &self.clock
    }

    /// Units handed out so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Produce the next unit for the consumer
    ///
    /// Returns `Ok(None)` once the device stops producing frames, delivers an
    /// invalid frame, or keeps delivering empty units for
    /// `keyframe_search_limit` pulls. Parameter sets larger than `max_size`
    /// fail with `UnitTooLarge`; frames are truncated to `max_size`.
    pub fn pull<D: VideoDevice>(
        &mut self,
        capture: &mut CaptureDevice<D>,
        max_size: usize,
    ) -> Result<Option<DeliveredUnit>> {
        if self.closed {
            return Ok(None);
        }

        let mut searched = 0u32;
        let mut skipped = 0u32;
        loop {
            match self.state {
                DeliveryState::AwaitingFirstGop => {
                    if searched >= self.keyframe_search_limit {
                        return Err(CaptureError::KeyframeTimeout { pulls: searched });
                    }
                    searched += 1;

                    match self.pull_unit(capture, true)? {
                        Pulled::EndOfStream => return Ok(None),
                        Pulled::Unit(_, nal_type) => {
                            trace!("Discarding {} while waiting for a key frame", nal_type);
                        }
                        Pulled::Discarded => {}
                        Pulled::Idr(idr) => {
                            if !capture.has_parameter_sets() {
                                debug!("Key frame arrived before SPS/PPS, still waiting");
                                continue;
                            }
                            self.clock.bootstrap();
                            self.gop_base = self.clock.counter();
                            self.pending_idr = Some(idr);
                            self.state = DeliveryState::SendSps;
                            info!("Bootstrapped delivery after {} access units", searched);
                        }
                    }
                }

                DeliveryState::SendSps | DeliveryState::SendPps => {
                    let Some(sets) = capture.parameter_sets() else {
                        warn!("Parameter sets disappeared, waiting for the next GOP");
                        self.restart_gop();
                        continue;
                    };
                    return self.emit_parameter_set(&sets, max_size).map(Some);
                }

                DeliveryState::SendIdr => {
                    let Some(idr) = self.pending_idr.take() else {
                        self.restart_gop();
                        continue;
                    };
                    let unit = self.frame(idr, NalType::Idr, self.gop_base, max_size);
                    self.clock.set_counter(self.gop_base + self.clock.ticks_per_frame());
                    self.state = DeliveryState::SteadyState;
                    return Ok(Some(self.hand_out(unit)));
                }

                DeliveryState::SteadyState => match self.pull_unit(capture, false)? {
                    Pulled::EndOfStream => return Ok(None),
                    Pulled::Idr(idr) => {
                        self.gop_base = self.clock.counter() + self.clock.ticks_per_frame();
                        self.pending_idr = Some(idr);
                        self.state = DeliveryState::SendSps;
                        trace!("New GOP at tick {}", self.gop_base);
                    }
                    Pulled::Unit(data, nal_type) => {
                        let unit = self.frame(data, nal_type, self.clock.counter(), max_size);
                        self.clock.advance();
                        return Ok(Some(self.hand_out(unit)));
                    }
                    Pulled::Discarded => {
                        skipped += 1;
                        if skipped >= self.keyframe_search_limit {
                            self.close(&format!("{} empty access units in a row", skipped));
                            return Ok(None);
                        }
                    }
                },
            }
        }
    }

    /// Iterate over delivered units until end of stream or the first error
    pub fn stream<'a, D: VideoDevice>(
        &'a mut self,
        capture: &'a mut CaptureDevice<D>,
        max_size: usize,
    ) -> PacedUnits<'a, D> {
        PacedUnits {
            pacer: self,
            capture,
            max_size,
            done: false,
        }
    }

    fn pull_unit<D: VideoDevice>(
        &mut self,
        capture: &mut CaptureDevice<D>,
        awaiting: bool,
    ) -> Result<Pulled> {
        let (unit, cache) = match capture.pull_with_cache() {
            Ok(pulled) => pulled,
            Err(e) if matches!(e.root(), CaptureError::NoFrame(_)) => {
                self.close(&e.to_string());
                return Ok(Pulled::EndOfStream);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = unit.ensure_valid() {
            drop(unit);
            self.close(&e.to_string());
            return Ok(Pulled::EndOfStream);
        }

        let raw = unit.raw();
        if awaiting {
            cache.absorb(raw);
        }

        let pulled = if let Some(idr) = find_nal(raw, NalType::Idr) {
            Pulled::Idr(Bytes::copy_from_slice(&raw[idr.payload_range().start..]))
        } else if awaiting {
            Pulled::Unit(Bytes::new(), nal_type_of(raw))
        } else {
            let data = strip_start_code(raw);
            if data.is_empty() {
                Pulled::Discarded
            } else {
                Pulled::Unit(Bytes::copy_from_slice(data), nal_type_of(raw))
            }
        };

        unit.release()?;
        Ok(pulled)
    }

    fn emit_parameter_set(&mut self, sets: &ParameterSets, max_size: usize) -> Result<DeliveredUnit> {
        let (data, kind, next) = match self.state {
            DeliveryState::SendSps => (&sets.sps, NalType::Sps, DeliveryState::SendPps),
            _ => (&sets.pps, NalType::Pps, DeliveryState::SendIdr),
        };

        if data.len() > max_size {
            return Err(CaptureError::UnitTooLarge {
                kind,
                size: data.len(),
                max: max_size,
            });
        }

        let unit = DeliveredUnit {
            data: data.clone(),
            nal_type: kind,
            presentation_time: self.clock.time_at(self.gop_base),
            duration: Duration::ZERO,
            truncated: 0,
        };
        self.state = next;
        Ok(self.hand_out(unit))
    }

    fn frame(&self, data: Bytes, nal_type: NalType, ticks: u64, max_size: usize) -> DeliveredUnit {
        let (data, truncated) = if data.len() > max_size {
            let truncated = data.len() - max_size;
            debug!("Truncating {} of {} bytes by {}", nal_type, data.len(), truncated);
            (data.slice(..max_size), truncated)
        } else {
            (data, 0)
        };

        DeliveredUnit {
            data,
            nal_type,
            presentation_time: self.clock.time_at(ticks),
            duration: self.clock.frame_duration(),
            truncated,
        }
    }

    fn hand_out(&mut self, unit: DeliveredUnit) -> DeliveredUnit {
        self.delivered += 1;
        trace!(
            "Delivering {} ({} bytes, pts {} us, duration {} us)",
            unit.nal_type,
            unit.data.len(),
            unit.presentation_micros(),
            unit.duration_micros()
        );
        unit
    }

    fn restart_gop(&mut self) {
        self.pending_idr = None;
        self.state = DeliveryState::AwaitingFirstGop;
    }

    fn close(&mut self, reason: &str) {
        info!("End of stream after {} units: {}", self.delivered, reason);
        self.closed = true;
        self.pending_idr = None;
    }
}

fn nal_type_of(raw: &[u8]) -> NalType {
    match strip_start_code(raw).first() {
        Some(&header) => NalType::from_header(header),
        None => NalType::Other(0),
    }
}

/// Iterator over paced units, see [`GopPacer::stream`]
pub struct PacedUnits<'a, D: VideoDevice> {
    pacer: &'a mut GopPacer,
    capture: &'a mut CaptureDevice<D>,
    max_size: usize,
    done: bool,
}

impl<D: VideoDevice> Iterator for PacedUnits<'_, D> {
    type Item = Result<DeliveredUnit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.pacer.pull(self.capture, self.max_size) {
            Ok(Some(unit)) => Some(Ok(unit)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
