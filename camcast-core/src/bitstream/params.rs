//! SPS/PPS cache and extraction from live encoder output

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::scanner::scan_nal_units;
use crate::capture::CaptureDevice;
use crate::config::CaptureConfig;
use crate::device::VideoDevice;
use crate::error::{CaptureError, Result};
use crate::types::{NalType, ParameterSets};

/// Which parameter sets one access unit contributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Absorbed {
    pub sps: bool,
    pub pps: bool,
}

impl Absorbed {
    /// Nothing was taken
    pub fn is_empty(&self) -> bool {
        !self.sps && !self.pps
    }

    fn merge(&mut self, other: Absorbed) {
        self.sps |= other.sps;
        self.pps |= other.pps;
    }
}

/// Most recently extracted SPS and PPS, stored without start codes
#[derive(Debug, Clone, Default)]
pub struct ParameterSetCache {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl ParameterSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the first SPS and PPS of `access_unit` that the cache is
    /// still missing. Existing entries are never overwritten.
    pub fn absorb(&mut self, access_unit: &[u8]) -> Absorbed {
        self.take(access_unit, false)
    }

    /// Record the first SPS and PPS of `access_unit`, replacing cached ones
    pub fn absorb_replacing(&mut self, access_unit: &[u8]) -> Absorbed {
        self.take(access_unit, true)
    }

    fn take(&mut self, access_unit: &[u8], replace: bool) -> Absorbed {
        let mut absorbed = Absorbed::default();

        for nal in scan_nal_units(access_unit) {
            let (slot, flag) = match nal.nal_type {
                NalType::Sps => (&mut self.sps, &mut absorbed.sps),
                NalType::Pps => (&mut self.pps, &mut absorbed.pps),
                _ => continue,
            };
            if *flag || (slot.is_some() && !replace) {
                continue;
            }
            *slot = Some(Bytes::copy_from_slice(nal.payload));
            *flag = true;
            debug!("Cached {} ({} bytes)", nal.nal_type, nal.payload.len());

            if absorbed.sps && absorbed.pps {
                break;
            }
        }

        absorbed
    }

    /// Both SPS and PPS are present and non-empty
    pub fn is_complete(&self) -> bool {
        matches!((&self.sps, &self.pps), (Some(sps), Some(pps)) if !sps.is_empty() && !pps.is_empty())
    }

    /// Forget both parameter sets
    pub fn invalidate(&mut self) {
        self.sps = None;
        self.pps = None;
    }

    pub fn sps(&self) -> Option<&Bytes> {
        self.sps.as_ref()
    }

    pub fn pps(&self) -> Option<&Bytes> {
        self.pps.as_ref()
    }

    /// Immutable copy of a complete pair
    pub fn snapshot(&self) -> Option<ParameterSets> {
        if !self.is_complete() {
            return None;
        }
        Some(ParameterSets {
            sps: self.sps.clone()?,
            pps: self.pps.clone()?,
        })
    }
}

/// Pulls access units until the device's parameter-set cache is complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSetExtractor {
    attempts: u32,
    immediate_attempts: u32,
}

impl Default for ParameterSetExtractor {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}

impl ParameterSetExtractor {
    pub fn new(attempts: u32, immediate_attempts: u32) -> Self {
        Self {
            attempts,
            immediate_attempts,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.extraction_attempts, config.immediate_attempts)
    }

    /// Fill the missing parameter sets from the live stream
    ///
    /// Returns immediately on a cache hit. Otherwise pulls up to `attempts`
    /// access units, releasing each one. Partial results stay cached on
    /// timeout.
    pub fn extract<D: VideoDevice>(&self, capture: &mut CaptureDevice<D>) -> Result<ParameterSets> {
        if let Some(sets) = capture.parameter_sets() {
            debug!("Parameter sets already cached");
            return Ok(sets);
        }

        for attempt in 1..=self.attempts {
            match capture.pull_with_cache() {
                Ok((unit, cache)) => {
                    match unit.ensure_valid() {
                        Ok(()) => {
                            cache.absorb(unit.raw());
                        }
                        Err(e) => debug!("Skipping access unit: {}", e),
                    }
                    if let Err(e) = unit.release() {
                        warn!("Failed to release buffer during extraction: {}", e);
                    }
                }
                Err(e) if is_skippable(&e) => {
                    debug!("Extraction attempt {} got no frame: {}", attempt, e);
                    continue;
                }
                Err(e) => return Err(e),
            }

            if let Some(sets) = capture.parameter_sets() {
                info!(
                    "Extracted SPS ({} bytes) and PPS ({} bytes) after {} access units",
                    sets.sps.len(),
                    sets.pps.len(),
                    attempt
                );
                return Ok(sets);
            }
        }

        Err(CaptureError::ExtractionTimeout {
            attempts: self.attempts,
        })
    }

    /// Force a key frame and take the SPS/PPS that come with it
    ///
    /// Replaces whatever is cached. Succeeds only when both sets were seen
    /// within `immediate_attempts` pulls of this run.
    pub fn extract_immediate<D: VideoDevice>(
        &self,
        capture: &mut CaptureDevice<D>,
    ) -> Result<ParameterSets> {
        capture.request_key_frame()?;

        let mut fresh = Absorbed::default();
        for attempt in 1..=self.immediate_attempts {
            match capture.pull_with_cache() {
                Ok((unit, cache)) => {
                    match unit.ensure_valid() {
                        Ok(()) => fresh.merge(cache.absorb_replacing(unit.raw())),
                        Err(e) => debug!("Skipping access unit: {}", e),
                    }
                    if let Err(e) = unit.release() {
                        warn!("Failed to release buffer during extraction: {}", e);
                    }
                }
                Err(e) if is_skippable(&e) => {
                    debug!("Immediate extraction attempt {} got no frame: {}", attempt, e);
                    continue;
                }
                Err(e) => return Err(e),
            }

            if fresh.sps && fresh.pps {
                if let Some(sets) = capture.parameter_sets() {
                    info!("Extracted fresh SPS/PPS after forced key frame ({} access units)", attempt);
                    return Ok(sets);
                }
            }
        }

        Err(CaptureError::ExtractionTimeout {
            attempts: self.immediate_attempts,
        })
    }
}

fn is_skippable(err: &CaptureError) -> bool {
    matches!(err.root(), CaptureError::NoFrame(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS_PPS_IDR: &[u8] = &[
        0, 0, 0, 1, 0x67, 0x64, 0x00, 0x1E, //
        0, 0, 0, 1, 0x68, 0xEE, 0x3C, 0x80, //
        0, 0, 0, 1, 0x65, 0x88, 0x84,
    ];

    const OTHER_SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1F];

    #[test]
    fn test_absorb_fills_cache() {
        let mut cache = ParameterSetCache::new();
        let absorbed = cache.absorb(SPS_PPS_IDR);
        assert_eq!(absorbed, Absorbed { sps: true, pps: true });
        assert!(cache.is_complete());

        let sets = cache.snapshot().unwrap();
        assert_eq!(&sets.sps[..], &[0x67, 0x64, 0x00, 0x1E]);
        assert_eq!(&sets.pps[..], &[0x68, 0xEE, 0x3C, 0x80]);
    }

    #[test]
    fn test_absorb_never_overwrites() {
        let mut cache = ParameterSetCache::new();
        cache.absorb(SPS_PPS_IDR);
        assert!(cache.absorb(OTHER_SPS).is_empty());
        assert_eq!(cache.sps().unwrap()[1], 0x64);
    }

    #[test]
    fn test_absorb_replacing() {
        let mut cache = ParameterSetCache::new();
        cache.absorb(SPS_PPS_IDR);
        let absorbed = cache.absorb_replacing(OTHER_SPS);
        assert_eq!(absorbed, Absorbed { sps: true, pps: false });
        assert_eq!(cache.sps().unwrap()[1], 0x42);
        assert!(cache.is_complete());
    }

    #[test]
    fn test_partial_is_not_complete() {
        let mut cache = ParameterSetCache::new();
        cache.absorb(OTHER_SPS);
        assert!(!cache.is_complete());
        assert!(cache.snapshot().is_none());
    }

    #[test]
    fn test_invalidate() {
        let mut cache = ParameterSetCache::new();
        cache.absorb(SPS_PPS_IDR);
        cache.invalidate();
        assert!(!cache.is_complete());
        assert!(cache.sps().is_none());
    }
}
