//! Core types for camcast
//!
//! These types describe what flows between the capture ring, the bitstream
//! scanner and the delivery state machine.

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Metadata of one dequeued encoder buffer
///
/// Only meaningful while the owning buffer is held; it describes bytes that
/// become invalid once the buffer goes back to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInfo {
    /// Hardware timestamp (seconds + microseconds since the driver's epoch)
    pub timestamp: Duration,
    /// Driver sequence number
    pub sequence: u32,
    /// Bytes used in the buffer
    pub size: usize,
    /// False when the driver flagged the buffer as errored or empty
    pub valid: bool,
}

/// H.264 NAL unit type (5-bit `nal_unit_type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalType {
    /// Coded slice of a non-IDR picture
    NonIdrSlice,
    /// Slice data partition A/B/C
    Partition(u8),
    /// Coded slice of an IDR picture (key frame)
    Idr,
    /// Supplemental enhancement information
    Sei,
    /// Sequence parameter set
    Sps,
    /// Picture parameter set
    Pps,
    /// Access unit delimiter
    Aud,
    /// End of sequence / end of stream / filler
    Trailing(u8),
    /// Reserved or extension types
    Other(u8),
}

impl NalType {
    /// Classify from the first byte of a NAL unit (the NAL header)
    pub fn from_header(header: u8) -> Self {
        Self::from_code(header & 0x1F)
    }

    /// Classify from a raw 5-bit type code
    pub fn from_code(code: u8) -> Self {
        match code & 0x1F {
            1 => Self::NonIdrSlice,
            n @ 2..=4 => Self::Partition(n),
            5 => Self::Idr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            n @ 10..=12 => Self::Trailing(n),
            n => Self::Other(n),
        }
    }

    /// The 5-bit type code
    pub fn code(&self) -> u8 {
        match self {
            Self::NonIdrSlice => 1,
            Self::Idr => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
            Self::Partition(n) | Self::Trailing(n) | Self::Other(n) => *n,
        }
    }

    /// Key frame slice
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::Idr)
    }

    /// SPS or PPS
    pub fn is_parameter_set(&self) -> bool {
        matches!(self, Self::Sps | Self::Pps)
    }

    /// Short name used in logs and CLI output
    pub fn name(&self) -> &'static str {
        match self {
            Self::NonIdrSlice => "P",
            Self::Partition(_) => "DP",
            Self::Idr => "IDR",
            Self::Sei => "SEI",
            Self::Sps => "SPS",
            Self::Pps => "PPS",
            Self::Aud => "AUD",
            Self::Trailing(_) => "END",
            Self::Other(_) => "NAL",
        }
    }
}

impl std::fmt::Display for NalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Partition(n) | Self::Trailing(n) | Self::Other(n) => {
                write!(f, "{}({})", self.name(), n)
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Identifier the session layer assigns to a streaming client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerId(u32);

impl ConsumerId {
    /// Setup phase: description queries before a real session exists
    pub const SETUP: ConsumerId = ConsumerId(0);

    /// Wrap a raw session id
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw id
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Whether this is the setup-phase id
    pub fn is_setup(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for ConsumerId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Consumer({})", self.0)
    }
}

/// Snapshot of the encoder's current SPS and PPS payloads (no start codes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    /// Sequence parameter set
    pub sps: Bytes,
    /// Picture parameter set
    pub pps: Bytes,
}

impl ParameterSets {
    /// `profile_idc`, constraint flags and `level_idc` (SPS bytes 1..4)
    pub fn profile_level(&self) -> Option<[u8; 3]> {
        match self.sps.get(1..4) {
            Some(&[profile, constraints, level]) => Some([profile, constraints, level]),
            _ => None,
        }
    }

    /// `profile-level-id` as used in SDP fmtp lines, e.g. `64001E`
    pub fn profile_level_id(&self) -> Option<String> {
        self.profile_level()
            .map(|[p, c, l]| format!("{:02X}{:02X}{:02X}", p, c, l))
    }
}

/// One unit handed to the consumer by the delivery state machine
#[derive(Debug, Clone)]
pub struct DeliveredUnit {
    /// NAL payload without a leading start code
    pub data: Bytes,
    /// Type of the (first) NAL unit in `data`
    pub nal_type: NalType,
    /// Presentation time
    pub presentation_time: SystemTime,
    /// Playout duration charged to this unit
    pub duration: Duration,
    /// Bytes dropped because the unit exceeded the consumer's maximum size
    pub truncated: usize,
}

impl DeliveredUnit {
    /// Duration in whole microseconds
    pub fn duration_micros(&self) -> u64 {
        self.duration.as_micros() as u64
    }

    /// Presentation time as microseconds since the UNIX epoch
    pub fn presentation_micros(&self) -> u64 {
        self.presentation_time
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nal_type_from_header() {
        assert_eq!(NalType::from_header(0x67), NalType::Sps);
        assert_eq!(NalType::from_header(0x68), NalType::Pps);
        assert_eq!(NalType::from_header(0x65), NalType::Idr);
        assert_eq!(NalType::from_header(0x41), NalType::NonIdrSlice);
        assert_eq!(NalType::from_header(0x06), NalType::Sei);
        assert_eq!(NalType::from_header(0x1F), NalType::Other(31));
    }

    #[test]
    fn test_nal_type_code_roundtrip_for_known_types() {
        for code in 0..32u8 {
            assert_eq!(NalType::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_profile_level_id() {
        let sets = ParameterSets {
            sps: Bytes::from_static(&[0x67, 0x64, 0x00, 0x1E, 0xAC]),
            pps: Bytes::from_static(&[0x68, 0xEE]),
        };
        assert_eq!(sets.profile_level_id().as_deref(), Some("64001E"));
    }

    #[test]
    fn test_profile_level_id_short_sps() {
        let sets = ParameterSets {
            sps: Bytes::from_static(&[0x67, 0x64]),
            pps: Bytes::from_static(&[0x68]),
        };
        assert!(sets.profile_level_id().is_none());
    }

    #[test]
    fn test_consumer_id_setup() {
        assert!(ConsumerId::SETUP.is_setup());
        assert!(!ConsumerId::new(7).is_setup());
        assert_eq!(format!("{}", ConsumerId::new(7)), "Consumer(7)");
    }
}
