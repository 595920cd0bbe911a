//! H.264 Annex-B bitstream helpers
//!
//! Scanning and start-code handling in [`scanner`], SPS/PPS caching and
//! extraction in [`params`].

pub mod params;
pub mod scanner;

pub use params::{Absorbed, ParameterSetCache, ParameterSetExtractor};
pub use scanner::{
    contains_nal_type, find_nal, find_start_code, first_nal_type, scan_nal_units, start_code_len,
    strip_start_code, NalUnit, NalUnits,
};
