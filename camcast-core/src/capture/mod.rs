//! Encoder capture through a memory-mapped buffer ring
//!
//! This module handles:
//! - Buffer pool ownership between kernel and user code
//! - Encoder format and control setup
//! - Pulling encoded access units one at a time

mod device;
mod ring;

pub use device::{AccessUnit, CaptureDevice, ConfigureReport};
pub use ring::{BufferRing, Owner};
