//! Pull-based delivery of paced H.264 units to one consumer

mod clock;
mod pacer;

pub use clock::{ticks_to_duration, PresentationClock};
pub use pacer::{DeliveryState, GopPacer, PacedUnits};
