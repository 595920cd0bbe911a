//! Counter-driven presentation clock
//!
//! Presentation time is a pure function of a 90 kHz counter plus a wall-clock
//! base sampled once, so dequeue jitter never shows up in timestamps.

use std::time::{Duration, SystemTime};

use crate::config::{FrameInterval, CLOCK_RATE};

#[derive(Debug, Clone)]
pub struct PresentationClock {
    base: Option<SystemTime>,
    counter: u64,
    ticks_per_frame: u64,
    frame_duration: Duration,
}

impl PresentationClock {
    pub fn new(interval: FrameInterval) -> Self {
        Self {
            base: None,
            counter: 0,
            ticks_per_frame: interval.ticks(),
            frame_duration: interval.duration(),
        }
    }

    /// Clock whose base is fixed up front instead of sampled at bootstrap
    pub fn with_base(interval: FrameInterval, base: SystemTime) -> Self {
        Self {
            base: Some(base),
            ..Self::new(interval)
        }
    }

    /// Sample the wall-clock base if that has not happened yet
    pub fn bootstrap(&mut self) {
        if self.base.is_none() {
            self.base = Some(SystemTime::now());
        }
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.base.is_some()
    }

    /// Current counter value in 90 kHz ticks
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn set_counter(&mut self, ticks: u64) {
        self.counter = ticks;
    }

    /// Advance by one frame interval
    pub fn advance(&mut self) {
        self.counter += self.ticks_per_frame;
    }

    pub fn ticks_per_frame(&self) -> u64 {
        self.ticks_per_frame
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Wall-clock time for a counter value
    pub fn time_at(&self, ticks: u64) -> SystemTime {
        let base = self.base.unwrap_or(SystemTime::UNIX_EPOCH);
        base + ticks_to_duration(ticks)
    }

    /// Wall-clock time for the current counter
    pub fn now(&self) -> SystemTime {
        self.time_at(self.counter)
    }
}

/// Exact conversion of 90 kHz ticks to a duration (nanosecond resolution)
pub fn ticks_to_duration(ticks: u64) -> Duration {
    let nanos = ticks as u128 * 1_000_000_000 / CLOCK_RATE as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
