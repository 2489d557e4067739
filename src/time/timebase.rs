//! Frame-index to timestamp conversion

use super::Timestamp;

/// Anchor for converting frame counts into absolute time
///
/// Frame `n` counted from `start` falls at `start + n / (srcal * sample_rate)`.
/// Every producer and consumer uses this one formula, so timestamps chained
/// through several tools stay consistent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timebase {
    pub start: Timestamp,
    /// True sample rate divided by nominal sample rate
    pub srcal: f64,
    /// Nominal sample rate
    pub sample_rate: u32,
}

impl Timebase {
    pub fn new(start: Timestamp, srcal: f64, sample_rate: u32) -> Self {
        Self {
            start,
            srcal,
            sample_rate,
        }
    }

    /// Calibrated sample rate
    pub fn effective_rate(&self) -> f64 {
        self.srcal * self.sample_rate as f64
    }

    /// Nominal duration of one frame, the tolerance for timing breaks
    pub fn frame_period(&self) -> f64 {
        1.0 / self.sample_rate as f64
    }

    /// Timestamp of frame `n`
    pub fn at_frame(&self, n: u64) -> Timestamp {
        self.start + n as f64 / self.effective_rate()
    }

    /// How far `t` lies from where frame `n` was expected, in seconds
    pub fn shift(&self, t: Timestamp, n: u64) -> f64 {
        t.diff(self.start) - n as f64 / self.effective_rate()
    }

    /// Whether `t` continues this timebase at frame `n` to within one sample
    pub fn is_continuous(&self, t: Timestamp, n: u64) -> bool {
        self.shift(t, n).abs() <= self.frame_period()
    }
}
