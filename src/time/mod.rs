//! Timestamps and sample-rate calibration
//!
//! A [`Timestamp`] is a compound (whole seconds, fraction) value, which keeps
//! sub-nanosecond resolution at current epoch times where a single `f64`
//! would not. A [`Timebase`] ties a timestamp to a frame counter through the
//! stream's nominal rate and its `srcal` correction.

pub mod parse;
pub mod timebase;
pub mod timestamp;

pub use parse::TimeRange;
pub use timebase::Timebase;
pub use timestamp::Timestamp;
