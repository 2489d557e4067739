//! Compound timestamp

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

/// Absolute time as whole seconds plus a fraction in `[0, 1)`
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    secs: i64,
    frac: f64,
}

impl Timestamp {
    /// The epoch; also used by producers that never set a timebase
    pub const ZERO: Timestamp = Timestamp { secs: 0, frac: 0.0 };

    /// Marker for "no timestamp available"
    pub const NONE: Timestamp = Timestamp { secs: -1, frac: 0.0 };

    /// Build a normalised timestamp; `frac` may be any finite value
    pub fn compose(secs: i64, frac: f64) -> Self {
        let whole = frac.floor();
        let mut secs = secs + whole as i64;
        let mut frac = frac - whole;
        // frac - floor(frac) can round up to exactly 1.0 for tiny negatives
        if frac >= 1.0 {
            secs += 1;
            frac = 0.0;
        }
        Self { secs, frac }
    }

    /// Timestamp from the seconds/nanoseconds pair stored in a block header
    pub fn from_wire(secs: u32, nsec: u32) -> Self {
        Self::compose(secs as i64, nsec as f64 * 1e-9)
    }

    /// Seconds/nanoseconds pair for a block header, nanoseconds rounded
    pub fn to_wire(self) -> (u32, u32) {
        let nsec = (self.frac * 1e9 + 0.5) as u32;
        if nsec >= 1_000_000_000 {
            ((self.secs + 1) as u32, 0)
        } else {
            (self.secs as u32, nsec)
        }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self::compose(now.timestamp(), now.timestamp_subsec_nanos() as f64 * 1e-9)
    }

    pub fn secs(self) -> i64 {
        self.secs
    }

    pub fn frac(self) -> f64 {
        self.frac
    }

    /// Lossy conversion to floating seconds
    pub fn as_f64(self) -> f64 {
        self.secs as f64 + self.frac
    }

    pub fn is_zero(self) -> bool {
        self.secs == 0 && self.frac == 0.0
    }

    pub fn is_none(self) -> bool {
        self.secs == -1 && self.frac == 0.0
    }

    /// Offset by a (possibly negative) number of seconds
    pub fn add(self, secs: f64) -> Self {
        let whole = secs.trunc();
        Self::compose(self.secs + whole as i64, self.frac + (secs - whole))
    }

    /// `self - other` in seconds
    pub fn diff(self, other: Timestamp) -> f64 {
        (self.secs - other.secs) as f64 + (self.frac - other.frac)
    }

    /// Round down to a multiple of `period` seconds
    pub fn truncate(self, period: f64) -> Self {
        let n = (self.secs as f64 / period + self.frac / period).floor();
        let t = n * period;
        let whole = t.floor();
        Self::compose(whole as i64, t - whole)
    }

    /// Round to the nearest whole second
    pub fn round(self) -> Self {
        if self.frac >= 0.5 {
            Self::compose(self.secs + 1, 0.0)
        } else {
            Self::compose(self.secs, 0.0)
        }
    }

    /// `yyyy-mm-dd_hh:mm:ss.ffffff` in UTC
    pub fn format_utc(self) -> String {
        let mut secs = self.secs;
        let mut micros = (0.5 + 1e6 * self.frac) as i64;
        if micros == 1_000_000 {
            micros = 0;
            secs += 1;
        }

        match chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0) {
            Some(dt) => format!("{}.{:06}", dt.format("%Y-%m-%d_%H:%M:%S"), micros),
            None => format!("{}", self),
        }
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.secs
            .cmp(&other.secs)
            .then_with(|| self.frac.total_cmp(&other.frac))
    }
}

impl Add<f64> for Timestamp {
    type Output = Timestamp;

    fn add(self, secs: f64) -> Timestamp {
        Timestamp::add(self, secs)
    }
}

impl Sub for Timestamp {
    type Output = f64;

    fn sub(self, other: Timestamp) -> f64 {
        self.diff(other)
    }
}

/// Decimal seconds, six places unless a precision is given (`{:.3}`)
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let places = f.precision().unwrap_or(6).min(9);
        let scale = 10i64.pow(places as u32);
        let mut secs = self.secs;
        let mut digits = (0.5 + scale as f64 * self.frac) as i64;
        if digits == scale {
            digits = 0;
            secs += 1;
        }
        if places == 0 {
            write!(f, "{}", secs)
        } else {
            write!(f, "{}.{:0width$}", secs, digits, width = places)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_compose_normalises() {
        let t = Timestamp::compose(10, 1.25);
        assert_eq!(t.secs(), 11);
        assert!((t.frac() - 0.25).abs() < 1e-12);

        let t = Timestamp::compose(10, -0.25);
        assert_eq!(t.secs(), 9);
        assert!((t.frac() - 0.75).abs() < 1e-12);

        let t = Timestamp::compose(10, -1e-18);
        assert!(t.frac() < 1.0);
    }

    #[test]
    fn test_add_and_diff() {
        let t = Timestamp::compose(1_700_000_000, 0.9);
        let u = t + 0.2;
        assert_eq!(u.secs(), 1_700_000_001);
        assert!((u.diff(t) - 0.2).abs() < 1e-9);

        let v = t.add(-1.5);
        assert_eq!(v.secs(), 1_699_999_999);
        assert!((v.frac() - 0.4).abs() < 1e-9);
        assert!((t - v - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_ordering() {
        let a = Timestamp::compose(5, 0.1);
        let b = Timestamp::compose(5, 0.2);
        let c = Timestamp::compose(6, 0.0);
        assert!(a < b && b < c);
        assert!(b >= a && a <= c);
        assert_eq!(Timestamp::compose(5, 0.5), Timestamp::compose(4, 1.5));
        assert_eq!(a.max(c), c);
    }

    #[test]
    fn test_zero_none() {
        assert!(Timestamp::ZERO.is_zero());
        assert!(Timestamp::NONE.is_none());
        assert!(!Timestamp::compose(0, 0.5).is_zero());
        assert!(Timestamp::NONE < Timestamp::ZERO);
    }

    #[test]
    fn test_truncate() {
        let t = Timestamp::compose(1000, 0.7);
        let r = t.truncate(0.5);
        assert_eq!(r.secs(), 1000);
        assert!((r.frac() - 0.5).abs() < 1e-9);

        let r = t.truncate(60.0);
        assert_eq!(r.secs(), 960);
        assert_eq!(r.frac(), 0.0);
    }

    #[test]
    fn test_round() {
        assert_eq!(Timestamp::compose(7, 0.5).round(), Timestamp::compose(8, 0.0));
        assert_eq!(Timestamp::compose(7, 0.49).round(), Timestamp::compose(7, 0.0));
    }

    #[test]
    fn test_wire_conversion() {
        let t = Timestamp::compose(1_600_000_000, 0.123456789);
        let (s, ns) = t.to_wire();
        assert_eq!(s, 1_600_000_000);
        assert_eq!(ns, 123_456_789);
        assert!(Timestamp::from_wire(s, ns).diff(t).abs() < 1e-9);

        let edge = Timestamp::compose(10, 0.9999999999);
        assert_eq!(edge.to_wire(), (11, 0));
    }

    #[test]
    fn test_display_precision() {
        let t = Timestamp::compose(12, 0.3456);
        assert_eq!(format!("{}", t), "12.345600");
        assert_eq!(format!("{:.3}", t), "12.346");
        assert_eq!(format!("{:.0}", t), "12");

        let t = Timestamp::compose(12, 0.99996);
        assert_eq!(format!("{:.4}", t), "13.0000");
    }

    #[test]
    fn test_format_utc() {
        let t = Timestamp::compose(86_400 + 3_661, 0.25);
        assert_eq!(t.format_utc(), "1970-01-02_01:01:01.250000");
    }

    proptest! {
        #[test]
        fn prop_add_then_diff(secs in 0i64..4_000_000_000, frac in 0.0f64..1.0, delta in -1.0e6f64..1.0e6) {
            let t = Timestamp::compose(secs, frac);
            let u = t + delta;
            prop_assert!(u.frac() >= 0.0 && u.frac() < 1.0);
            prop_assert!((u.diff(t) - delta).abs() < 1e-6);
            if delta > 1e-6 {
                prop_assert!(u > t);
            } else if delta < -1e-6 {
                prop_assert!(u < t);
            }
        }
    }
}
