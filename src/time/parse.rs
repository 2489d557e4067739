//! Textual timestamps and time ranges
//!
//! Accepted timestamp forms (all UTC):
//!
//! ```text
//! now | today | yesterday
//! 1700000000.25                       decimal epoch seconds
//! 2024-03-01_12:30:05.5               yyyy-mm-dd, then _ T t space or UT
//! 20240301 1230                       compact forms, colons optional
//! ```

use chrono::NaiveDate;

use super::Timestamp;
use crate::error::ConfigError;

const DAY: i64 = 86_400;

impl Timestamp {
    /// Parse a timestamp in any of the forms listed in the module docs
    pub fn parse(text: &str) -> Result<Timestamp, ConfigError> {
        let s = text.trim();
        let bad = || ConfigError::InvalidTimestamp(text.to_string());

        match s.to_ascii_lowercase().as_str() {
            "now" => return Ok(Timestamp::now()),
            "today" => return Ok(start_of_day(Timestamp::now(), 0)),
            "yesterday" => return Ok(start_of_day(Timestamp::now(), -1)),
            _ => {}
        }

        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
            return parse_epoch(s).ok_or_else(bad);
        }

        parse_calendar(s).ok_or_else(bad)
    }

    /// Timestamp encoded in a `yymmdd-hhmmss` file name, if it is one
    pub fn from_filename(name: &str) -> Option<Timestamp> {
        let b = name.as_bytes();
        if !name.is_ascii() || b.len() != 13 || b[6] != b'-' {
            return None;
        }

        let year = 2000 + digits(&name[0..2])? as i32;
        let date = NaiveDate::from_ymd_opt(year, digits(&name[2..4])?, digits(&name[4..6])?)?;
        let time = date.and_hms_opt(
            digits(&name[7..9])?,
            digits(&name[9..11])?,
            digits(&name[11..13])?,
        )?;
        Some(Timestamp::compose(time.and_utc().timestamp(), 0.0))
    }
}

fn start_of_day(now: Timestamp, offset_days: i64) -> Timestamp {
    let day = now.secs().div_euclid(DAY) + offset_days;
    Timestamp::compose(day * DAY, 0.0)
}

fn parse_epoch(s: &str) -> Option<Timestamp> {
    let (whole, frac) = match s.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (s, ""),
    };

    let secs = if whole.is_empty() { 0 } else { whole.parse::<i64>().ok()? };
    let frac = if frac.is_empty() {
        0.0
    } else {
        format!("0.{}", frac).parse::<f64>().ok()?
    };
    Some(Timestamp::compose(secs, frac))
}

/// Exactly-all-digits field
fn digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// `n` leading digits of `s`, and the remainder
fn take_digits(s: &str, n: usize) -> Option<(u32, &str)> {
    if s.len() < n || !s.is_char_boundary(n) {
        return None;
    }
    let (head, rest) = s.split_at(n);
    Some((digits(head)?, rest))
}

/// A two-digit field optionally preceded by one of `seps`
fn take_field<'a>(s: &'a str, seps: &[char]) -> Option<(u32, &'a str)> {
    match s.chars().next() {
        Some(c) if seps.contains(&c) => take_digits(&s[1..], 2),
        _ => take_digits(s, 2),
    }
}

fn parse_calendar(s: &str) -> Option<Timestamp> {
    let (year, rest) = take_digits(s, 4)?;
    let (month, rest) = take_field(rest, &['-', '/'])?;
    let (day, mut rest) = take_field(rest, &['-', '/'])?;

    if let Some(r) = rest.strip_prefix(['_', ' ', 't', 'T']) {
        rest = r;
    } else if rest.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("ut")) {
        rest = &rest[2..];
    }

    let mut hour = 0;
    let mut minute = 0;
    let mut seconds = 0.0;

    if !rest.is_empty() {
        (hour, rest) = take_digits(rest, 2)?;
    }
    if !rest.is_empty() {
        (minute, rest) = take_field(rest, &[':'])?;
    }
    if !rest.is_empty() {
        let field = rest.strip_prefix(':').unwrap_or(rest);
        if !field.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        seconds = field.parse::<f64>().ok()?;
    }

    let date = NaiveDate::from_ymd_opt(year as i32, month, day)?;
    let time = date.and_hms_opt(hour, minute, 0)?;
    Some(Timestamp::compose(time.and_utc().timestamp(), seconds))
}

/// Optional start and end bounds, parsed from `start,end` or `start,+30m`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeRange {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

impl TimeRange {
    pub fn parse(text: &str) -> Result<TimeRange, ConfigError> {
        let (start_text, end_text) = match text.split_once(',') {
            Some((s, e)) => (s, Some(e)),
            None => (text, None),
        };

        let start = if start_text.is_empty() {
            None
        } else {
            Some(Timestamp::parse(start_text)?)
        };

        let end = match end_text {
            None | Some("") => None,
            Some(e) => match e.strip_prefix('+') {
                Some(offset) => {
                    let secs = parse_offset(offset)
                        .ok_or_else(|| ConfigError::InvalidTimestamp(text.to_string()))?;
                    Some(start.unwrap_or(Timestamp::ZERO) + secs)
                }
                None => Some(Timestamp::parse(e)?),
            },
        };

        Ok(TimeRange { start, end })
    }

    /// Whether `t` is at or after the start and before the end
    pub fn contains(&self, t: Timestamp) -> bool {
        self.start.map_or(true, |s| t >= s) && self.end.map_or(true, |e| t < e)
    }

    /// Whether `t` is at or beyond the end bound
    pub fn is_past(&self, t: Timestamp) -> bool {
        self.end.is_some_and(|e| t >= e)
    }
}

/// `30`, `30s`, `5m`, `2h`, `1d`, `1w`
fn parse_offset(s: &str) -> Option<f64> {
    let (number, scale) = match s.chars().last()? {
        'w' | 'W' => (&s[..s.len() - 1], 7.0 * DAY as f64),
        'd' | 'D' => (&s[..s.len() - 1], DAY as f64),
        'h' | 'H' => (&s[..s.len() - 1], 3600.0),
        'm' | 'M' => (&s[..s.len() - 1], 60.0),
        's' | 'S' => (&s[..s.len() - 1], 1.0),
        _ => (s, 1.0),
    };
    number.parse::<f64>().ok().map(|n| n * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    #[test]
    fn test_epoch_forms() {
        let t = ts("1700000000.25");
        assert_eq!(t.secs(), 1_700_000_000);
        assert!((t.frac() - 0.25).abs() < 1e-12);
        assert_eq!(ts("86400"), Timestamp::compose(86_400, 0.0));
        assert!(Timestamp::parse("1.2.3").is_err());
    }

    #[test]
    fn test_calendar_forms() {
        let expected = Timestamp::compose(1_709_296_205, 0.5);
        assert_eq!(ts("2024-03-01_12:30:05.5"), expected);
        assert_eq!(ts("2024-03-01T12:30:05.5"), expected);
        assert_eq!(ts("2024/03/01 12:30:05.5"), expected);
        assert_eq!(ts("20240301UT123005.5"), expected);

        assert_eq!(ts("2024-03-01"), Timestamp::compose(1_709_251_200, 0.0));
        assert_eq!(ts("2024-03-01_12"), Timestamp::compose(1_709_294_400, 0.0));
    }

    #[test]
    fn test_calendar_rejects() {
        assert!(Timestamp::parse("2024-13-01").is_err());
        assert!(Timestamp::parse("2024-03").is_err());
        assert!(Timestamp::parse("2024-03-01x12").is_err());
        assert!(Timestamp::parse("2024-03-01_1").is_err());
        assert!(Timestamp::parse("yesteryear").is_err());
        assert!(Timestamp::parse("2024-03-01xé").is_err());
        assert!(Timestamp::parse("2024-03-01é").is_err());
        assert!(Timestamp::parse("2024-03-01_12é").is_err());
        assert!(TimeRange::parse("2024-03-01,+3é").is_err());
    }

    #[test]
    fn test_relative_names() {
        let today = ts("today");
        assert_eq!(today.secs() % DAY, 0);
        assert_eq!(today.diff(ts("yesterday")), DAY as f64);
        assert!(ts("now") >= today);
    }

    #[test]
    fn test_from_filename() {
        let t = Timestamp::from_filename("240301-123005").unwrap();
        assert_eq!(t, Timestamp::compose(1_709_296_205, 0.0));
        assert!(Timestamp::from_filename("240301_123005").is_none());
        assert!(Timestamp::from_filename("240301-1230").is_none());
        assert!(Timestamp::from_filename("241301-123005").is_none());
        assert!(Timestamp::from_filename("xé301-123005").is_none());
    }

    #[test]
    fn test_time_range() {
        let r = TimeRange::parse("2024-03-01,+30m").unwrap();
        let start = r.start.unwrap();
        assert_eq!(r.end.unwrap().diff(start), 1800.0);
        assert!(r.contains(start + 10.0));
        assert!(!r.contains(start + -1.0));
        assert!(r.is_past(start + 1800.0));

        let r = TimeRange::parse(",1700000000").unwrap();
        assert!(r.start.is_none());
        assert_eq!(r.end, Some(Timestamp::compose(1_700_000_000, 0.0)));

        let r = TimeRange::parse("1700000000").unwrap();
        assert!(r.end.is_none());
        assert!(!r.is_past(Timestamp::compose(2_000_000_000, 0.0)));

        assert!(TimeRange::parse("1700000000,+5x").is_err());
    }
}
