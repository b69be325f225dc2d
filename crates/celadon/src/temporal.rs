//! Durations and timestamps.
//!
//! Both are 128-bit nanosecond counts internally, validated against the CEL
//! ranges after every arithmetic step: durations within ±315 576 000 000
//! seconds, timestamps between 0001-01-01T00:00:00Z and
//! 9999-12-31T23:59:59.999999999Z. Calendar math (parsing, formatting, field
//! access) goes through chrono; arithmetic never does.

use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Maximum duration magnitude in seconds (about ±10 000 years).
const MAX_DURATION_SECONDS: i128 = 315_576_000_000;
const MAX_DURATION_NANOS: i128 = MAX_DURATION_SECONDS * NANOS_PER_SECOND;

/// Unix seconds of 0001-01-01T00:00:00Z and 9999-12-31T23:59:59Z.
const MIN_TIMESTAMP_SECONDS: i128 = -62_135_596_800;
const MAX_TIMESTAMP_SECONDS: i128 = 253_402_300_799;
const MIN_TIMESTAMP_NANOS: i128 = MIN_TIMESTAMP_SECONDS * NANOS_PER_SECOND;
const MAX_TIMESTAMP_NANOS: i128 = MAX_TIMESTAMP_SECONDS * NANOS_PER_SECOND + (NANOS_PER_SECOND - 1);

/// Why a temporal operation failed; converted to a runtime error value by the
/// caller, which owns the expression id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemporalError {
    DurationOverflow,
    TimestampOverflow,
    Parse(String),
    /// Named (IANA) time zones are not supported; offsets and UTC are.
    UnsupportedZone(String),
}

impl fmt::Display for TemporalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DurationOverflow => write!(f, "duration out of range"),
            Self::TimestampOverflow => write!(f, "timestamp out of range"),
            Self::Parse(message) => write!(f, "{message}"),
            Self::UnsupportedZone(zone) => write!(f, "unsupported time zone: {zone}"),
        }
    }
}

/// A signed span of time, `±315 576 000 000s` at nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CelDuration {
    nanos: i128,
}

impl CelDuration {
    pub fn from_nanos(nanos: i128) -> Result<Self, TemporalError> {
        if nanos.abs() > MAX_DURATION_NANOS {
            return Err(TemporalError::DurationOverflow);
        }
        Ok(Self { nanos })
    }

    #[must_use]
    pub fn nanos(self) -> i128 {
        self.nanos
    }

    #[must_use]
    pub fn seconds(self) -> i64 {
        (self.nanos / NANOS_PER_SECOND) as i64
    }

    pub fn checked_add(self, other: Self) -> Result<Self, TemporalError> {
        Self::from_nanos(self.nanos + other.nanos)
    }

    pub fn checked_sub(self, other: Self) -> Result<Self, TemporalError> {
        Self::from_nanos(self.nanos - other.nanos)
    }

    pub fn checked_neg(self) -> Result<Self, TemporalError> {
        Self::from_nanos(-self.nanos)
    }

    /// Parses the Go-style duration syntax used by CEL: one or more
    /// `<decimal><unit>` terms with units `ns`, `us`/`µs`, `ms`, `s`, `m`,
    /// `h`, optionally signed, e.g. `"1h30m"`, `"-2.5s"`.
    pub fn parse(text: &str) -> Result<Self, TemporalError> {
        let bad = || TemporalError::Parse(format!("invalid duration: {text}"));
        let mut rest = text;
        let mut negative = false;
        if let Some(stripped) = rest.strip_prefix('-') {
            negative = true;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('+') {
            rest = stripped;
        }
        if rest.is_empty() {
            return Err(bad());
        }
        if rest == "0" {
            return Ok(Self { nanos: 0 });
        }
        let mut total: i128 = 0;
        while !rest.is_empty() {
            let digits_end = rest
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .ok_or_else(bad)?;
            if digits_end == 0 {
                return Err(bad());
            }
            let (number, tail) = rest.split_at(digits_end);
            let (unit_nanos, tail) = if let Some(t) = tail.strip_prefix("ns") {
                (1i128, t)
            } else if let Some(t) = tail.strip_prefix("us").or_else(|| tail.strip_prefix("µs")) {
                (1_000, t)
            } else if let Some(t) = tail.strip_prefix("ms") {
                (1_000_000, t)
            } else if let Some(t) = tail.strip_prefix('s') {
                (NANOS_PER_SECOND, t)
            } else if let Some(t) = tail.strip_prefix('m') {
                (60 * NANOS_PER_SECOND, t)
            } else if let Some(t) = tail.strip_prefix('h') {
                (3600 * NANOS_PER_SECOND, t)
            } else {
                return Err(bad());
            };
            let value: f64 = number.parse().map_err(|_| bad())?;
            let term = value * unit_nanos as f64;
            if !term.is_finite() {
                return Err(bad());
            }
            total += term as i128;
            rest = tail;
        }
        if negative {
            total = -total;
        }
        Self::from_nanos(total)
    }
}

impl fmt::Display for CelDuration {
    /// Seconds form with trailing fractional nanos trimmed, e.g. `"3.5s"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.nanos / NANOS_PER_SECOND;
        let nanos = (self.nanos % NANOS_PER_SECOND).unsigned_abs() as u64;
        let sign = if self.nanos < 0 && seconds == 0 { "-" } else { "" };
        if nanos == 0 {
            write!(f, "{sign}{seconds}s")
        } else {
            let fraction = format!("{nanos:09}");
            write!(f, "{sign}{seconds}.{}s", fraction.trim_end_matches('0'))
        }
    }
}

/// An absolute instant within the CEL-representable calendar range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CelTimestamp {
    nanos: i128,
}

impl CelTimestamp {
    pub fn from_nanos(nanos: i128) -> Result<Self, TemporalError> {
        if !(MIN_TIMESTAMP_NANOS..=MAX_TIMESTAMP_NANOS).contains(&nanos) {
            return Err(TemporalError::TimestampOverflow);
        }
        Ok(Self { nanos })
    }

    #[must_use]
    pub fn nanos(self) -> i128 {
        self.nanos
    }

    #[must_use]
    pub fn unix_seconds(self) -> i64 {
        self.nanos.div_euclid(NANOS_PER_SECOND) as i64
    }

    pub fn checked_add(self, duration: CelDuration) -> Result<Self, TemporalError> {
        Self::from_nanos(self.nanos + duration.nanos())
    }

    pub fn checked_sub(self, duration: CelDuration) -> Result<Self, TemporalError> {
        Self::from_nanos(self.nanos - duration.nanos())
    }

    /// Difference of two instants as a duration.
    pub fn since(self, earlier: Self) -> Result<CelDuration, TemporalError> {
        CelDuration::from_nanos(self.nanos - earlier.nanos)
    }

    /// Parses an RFC 3339 timestamp, normalizing to UTC.
    pub fn parse(text: &str) -> Result<Self, TemporalError> {
        let parsed = DateTime::parse_from_rfc3339(text)
            .map_err(|_| TemporalError::Parse(format!("invalid timestamp: {text}")))?;
        let seconds = i128::from(parsed.timestamp());
        let nanos = i128::from(parsed.timestamp_subsec_nanos());
        Self::from_nanos(seconds * NANOS_PER_SECOND + nanos)
    }

    fn to_datetime(self, offset: FixedOffset) -> DateTime<FixedOffset> {
        let seconds = self.nanos.div_euclid(NANOS_PER_SECOND) as i64;
        let subsec = self.nanos.rem_euclid(NANOS_PER_SECOND) as u32;
        DateTime::<Utc>::from_timestamp(seconds, subsec)
            .expect("validated timestamp is within chrono's range")
            .with_timezone(&offset)
    }

    /// Calendar fields in the given zone (UTC when `zone` is `None`).
    pub fn field(self, field: TimestampField, zone: Option<&str>) -> Result<i64, TemporalError> {
        let offset = parse_zone(zone)?;
        let datetime = self.to_datetime(offset);
        let value = match field {
            TimestampField::Year => i64::from(datetime.year()),
            TimestampField::Month => i64::from(datetime.month0()),
            TimestampField::DayOfYear => i64::from(datetime.ordinal0()),
            TimestampField::DayOfMonthZeroBased => i64::from(datetime.day0()),
            TimestampField::DayOfMonthOneBased => i64::from(datetime.day()),
            TimestampField::DayOfWeek => i64::from(datetime.weekday().num_days_from_sunday()),
            TimestampField::Hours => i64::from(datetime.hour()),
            TimestampField::Minutes => i64::from(datetime.minute()),
            TimestampField::Seconds => i64::from(datetime.second()),
            TimestampField::Milliseconds => i64::from(datetime.timestamp_subsec_millis()),
        };
        Ok(value)
    }
}

impl fmt::Display for CelTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let datetime = self.to_datetime(FixedOffset::east_opt(0).expect("zero offset is valid"));
        if self.nanos.rem_euclid(NANOS_PER_SECOND) == 0 {
            write!(f, "{}", datetime.format("%Y-%m-%dT%H:%M:%SZ"))
        } else {
            let text = format!("{}", datetime.format("%Y-%m-%dT%H:%M:%S%.9fZ"));
            write!(f, "{text}")
        }
    }
}

/// Calendar fields exposed through the timestamp accessor functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    Year,
    /// 0-based month, per the CEL accessor contract.
    Month,
    DayOfYear,
    DayOfMonthZeroBased,
    DayOfMonthOneBased,
    DayOfWeek,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
}

/// Accepts `UTC`, `Z`, and fixed offsets `±HH:MM`; anything else (including
/// IANA names) is unsupported.
fn parse_zone(zone: Option<&str>) -> Result<FixedOffset, TemporalError> {
    let Some(zone) = zone else {
        return Ok(FixedOffset::east_opt(0).expect("zero offset is valid"));
    };
    match zone {
        "UTC" | "Z" | "+00:00" | "-00:00" => Ok(FixedOffset::east_opt(0).expect("zero offset is valid")),
        _ => {
            let bytes = zone.as_bytes();
            let valid_shape = bytes.len() == 6
                && (bytes[0] == b'+' || bytes[0] == b'-')
                && bytes[3] == b':'
                && zone[1..3].chars().all(|c| c.is_ascii_digit())
                && zone[4..6].chars().all(|c| c.is_ascii_digit());
            if !valid_shape {
                return Err(TemporalError::UnsupportedZone(zone.to_owned()));
            }
            let hours: i32 = zone[1..3].parse().map_err(|_| TemporalError::UnsupportedZone(zone.to_owned()))?;
            let minutes: i32 = zone[4..6].parse().map_err(|_| TemporalError::UnsupportedZone(zone.to_owned()))?;
            let mut seconds = hours * 3600 + minutes * 60;
            if bytes[0] == b'-' {
                seconds = -seconds;
            }
            FixedOffset::east_opt(seconds).ok_or_else(|| TemporalError::UnsupportedZone(zone.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parse_and_display() {
        assert_eq!(CelDuration::parse("1h30m").unwrap().seconds(), 5400);
        assert_eq!(CelDuration::parse("-2.5s").unwrap().nanos(), -2_500_000_000);
        assert_eq!(CelDuration::parse("300s").unwrap().to_string(), "300s");
        assert_eq!(CelDuration::parse("3.5s").unwrap().to_string(), "3.5s");
        assert!(CelDuration::parse("12x").is_err());
        assert!(CelDuration::parse("").is_err());
    }

    #[test]
    fn duration_range_is_enforced() {
        assert!(CelDuration::from_nanos(MAX_DURATION_NANOS).is_ok());
        assert!(CelDuration::from_nanos(MAX_DURATION_NANOS + 1).is_err());
        let max = CelDuration::from_nanos(MAX_DURATION_NANOS).unwrap();
        let one = CelDuration::from_nanos(1).unwrap();
        assert_eq!(max.checked_add(one), Err(TemporalError::DurationOverflow));
    }

    #[test]
    fn timestamp_parse_round_trip() {
        let ts = CelTimestamp::parse("2023-06-01T12:30:45Z").unwrap();
        assert_eq!(ts.to_string(), "2023-06-01T12:30:45Z");
        let offset = CelTimestamp::parse("2023-06-01T12:30:45+02:00").unwrap();
        assert_eq!(offset.to_string(), "2023-06-01T10:30:45Z");
    }

    #[test]
    fn timestamp_range_is_enforced() {
        assert!(CelTimestamp::parse("0001-01-01T00:00:00Z").is_ok());
        assert!(CelTimestamp::parse("9999-12-31T23:59:59Z").is_ok());
        let max = CelTimestamp::parse("9999-12-31T23:59:59Z").unwrap();
        let hour = CelDuration::parse("1h").unwrap();
        assert_eq!(max.checked_add(hour), Err(TemporalError::TimestampOverflow));
    }

    #[test]
    fn calendar_fields() {
        let ts = CelTimestamp::parse("2023-06-01T12:30:45Z").unwrap();
        assert_eq!(ts.field(TimestampField::Year, None).unwrap(), 2023);
        assert_eq!(ts.field(TimestampField::Month, None).unwrap(), 5);
        assert_eq!(ts.field(TimestampField::DayOfMonthOneBased, None).unwrap(), 1);
        assert_eq!(ts.field(TimestampField::Hours, None).unwrap(), 12);
        assert_eq!(ts.field(TimestampField::Hours, Some("+02:00")).unwrap(), 14);
        assert!(ts.field(TimestampField::Hours, Some("America/New_York")).is_err());
    }

    #[test]
    fn timestamp_minus_timestamp_is_a_duration() {
        let a = CelTimestamp::parse("2023-06-01T12:00:00Z").unwrap();
        let b = CelTimestamp::parse("2023-06-01T11:00:00Z").unwrap();
        assert_eq!(a.since(b).unwrap(), CelDuration::parse("1h").unwrap());
    }
}
