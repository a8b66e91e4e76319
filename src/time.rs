// used for every instant the engine reasons about
use chrono::{
    DateTime, Datelike, Days, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeDelta, Timelike, Utc,
};
// used to pick apart the short instant forms accepted on the command line
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

// used to print out readable forms of a grain
use std::fmt;
use std::str::FromStr;

use crate::error::{PartakeError, Result};

/// Instants are always carried in the timezone of the rule they belong to.
pub type Instant = DateTime<FixedOffset>;

lazy_static! {
    static ref OFFSET: Regex = Regex::new(r"^([+-])(\d{2}):?(\d{2})$").unwrap();
    static ref SHORT_INSTANT: Regex = Regex::new(
        r"^(\d{4})(?:-(\d{2})(?:-(\d{2})(?:[T ](\d{2})(?::(\d{2})(?::(\d{2}))?)?)?)?)?$"
    )
    .unwrap();
}

// ------------- Grain -------------
/// The periodic granularity an artifact is produced on. Variants are ordered
/// from finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grain {
    Hour,
    Day,
    Month,
    Year,
}

impl Grain {
    pub fn name(&self) -> &'static str {
        match self {
            Grain::Hour => "hour",
            Grain::Day => "day",
            Grain::Month => "month",
            Grain::Year => "year",
        }
    }
    /// Truncates an instant to the start of the period containing it, in the
    /// instant's own offset.
    pub fn truncate(&self, instant: Instant) -> Instant {
        let local = instant.naive_local();
        let midnight = local.date().and_time(NaiveTime::MIN);
        let truncated = match self {
            Grain::Hour => midnight + TimeDelta::hours(i64::from(local.hour())),
            Grain::Day => midnight,
            Grain::Month => midnight - Days::new(u64::from(local.day0())),
            Grain::Year => midnight - Days::new(u64::from(local.ordinal0())),
        };
        localize(*instant.offset(), truncated)
    }
    /// Moves an instant by `n` periods (backwards when negative). Saturates at
    /// the ends of the representable calendar.
    pub fn shift(&self, instant: Instant, n: i64) -> Instant {
        let local = instant.naive_local();
        let shifted = match self {
            Grain::Hour => TimeDelta::try_hours(n).and_then(|d| local.checked_add_signed(d)),
            Grain::Day => TimeDelta::try_days(n).and_then(|d| local.checked_add_signed(d)),
            Grain::Month => shift_months(local, n),
            Grain::Year => n.checked_mul(12).and_then(|m| shift_months(local, m)),
        };
        let shifted = shifted.unwrap_or(if n < 0 {
            NaiveDateTime::MIN
        } else {
            NaiveDateTime::MAX
        });
        localize(*instant.offset(), shifted)
    }
}

fn shift_months(local: NaiveDateTime, n: i64) -> Option<NaiveDateTime> {
    let months = Months::new(u32::try_from(n.unsigned_abs()).ok()?);
    if n < 0 {
        local.checked_sub_months(months)
    } else {
        local.checked_add_months(months)
    }
}

impl fmt::Display for Grain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Grain {
    type Err = PartakeError;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hour" | "hourly" => Ok(Grain::Hour),
            "day" | "daily" => Ok(Grain::Day),
            "month" | "monthly" => Ok(Grain::Month),
            "year" | "yearly" => Ok(Grain::Year),
            other => Err(PartakeError::Config(format!("unknown grain '{other}'"))),
        }
    }
}

// ------------- Instants -------------
/// Interprets a local wall-clock time in a fixed offset.
pub fn localize(offset: FixedOffset, local: NaiveDateTime) -> Instant {
    let utc = local
        .checked_sub_signed(TimeDelta::seconds(i64::from(offset.local_minus_utc())))
        .unwrap_or(local);
    DateTime::from_naive_utc_and_offset(utc, offset)
}

/// Accepts `UTC`, `Z` or a fixed offset such as `+02:00` / `-0530`.
pub fn parse_timezone(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("utc") || s == "Z" || s.is_empty() {
        return Ok(utc());
    }
    let captures = OFFSET
        .captures(s)
        .ok_or_else(|| PartakeError::Config(format!("unsupported timezone '{s}'")))?;
    let hours: i32 = captures[2].parse().unwrap_or(0);
    let minutes: i32 = captures[3].parse().unwrap_or(0);
    let mut seconds = hours * 3600 + minutes * 60;
    if &captures[1] == "-" {
        seconds = -seconds;
    }
    FixedOffset::east_opt(seconds)
        .ok_or_else(|| PartakeError::Config(format!("timezone '{s}' out of range")))
}

pub fn utc() -> FixedOffset {
    Utc.fix()
}

/// Parses RFC 3339 or one of the shortened forms `YYYY`, `YYYY-MM`,
/// `YYYY-MM-DD`, `YYYY-MM-DDTHH`, `YYYY-MM-DDTHH:MM[:SS]`. Shortened forms are
/// read as wall-clock time in `timezone`.
pub fn parse_instant(s: &str, timezone: FixedOffset) -> Result<Instant> {
    let s = s.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(s) {
        return Ok(instant.with_timezone(&timezone));
    }
    let invalid = || PartakeError::Config(format!("invalid instant '{s}'"));
    let captures = SHORT_INSTANT.captures(s).ok_or_else(invalid)?;
    let field = |i: usize, default: u32| -> u32 {
        captures
            .get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(default)
    };
    let year: i32 = captures[1].parse().map_err(|_| invalid())?;
    let local = NaiveDate::from_ymd_opt(year, field(2, 1), field(3, 1))
        .and_then(|date| date.and_hms_opt(field(4, 0), field(5, 0), field(6, 0)))
        .ok_or_else(invalid)?;
    Ok(localize(timezone, local))
}
