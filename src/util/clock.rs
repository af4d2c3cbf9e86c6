//! Wall-clock labels of report snapshots (`HH:MM:SS`).
//!
//! The report stamps each snapshot with a time of day only, so differences
//! are computed modulo one day.

use chrono::{NaiveTime, Timelike};

const SECONDS_PER_DAY: i64 = 24 * 3600;

/// Error type for clock label parsing failures.
#[derive(Debug, Clone)]
pub struct ClockParseError {
    pub input: String,
    pub message: String,
}

impl std::fmt::Display for ClockParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse clock '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for ClockParseError {}

/// Parses `HH:MM:SS` (or `HH:MM`) into seconds since midnight.
pub fn parse_clock(input: &str) -> Result<u32, ClockParseError> {
    let input = input.trim();
    NaiveTime::parse_from_str(input, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(input, "%H:%M"))
        .map(|t| t.num_seconds_from_midnight())
        .map_err(|e| ClockParseError {
            input: input.to_string(),
            message: e.to_string(),
        })
}

/// Seconds from `earlier` to `later`, wrapping past midnight.
///
/// Returns `None` if either label does not parse.
pub fn seconds_behind(earlier: &str, later: &str) -> Option<i64> {
    let earlier = i64::from(parse_clock(earlier).ok()?);
    let later = i64::from(parse_clock(later).ok()?);
    Some((later - earlier).rem_euclid(SECONDS_PER_DAY))
}
