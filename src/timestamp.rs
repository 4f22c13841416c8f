//! Permissive timestamp parsing.
//!
//! Every stored timestamp is normalized to [`DATE_FORMAT`], the wall-clock time
//! in whatever offset the input carried.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};

use crate::error::VaultError;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ZONED_FORMATS: &[&str] = &[
    "%a %b %d %H:%M:%S %Y %z",
    "%a, %b %d %H:%M:%S %Y %z",
    "%a %d %b %Y %H:%M:%S %z",
    "%a, %d %b %Y %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S %z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%a %b %d %H:%M:%S %Y",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

pub fn parse(input: &str) -> crate::Result<NaiveDateTime> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc2822(input) {
        return Ok(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.naive_local());
    }
    for format in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(input, format) {
            return Ok(dt.naive_local());
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt);
        }
    }

    Err(VaultError::UnparseableTimestamp(input.to_string()))
}

pub fn format(dt: &NaiveDateTime) -> String {
    dt.format(DATE_FORMAT).to_string()
}

/// Parses and re-renders in [`DATE_FORMAT`].
pub fn normalize(input: &str) -> crate::Result<String> {
    parse(input).map(|dt| format(&dt))
}

pub fn now() -> String {
    format(&Local::now().naive_local())
}
