//! # Date String Helpers
//!
//! Dates of data are zero-padded `YYYY-MM-DD` strings, so lexical ordering
//! equals chronological ordering. The min/max helpers below lean on that;
//! do not switch to a non-lexical representation without re-deriving them.

use chrono::{Duration, NaiveDate};

use crate::error::EtlError;

pub const DATE_FMT: &str = "%Y-%m-%d";

pub fn parse_date(date: &str) -> Result<NaiveDate, EtlError> {
    NaiveDate::parse_from_str(date, DATE_FMT).map_err(|_| EtlError::InvalidDate(date.to_string()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

/// The date `step` days after `date`, as a string. Passes `None` through.
pub fn next_date(date: Option<&str>, step: i64) -> Result<Option<String>, EtlError> {
    match date {
        None => Ok(None),
        Some(d) => {
            let day = parse_date(d)?;
            Ok(Some(format_date(day + Duration::days(step))))
        }
    }
}

/// Chronologically earlier of two optional dates; `None` yields the other.
pub fn earlier_date<'a>(a: Option<&'a str>, b: Option<&'a str>) -> Option<&'a str> {
    match (filled(a), filled(b)) {
        (None, other) => other,
        (other, None) => other,
        (Some(x), Some(y)) => Some(x.min(y)),
    }
}

/// Chronologically later of two optional dates; `None` yields the other.
pub fn later_date<'a>(a: Option<&'a str>, b: Option<&'a str>) -> Option<&'a str> {
    match (filled(a), filled(b)) {
        (None, other) => other,
        (other, None) => other,
        (Some(x), Some(y)) => Some(x.max(y)),
    }
}

fn filled(date: Option<&str>) -> Option<&str> {
    date.filter(|d| !d.is_empty())
}

/// Inclusive iterator of `YYYY-MM-DD` strings from `start` to `end`.
pub struct DateRange {
    cursor: NaiveDate,
    end: NaiveDate,
    step: i64,
}

impl DateRange {
    pub fn new(start: &str, end: &str, step: i64) -> Result<Self, EtlError> {
        Ok(Self {
            cursor: parse_date(start)?,
            end: parse_date(end)?,
            step,
        })
    }

    /// Number of dates the range will yield.
    pub fn total_items(&self) -> usize {
        if self.cursor > self.end {
            return 0;
        }
        let days = (self.end - self.cursor).num_days();
        (days / self.step + 1) as usize
    }
}

impl Iterator for DateRange {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.cursor > self.end {
            return None;
        }
        let out = format_date(self.cursor);
        self.cursor += Duration::days(self.step);
        Some(out)
    }
}
