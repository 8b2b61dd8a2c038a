//! Date encodings used by records and matrix columns.

use chrono::NaiveDate;

/// Storage encoding for cell dates and range boundaries.
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";
/// Column/identifier encoding for matrix dates.
pub const COMPACT_DATE_FORMAT: &str = "%Y%m%d";

/// Formats a date as a matrix column key (`YYYYMMDD`).
pub fn compact_date(date: NaiveDate) -> String {
    date.format(COMPACT_DATE_FORMAT).to_string()
}

/// Parses a `YYYYMMDD` column key.
///
/// Only exactly eight ASCII digits forming a real calendar date are accepted.
pub fn parse_compact_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 8 || !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(value, COMPACT_DATE_FORMAT).ok()
}

/// Formats a date for storage (`YYYY-MM-DD`).
pub fn iso_date(date: NaiveDate) -> String {
    date.format(ISO_DATE_FORMAT).to_string()
}

/// Parses a stored `YYYY-MM-DD` date.
pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), ISO_DATE_FORMAT).ok()
}

/// Every calendar day from `start` to `end`, both inclusive.
///
/// Returns an empty range when `end` precedes `start`.
pub fn daily_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut cursor = Some(start);
    while let Some(day) = cursor.filter(|day| *day <= end) {
        days.push(day);
        cursor = day.succ_opt();
    }
    days
}
