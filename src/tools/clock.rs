use chrono::{prelude::*, Duration};

use crate::{error::RsResult, Error};

pub type UtcDate = DateTime<Utc>;

pub fn now() -> UtcDate {
    Utc::now()
}

pub fn from_millis(millis: i64) -> Option<UtcDate> {
    Utc.timestamp_millis_opt(millis).single()
}

/// `[start, end)` of a calendar day in UTC, as milliseconds.
pub fn day_bounds_millis(day: NaiveDate) -> RsResult<(i64, i64)> {
    let start = day.and_hms_opt(0, 0, 0).ok_or_else(|| Error::InvalidParams(format!("Invalid day {}", day)))?.and_utc();
    let end = start.checked_add_signed(Duration::days(1)).ok_or_else(|| Error::InvalidParams(format!("Invalid day {}", day)))?;
    Ok((start.timestamp_millis(), end.timestamp_millis()))
}

pub fn parse_day(day: &str) -> RsResult<NaiveDate> {
    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|_| Error::InvalidParams(format!("Invalid date {}, expected YYYY-MM-DD", day)))
}

pub trait Clock {
    fn print(&self) -> String;
}

impl<T> Clock for DateTime<T> where T: chrono::TimeZone, T::Offset: std::fmt::Display {
    fn print(&self) -> String {
        self.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}
