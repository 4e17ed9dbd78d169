//! Relative date phrases ("tomorrow", "next monday", "friday") resolved
//! against a reference date.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::errors::BookingError;
use crate::models::appointment::DATE_FORMAT;

pub const WEEKDAY_NAMES: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

pub fn parse_weekday(name: &str) -> Option<Weekday> {
    let name = name.trim().to_lowercase();
    WEEKDAY_NAMES
        .iter()
        .position(|d| *d == name)
        .map(|idx| WEEKDAYS[idx])
}

/// Parse a strict `YYYY-MM-DD` calendar date.
pub fn parse_date(s: &str) -> Result<NaiveDate, BookingError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|_| BookingError::MalformedDate(s.to_string()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn days_until(from: Weekday, to: Weekday) -> i64 {
    let from = from.num_days_from_monday() as i64;
    let to = to.num_days_from_monday() as i64;
    (to - from + 7) % 7
}

/// Resolve a phrase the resolver understands, or `None` if it doesn't.
pub fn try_resolve_relative(phrase: &str, today: NaiveDate) -> Option<NaiveDate> {
    let phrase = phrase.trim().to_lowercase();

    match phrase.as_str() {
        "later today" => return Some(today),
        "tomorrow" => return Some(today + Duration::days(1)),
        "next week" => return Some(today + Duration::weeks(1)),
        _ => {}
    }

    if let Some(rest) = phrase.strip_prefix("next ") {
        // Always lands in the following week, even for today's weekday.
        let target = parse_weekday(rest)?;
        return Some(today + Duration::days(days_until(today.weekday(), target) + 7));
    }

    resolve_weekday_name(&phrase, today)
}

/// Resolve a relative phrase; anything unrecognized falls back to `today`.
pub fn resolve_relative(phrase: &str, today: NaiveDate) -> NaiveDate {
    match try_resolve_relative(phrase, today) {
        Some(date) => date,
        None => {
            tracing::warn!(phrase, "unrecognized relative date, defaulting to today");
            today
        }
    }
}

/// Next occurrence of a bare weekday on or after `today` (same day → today).
pub fn resolve_weekday_name(name: &str, today: NaiveDate) -> Option<NaiveDate> {
    let target = parse_weekday(name)?;
    Some(today + Duration::days(days_until(today.weekday(), target)))
}
