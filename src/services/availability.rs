use chrono::{Duration, NaiveDate, NaiveTime};

use crate::errors::BookingError;
use crate::models::appointment::TIME_FORMAT;
use crate::models::{Appointment, TimeSlot};

pub const OPENING_HOUR: u32 = 9;
pub const CLOSING_HOUR: u32 = 18;
pub const GRID_STEP_MINUTES: i64 = 30;

pub fn opening_time() -> NaiveTime {
    NaiveTime::from_hms_opt(OPENING_HOUR, 0, 0).unwrap_or_default()
}

pub fn closing_time() -> NaiveTime {
    NaiveTime::from_hms_opt(CLOSING_HOUR, 0, 0).unwrap_or_default()
}

/// Grid points from opening to closing time, both inclusive.
fn business_grid() -> Vec<NaiveTime> {
    let close = closing_time();
    let mut points = vec![];
    let mut point = opening_time();
    while point <= close {
        points.push(point);
        point += Duration::minutes(GRID_STEP_MINUTES);
    }
    points
}

/// Normalize `HH:MM:SS` or `HH:MM` into a time-of-day.
pub fn normalize_time(s: &str) -> Result<NaiveTime, BookingError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| BookingError::MalformedTime(s.to_string()))
}

fn bookings_on(date: NaiveDate, bookings: &[Appointment]) -> impl Iterator<Item = &Appointment> {
    bookings.iter().filter(move |b| b.date == date)
}

/// Free intervals on `date`, coalesced from the 30-minute business grid.
///
/// A grid point is booked when some booking satisfies `start <= point < end`.
/// A run is closed by the first booked point after it. An open run at the
/// end of the grid is reported up to closing time, unless it starts at
/// closing time itself, in which case it is dropped.
pub fn find_available_slots(date: NaiveDate, bookings: &[Appointment]) -> Vec<TimeSlot> {
    let booked: Vec<TimeSlot> = bookings_on(date, bookings)
        .map(|b| TimeSlot::new(b.start, b.end))
        .collect();

    let mut slots = vec![];
    let mut run_start: Option<NaiveTime> = None;

    for point in business_grid() {
        let is_booked = booked.iter().any(|b| b.contains(point));
        match (is_booked, run_start) {
            (false, None) => run_start = Some(point),
            (true, Some(start)) => {
                slots.push(TimeSlot::new(start, point));
                run_start = None;
            }
            _ => {}
        }
    }

    if let Some(start) = run_start {
        if start != closing_time() {
            slots.push(TimeSlot::new(start, closing_time()));
        }
    }

    tracing::debug!(%date, bookings = booked.len(), slots = slots.len(), "computed available slots");
    slots
}

/// True when `[start, end)` overlaps no booking on `date`.
pub fn is_interval_free(
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    bookings: &[Appointment],
) -> bool {
    let requested = TimeSlot::new(start, end);
    let conflict = bookings_on(date, bookings)
        .find(|b| requested.overlaps(&TimeSlot::new(b.start, b.end)));

    if let Some(existing) = conflict {
        tracing::debug!(
            %date,
            start = %existing.start,
            end = %existing.end,
            "requested interval conflicts with existing booking"
        );
        return false;
    }
    true
}

/// String-typed entry point; both times are normalized before comparing.
pub fn is_available(
    date: NaiveDate,
    start: &str,
    end: &str,
    bookings: &[Appointment],
) -> Result<bool, BookingError> {
    let start = normalize_time(start)?;
    let end = normalize_time(end)?;
    Ok(is_interval_free(date, start, end, bookings))
}
