//! Weekday/hour reconciliation for the ridership logs.
//!
//! Trip logs use an extended clock: a trip at 01:30 in the night after
//! Tuesday is booked as Tuesday 25:30. Reconciled slots are pinned onto one
//! reference week (Monday 2 October 2017 to Sunday 8 October 2017).

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{Error, Result};

/// Weekday labels in the trip logs, Monday first.
pub const WEEKDAY_LABELS: [&str; 7] = ["ma", "di", "wo", "do", "vr", "za", "zo"];

const REFERENCE_YEAR: i32 = 2017;
const REFERENCE_MONTH: u32 = 10;
/// Day of month of the reference Monday.
const REFERENCE_MONDAY: u32 = 2;

/// Maps a weekday label onto 1 (Monday) through 7 (Sunday).
pub fn weekday_number(label: &str) -> Result<u32> {
    WEEKDAY_LABELS
        .iter()
        .position(|l| *l == label.trim())
        .map(|i| i as u32 + 1)
        .ok_or_else(|| Error::InvalidValue {
            field: "weekday",
            value: label.to_string(),
        })
}

/// Rolls an hour past midnight into the following day.
///
/// Only one day of overflow is undone; hours of 48 and up stay out of range.
pub fn fix_times(hour: u32, weekday: u32) -> (u32, u32) {
    if hour >= 24 {
        let weekday = if weekday == 7 { 1 } else { weekday + 1 };
        (hour - 24, weekday)
    } else {
        (hour, weekday)
    }
}

/// The date of `weekday` (1..=7) within the reference week.
pub fn reference_date(weekday: u32) -> Option<NaiveDate> {
    if !(1..=7).contains(&weekday) {
        return None;
    }
    NaiveDate::from_ymd_opt(
        REFERENCE_YEAR,
        REFERENCE_MONTH,
        REFERENCE_MONDAY + weekday - 1,
    )
}

/// Combines a reconciled weekday and hour into a reference-week timestamp.
pub fn reference_timestamp(weekday: u32, hour: u32) -> Result<NaiveDateTime> {
    let date = reference_date(weekday).ok_or_else(|| Error::InvalidValue {
        field: "weekday",
        value: weekday.to_string(),
    })?;
    let time = NaiveTime::from_hms_opt(hour, 0, 0).ok_or_else(|| Error::InvalidValue {
        field: "hour",
        value: hour.to_string(),
    })?;
    Ok(date.and_time(time))
}

/// Extracts the hour from an `HH:MM` time slot; the hour may exceed 23.
pub fn slot_hour(slot: &str) -> Result<u32> {
    slot.trim()
        .split(':')
        .next()
        .and_then(|h| h.trim().parse().ok())
        .ok_or_else(|| Error::InvalidValue {
            field: "time slot",
            value: slot.to_string(),
        })
}
