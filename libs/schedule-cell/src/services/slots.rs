use chrono::{NaiveTime, Timelike};

use professional_cell::models::MIN_SESSION_MINUTES;

use crate::models::{AppointmentJourney, ScheduleError, SlotWindow};

/// Cuts a journey into consecutive slot windows.
pub fn derive_slots(journey: &AppointmentJourney) -> Result<Vec<SlotWindow>, ScheduleError> {
    cut_windows(
        journey.start_time,
        journey.end_time,
        journey.slot_duration_minutes,
        journey.interval_minutes,
    )
}

/// Windows start at `start`, last `duration` minutes, and are separated by
/// `interval` minutes. A window is only produced if it ends by `end`.
pub fn cut_windows(
    start: NaiveTime,
    end: NaiveTime,
    duration: i32,
    interval: i32,
) -> Result<Vec<SlotWindow>, ScheduleError> {
    if end <= start {
        return Err(ScheduleError::InvalidJourney(
            "end time must be after start time".to_string(),
        ));
    }
    if duration < MIN_SESSION_MINUTES {
        return Err(ScheduleError::InvalidJourney(format!(
            "slot duration must be at least {} minutes",
            MIN_SESSION_MINUTES
        )));
    }
    if interval < 0 {
        return Err(ScheduleError::InvalidJourney(
            "interval cannot be negative".to_string(),
        ));
    }

    let start_min = minutes_of_day(start);
    let end_min = minutes_of_day(end);
    let duration = i64::from(duration);
    let step = duration + i64::from(interval);

    if start_min + duration > end_min {
        return Err(ScheduleError::InvalidJourney(
            "slot duration is longer than the journey".to_string(),
        ));
    }

    let mut windows = Vec::new();
    let mut cursor = start_min;
    while cursor + duration <= end_min {
        windows.push(SlotWindow {
            start_time: time_from_minutes(cursor)?,
            end_time: time_from_minutes(cursor + duration)?,
        });
        cursor += step;
    }

    Ok(windows)
}

/// Two same-day journeys overlap when each starts before the other ends.
pub fn windows_overlap(a_start: NaiveTime, a_end: NaiveTime, b_start: NaiveTime, b_end: NaiveTime) -> bool {
    a_start < b_end && b_start < a_end
}

fn minutes_of_day(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

fn time_from_minutes(minutes: i64) -> Result<NaiveTime, ScheduleError> {
    let hour = u32::try_from(minutes / 60).ok();
    let minute = u32::try_from(minutes % 60).ok();
    hour.zip(minute)
        .and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0))
        .ok_or_else(|| ScheduleError::InvalidJourney(format!("{} minutes is past midnight", minutes)))
}
