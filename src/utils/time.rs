/// Time utilities for market session management
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Asia::Kolkata;

/// Check if current time is within entry window
pub fn is_in_entry_window(now: DateTime<Utc>, window_start: &str, window_end: &str) -> bool {
    let now_ist = now.with_timezone(&Kolkata);

    let start_time = NaiveTime::parse_from_str(window_start, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(window_start, "%H:%M"))
        .unwrap_or_else(|_| NaiveTime::from_hms_opt(10, 0, 0).unwrap());

    let end_time = NaiveTime::parse_from_str(window_end, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(window_end, "%H:%M"))
        .unwrap_or_else(|_| NaiveTime::from_hms_opt(15, 0, 0).unwrap());

    let current_time = now_ist.time();
    current_time >= start_time && current_time < end_time
}
