//! Elapsed-time arithmetic.
//!
//! Everything here is pure: callers sample the clock once and pass `now` in,
//! so a single operation never sees two different instants.

use chrono::{DateTime, Utc};

use crate::model::{SubTimer, Timer};

/// Returns true while the session has no end time.
pub const fn is_running(sub: &SubTimer) -> bool {
    sub.end_time.is_none()
}

/// Returns true if any session of the timer is running.
pub fn timer_is_running(timer: &Timer) -> bool {
    timer.subtimers.iter().any(is_running)
}

/// Instant the current running segment began.
pub fn resume_instant(sub: &SubTimer) -> DateTime<Utc> {
    sub.last_resume_time.unwrap_or(sub.start_time)
}

/// Length of the current running segment, clamped at zero.
///
/// Paused sessions have no running segment.
pub fn running_segment_ms(sub: &SubTimer, now: DateTime<Utc>) -> i64 {
    if !is_running(sub) {
        return 0;
    }
    (now - resume_instant(sub)).num_milliseconds().max(0)
}

/// Elapsed milliseconds for a session at `now`.
///
/// Negative deltas from clock skew count as zero.
pub fn subtimer_elapsed_ms(sub: &SubTimer, now: DateTime<Utc>) -> i64 {
    sub.total_elapsed_ms.unwrap_or(0) + running_segment_ms(sub, now)
}

/// Sum of elapsed time over all sessions of a timer.
pub fn timer_elapsed_ms(timer: &Timer, now: DateTime<Utc>) -> i64 {
    timer
        .subtimers
        .iter()
        .map(|sub| subtimer_elapsed_ms(sub, now))
        .sum()
}

/// Formats milliseconds as `1h 02m 03s`, `2m 05s` or `45s`.
pub fn format_duration(ms: i64) -> String {
    if ms < 0 {
        return "0s".to_string();
    }
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours >= 1 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes >= 1 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
