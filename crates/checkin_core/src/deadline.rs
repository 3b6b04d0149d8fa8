//! crates/checkin_core/src/deadline.rs
//!
//! Calendar and deadline arithmetic. All dates and times are UTC.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::domain::{ChallengeProgress, CheckIn, CheckInStatus};

/// The instant after which check-ins for `date` are no longer accepted from users.
pub fn deadline_instant(date: NaiveDate, checkin_time: NaiveTime) -> DateTime<Utc> {
    date.and_time(checkin_time).and_utc()
}

/// Whether a challenge runs on `today` (both bounds inclusive).
pub fn is_active_on(today: NaiveDate, start: NaiveDate, end: NaiveDate) -> bool {
    start <= today && today <= end
}

/// The single date a pass at `now` should finalize for a challenge, if any.
///
/// Today once today's deadline has passed, otherwise yesterday. Dates outside
/// `[start, end]` yield `None`.
pub fn evaluation_date(
    now: DateTime<Utc>,
    start: NaiveDate,
    end: NaiveDate,
    checkin_time: NaiveTime,
) -> Option<NaiveDate> {
    let today = now.date_naive();
    let candidate = if now >= deadline_instant(today, checkin_time) {
        today
    } else {
        today.pred_opt()?
    };

    is_active_on(candidate, start, end).then_some(candidate)
}

/// A success row created strictly before its date's deadline.
pub fn is_timely_success(check_in: &CheckIn, checkin_time: NaiveTime) -> bool {
    check_in.status == CheckInStatus::Success
        && check_in.created_at < deadline_instant(check_in.date, checkin_time)
}

/// Parses `HH:MM` or `HH:MM:SS`.
pub fn parse_checkin_time(s: &str) -> Result<NaiveTime, chrono::ParseError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S").or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
}

/// Number of days in `[start, end]`.
pub fn total_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

/// Days of the challenge that have begun by `today`, clamped to the challenge length.
pub fn days_elapsed(today: NaiveDate, start: NaiveDate, end: NaiveDate) -> i64 {
    let elapsed = (today - start).num_days() + 1;
    elapsed.clamp(0, total_days(start, end).max(0))
}

pub fn progress(today: NaiveDate, start: NaiveDate, end: NaiveDate) -> ChallengeProgress {
    let total = total_days(start, end).max(0);
    let elapsed = days_elapsed(today, start, end);
    let percent = ((elapsed as f64 / total.max(1) as f64) * 100.0).round() as u8;
    ChallengeProgress {
        total,
        elapsed,
        percent,
    }
}
