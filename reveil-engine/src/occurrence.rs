//! Next-occurrence calendar arithmetic.
//!
//! Given a parsed time, a recurrence pattern and "now", compute the next
//! absolute instant the alarm fires. Weekday math works on local calendar
//! days; the final instant is corrected for any UTC-offset difference
//! between now and the target date (DST transitions crossing the gap), so
//! the wall clock at the target date reads exactly the configured time.

use chrono::{DateTime, Datelike, Duration, Local, LocalResult, TimeZone, Timelike, Utc};

use crate::rule::Pattern;
use crate::timespec::TimeSpec;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Compute the next firing instant.
///
/// `lead` advances the wake trigger earlier than the configured time; it
/// is the fade duration for a faded play alarm (so the target volume is
/// reached at the configured time), zero otherwise.
pub fn next_occurrence(
    spec: &TimeSpec,
    pattern: Pattern,
    lead: Duration,
    now: DateTime<Local>,
) -> DateTime<Local> {
    let minute_start = now
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);

    if spec.is_relative() {
        return minute_start
            + Duration::hours(i64::from(spec.hours()))
            + Duration::minutes(i64::from(spec.minutes()));
    }

    let now_ms = now.timestamp_millis();
    let offset_now = i64::from(now.offset().local_minus_utc());
    let mut day = now.weekday().num_days_from_sunday();

    // Today's date at the configured wall-clock time.
    let today_target = minute_start
        .date_naive()
        .and_hms_opt(u32::from(spec.hours()), u32::from(spec.minutes()), 0)
        .expect("validated time is in range");
    let mut fires_ms = match Local.from_local_datetime(&today_target) {
        LocalResult::Single(dt) => dt.timestamp_millis(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp_millis(),
        // The configured time falls in a DST gap today; approximate with
        // the current offset, the correction below settles the rest.
        LocalResult::None => today_target.and_utc().timestamp_millis() - offset_now * 1000,
    };

    fires_ms -= lead.num_milliseconds();

    let mut days_to_skip = pattern
        .weekday()
        .map(|weekday| i64::from((weekday + 7 - day) % 7))
        .unwrap_or(0);

    // Inclusive: re-arming right at the firing instant must resolve to
    // the next cycle, not the occurrence that just fired.
    if days_to_skip == 0 && fires_ms <= now_ms {
        // Time has passed for today.
        if pattern.weekday().is_some() {
            days_to_skip = 7;
        } else {
            days_to_skip = 1;
            day = (day + 1) % 7;
        }
    }

    match pattern {
        Pattern::MonFri => match day {
            0 => days_to_skip += 1, // Sunday
            6 => days_to_skip += 2, // Saturday
            _ => {}
        },
        Pattern::Weekend if (1..6).contains(&day) => {
            days_to_skip += i64::from(6 - day);
        }
        _ => {}
    }

    fires_ms += days_to_skip * DAY_MS;

    // Offset drift between now and the target date.
    let provisional = to_local(fires_ms);
    let offset_target = i64::from(provisional.offset().local_minus_utc());
    fires_ms -= (offset_target - offset_now) * 1000;

    to_local(fires_ms)
}

fn to_local(ms: i64) -> DateTime<Local> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .expect("firing instant in representable range")
        .with_timezone(&Local)
}
