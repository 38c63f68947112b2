//! Alarm time parsing and validation.
//!
//! A time specification is entered as `[+]h[h]:mm[am|pm]`. The leading `+`
//! marks a duration relative to now, is only accepted for one-shot
//! alarms, and may omit the hour field (`+30` is thirty minutes from
//! now). Parsing normalizes to a 24-hour internal representation and
//! keeps a "friendly" rendering that preserves the clock convention the
//! user typed, so re-rendering a valid input is idempotent.

use std::fmt;

use thiserror::Error;

/// Errors from [`TimeSpec::parse`]. These are carried as field-level
/// validation messages by the configuration flow, never panics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeParseError {
    #[error("relative times are only valid for one-shot alarms")]
    RelativeNotAllowed,

    #[error("missing ':' separator")]
    MissingSeparator,

    #[error("hour field must be 1 or 2 digits")]
    BadHourField,

    #[error("hour {0} out of range 0-23")]
    HourOutOfRange(u32),

    #[error("hour {0} out of range 1-12 for a 12-hour time")]
    MeridiemHourOutOfRange(u32),

    #[error("minute field must be exactly 2 digits")]
    BadMinuteField,

    #[error("minute {0} out of range 0-59")]
    MinuteOutOfRange(u32),

    #[error("am/pm suffix not valid on a relative time")]
    MeridiemOnRelative,

    #[error("unrecognized trailing text {0:?}")]
    Trailing(String),
}

/// A parsed, validated alarm time. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSpec {
    relative: bool,
    hours: u8,
    minutes: u8,
    friendly: String,
}

fn digits(text: &str) -> Result<u32, ()> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(());
    }
    text.parse().map_err(|_| ())
}

impl TimeSpec {
    /// Parse `[+]h[h]:mm[am|pm]`, or the hourless relative form `+m[m]`.
    ///
    /// `allow_relative` is true exactly when the recurrence is "once".
    /// The minute field is the two characters following the separator;
    /// anything after them must be an `am`/`pm` suffix (absolute times
    /// only, any case).
    pub fn parse(text: &str, allow_relative: bool) -> Result<Self, TimeParseError> {
        let relative = text.starts_with('+');

        if relative && !allow_relative {
            return Err(TimeParseError::RelativeNotAllowed);
        }

        let rest = &text[usize::from(relative)..];

        // A relative spec may omit the hour field entirely: "+30" is
        // thirty minutes from now.
        let separator = match rest.find(':') {
            Some(at) if (1..=2).contains(&at) => Some(at),
            _ if relative => None,
            Some(_) => return Err(TimeParseError::BadHourField),
            None => return Err(TimeParseError::MissingSeparator),
        };

        let (hours, after_hours) = match separator {
            Some(at) => (
                digits(&rest[..at]).map_err(|_| TimeParseError::BadHourField)?,
                &rest[at + 1..],
            ),
            None => (0, rest),
        };

        let (minutes, suffix) = match separator {
            // Exactly the two characters after the separator.
            Some(_) => {
                let minute_text = after_hours.get(..2).ok_or(TimeParseError::BadMinuteField)?;
                (
                    digits(minute_text).map_err(|_| TimeParseError::BadMinuteField)?,
                    &after_hours[2..],
                )
            }
            // Hourless form: one or two minute digits.
            None => {
                let len = after_hours
                    .bytes()
                    .take_while(u8::is_ascii_digit)
                    .count()
                    .min(2);
                (
                    digits(&after_hours[..len]).map_err(|_| TimeParseError::BadMinuteField)?,
                    &after_hours[len..],
                )
            }
        };

        if minutes > 59 {
            return Err(TimeParseError::MinuteOutOfRange(minutes));
        }
        let is_am = suffix.eq_ignore_ascii_case("am");
        let is_pm = suffix.eq_ignore_ascii_case("pm");

        if !suffix.is_empty() && !is_am && !is_pm {
            return Err(TimeParseError::Trailing(suffix.to_string()));
        }

        if relative && (is_am || is_pm) {
            return Err(TimeParseError::MeridiemOnRelative);
        }

        if is_am || is_pm {
            if !(1..=12).contains(&hours) {
                return Err(TimeParseError::MeridiemHourOutOfRange(hours));
            }
        } else if hours > 23 {
            return Err(TimeParseError::HourOutOfRange(hours));
        }

        // Friendly form keeps the convention as typed, zero-padded.
        let friendly = format!(
            "{}{:02}:{:02}{}",
            if relative { "+" } else { "" },
            hours,
            minutes,
            suffix
        );

        // Normalize to the 24-hour clock.
        let hours = match (is_am, is_pm) {
            (true, _) if hours == 12 => 0,
            (_, true) if hours < 12 => hours + 12,
            _ => hours,
        };

        Ok(Self {
            relative,
            hours: hours as u8,
            minutes: minutes as u8,
            friendly,
        })
    }

    /// True for `+hh:mm` durations relative to now.
    pub fn is_relative(&self) -> bool {
        self.relative
    }

    /// Hour on the 24-hour clock (0-23), or the duration's hour count.
    pub fn hours(&self) -> u8 {
        self.hours
    }

    /// Minute 0-59.
    pub fn minutes(&self) -> u8 {
        self.minutes
    }

    /// Display rendering, preserving the am/pm convention as entered.
    pub fn friendly(&self) -> &str {
        &self.friendly
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.friendly)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("07:00", 7, 0, "07:00"; "plain")]
    #[test_case("7:00", 7, 0, "07:00"; "single digit hour pads")]
    #[test_case("0:05", 0, 5, "00:05"; "midnight")]
    #[test_case("23:59", 23, 59, "23:59"; "end of day")]
    #[test_case("12:00am", 0, 0, "12:00am"; "twelve am is midnight")]
    #[test_case("12:00pm", 12, 0, "12:00pm"; "twelve pm is noon")]
    #[test_case("1:30pm", 13, 30, "01:30pm"; "pm adds twelve")]
    #[test_case("11:15AM", 11, 15, "11:15AM"; "suffix case preserved")]
    fn parses_absolute(text: &str, hours: u8, minutes: u8, friendly: &str) {
        let spec = TimeSpec::parse(text, false).unwrap();
        assert!(!spec.is_relative());
        assert_eq!(spec.hours(), hours);
        assert_eq!(spec.minutes(), minutes);
        assert_eq!(spec.friendly(), friendly);
    }

    #[test_case("+1:30", 1, 30, "+01:30"; "relative with hours")]
    #[test_case("+0:45", 0, 45, "+00:45"; "relative minutes only")]
    #[test_case("+23:00", 23, 0, "+23:00"; "relative max hours")]
    #[test_case("+30", 0, 30, "+00:30"; "hourless")]
    #[test_case("+5", 0, 5, "+00:05"; "hourless single digit")]
    fn parses_relative(text: &str, hours: u8, minutes: u8, friendly: &str) {
        let spec = TimeSpec::parse(text, true).unwrap();
        assert!(spec.is_relative());
        assert_eq!(spec.hours(), hours);
        assert_eq!(spec.minutes(), minutes);
        assert_eq!(spec.friendly(), friendly);
    }

    #[test_case("24:00", TimeParseError::HourOutOfRange(24); "hour too large")]
    #[test_case("13:00pm", TimeParseError::MeridiemHourOutOfRange(13); "pm hour too large")]
    #[test_case("0:00pm", TimeParseError::MeridiemHourOutOfRange(0); "pm hour zero")]
    #[test_case("12:60", TimeParseError::MinuteOutOfRange(60); "minute too large")]
    #[test_case("1200", TimeParseError::MissingSeparator; "no separator")]
    #[test_case(":30", TimeParseError::BadHourField; "empty hour")]
    #[test_case("123:00", TimeParseError::BadHourField; "three digit hour")]
    #[test_case("ab:00", TimeParseError::BadHourField; "non numeric hour")]
    #[test_case("12:x0", TimeParseError::BadMinuteField; "non numeric minute")]
    #[test_case("12:3", TimeParseError::BadMinuteField; "one digit minute")]
    #[test_case("12:30xx", TimeParseError::Trailing("xx".into()); "trailing garbage")]
    fn rejects(text: &str, expected: TimeParseError) {
        assert_eq!(TimeSpec::parse(text, false).unwrap_err(), expected);
    }

    #[test]
    fn hourless_form_is_relative_only() {
        // An absolute time still needs the separator.
        assert_eq!(
            TimeSpec::parse("30", false).unwrap_err(),
            TimeParseError::MissingSeparator
        );
    }

    #[test]
    fn hourless_form_rejects_extra_digits() {
        assert_eq!(
            TimeSpec::parse("+300", true).unwrap_err(),
            TimeParseError::Trailing("0".into())
        );
    }

    #[test]
    fn hourless_form_needs_at_least_one_digit() {
        assert_eq!(
            TimeSpec::parse("+", true).unwrap_err(),
            TimeParseError::BadMinuteField
        );
        assert_eq!(
            TimeSpec::parse("+:30", true).unwrap_err(),
            TimeParseError::BadMinuteField
        );
    }

    #[test]
    fn relative_rejected_when_not_allowed() {
        assert_eq!(
            TimeSpec::parse("+1:30", false).unwrap_err(),
            TimeParseError::RelativeNotAllowed
        );
    }

    #[test]
    fn meridiem_rejected_on_relative() {
        assert_eq!(
            TimeSpec::parse("+1:30pm", true).unwrap_err(),
            TimeParseError::MeridiemOnRelative
        );
    }

    #[test]
    fn friendly_reparse_is_idempotent() {
        for text in ["7:00", "07:00", "7:00pm", "12:00AM", "+1:05", "+30", "23:59"] {
            let first = TimeSpec::parse(text, true).unwrap();
            let second = TimeSpec::parse(first.friendly(), true).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.friendly(), second.friendly());
        }
    }
}
