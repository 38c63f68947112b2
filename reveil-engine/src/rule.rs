//! Alarm rule model: recurrence patterns, actions, transitions, and the
//! validation that turns a raw configuration slot into an armable rule.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RuleSlot;
use crate::timespec::TimeSpec;

/// Longest supported fade, in minutes.
pub const MAX_FADE_MINUTES: u32 = 30;

/// Start of the index range reserved for synthesized secondary-output
/// sub-rules. Primary rules occupy `0..SECONDARY_BASE`.
pub const SECONDARY_BASE: usize = 100;

/// Largest output group a rule can drive; extra outputs beyond this are
/// ignored with a warning.
pub const MAX_GROUP_OUTPUTS: usize = 8;

/// Index of the sub-rule for the `slot`-th extra output of `parent`.
pub fn secondary_index(parent: usize, slot: usize) -> usize {
    SECONDARY_BASE + parent * MAX_GROUP_OUTPUTS + slot
}

/// Recurrence pattern of an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Once,
    Daily,
    #[strum(to_string = "Monday till Friday")]
    MonFri,
    Weekend,
}

impl Pattern {
    /// Calendar weekday for the fixed-day patterns (0 = Sunday .. 6 =
    /// Saturday), `None` for Once/Daily/MonFri/Weekend.
    pub fn weekday(self) -> Option<u32> {
        match self {
            Pattern::Sunday => Some(0),
            Pattern::Monday => Some(1),
            Pattern::Tuesday => Some(2),
            Pattern::Wednesday => Some(3),
            Pattern::Thursday => Some(4),
            Pattern::Friday => Some(5),
            Pattern::Saturday => Some(6),
            _ => None,
        }
    }

    /// Phrase appended to alarm titles, e.g. `" on Friday"`.
    pub fn day_phrase(self) -> &'static str {
        match self {
            Pattern::Sunday => " on Sunday",
            Pattern::Monday => " on Monday",
            Pattern::Tuesday => " on Tuesday",
            Pattern::Wednesday => " on Wednesday",
            Pattern::Thursday => " on Thursday",
            Pattern::Friday => " on Friday",
            Pattern::Saturday => " on Saturday",
            Pattern::Once => "",
            Pattern::Daily => " daily",
            Pattern::MonFri => " on Monday till Friday",
            Pattern::Weekend => " in weekend",
        }
    }
}

/// What the alarm does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Stop,
    Play,
    Transfer,
    Standby,
    None,
}

/// How the volume change is executed when the alarm fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// Apply the action and target volume at once.
    Instant,
    /// Ramp the volume over the given number of minutes.
    Fading { minutes: u32 },
    /// Defer a stop/standby until the current track ends.
    TrackBoundary,
}

impl Transition {
    /// Fade duration in minutes; zero for non-fading transitions.
    pub fn fade_minutes(self) -> u32 {
        match self {
            Transition::Fading { minutes } => minutes,
            _ => 0,
        }
    }
}

/// Catalog category a named source lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// The zone's existing play queue; no catalog navigation needed.
    Queue,
    Genre,
    Playlist,
    InternetRadio,
}

impl SourceType {
    /// Title of the catalog list this source type is found under.
    pub fn list_title(self) -> &'static str {
        match self {
            SourceType::Queue => "Queue",
            SourceType::Genre => "Genres",
            SourceType::Playlist => "Playlists",
            SourceType::InternetRadio => "My Live Radio",
        }
    }

    /// Activation sub-items to descend through after the entry itself,
    /// in preference order per level.
    pub fn activation_titles(self) -> &'static [&'static str] {
        match self {
            SourceType::Genre => &["Play Genre", "Shuffle"],
            SourceType::Playlist => &["Play Playlist", "Shuffle"],
            _ => &[],
        }
    }
}

/// A named source to play from, resolved through catalog negotiation at
/// firing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Listening profile to activate first, if any.
    pub profile: Option<String>,
    pub source_type: SourceType,
    /// Entry title, matched case-sensitively against the catalog.
    pub name: String,
}

/// Reference to a remote output as stored in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    pub output_id: String,
    pub name: String,
}

/// A validated alarm rule, ready to arm.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmRule {
    pub index: usize,
    pub active: bool,
    pub output: Option<OutputRef>,
    pub action: Action,
    pub pattern: Pattern,
    pub time: TimeSpec,
    pub volume: i32,
    pub transition: Transition,
    pub repeat: bool,
    pub transfer: Option<OutputRef>,
    pub source: Option<SourceSpec>,
}

/// A synthesized sub-rule for one extra output in the parent's zone
/// group. Carries its own volume/fade state but mirrors the parent's
/// action and transition. The parent link is an index, never ownership.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryRule {
    pub index: usize,
    pub parent: usize,
    pub output: OutputRef,
}

/// A validation problem attached to a specific configuration field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a raw configuration slot into an [`AlarmRule`].
///
/// Failures come back as field-level errors so the configuration surface
/// can flag the offending fields and keep going; the engine refuses to
/// arm a slot that does not validate.
///
/// `volume_range` is the live range of the configured output when known.
pub fn validate(
    slot: &RuleSlot,
    index: usize,
    volume_range: Option<(i32, i32)>,
) -> Result<AlarmRule, Vec<FieldError>> {
    let mut errors = Vec::new();

    // One-shot implies no repeat.
    let repeat = slot.repeat && slot.pattern != Pattern::Once;

    let time = match TimeSpec::parse(&slot.wake_time, slot.pattern == Pattern::Once) {
        Ok(time) => Some(time),
        Err(error) => {
            errors.push(FieldError::new("wake_time", error.to_string()));
            None
        }
    };

    if let Transition::Fading { minutes } = slot.transition {
        if !(1..=MAX_FADE_MINUTES).contains(&minutes) {
            errors.push(FieldError::new(
                "fade_time",
                format!("fade time must be between 1 and {MAX_FADE_MINUTES} minutes"),
            ));
        }
    }

    if slot.action == Action::Transfer && slot.transfer.is_none() {
        errors.push(FieldError::new(
            "transfer_zone",
            "transfer requires a target output",
        ));
    }

    if let Some((min, max)) = volume_range {
        if !(min..=max).contains(&slot.wake_volume) {
            errors.push(FieldError::new(
                "wake_volume",
                format!("volume must be between {min} and {max}"),
            ));
        }
    }

    match time {
        Some(time) if errors.is_empty() => Ok(AlarmRule {
            index,
            active: slot.active,
            output: slot.output.clone(),
            action: slot.action,
            pattern: slot.pattern,
            time,
            volume: slot.wake_volume,
            transition: slot.transition,
            repeat,
            transfer: slot.transfer.clone(),
            source: slot.source.clone(),
        }),
        _ => Err(errors),
    }
}

/// Human-readable summary of a rule for the configuration surface,
/// e.g. `"Kitchen: Play daily @ 07:00 (this week)"`.
pub fn next_title(rule: &AlarmRule) -> String {
    let Some(output) = rule.output.as_ref().filter(|_| rule.active) else {
        return format!("Alarm {} not set", rule.index + 1);
    };

    let repeat_suffix = if rule.repeat {
        match rule.pattern {
            Pattern::Once | Pattern::Daily => "",
            Pattern::MonFri => " (weekly)",
            // Pluralize the day phrase: " on Fridays", " in weekends".
            _ => "s",
        }
    } else if matches!(rule.pattern, Pattern::MonFri | Pattern::Daily) {
        " (this week)"
    } else {
        ""
    };

    let mut title = format!(
        "{}: {}{}{}",
        output.name,
        rule.action,
        rule.pattern.day_phrase(),
        repeat_suffix
    );

    if rule.action == Action::Transfer {
        if let Some(transfer) = &rule.transfer {
            title.push_str(&format!(" to {}", transfer.name));
        }
    }

    if rule.time.is_relative() {
        title.push_str(" in ");
        if rule.time.hours() > 0 {
            title.push_str(&format!("{}h and ", rule.time.hours()));
        }
        title.push_str(&format!("{}min", rule.time.minutes()));
    } else {
        title.push_str(&format!(" @ {}", rule.time.friendly()));
    }

    title
}
