//! Schedule definitions and next-fire resolution.
//!
//! A [`ScheduleConfig`] is exactly one of:
//!
//! | Variant     | Behaviour                                                 |
//! |-------------|-----------------------------------------------------------|
//! | `once`      | Fires a single time at an absolute instant                 |
//! | `recurring` | Every N minutes/hours/days/weeks/months from a start time  |
//! | `cron`      | Five-field cron expression                                 |
//!
//! All calendar arithmetic happens in the config's fixed UTC offset. Callers
//! resolve "local" to a concrete offset before handing the config over; this
//! module never consults the system clock or timezone database.
//!
//! Configs are checked with [`validate`] before they are stored or used.
//! [`next_fire_time`] assumes a validated config and never fails: an
//! exhausted schedule resolves to `None`.

pub mod cron;
mod recurring;

use chrono::{Duration, FixedOffset, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

pub use cron::CronSchedule;

/// Minimum lead time for a one-time schedule submitted through the
/// caller-facing boundary ([`validate_submission`]).
pub const MIN_ONCE_LEAD_TIME_SECS: i64 = 60;

/// Largest accepted UTC offset, in minutes (±18 h).
pub const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

/// Upper bounds on `interval` per unit.
pub const MAX_INTERVAL_MINUTES: u32 = 1440;
pub const MAX_INTERVAL_HOURS: u32 = 168;
pub const MAX_INTERVAL_CALENDAR: u32 = 365;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A declarative recurrence definition attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(flatten)]
    pub rule: ScheduleRule,
    /// Offset from UTC in which times of day and calendar days are evaluated.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleRule {
    Once { at: Timestamp },
    Recurring(RecurringRule),
    Cron { expression: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceUnit {
    Minutes,
    Hours,
    Daily,
    Weekly,
    Monthly,
}

impl RecurrenceUnit {
    /// Largest accepted interval for this unit.
    pub fn max_interval(self) -> u32 {
        match self {
            Self::Minutes => MAX_INTERVAL_MINUTES,
            Self::Hours => MAX_INTERVAL_HOURS,
            Self::Daily | Self::Weekly | Self::Monthly => MAX_INTERVAL_CALENDAR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

/// Recurring schedule parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringRule {
    pub unit: RecurrenceUnit,
    pub interval: u32,
    /// Time of day for daily/weekly/monthly rules. Defaults to the local time
    /// of `start`.
    #[serde(default, with = "time_of_day")]
    pub time_of_day: Option<NaiveTime>,
    /// ISO weekdays (1 = Monday .. 7 = Sunday). Weekly rules only.
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    /// 1–31. Monthly rules only; short months clamp to their last day.
    #[serde(default)]
    pub day_of_month: Option<u8>,
    /// First possible occurrence and the anchor for interval counting.
    pub start: Timestamp,
    #[serde(default)]
    pub end: Option<Timestamp>,
    #[serde(default)]
    pub max_executions: Option<u32>,
}

impl ScheduleConfig {
    pub fn once(at: Timestamp) -> Self {
        Self {
            rule: ScheduleRule::Once { at },
            utc_offset_minutes: 0,
        }
    }

    pub fn recurring(rule: RecurringRule) -> Self {
        Self {
            rule: ScheduleRule::Recurring(rule),
            utc_offset_minutes: 0,
        }
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        Self {
            rule: ScheduleRule::Cron {
                expression: expression.into(),
            },
            utc_offset_minutes: 0,
        }
    }

    /// Evaluate times of day in the given offset.
    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    /// The offset as a chrono type. Out-of-range values (rejected by
    /// [`validate`]) fall back to UTC.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or(Utc.fix())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check a config before it is stored or used.
///
/// `reference` is "now" for the purpose of rejecting one-time schedules that
/// are not in the future.
pub fn validate(config: &ScheduleConfig, reference: Timestamp) -> Result<(), CoreError> {
    if config.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
        return Err(CoreError::validation(
            "utc_offset_minutes",
            format!("must be within ±{MAX_UTC_OFFSET_MINUTES} minutes"),
        ));
    }

    match &config.rule {
        ScheduleRule::Once { at } => {
            if *at <= reference {
                return Err(CoreError::validation("at", "must be in the future"));
            }
            Ok(())
        }
        ScheduleRule::Recurring(rule) => validate_recurring(rule),
        ScheduleRule::Cron { expression } => CronSchedule::parse(expression).map(|_| ()),
    }
}

/// [`validate`] plus the submission-time lead time for one-time schedules.
pub fn validate_submission(config: &ScheduleConfig, now: Timestamp) -> Result<(), CoreError> {
    validate(config, now)?;
    if let ScheduleRule::Once { at } = &config.rule {
        if *at < now + Duration::seconds(MIN_ONCE_LEAD_TIME_SECS) {
            return Err(CoreError::validation(
                "at",
                format!("must be at least {MIN_ONCE_LEAD_TIME_SECS} seconds in the future"),
            ));
        }
    }
    Ok(())
}

fn validate_recurring(rule: &RecurringRule) -> Result<(), CoreError> {
    if rule.interval < 1 {
        return Err(CoreError::validation("interval", "must be at least 1"));
    }
    let max = rule.unit.max_interval();
    if rule.interval > max {
        return Err(CoreError::validation(
            "interval",
            format!("must not exceed {max} for {} schedules", rule.unit.as_str()),
        ));
    }

    match rule.unit {
        RecurrenceUnit::Weekly => {
            if rule.days_of_week.is_empty() {
                return Err(CoreError::validation(
                    "days_of_week",
                    "at least one weekday is required",
                ));
            }
            if let Some(day) = rule.days_of_week.iter().find(|d| !(1..=7).contains(*d)) {
                return Err(CoreError::validation(
                    "days_of_week",
                    format!("weekday {day} is outside 1-7"),
                ));
            }
        }
        RecurrenceUnit::Monthly => match rule.day_of_month {
            None => {
                return Err(CoreError::validation(
                    "day_of_month",
                    "required for monthly schedules",
                ))
            }
            Some(day) if !(1..=31).contains(&day) => {
                return Err(CoreError::validation(
                    "day_of_month",
                    format!("{day} is outside 1-31"),
                ))
            }
            Some(_) => {}
        },
        _ => {}
    }

    if let Some(end) = rule.end {
        if end <= rule.start {
            return Err(CoreError::validation("end", "must be after start"));
        }
    }
    if rule.max_executions == Some(0) {
        return Err(CoreError::validation("max_executions", "must be at least 1"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Next fire time of a validated schedule.
///
/// `fired_count` is how many times the schedule has already fired; the
/// caller tracks it, this function keeps no state. Returns `None` once the
/// schedule is finished: a one-time schedule after its single firing, a
/// recurring schedule past `end` or `max_executions`, or a cron expression
/// that never matches.
///
/// Minute/hour and cron schedules resolve strictly after `reference`;
/// daily, weekly and monthly schedules resolve at or after it, so a
/// reference sitting exactly on a fire time yields that fire time. A
/// one-time schedule returns its instant until it has fired, even if that
/// instant has already passed, so an overdue run is not silently dropped.
pub fn next_fire_time(
    config: &ScheduleConfig,
    reference: Timestamp,
    fired_count: u32,
) -> Option<Timestamp> {
    let offset = config.offset();
    match &config.rule {
        ScheduleRule::Once { at } => (fired_count == 0).then_some(*at),
        ScheduleRule::Recurring(rule) => {
            recurring::next_occurrence(rule, offset, reference, fired_count)
        }
        ScheduleRule::Cron { expression } => {
            let cron = CronSchedule::parse(expression).ok()?;
            let next = cron.next_after(to_local(reference, offset))?;
            Some(from_local(next, offset))
        }
    }
}

/// Preview of the next `limit` fire times from `reference`.
///
/// Each lookup resumes one second past the previous result, so calendar
/// rules (which accept a reference equal to a fire time) never repeat it.
pub fn upcoming_fire_times(
    config: &ScheduleConfig,
    reference: Timestamp,
    fired_count: u32,
    limit: usize,
) -> Vec<Timestamp> {
    let mut out = Vec::with_capacity(limit);
    let mut cursor = reference;
    let mut fired = fired_count;
    while out.len() < limit {
        match next_fire_time(config, cursor, fired) {
            Some(next) => {
                out.push(next);
                cursor = next + Duration::seconds(1);
                fired = fired.saturating_add(1);
            }
            None => break,
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Description
// ---------------------------------------------------------------------------

const WEEKDAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Human-readable summary, e.g. `"Weekly on Mon, Wed, Fri at 09:00"`.
pub fn describe(config: &ScheduleConfig) -> String {
    let offset = config.offset();
    let zone = if config.utc_offset_minutes == 0 {
        String::new()
    } else {
        format!(" (UTC{offset})")
    };

    match &config.rule {
        ScheduleRule::Once { at } => format!(
            "Once at {}{zone}",
            at.with_timezone(&offset).format("%Y-%m-%d %H:%M")
        ),
        ScheduleRule::Cron { expression } => format!("Cron: {}{zone}", expression.trim()),
        ScheduleRule::Recurring(rule) => {
            let time = rule
                .time_of_day
                .unwrap_or_else(|| to_local(rule.start, offset).time())
                .format("%H:%M");
            let n = rule.interval;
            let mut text = match rule.unit {
                RecurrenceUnit::Minutes => every(n, "minute", "minutes"),
                RecurrenceUnit::Hours => every(n, "hour", "hours"),
                RecurrenceUnit::Daily if n == 1 => format!("Daily at {time}"),
                RecurrenceUnit::Daily => format!("Every {n} days at {time}"),
                RecurrenceUnit::Weekly => {
                    let mut days = rule.days_of_week.clone();
                    days.sort_unstable();
                    days.dedup();
                    let names: Vec<&str> = days
                        .iter()
                        .filter_map(|d| WEEKDAY_NAMES.get(usize::from(*d).wrapping_sub(1)))
                        .copied()
                        .collect();
                    let lead = if n == 1 {
                        "Weekly".to_string()
                    } else {
                        format!("Every {n} weeks")
                    };
                    format!("{lead} on {} at {time}", names.join(", "))
                }
                RecurrenceUnit::Monthly => {
                    let day = rule.day_of_month.unwrap_or(1);
                    let lead = if n == 1 {
                        "Monthly".to_string()
                    } else {
                        format!("Every {n} months")
                    };
                    format!("{lead} on day {day} at {time}")
                }
            };
            text.push_str(&zone);
            if let Some(max) = rule.max_executions {
                text.push_str(&format!(", up to {max} times"));
            }
            if let Some(end) = rule.end {
                text.push_str(&format!(
                    ", until {}",
                    end.with_timezone(&offset).format("%Y-%m-%d")
                ));
            }
            text
        }
    }
}

fn every(n: u32, singular: &str, plural: &str) -> String {
    if n == 1 {
        format!("Every {singular}")
    } else {
        format!("Every {n} {plural}")
    }
}

// ---------------------------------------------------------------------------
// Offset conversion
// ---------------------------------------------------------------------------

pub(crate) fn to_local(ts: Timestamp, offset: FixedOffset) -> NaiveDateTime {
    ts.with_timezone(&offset).naive_local()
}

pub(crate) fn from_local(local: NaiveDateTime, offset: FixedOffset) -> Timestamp {
    let utc = local - Duration::seconds(i64::from(offset.local_minus_utc()));
    Utc.from_utc_datetime(&utc)
}

/// Serde adapter accepting `"HH:MM"` or `"HH:MM:SS"`; serializes as `"HH:MM"`
/// unless seconds are set.
mod time_of_day {
    use chrono::{NaiveTime, Timelike};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) if t.second() == 0 => s.serialize_str(&t.format("%H:%M").to_string()),
            Some(t) => s.serialize_str(&t.format("%H:%M:%S").to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => NaiveTime::parse_from_str(s, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid time of day '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
