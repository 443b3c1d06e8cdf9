//! Five-field cron expressions: `minute hour day-of-month month day-of-week`.
//!
//! Each field accepts `*`, a number, a range `a-b`, a step `*/n` or `a-b/n`,
//! or a comma-separated list of those. Day-of-week runs 0–7 where both 0 and
//! 7 mean Sunday.
//!
//! When both day fields are restricted they combine with OR, as in Vixie
//! cron: `0 0 1 * 1` fires on the 1st of the month *and* on every Monday.
//! A day field counts as restricted unless it starts with `*`.

use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::error::CoreError;

/// How far ahead [`CronSchedule::next_after`] looks before giving up on an
/// expression that can never match (e.g. `0 0 31 2 *`).
pub const CRON_SEARCH_YEARS: i64 = 5;

/// Bounds and error label for one cron field.
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "cron.minute",
    min: 0,
    max: 59,
};
const HOUR: FieldSpec = FieldSpec {
    name: "cron.hour",
    min: 0,
    max: 23,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "cron.day_of_month",
    min: 1,
    max: 31,
};
const MONTH: FieldSpec = FieldSpec {
    name: "cron.month",
    min: 1,
    max: 12,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "cron.day_of_week",
    min: 0,
    max: 7,
};

/// A parsed cron expression. Each field is a bitmask of allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    day_of_month_restricted: bool,
    day_of_week_restricted: bool,
}

impl CronSchedule {
    /// Parse a five-field expression.
    ///
    /// Errors name the offending field (`cron.hour`, `cron.day_of_week`, ...)
    /// or `cron` itself when the field count is wrong.
    pub fn parse(expression: &str) -> Result<Self, CoreError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CoreError::validation(
                "cron",
                format!("expected 5 fields, found {}", fields.len()),
            ));
        }

        let minutes = parse_field(fields[0], &MINUTE)?;
        let hours = parse_field(fields[1], &HOUR)?;
        let days_of_month = parse_field(fields[2], &DAY_OF_MONTH)?;
        let months = parse_field(fields[3], &MONTH)?;
        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK)?;
        // 7 is an alias for Sunday.
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            expression: fields.join(" "),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            day_of_month_restricted: !fields[2].starts_with('*'),
            day_of_week_restricted: !fields[4].starts_with('*'),
        })
    }

    /// The normalized expression (fields separated by single spaces).
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether `at` (minute precision) satisfies every field.
    pub fn matches(&self, at: NaiveDateTime) -> bool {
        self.month_matches(at.date())
            && self.day_matches(at.date())
            && bit(self.hours, at.hour())
            && bit(self.minutes, at.minute())
    }

    /// Earliest matching minute strictly after `after`, in the same naive
    /// (local) time frame. `None` when nothing matches within
    /// [`CRON_SEARCH_YEARS`].
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut t = truncate_to_minute(after)? + Duration::minutes(1);
        let limit = t + Duration::days(366 * CRON_SEARCH_YEARS);

        while t <= limit {
            let date = t.date();
            if !self.month_matches(date) {
                t = first_of_next_month(date)?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(date) {
                t = date.succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = date.and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }

    fn month_matches(&self, date: NaiveDate) -> bool {
        bit(self.months, date.month())
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit(self.days_of_month, date.day());
        let dow = bit(self.days_of_week, date.weekday().num_days_from_sunday());
        match (self.day_of_month_restricted, self.day_of_week_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

// ---------------------------------------------------------------------------
// Field parsing
// ---------------------------------------------------------------------------

fn parse_field(raw: &str, spec: &FieldSpec) -> Result<u64, CoreError> {
    let mut mask = 0u64;
    for part in raw.split(',') {
        mask |= parse_part(part, spec)?;
    }
    Ok(mask)
}

fn parse_part(part: &str, spec: &FieldSpec) -> Result<u64, CoreError> {
    if part.is_empty() {
        return Err(CoreError::validation(spec.name, "empty list element"));
    }

    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let step = parse_number(step, spec)?;
            if step == 0 || step > spec.max {
                return Err(CoreError::validation(
                    spec.name,
                    format!("step must be between 1 and {}", spec.max),
                ));
            }
            (range, Some(step))
        }
        None => (part, None),
    };

    let (lo, hi) = if range == "*" {
        (spec.min, spec.max)
    } else if let Some((lo, hi)) = range.split_once('-') {
        let lo = parse_value(lo, spec)?;
        let hi = parse_value(hi, spec)?;
        if lo > hi {
            return Err(CoreError::validation(
                spec.name,
                format!("range {lo}-{hi} is reversed"),
            ));
        }
        (lo, hi)
    } else {
        let value = parse_value(range, spec)?;
        // `n/s` means "from n to the end of the field, every s".
        match step {
            Some(_) => (value, spec.max),
            None => (value, value),
        }
    };

    let step = step.unwrap_or(1);
    let mut mask = 0u64;
    let mut v = lo;
    while v <= hi {
        mask |= 1 << v;
        v += step;
    }
    Ok(mask)
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32, CoreError> {
    let value = parse_number(raw, spec)?;
    if value < spec.min || value > spec.max {
        return Err(CoreError::validation(
            spec.name,
            format!("{value} is outside {}-{}", spec.min, spec.max),
        ));
    }
    Ok(value)
}

fn parse_number(raw: &str, spec: &FieldSpec) -> Result<u32, CoreError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::validation(
            spec.name,
            format!("'{raw}' is not a number"),
        ));
    }
    raw.parse()
        .map_err(|_| CoreError::validation(spec.name, format!("'{raw}' is out of range")))
}

// ---------------------------------------------------------------------------
// Calendar helpers
// ---------------------------------------------------------------------------

fn bit(mask: u64, value: u32) -> bool {
    value < 64 && mask & (1 << value) != 0
}

fn truncate_to_minute(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date().and_hms_opt(t.hour(), t.minute(), 0)
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
