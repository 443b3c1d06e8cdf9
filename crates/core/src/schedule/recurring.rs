//! Next-occurrence resolution for recurring schedules.
//!
//! Minute and hour rules step in fixed increments from the start timestamp.
//! Daily, weekly and monthly rules work on calendar dates in the schedule's
//! UTC offset: every `interval`-th day/week/month counted from the anchor
//! (the start timestamp's local date), at the configured time of day.
//!
//! Fixed-step rules resolve strictly after the reference. Calendar rules
//! resolve at or after it, so a reference landing exactly on a fire time
//! returns that fire time.

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, NaiveTime};

use super::{from_local, to_local, RecurrenceUnit, RecurringRule};
use crate::types::Timestamp;

/// Calendar rules need at most two candidate periods (the reference period
/// may already be past); one extra covers the anchor period starting before
/// `start`.
const MAX_CANDIDATE_PERIODS: usize = 3;

/// Next occurrence relative to `reference`, or `None` once the rule is
/// exhausted (`max_executions` reached or past `end`).
pub(crate) fn next_occurrence(
    rule: &RecurringRule,
    offset: FixedOffset,
    reference: Timestamp,
    fired_count: u32,
) -> Option<Timestamp> {
    if rule.max_executions.is_some_and(|max| fired_count >= max) {
        return None;
    }

    let interval = i64::from(rule.interval.max(1));
    let next = match rule.unit {
        RecurrenceUnit::Minutes => fixed_step(rule.start, Duration::minutes(interval), reference),
        RecurrenceUnit::Hours => fixed_step(rule.start, Duration::hours(interval), reference),
        RecurrenceUnit::Daily => next_daily(rule, offset, reference, interval),
        RecurrenceUnit::Weekly => next_weekly(rule, offset, reference, interval),
        RecurrenceUnit::Monthly => next_monthly(rule, offset, reference, interval),
    }?;

    match rule.end {
        Some(end) if next > end => None,
        _ => Some(next),
    }
}

/// Smallest `start + k * step` (k >= 0) strictly after `reference`.
fn fixed_step(start: Timestamp, step: Duration, reference: Timestamp) -> Option<Timestamp> {
    if reference < start {
        return Some(start);
    }
    let step_secs = step.num_seconds().max(1);
    let elapsed = (reference - start).num_seconds();
    let k = elapsed / step_secs + 1;
    start.checked_add_signed(Duration::seconds(step_secs.checked_mul(k)?))
}

fn next_daily(
    rule: &RecurringRule,
    offset: FixedOffset,
    reference: Timestamp,
    interval: i64,
) -> Option<Timestamp> {
    let (anchor, time) = anchor_and_time(rule, offset);
    let floor = to_local(reference, offset).date().max(anchor);

    let mut day = floor + Duration::days(periods_until_aligned(anchor, floor, interval));
    for _ in 0..MAX_CANDIDATE_PERIODS {
        if let Some(hit) = accept(day, time, rule, offset, reference) {
            return Some(hit);
        }
        day += Duration::days(interval);
    }
    None
}

fn next_weekly(
    rule: &RecurringRule,
    offset: FixedOffset,
    reference: Timestamp,
    interval: i64,
) -> Option<Timestamp> {
    let mut weekdays: Vec<u8> = rule
        .days_of_week
        .iter()
        .copied()
        .filter(|d| (1..=7).contains(d))
        .collect();
    weekdays.sort_unstable();
    weekdays.dedup();
    if weekdays.is_empty() {
        return None;
    }

    let (anchor, time) = anchor_and_time(rule, offset);
    let anchor_week = week_start(anchor);
    let floor_week = week_start(to_local(reference, offset).date()).max(anchor_week);

    let weeks_behind = weeks_until_aligned(anchor_week, floor_week, interval);
    let mut week = floor_week + Duration::weeks(weeks_behind);
    for _ in 0..MAX_CANDIDATE_PERIODS {
        for &weekday in &weekdays {
            let day = week + Duration::days(i64::from(weekday) - 1);
            if let Some(hit) = accept(day, time, rule, offset, reference) {
                return Some(hit);
            }
        }
        week += Duration::weeks(interval);
    }
    None
}

fn next_monthly(
    rule: &RecurringRule,
    offset: FixedOffset,
    reference: Timestamp,
    interval: i64,
) -> Option<Timestamp> {
    let (anchor, time) = anchor_and_time(rule, offset);
    let day_of_month = rule
        .day_of_month
        .map(u32::from)
        .unwrap_or_else(|| anchor.day())
        .clamp(1, 31);

    let anchor_index = month_index(anchor);
    let floor_index = month_index(to_local(reference, offset).date()).max(anchor_index);
    let behind = (floor_index - anchor_index) % interval;
    let mut index = floor_index + if behind == 0 { 0 } else { interval - behind };

    for _ in 0..MAX_CANDIDATE_PERIODS {
        let year = i32::try_from(index.div_euclid(12)).ok()?;
        let month = u32::try_from(index.rem_euclid(12)).ok()? + 1;
        // Short months clamp to their last day rather than being skipped.
        let day = day_of_month.min(days_in_month(year, month)?);
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        if let Some(hit) = accept(date, time, rule, offset, reference) {
            return Some(hit);
        }
        index += interval;
    }
    None
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Local anchor date and time of day (defaulting to the start's local time).
fn anchor_and_time(rule: &RecurringRule, offset: FixedOffset) -> (NaiveDate, NaiveTime) {
    let start = to_local(rule.start, offset);
    (start.date(), rule.time_of_day.unwrap_or(start.time()))
}

/// A candidate fires if it is at or after `reference` and not before the
/// rule's first occurrence.
fn accept(
    day: NaiveDate,
    time: NaiveTime,
    rule: &RecurringRule,
    offset: FixedOffset,
    reference: Timestamp,
) -> Option<Timestamp> {
    let candidate = from_local(day.and_time(time), offset);
    (candidate >= reference && candidate >= rule.start).then_some(candidate)
}

/// Days to add to `floor` to land on `anchor + k * interval`.
fn periods_until_aligned(anchor: NaiveDate, floor: NaiveDate, interval: i64) -> i64 {
    let behind = (floor - anchor).num_days().rem_euclid(interval);
    if behind == 0 {
        0
    } else {
        interval - behind
    }
}

/// Weeks to add to `floor_week` to land on a qualifying week.
fn weeks_until_aligned(anchor_week: NaiveDate, floor_week: NaiveDate, interval: i64) -> i64 {
    let behind = ((floor_week - anchor_week).num_days() / 7).rem_euclid(interval);
    if behind == 0 {
        0
    } else {
        interval - behind
    }
}

/// Monday of the ISO week containing `date`.
fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn month_index(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from((next - first).num_days()).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
