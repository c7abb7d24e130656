//! Schedule Calculator
//!
//! Computes the next eligible execution instant for schedule-based
//! rules. All arithmetic is UTC. Missing or malformed fields yield
//! `None`; callers treat "no result" as "don't schedule", never as an
//! error.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use lnkflow_common::types::{ScheduleType, TriggerCondition, TriggerType};

/// Next run strictly after `now`, or `None` if the condition yields no
/// future occurrence.
pub fn next_run(
    trigger_type: TriggerType,
    condition: &TriggerCondition,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !trigger_type.is_schedule_based() {
        return None;
    }

    let schedule_type = condition.schedule_type?;
    let time = parse_time(condition.schedule_time.as_deref()?)?;

    match schedule_type {
        ScheduleType::Once => {
            let at = condition.schedule_date?.and_time(time).and_utc();
            // One-shot rules that have passed their date never fire
            // again without being edited
            (at > now).then_some(at)
        }
        ScheduleType::Daily => {
            let today = now.date_naive().and_time(time).and_utc();
            if today > now {
                Some(today)
            } else {
                Some(today + Duration::days(1))
            }
        }
        ScheduleType::Weekly => {
            let days = condition.schedule_days.as_ref()?;
            // Scan the next 7 days including today for the first
            // matching day-of-week (0 = Sunday .. 6 = Saturday)
            (0..7)
                .map(|offset| now.date_naive() + Duration::days(offset))
                .filter(|date| days.contains(&date.weekday().num_days_from_sunday()))
                .map(|date| date.and_time(time).and_utc())
                .find(|at| *at > now)
        }
        ScheduleType::Monthly => {
            let mut days: Vec<u32> = condition.schedule_days.as_ref()?.clone();
            days.sort_unstable();

            // First remaining day-of-month this month. Days that don't
            // exist in the month (with_day → None) are skipped, not
            // normalized.
            for &day in &days {
                if let Some(date) = now.date_naive().with_day(day) {
                    let at = date.and_time(time).and_utc();
                    if at > now {
                        return Some(at);
                    }
                }
            }

            // Otherwise the first entry in the following month
            let first = *days.first()?;
            let (year, month) = if now.month() == 12 {
                (now.year() + 1, 1)
            } else {
                (now.year(), now.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, first).map(|date| date.and_time(time).and_utc())
        }
    }
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}
