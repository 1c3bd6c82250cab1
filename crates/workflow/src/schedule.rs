//! 5-field cron schedules: `minute hour day-of-month month day-of-week`.
//!
//! Supports `*`, `*/N` (step), `N` (literal), `N-M` (range), `N-M/S` and
//! comma lists. Day-of-week is 0=Sun through 6=Sat. Evaluated in UTC.

use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};

use crate::WorkflowError;

/// A parsed cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    source: String,
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self, WorkflowError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(
                expr,
                format!(
                    "expected 5 fields (minute hour dom month dow), got {}",
                    fields.len()
                ),
            ));
        }

        let field = |i: usize, min: u32, max: u32| {
            parse_field(fields[i], min, max).map_err(|reason| invalid(expr, reason))
        };

        Ok(Self {
            source: expr.trim().to_string(),
            minutes: field(0, 0, 59)?,
            hours: field(1, 0, 23)?,
            days_of_month: field(2, 1, 31)?,
            months: field(3, 1, 12)?,
            days_of_week: field(4, 0, 6)?,
        })
    }

    /// The expression this schedule was parsed from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the minute containing `at` is a firing minute.
    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        self.minutes.contains(&at.minute())
            && self.hours.contains(&at.hour())
            && self.days_of_month.contains(&at.day())
            && self.months.contains(&at.month())
            && self.days_of_week.contains(&at.weekday().num_days_from_sunday())
    }

    /// The first firing minute strictly after `after`, searching up to a year ahead.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = truncate_to_minute(after)? + Duration::minutes(1);
        let limit = *after + Duration::days(366);
        while candidate <= limit {
            if self.matches(&candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

/// `at` with seconds and sub-seconds dropped.
pub(crate) fn truncate_to_minute(at: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    at.duration_trunc(Duration::minutes(1)).ok()
}

fn invalid(expr: &str, reason: String) -> WorkflowError {
    WorkflowError::InvalidSchedule {
        expr: expr.to_string(),
        reason,
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<Vec<u32>, String> {
    let mut values = Vec::new();

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| format!("invalid step: {step}"))?;
                if step == 0 {
                    return Err("step cannot be zero".into());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let start = parse_number(a, min, max)?;
            let end = parse_number(b, min, max)?;
            if start > end {
                return Err(format!("range {start}-{end} is reversed"));
            }
            (start, end)
        } else {
            let value = parse_number(range, min, max)?;
            // `N/S` steps from N to the field maximum
            if step > 1 { (value, max) } else { (value, value) }
        };

        values.extend((start..=end).step_by(step as usize));
    }

    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn parse_number(s: &str, min: u32, max: u32) -> Result<u32, String> {
    let value: u32 = s.parse().map_err(|_| format!("invalid number: {s}"))?;
    if value < min || value > max {
        return Err(format!("{value} out of range {min}-{max}"));
    }
    Ok(value)
}
