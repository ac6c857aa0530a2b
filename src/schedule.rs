//! Cron trigger support: a 5-field expression parser and the tokio loop that
//! fires registered jobs.
//!
//! Supported: `MIN HOUR DOM MON DOW` with `*`, `*/N`, single values and
//! comma lists on minute/hour/weekday. Day-of-month and month are accepted
//! as `*` only; the courier's schedules are daily or weekly.

use chrono::{DateTime, Datelike, Duration, Local, Timelike};

use crate::error::ScheduleError;
use crate::ports::{JobFuture, Scheduler};

/// A validated cron expression.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    /// Days of week, 0 = Sunday.
    weekdays: Vec<u32>,
    text: String,
}

fn bad(expr: &str, detail: &str) -> ScheduleError {
    ScheduleError::BadExpression {
        expr: expr.to_string(),
        detail: detail.to_string(),
    }
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(bad(expr, "need 5 fields: MIN HOUR DOM MON DOW"));
        }

        let minutes =
            parse_field(parts[0], 0, 59).ok_or_else(|| bad(expr, "unparseable minute field"))?;
        let hours =
            parse_field(parts[1], 0, 23).ok_or_else(|| bad(expr, "unparseable hour field"))?;
        if parts[2] != "*" {
            return Err(bad(expr, "day-of-month must be '*'"));
        }
        if parts[3] != "*" {
            return Err(bad(expr, "month must be '*'"));
        }
        // 7 is accepted as an alias for Sunday.
        let weekdays = parse_field(parts[4], 0, 7)
            .map(|days| {
                let mut days: Vec<u32> =
                    days.into_iter().map(|d| if d == 7 { 0 } else { d }).collect();
                days.sort_unstable();
                days.dedup();
                days
            })
            .ok_or_else(|| bad(expr, "unparseable day-of-week field"))?;

        Ok(Self {
            minutes,
            hours,
            weekdays,
            text: expr.to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Next local instant strictly after `after` that matches.
    ///
    /// Scans minute by minute up to eight days out, enough to satisfy any
    /// weekday constraint.
    pub fn next_after(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        let mut candidate = (after + Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;
        for _ in 0..(8 * 24 * 60) {
            let dow = candidate.weekday().num_days_from_sunday();
            if self.minutes.contains(&candidate.minute())
                && self.hours.contains(&candidate.hour())
                && self.weekdays.contains(&dow)
            {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    if field.contains(',') {
        let vals: Result<Vec<u32>, _> = field.split(',').map(|s| s.trim().parse()).collect();
        let vals = vals.ok()?;
        if vals.iter().any(|v| *v < min || *v > max) {
            return None;
        }
        return Some(vals);
    }

    let n: u32 = field.parse().ok()?;
    (n >= min && n <= max).then(|| vec![n])
}

/// Spawns one tokio task per registration. Each loop sleeps until the next
/// match, then awaits the job to completion, so runs of the same
/// registration never overlap.
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn register(
        &self,
        expr: &str,
        job: Box<dyn Fn() -> JobFuture + Send + Sync>,
    ) -> Result<(), ScheduleError> {
        let cron = CronExpr::parse(expr)?;
        tokio::spawn(async move {
            loop {
                let now = Local::now();
                let Some(next) = cron.next_after(now) else {
                    tracing::warn!(expr = %cron.text(), "no upcoming match, trigger loop stopping");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                tracing::info!(
                    expr = %cron.text(),
                    next = %next.format("%Y-%m-%d %H:%M:%S"),
                    "trigger sleeping"
                );
                tokio::time::sleep(wait).await;
                job().await;
            }
        });
        Ok(())
    }
}
