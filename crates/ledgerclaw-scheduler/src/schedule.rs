//! Schedule expression parsing.
//!
//! Accepted forms:
//! - 5-field cron `MIN HOUR DOM MON DOW` (a `0` seconds field is prepended)
//! - 6/7-field cron with leading seconds (and optional trailing year)
//! - descriptors: `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`, `@midnight`, `@hourly`
//! - fixed intervals: `@every 90s`, `@every 1h30m`, `every 5 minutes`
//!
//! Numeric day-of-week values follow the usual cron convention (0 or 7 = Sunday)
//! and are rewritten to names before handing the expression to the `cron` crate.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ledgerclaw_core::{LedgerClawError, Result};

/// A parsed schedule.
#[derive(Debug, Clone)]
pub enum ScheduleSpec {
    Cron(Box<::cron::Schedule>),
    Every(Duration),
}

impl ScheduleSpec {
    /// First firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleSpec::Cron(schedule) => schedule.after(&after).next(),
            ScheduleSpec::Every(every) => {
                chrono::Duration::from_std(*every).ok().map(|d| after + d)
            }
        }
    }

    /// The next `count` firings after `after`.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut out = Vec::with_capacity(count);
        let mut cursor = after;
        while out.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    out.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        out
    }
}

/// Parse any accepted schedule form.
pub fn parse_schedule(expression: &str) -> Result<ScheduleSpec> {
    let input = expression.trim();
    if input.is_empty() {
        return Err(LedgerClawError::invalid_schedule(expression, "empty schedule"));
    }

    if let Some(rest) = input.strip_prefix("@every") {
        let every = parse_interval(rest.trim())
            .ok_or_else(|| LedgerClawError::invalid_schedule(expression, "invalid @every duration"))?;
        return Ok(ScheduleSpec::Every(every));
    }

    let lower = input.to_lowercase();
    if let Some(rest) = lower.strip_prefix("every ") {
        let every = parse_phrase_interval(rest.trim())
            .ok_or_else(|| LedgerClawError::invalid_schedule(expression, "invalid interval phrase"))?;
        return Ok(ScheduleSpec::Every(every));
    }

    let normalized = normalize_cron_expression(input)
        .map_err(|reason| LedgerClawError::invalid_schedule(expression, reason))?;
    let schedule = ::cron::Schedule::from_str(&normalized)
        .map_err(|e| LedgerClawError::invalid_schedule(expression, e.to_string()))?;
    Ok(ScheduleSpec::Cron(Box::new(schedule)))
}

/// Next run for a cron-style expression, `None` if it does not parse.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match parse_schedule(expression) {
        Ok(spec) => spec.next_after(after),
        Err(e) => {
            tracing::warn!("Invalid cron expression: {e}");
            None
        }
    }
}

/// Convert descriptors and 5-field expressions to the seconds-first form.
fn normalize_cron_expression(expr: &str) -> std::result::Result<String, String> {
    let descriptor = match expr.to_lowercase().as_str() {
        "@yearly" | "@annually" => Some("0 0 0 1 1 *"),
        "@monthly" => Some("0 0 0 1 * *"),
        "@weekly" => Some("0 0 0 * * Sun"),
        "@daily" | "@midnight" => Some("0 0 0 * * *"),
        "@hourly" => Some("0 0 * * * *"),
        _ => None,
    };
    if let Some(d) = descriptor {
        return Ok(d.to_string());
    }
    if expr.starts_with('@') {
        return Err(format!("unknown descriptor '{expr}'"));
    }

    let mut fields: Vec<String> = expr.split_whitespace().map(str::to_string).collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 | 7 => {}
        n => return Err(format!("expected 5, 6 or 7 fields, got {n}")),
    }
    fields[5] = normalize_day_of_week(&fields[5])?;
    Ok(fields.join(" "))
}

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

fn day_name(token: &str) -> std::result::Result<String, String> {
    match token.parse::<usize>() {
        Ok(n) if n <= 7 => Ok(DAY_NAMES[n % 7].to_string()),
        Ok(n) => Err(format!("day of week {n} out of range")),
        Err(_) => Ok(token.to_string()),
    }
}

/// Rewrite numeric day-of-week tokens (0-7, Sunday = 0 or 7) to names.
fn normalize_day_of_week(field: &str) -> std::result::Result<String, String> {
    if field == "*" || field == "?" || field.starts_with("*/") {
        return Ok(field.to_string());
    }
    let mut parts = Vec::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => (r, Some(s)),
            None => (part, None),
        };
        let rewritten = match range.split_once('-') {
            Some((start, "7")) => {
                // Sunday as 7 closes the week: "5-7" is Fri-Sat plus Sun
                let start = day_name(start)?;
                match start.as_str() {
                    "Sun" => "Sun-Sat".to_string(),
                    "Sat" => {
                        parts.push("Sun".to_string());
                        "Sat".to_string()
                    }
                    _ => {
                        parts.push("Sun".to_string());
                        format!("{start}-Sat")
                    }
                }
            }
            Some((start, end)) => format!("{}-{}", day_name(start)?, day_name(end)?),
            None => day_name(range)?,
        };
        match step {
            Some(s) => parts.push(format!("{rewritten}/{s}")),
            None => parts.push(rewritten),
        }
    }
    Ok(parts.join(","))
}

/// `90s`, `5m`, `1h30m`.
fn parse_interval(input: &str) -> Option<Duration> {
    if input.is_empty() {
        return None;
    }
    let mut total = 0u64;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits.parse().ok()?;
        digits.clear();
        total += match c {
            's' => n,
            'm' => n * 60,
            'h' => n * 3600,
            'd' => n * 86_400,
            _ => return None,
        };
    }
    if !digits.is_empty() || total == 0 {
        return None;
    }
    Some(Duration::from_secs(total))
}

/// `5 minutes`, `30 seconds`, `2 hours`, `minute`.
fn parse_phrase_interval(input: &str) -> Option<Duration> {
    let mut words = input.split_whitespace();
    let first = words.next()?;
    let (n, unit) = match first.parse::<u64>() {
        Ok(n) => (n, words.next()?),
        Err(_) => (1, first),
    };
    if words.next().is_some() || n == 0 {
        return None;
    }
    let secs = match unit.trim_end_matches('s') {
        "second" | "sec" => n,
        "minute" | "min" => n * 60,
        "hour" | "hr" => n * 3600,
        "day" => n * 86_400,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn test_every_hour() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 30, 0).unwrap();
        let next = next_run_from_cron("0 * * * *", after).unwrap();
        assert_eq!(next.hour(), 11);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_specific_time() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 7, 0, 0).unwrap();
        let next = next_run_from_cron("0 8 * * *", after).unwrap();
        assert_eq!(next.hour(), 8);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_every_15_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 0).unwrap();
        let next = next_run_from_cron("*/15 * * * *", after).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn test_seconds_field() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        let spec = parse_schedule("* * * * * *").unwrap();
        let next = spec.upcoming(after, 3);
        assert_eq!(next.len(), 3);
        assert_eq!(next[0].second(), 1);
        assert_eq!(next[2].second(), 3);
    }

    #[test]
    fn test_numeric_weekdays_use_cron_convention() {
        // 2026-02-22 is a Sunday
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();
        let next = next_run_from_cron("0 9 * * 1-5", after).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);

        let sunday = next_run_from_cron("0 9 * * 0", after).unwrap();
        assert_eq!(sunday.weekday(), Weekday::Sun);
        assert_eq!(sunday.day(), 1);

        let weekend = next_run_from_cron("0 9 * * 6-7", after).unwrap();
        assert_eq!(weekend.weekday(), Weekday::Sat);
    }

    #[test]
    fn test_descriptors() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 30, 0).unwrap();
        let hourly = next_run_from_cron("@hourly", after).unwrap();
        assert_eq!((hourly.hour(), hourly.minute()), (11, 0));
        let daily = next_run_from_cron("@daily", after).unwrap();
        assert_eq!((daily.day(), daily.hour()), (23, 0));
        let weekly = next_run_from_cron("@weekly", after).unwrap();
        assert_eq!(weekly.weekday(), Weekday::Sun);
        assert!(parse_schedule("@fortnightly").is_err());
    }

    #[test]
    fn test_intervals() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        let spec = parse_schedule("@every 1h30m").unwrap();
        assert_eq!(spec.next_after(after).unwrap().hour(), 11);
        assert_eq!(spec.next_after(after).unwrap().minute(), 30);

        assert!(matches!(
            parse_schedule("every 5 minutes").unwrap(),
            ScheduleSpec::Every(d) if d == Duration::from_secs(300)
        ));
        assert!(matches!(
            parse_schedule("Every second").unwrap(),
            ScheduleSpec::Every(d) if d == Duration::from_secs(1)
        ));
        assert!(parse_schedule("@every 0s").is_err());
        assert!(parse_schedule("@every 5x").is_err());
        assert!(parse_schedule("every 0 minutes").is_err());
    }

    #[test]
    fn test_invalid_expression() {
        for bad in ["", "bad", "* * *", "61 * * * *", "0 9 * * 8"] {
            let err = parse_schedule(bad).unwrap_err();
            assert!(
                matches!(err, LedgerClawError::InvalidSchedule { .. }),
                "{bad}: {err}"
            );
        }
        assert!(next_run_from_cron("bad", Utc::now()).is_none());
    }
}
