//! Natural-language timeframes such as "last 30 days" or "this month".

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use regex::Regex;

static LAST_N_UNITS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"last\s+(\d+)\s*(day|days|hour|hours|hrs|h|d)\b").ok());

const DEFAULT_DAYS: i64 = 7;

/// Resolve a timeframe phrase into an inclusive `[start, end]` window ending at `now`.
///
/// Absent or blank input means no date filter. Phrases that are not
/// recognized fall back to the last seven days.
#[must_use]
pub fn parse_timeframe(
    timeframe: Option<&str>,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let text = timeframe.map(str::trim).filter(|t| !t.is_empty())?;
    let text = text.to_lowercase();

    if let Some(window) = last_n_units(&text, now) {
        return Some(window);
    }

    let window = match text.as_str() {
        "today" | "last day" | "past day" | "last 24 hours" | "yesterday" => {
            (now - Duration::days(1), now)
        }
        "last week" | "past week" => (now - Duration::days(7), now),
        "this week" => (start_of_week(now), now),
        "this month" => (start_of_month(now), now),
        "last month" | "previous month" => {
            let this_month = start_of_month(now);
            let previous = start_of_month(this_month - Duration::days(1));
            (previous, this_month - Duration::milliseconds(1))
        }
        _ => (now - Duration::days(DEFAULT_DAYS), now),
    };
    Some(window)
}

fn last_n_units(text: &str, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let captures = LAST_N_UNITS.as_ref()?.captures(text)?;
    let amount: i64 = captures.get(1)?.as_str().parse().ok()?;
    let span = if captures.get(2)?.as_str().starts_with('h') {
        Duration::try_hours(amount)?
    } else {
        Duration::try_days(amount)?
    };
    Some((now.checked_sub_signed(span)?, now))
}

fn start_of_week(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_since_monday = i64::from(now.weekday().num_days_from_monday());
    midnight(now - Duration::days(days_since_monday))
}

fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    midnight(now - Duration::days(i64::from(now.day0())))
}

fn midnight(instant: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&instant.date_naive().and_time(NaiveTime::MIN))
}
