//! Date/time extension functions.
//!
//! All dates are UTC. Durations are given either as an object
//! (`{days: 1, hours: 2}`) or as an amount and a unit (`5, "minutes"`).

use std::sync::LazyLock;

use chrono::{
    DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike,
    Utc, Weekday,
};
use regex::Regex;
use serde_json::Value;

use super::{arg, arg_str, number, ok, ExtResult, ExtValue};

type DateFn = fn(DateTime<Utc>, &[Value]) -> ExtResult;

pub(super) const FUNCTIONS: &[(&str, DateFn)] = &[
    ("plus", plus),
    ("minus", minus),
    ("format", format),
    ("toDateTime", to_date_time),
    ("beginningOf", beginning_of),
    ("endOfMonth", end_of_month),
    ("isWeekend", is_weekend),
    ("isBetween", is_between),
    ("extract", extract),
    ("diffTo", diff_to),
];

static ISO_MILLIS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z$").unwrap());

const ISO_MILLIS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Parse `s` if it is an exact ISO-8601 UTC timestamp with milliseconds that
/// re-serialises to the same text.
pub fn iso_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if !ISO_MILLIS_RE.is_match(s) {
        return None;
    }
    let dt = DateTime::parse_from_rfc3339(s).ok()?.with_timezone(&Utc);
    (dt.format(ISO_MILLIS_FORMAT).to_string() == s).then_some(dt)
}

/// Parse a date from RFC 3339 or one of the common fallback layouts.
pub fn parse_date_text(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    const DATE_TIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%d.%m.%Y %H:%M:%S",
    ];
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"];
    for format in DATE_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
        .map(|date| date.and_time(NaiveTime::default()).and_utc())
}

pub(super) fn start_of_day(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive().and_time(NaiveTime::default()).and_utc()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl Unit {
    fn parse(s: &str) -> Result<Self, String> {
        Ok(match s {
            "year" | "years" | "y" => Self::Year,
            "month" | "months" | "M" => Self::Month,
            "week" | "weeks" | "w" => Self::Week,
            "day" | "days" | "d" => Self::Day,
            "hour" | "hours" | "h" => Self::Hour,
            "minute" | "minutes" | "m" => Self::Minute,
            "second" | "seconds" | "s" => Self::Second,
            "millisecond" | "milliseconds" | "ms" => Self::Millisecond,
            other => return Err(format!("unknown time unit \"{other}\"")),
        })
    }

    /// Fixed length in milliseconds, for units that have one.
    fn millis(self) -> Option<f64> {
        match self {
            Self::Year | Self::Month => None,
            Self::Week => Some(604_800_000.0),
            Self::Day => Some(86_400_000.0),
            Self::Hour => Some(3_600_000.0),
            Self::Minute => Some(60_000.0),
            Self::Second => Some(1_000.0),
            Self::Millisecond => Some(1.0),
        }
    }
}

fn required_unit(args: &[Value], index: usize) -> Result<Unit, String> {
    let unit = arg_str(args, index)?.ok_or_else(|| format!("argument {} must be a time unit", index + 1))?;
    Unit::parse(unit)
}

/// Read a date argument: a date string or epoch milliseconds.
fn date_arg(args: &[Value], index: usize) -> Result<DateTime<Utc>, String> {
    match arg(args, index) {
        Some(Value::String(s)) => parse_date_text(s).ok_or_else(|| format!("cannot parse \"{s}\" as a date")),
        Some(Value::Number(n)) => n
            .as_f64()
            .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
            .ok_or_else(|| format!("{n} is not a valid timestamp")),
        Some(other) => Err(format!("argument {} must be a date, got {other}", index + 1)),
        None => Err(format!("argument {} must be a date", index + 1)),
    }
}

fn durations(args: &[Value]) -> Result<Vec<(Unit, f64)>, String> {
    match arg(args, 0) {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(unit, amount)| {
                let amount = amount
                    .as_f64()
                    .ok_or_else(|| format!("duration \"{unit}\" must be a number"))?;
                Ok((Unit::parse(unit)?, amount))
            })
            .collect(),
        Some(Value::Number(n)) => {
            let amount = n.as_f64().unwrap_or_default();
            let unit = arg_str(args, 1)?.unwrap_or("milliseconds");
            Ok(vec![(Unit::parse(unit)?, amount)])
        }
        _ => Err("expected a duration object or an amount and a unit".into()),
    }
}

fn shift(dt: DateTime<Utc>, unit: Unit, amount: f64) -> Result<DateTime<Utc>, String> {
    let overflow = || "date out of range".to_string();
    match unit.millis() {
        Some(ms) => {
            let delta = TimeDelta::try_milliseconds((amount * ms).round() as i64).ok_or_else(overflow)?;
            dt.checked_add_signed(delta).ok_or_else(overflow)
        }
        None => {
            let factor = if unit == Unit::Year { 12 } else { 1 };
            let months = (amount.trunc() as i64).checked_mul(factor).ok_or_else(overflow)?;
            let magnitude = Months::new(u32::try_from(months.unsigned_abs()).map_err(|_| overflow())?);
            if months >= 0 {
                dt.checked_add_months(magnitude).ok_or_else(overflow)
            } else {
                dt.checked_sub_months(magnitude).ok_or_else(overflow)
            }
        }
    }
}

fn apply(dt: DateTime<Utc>, args: &[Value], sign: f64) -> ExtResult {
    let mut out = dt;
    for (unit, amount) in durations(args)? {
        out = shift(out, unit, amount * sign)?;
    }
    Ok(ExtValue::Date(out))
}

fn plus(dt: DateTime<Utc>, args: &[Value]) -> ExtResult {
    apply(dt, args, 1.0)
}

fn minus(dt: DateTime<Utc>, args: &[Value]) -> ExtResult {
    apply(dt, args, -1.0)
}

/// Render `dt` with the tokens `yyyy yy MM dd HH mm ss SSS`; other text is
/// copied through.
fn render(dt: &DateTime<Utc>, pattern: &str) -> String {
    const TOKENS: &[&str] = &["yyyy", "SSS", "yy", "MM", "dd", "HH", "mm", "ss"];
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut rest = pattern;
    'scan: while !rest.is_empty() {
        for token in TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                match *token {
                    "yyyy" => out.push_str(&format!("{:04}", dt.year())),
                    "yy" => out.push_str(&format!("{:02}", dt.year().rem_euclid(100))),
                    "MM" => out.push_str(&format!("{:02}", dt.month())),
                    "dd" => out.push_str(&format!("{:02}", dt.day())),
                    "HH" => out.push_str(&format!("{:02}", dt.hour())),
                    "mm" => out.push_str(&format!("{:02}", dt.minute())),
                    "ss" => out.push_str(&format!("{:02}", dt.second())),
                    _ => out.push_str(&format!("{:03}", dt.timestamp_subsec_millis())),
                }
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(ch) = chars.next() {
            out.push(ch);
        }
        rest = chars.as_str();
    }
    out
}

fn format(dt: DateTime<Utc>, args: &[Value]) -> ExtResult {
    match arg_str(args, 0)? {
        Some(pattern) => ok(render(&dt, pattern)),
        None => ok(dt.format(ISO_MILLIS_FORMAT).to_string()),
    }
}

fn to_date_time(dt: DateTime<Utc>, _args: &[Value]) -> ExtResult {
    Ok(ExtValue::Date(dt))
}

fn beginning_of(dt: DateTime<Utc>, args: &[Value]) -> ExtResult {
    let unit = required_unit(args, 0)?;
    let date = dt.date_naive();
    let time = dt.time();
    let out_of_range = || "date out of range".to_string();
    let (day, clock) = match unit {
        Unit::Year => (
            NaiveDate::from_ymd_opt(date.year(), 1, 1).ok_or_else(out_of_range)?,
            NaiveTime::default(),
        ),
        Unit::Month => (date.with_day(1).ok_or_else(out_of_range)?, NaiveTime::default()),
        Unit::Week => (
            date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
                .ok_or_else(out_of_range)?,
            NaiveTime::default(),
        ),
        Unit::Day => (date, NaiveTime::default()),
        Unit::Hour => (
            date,
            NaiveTime::from_hms_opt(time.hour(), 0, 0).ok_or_else(out_of_range)?,
        ),
        Unit::Minute => (
            date,
            NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).ok_or_else(out_of_range)?,
        ),
        Unit::Second => (
            date,
            NaiveTime::from_hms_opt(time.hour(), time.minute(), time.second())
                .ok_or_else(out_of_range)?,
        ),
        Unit::Millisecond => return Ok(ExtValue::Date(dt)),
    };
    Ok(ExtValue::Date(day.and_time(clock).and_utc()))
}

fn end_of_month(dt: DateTime<Utc>, _args: &[Value]) -> ExtResult {
    let out_of_range = || "date out of range".to_string();
    let first = dt.date_naive().with_day(1).ok_or_else(out_of_range)?;
    let next = first
        .checked_add_months(Months::new(1))
        .ok_or_else(out_of_range)?
        .and_time(NaiveTime::default())
        .and_utc();
    Ok(ExtValue::Date(next - TimeDelta::milliseconds(1)))
}

fn is_weekend(dt: DateTime<Utc>, _args: &[Value]) -> ExtResult {
    ok(matches!(dt.weekday(), Weekday::Sat | Weekday::Sun))
}

fn is_between(dt: DateTime<Utc>, args: &[Value]) -> ExtResult {
    let a = date_arg(args, 0)?;
    let b = date_arg(args, 1)?;
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    ok(low < dt && dt < high)
}

fn extract(dt: DateTime<Utc>, args: &[Value]) -> ExtResult {
    let part = arg_str(args, 0)?.unwrap_or("day");
    let value = match part {
        "year" | "years" | "y" => i64::from(dt.year()),
        "month" | "months" | "M" => i64::from(dt.month()),
        "week" | "weeks" | "w" => i64::from(dt.iso_week().week()),
        "day" | "days" | "d" => i64::from(dt.day()),
        "weekday" => i64::from(dt.weekday().number_from_monday()),
        "dayOfYear" => i64::from(dt.ordinal()),
        "hour" | "hours" | "h" => i64::from(dt.hour()),
        "minute" | "minutes" | "m" => i64::from(dt.minute()),
        "second" | "seconds" | "s" => i64::from(dt.second()),
        "millisecond" | "milliseconds" | "ms" => i64::from(dt.timestamp_subsec_millis()),
        other => return Err(format!("cannot extract \"{other}\" from a date")),
    };
    ok(value)
}

/// Whole calendar months from `from` to `to`.
fn months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let mut months = (i64::from(to.year()) - i64::from(from.year())) * 12
        + (i64::from(to.month()) - i64::from(from.month()));
    let to_rest = (to.day(), to.time());
    let from_rest = (from.day(), from.time());
    if months > 0 && to_rest < from_rest {
        months -= 1;
    } else if months < 0 && to_rest > from_rest {
        months += 1;
    }
    months
}

/// `dt - other`, in `unit` (default days).
fn diff_to(dt: DateTime<Utc>, args: &[Value]) -> ExtResult {
    let other = date_arg(args, 0)?;
    let unit = match arg_str(args, 1)? {
        Some(unit) => Unit::parse(unit)?,
        None => Unit::Day,
    };
    match unit.millis() {
        Some(ms) => {
            let elapsed = (dt - other).num_milliseconds() as f64;
            ok(number(elapsed / ms))
        }
        None => {
            let months = months_between(other, dt);
            let value = if unit == Unit::Year { months / 12 } else { months };
            ok(value)
        }
    }
}
