//! Number extension functions.

use chrono::DateTime;
use serde_json::Value;

use super::{arg_f64, arg_str, number, ok, ExtResult, ExtValue};

type NumberFn = fn(f64, &[Value]) -> ExtResult;

pub(super) const FUNCTIONS: &[(&str, NumberFn)] = &[
    ("round", round),
    ("floor", floor),
    ("ceil", ceil),
    ("abs", abs),
    ("isEven", is_even),
    ("isOdd", is_odd),
    ("toBoolean", to_boolean),
    ("toDateTime", to_date_time),
    ("format", format),
];

fn decimals(args: &[Value]) -> Result<i32, String> {
    match arg_f64(args, 0)? {
        None => Ok(0),
        Some(d) if (0.0..=15.0).contains(&d) => Ok(d as i32),
        Some(d) => Err(format!("decimal places must be between 0 and 15, got {d}")),
    }
}

fn round(n: f64, args: &[Value]) -> ExtResult {
    let factor = 10f64.powi(decimals(args)?);
    ok(number((n * factor).round() / factor))
}

fn floor(n: f64, _args: &[Value]) -> ExtResult {
    ok(number(n.floor()))
}

fn ceil(n: f64, _args: &[Value]) -> ExtResult {
    ok(number(n.ceil()))
}

fn abs(n: f64, _args: &[Value]) -> ExtResult {
    ok(number(n.abs()))
}

fn is_even(n: f64, _args: &[Value]) -> ExtResult {
    ok(n.fract() == 0.0 && n.rem_euclid(2.0) == 0.0)
}

fn is_odd(n: f64, _args: &[Value]) -> ExtResult {
    ok(n.fract() == 0.0 && n.rem_euclid(2.0) == 1.0)
}

fn to_boolean(n: f64, _args: &[Value]) -> ExtResult {
    ok(n != 0.0 && !n.is_nan())
}

/// Epoch time to a date. The unit is `"ms"` (default) or `"s"`.
fn to_date_time(n: f64, args: &[Value]) -> ExtResult {
    let millis = match arg_str(args, 0)?.unwrap_or("ms") {
        "ms" => n,
        "s" => n * 1000.0,
        other => return Err(format!("unknown epoch unit \"{other}\", expected \"ms\" or \"s\"")),
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
        .map(ExtValue::Date)
        .ok_or_else(|| format!("{n} is not a valid timestamp"))
}

/// Fixed decimals with `,` thousands separators.
fn format(n: f64, args: &[Value]) -> ExtResult {
    if !n.is_finite() {
        return ok(n.to_string());
    }
    let fixed = format!("{:.*}", decimals(args)? as usize, n.abs());
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (fixed.as_str(), None),
    };
    let mut grouped = String::with_capacity(fixed.len() + fixed.len() / 3 + 1);
    if n < 0.0 && fixed.bytes().any(|b| b != b'0' && b != b'.') {
        grouped.push('-');
    }
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if let Some(frac) = frac_part {
        grouped.push('.');
        grouped.push_str(frac);
    }
    ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn json(result: ExtResult) -> Value {
        match result.unwrap() {
            ExtValue::Json(v) => v,
            other => panic!("expected JSON, got {other:?}"),
        }
    }

    #[test]
    fn rounding() {
        assert_eq!(json(round(2.567, &[json!(2)])), json!(2.57));
        assert_eq!(json(round(2.5, &[])), json!(3));
        assert_eq!(json(floor(-1.5, &[])), json!(-2));
        assert_eq!(json(ceil(1.1, &[])), json!(2));
        assert_eq!(json(abs(-4.0, &[])), json!(4));
        assert!(round(1.0, &[json!(99)]).is_err());
    }

    #[test]
    fn parity() {
        assert_eq!(json(is_even(4.0, &[])), json!(true));
        assert_eq!(json(is_even(-3.0, &[])), json!(false));
        assert_eq!(json(is_odd(-3.0, &[])), json!(true));
        assert_eq!(json(is_odd(2.5, &[])), json!(false));
    }

    #[test]
    fn conversions() {
        assert_eq!(json(to_boolean(0.0, &[])), json!(false));
        assert_eq!(json(to_boolean(-2.0, &[])), json!(true));
        let ExtValue::Date(dt) = to_date_time(1_700_000_000.0, &[json!("s")]).unwrap() else {
            panic!("expected a date");
        };
        assert_eq!(dt.to_rfc3339(), "2023-11-14T22:13:20+00:00");
    }

    #[test]
    fn grouped_format() {
        assert_eq!(json(format(1234567.891, &[json!(2)])), json!("1,234,567.89"));
        assert_eq!(json(format(-1234.0, &[])), json!("-1,234"));
        assert_eq!(json(format(999.0, &[])), json!("999"));
        assert_eq!(json(format(-0.001, &[json!(1)])), json!("0.0"));
    }
}
