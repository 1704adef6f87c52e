//! String extension functions.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::date::{parse_date_text, start_of_day};
use super::{arg_str, number, ok, ExtResult, ExtValue};

type StringFn = fn(&str, &[Value]) -> ExtResult;

pub(super) const FUNCTIONS: &[(&str, StringFn)] = &[
    ("trim", trim),
    ("toTitleCase", to_title_case),
    ("toSnakeCase", to_snake_case),
    ("toCamelCase", to_camel_case),
    ("isEmail", is_email),
    ("isUrl", is_url),
    ("isNumeric", is_numeric),
    ("toNumber", to_number),
    ("toDate", to_date),
    ("toDateTime", to_date_time),
    ("removeTags", remove_tags),
    ("isEmpty", is_empty),
    ("isNotEmpty", is_not_empty),
];

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(https?|ftp)://[^\s/$.?#][^\s]*$").unwrap());

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

fn trim(s: &str, _args: &[Value]) -> ExtResult {
    ok(s.trim())
}

fn to_title_case(s: &str, _args: &[Value]) -> ExtResult {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for ch in s.chars() {
        if ch.is_whitespace() {
            at_word_start = true;
            out.push(ch);
        } else if at_word_start {
            out.extend(ch.to_uppercase());
            at_word_start = false;
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    ok(out)
}

/// Split into lowercase words at separators and lower-to-upper case changes.
fn words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in s.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_numeric();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn to_snake_case(s: &str, _args: &[Value]) -> ExtResult {
    ok(words(s).join("_"))
}

fn to_camel_case(s: &str, _args: &[Value]) -> ExtResult {
    let mut out = String::with_capacity(s.len());
    for (i, word) in words(s).iter().enumerate() {
        if i == 0 {
            out.push_str(word);
            continue;
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    ok(out)
}

fn is_email(s: &str, _args: &[Value]) -> ExtResult {
    ok(EMAIL_RE.is_match(s))
}

fn is_url(s: &str, _args: &[Value]) -> ExtResult {
    ok(URL_RE.is_match(s))
}

fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn is_numeric(s: &str, _args: &[Value]) -> ExtResult {
    ok(parse_number(s).is_some())
}

fn to_number(s: &str, _args: &[Value]) -> ExtResult {
    match parse_number(s) {
        Some(n) => ok(number(n)),
        None => Err(format!("cannot convert \"{s}\" to a number")),
    }
}

fn to_date(s: &str, _args: &[Value]) -> ExtResult {
    let dt = parse_date_text(s).ok_or_else(|| format!("cannot parse \"{s}\" as a date"))?;
    Ok(ExtValue::Date(start_of_day(dt)))
}

fn to_date_time(s: &str, args: &[Value]) -> ExtResult {
    if let Some(format) = arg_str(args, 0)? {
        let naive = chrono::NaiveDateTime::parse_from_str(s, format)
            .map_err(|e| format!("cannot parse \"{s}\" with format \"{format}\": {e}"))?;
        return Ok(ExtValue::Date(naive.and_utc()));
    }
    parse_date_text(s)
        .map(ExtValue::Date)
        .ok_or_else(|| format!("cannot parse \"{s}\" as a date"))
}

fn remove_tags(s: &str, _args: &[Value]) -> ExtResult {
    ok(TAG_RE.replace_all(s, "").into_owned())
}

fn is_empty(s: &str, _args: &[Value]) -> ExtResult {
    ok(s.is_empty())
}

fn is_not_empty(s: &str, _args: &[Value]) -> ExtResult {
    ok(!s.is_empty())
}
