//! Array extension functions.

use serde_json::{Map, Value};

use super::{arg_f64, is_blank, number, ok, ExtResult, ExtValue};

type ArrayFn = fn(&[Value], &[Value]) -> ExtResult;

pub(super) const FUNCTIONS: &[(&str, ArrayFn)] = &[
    ("first", first),
    ("last", last),
    ("sum", sum),
    ("average", average),
    ("min", min),
    ("max", max),
    ("unique", unique),
    ("compact", compact),
    ("chunk", chunk),
    ("pluck", pluck),
    ("isEmpty", is_empty),
    ("isNotEmpty", is_not_empty),
];

fn element(value: Option<&Value>) -> ExtResult {
    Ok(value.cloned().map_or(ExtValue::Undefined, ExtValue::Json))
}

fn first(items: &[Value], _args: &[Value]) -> ExtResult {
    element(items.first())
}

fn last(items: &[Value], _args: &[Value]) -> ExtResult {
    element(items.last())
}

fn numbers(items: &[Value]) -> Result<Vec<f64>, String> {
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| format!("expected an array of numbers, found {v}"))
        })
        .collect()
}

fn sum(items: &[Value], _args: &[Value]) -> ExtResult {
    ok(number(numbers(items)?.iter().sum()))
}

fn average(items: &[Value], _args: &[Value]) -> ExtResult {
    let values = numbers(items)?;
    if values.is_empty() {
        return ok(0);
    }
    ok(number(values.iter().sum::<f64>() / values.len() as f64))
}

fn min(items: &[Value], _args: &[Value]) -> ExtResult {
    let values = numbers(items)?;
    Ok(values
        .into_iter()
        .reduce(f64::min)
        .map_or(ExtValue::Undefined, |n| ExtValue::Json(number(n))))
}

fn max(items: &[Value], _args: &[Value]) -> ExtResult {
    let values = numbers(items)?;
    Ok(values
        .into_iter()
        .reduce(f64::max)
        .map_or(ExtValue::Undefined, |n| ExtValue::Json(number(n))))
}

/// Keep the first occurrence of every value, in order.
fn unique(items: &[Value], _args: &[Value]) -> ExtResult {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    ok(out)
}

fn compact(items: &[Value], _args: &[Value]) -> ExtResult {
    ok(items.iter().filter(|v| !is_blank(v)).cloned().collect::<Vec<_>>())
}

fn chunk(items: &[Value], args: &[Value]) -> ExtResult {
    let size = arg_f64(args, 0)?.ok_or("chunk size is required")?;
    if size < 1.0 || size.fract() != 0.0 {
        return Err(format!("chunk size must be a positive integer, got {size}"));
    }
    let chunks: Vec<Value> = items
        .chunks(size as usize)
        .map(|c| Value::Array(c.to_vec()))
        .collect();
    ok(chunks)
}

/// One field: the field's values. Several fields: objects with just those
/// fields. Non-object elements are skipped.
fn pluck(items: &[Value], args: &[Value]) -> ExtResult {
    let fields: Vec<&str> = args.iter().filter_map(Value::as_str).collect();
    if fields.is_empty() || fields.len() != args.len() {
        return Err("expected one or more field names".into());
    }
    let objects = items.iter().filter_map(Value::as_object);
    let out: Vec<Value> = match fields.as_slice() {
        [field] => objects
            .map(|obj| obj.get(*field).cloned().unwrap_or(Value::Null))
            .collect(),
        _ => objects
            .map(|obj| {
                let picked: Map<String, Value> = fields
                    .iter()
                    .filter_map(|f| obj.get(*f).map(|v| (f.to_string(), v.clone())))
                    .collect();
                Value::Object(picked)
            })
            .collect(),
    };
    ok(out)
}

fn is_empty(items: &[Value], _args: &[Value]) -> ExtResult {
    ok(items.is_empty())
}

fn is_not_empty(items: &[Value], _args: &[Value]) -> ExtResult {
    ok(!items.is_empty())
}
