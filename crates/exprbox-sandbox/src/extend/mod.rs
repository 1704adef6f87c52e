//! Extension function dispatch.
//!
//! Expressions call helpers such as `name.toTitleCase()` or `items.sum()` as
//! if they were methods. The guard rewrites those calls into
//! `extend(value, name, args)`, and the guest runtime asks [`resolve`] which
//! table should handle the call. Resolution order:
//!
//! 1. the array table, for arrays
//! 2. the date table, for dates and for strings that are exact
//!    ISO-8601-with-milliseconds timestamps (unless the function is itself a
//!    date conversion)
//! 3. the string, number, object or boolean table, by type
//! 4. the value's own native method of that name (decided guest-side)
//! 5. the generic table
//!
//! If nothing resolves, [`invoke`] with [`ExtensionKind::Generic`] fails with
//! a message naming every category that does define the function.

mod array;
mod boolean;
mod date;
mod generic;
mod number;
mod object;
mod string;

use std::fmt;

use chrono::{DateTime, Utc};
use exprbox_error::{closest_match, codes, ExpressionError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};

pub use date::{iso_timestamp, parse_date_text};

/// Result of a single extension function.
pub(crate) type ExtResult = Result<ExtValue, String>;

/// A value crossing the extension boundary.
///
/// Dates travel separately from JSON because JSON has no date type and the
/// guest runtime must rebuild a `Date` object from the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ExtValue {
    /// `undefined`.
    Undefined,
    /// A point in time.
    Date(DateTime<Utc>),
    /// Any JSON value.
    Json(Value),
}

impl ExtValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Date(_) => "date",
            Self::Json(Value::Null) => "null",
            Self::Json(Value::Bool(_)) => "boolean",
            Self::Json(Value::Number(_)) => "number",
            Self::Json(Value::String(_)) => "string",
            Self::Json(Value::Array(_)) => "array",
            Self::Json(Value::Object(_)) => "object",
        }
    }
}

impl From<Value> for ExtValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Shape of a value as seen by the guest, used for resolution.
///
/// Strings carry their text so date-like strings can be detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Subject {
    /// An array (or array proxy).
    Array,
    /// A `Date` object.
    Date,
    /// A string primitive.
    String {
        /// The string value.
        text: String,
    },
    /// A number primitive.
    Number,
    /// A boolean primitive.
    Boolean,
    /// Any other object (or object proxy).
    Object,
    /// `null`, `undefined`, functions, symbols, bigints.
    Other,
}

/// An extension function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionKind {
    /// Array functions.
    Array,
    /// Date/time functions.
    Date,
    /// String functions.
    String,
    /// Number functions.
    Number,
    /// Object functions.
    Object,
    /// Boolean functions.
    Boolean,
    /// Functions defined for every value.
    Generic,
}

impl ExtensionKind {
    /// All tables, in resolution order.
    pub const ALL: [ExtensionKind; 7] = [
        Self::Array,
        Self::Date,
        Self::String,
        Self::Number,
        Self::Object,
        Self::Boolean,
        Self::Generic,
    ];

    /// Category name used in messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Date => "date",
            Self::String => "string",
            Self::Number => "number",
            Self::Object => "object",
            Self::Boolean => "boolean",
            Self::Generic => "generic",
        }
    }

    /// Whether this table defines `name`.
    pub fn defines(self, name: &str) -> bool {
        self.names().any(|n| n == name)
    }

    fn names(self) -> Box<dyn Iterator<Item = &'static str>> {
        fn keys<F: 'static>(table: &'static [(&'static str, F)]) -> Box<dyn Iterator<Item = &'static str>> {
            Box::new(table.iter().map(|(name, _)| *name))
        }
        match self {
            Self::Array => keys(array::FUNCTIONS),
            Self::Date => keys(date::FUNCTIONS),
            Self::String => keys(string::FUNCTIONS),
            Self::Number => keys(number::FUNCTIONS),
            Self::Object => keys(object::FUNCTIONS),
            Self::Boolean => keys(boolean::FUNCTIONS),
            Self::Generic => keys(generic::FUNCTIONS),
        }
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Date/time conversion functions. A date-like string asked to convert
/// itself is not coerced to a date first.
const DATE_CONVERSIONS: &[&str] = &["toDate", "toDateTime"];

/// Whether any table defines `name`.
///
/// The guard only rewrites method calls whose name passes this check.
pub fn is_extension_name(name: &str) -> bool {
    ExtensionKind::ALL.iter().any(|kind| kind.defines(name))
}

/// Categories defining `name`, excluding the generic table.
pub fn categories_defining(name: &str) -> Vec<ExtensionKind> {
    ExtensionKind::ALL
        .into_iter()
        .filter(|kind| *kind != ExtensionKind::Generic && kind.defines(name))
        .collect()
}

/// Pick the type-specific table for `name` on `subject`.
///
/// Returns `None` when no type-specific table applies; the caller then tries
/// the value's native method and finally the generic table.
pub fn resolve(subject: &Subject, name: &str) -> Option<ExtensionKind> {
    let candidate = match subject {
        Subject::Array => ExtensionKind::Array,
        Subject::Date => ExtensionKind::Date,
        Subject::String { text } => {
            if !DATE_CONVERSIONS.contains(&name)
                && ExtensionKind::Date.defines(name)
                && iso_timestamp(text).is_some()
            {
                return Some(ExtensionKind::Date);
            }
            ExtensionKind::String
        }
        Subject::Number => ExtensionKind::Number,
        Subject::Boolean => ExtensionKind::Boolean,
        Subject::Object => ExtensionKind::Object,
        Subject::Other => return None,
    };
    candidate.defines(name).then_some(candidate)
}

/// Run extension `name` from table `kind` on `value`.
pub fn invoke(
    kind: ExtensionKind,
    value: ExtValue,
    name: &str,
    args: &[Value],
) -> Result<ExtValue, ExpressionError> {
    let outcome = match kind {
        ExtensionKind::Generic => match lookup(generic::FUNCTIONS, name) {
            Some(f) => f(&value, args),
            None => return Err(unresolved(name, value.type_name())),
        },
        ExtensionKind::Array => {
            let Some(f) = lookup(array::FUNCTIONS, name) else {
                return Err(unresolved(name, value.type_name()));
            };
            match &value {
                ExtValue::Json(Value::Array(items)) => f(items, args),
                other => return Err(mismatch(kind, name, other)),
            }
        }
        ExtensionKind::Date => {
            let Some(f) = lookup(date::FUNCTIONS, name) else {
                return Err(unresolved(name, value.type_name()));
            };
            let dt = match &value {
                ExtValue::Date(dt) => *dt,
                ExtValue::Json(Value::String(s)) => match iso_timestamp(s) {
                    Some(dt) => dt,
                    None => return Err(mismatch(kind, name, &value)),
                },
                other => return Err(mismatch(kind, name, other)),
            };
            f(dt, args)
        }
        ExtensionKind::String => {
            let Some(f) = lookup(string::FUNCTIONS, name) else {
                return Err(unresolved(name, value.type_name()));
            };
            match &value {
                ExtValue::Json(Value::String(s)) => f(s, args),
                other => return Err(mismatch(kind, name, other)),
            }
        }
        ExtensionKind::Number => {
            let Some(f) = lookup(number::FUNCTIONS, name) else {
                return Err(unresolved(name, value.type_name()));
            };
            match value_f64(&value) {
                Some(n) => f(n, args),
                None => return Err(mismatch(kind, name, &value)),
            }
        }
        ExtensionKind::Object => {
            let Some(f) = lookup(object::FUNCTIONS, name) else {
                return Err(unresolved(name, value.type_name()));
            };
            match &value {
                ExtValue::Json(Value::Object(map)) => f(map, args),
                other => return Err(mismatch(kind, name, other)),
            }
        }
        ExtensionKind::Boolean => {
            let Some(f) = lookup(boolean::FUNCTIONS, name) else {
                return Err(unresolved(name, value.type_name()));
            };
            match &value {
                ExtValue::Json(Value::Bool(b)) => f(*b, args),
                other => return Err(mismatch(kind, name, other)),
            }
        }
    };
    outcome.map_err(|message| {
        ExpressionError::other(codes::EXPRESSION_ERROR, format!("{name}(): {message}"))
            .with_details(json!({ "function": name, "category": kind.as_str() }))
    })
}

fn lookup<F: Copy>(table: &[(&str, F)], name: &str) -> Option<F> {
    table.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
}

fn value_f64(value: &ExtValue) -> Option<f64> {
    match value {
        ExtValue::Json(Value::Number(n)) => n.as_f64(),
        _ => None,
    }
}

/// No table usable for `name` on a value of type `type_name`.
fn unresolved(name: &str, type_name: &str) -> ExpressionError {
    let categories = categories_defining(name);
    if categories.is_empty() {
        let mut details = json!({ "function": name, "categories": [] });
        let all_names = ExtensionKind::ALL.iter().flat_map(|kind| kind.names());
        if let Some(suggestion) = closest_match(name, all_names) {
            details["suggestion"] = json!(format!("did you mean \"{suggestion}\"?"));
        }
        return ExpressionError::other(
            codes::UNKNOWN_EXTENSION,
            format!("\"{name}\" is not an extension function"),
        )
        .with_details(details);
    }
    let names: Vec<&str> = categories.iter().map(|kind| kind.as_str()).collect();
    ExpressionError::other(
        codes::UNKNOWN_EXTENSION,
        format!(
            "\"{name}\" is not available on {type_name} values; it is defined for: {}",
            names.join(", ")
        ),
    )
    .with_details(json!({ "function": name, "categories": names, "valueType": type_name }))
}

fn mismatch(kind: ExtensionKind, name: &str, value: &ExtValue) -> ExpressionError {
    ExpressionError::other(
        codes::EXPRESSION_ERROR,
        format!(
            "\"{name}\" from the {kind} table cannot run on a {} value",
            value.type_name()
        ),
    )
}

// --- Argument and result helpers shared by the tables ---

pub(crate) fn arg<'a>(args: &'a [Value], index: usize) -> Option<&'a Value> {
    args.get(index).filter(|v| !v.is_null())
}

pub(crate) fn arg_f64(args: &[Value], index: usize) -> Result<Option<f64>, String> {
    match arg(args, index) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(format!("argument {} must be a number, got {other}", index + 1)),
    }
}

pub(crate) fn arg_str(args: &[Value], index: usize) -> Result<Option<&str>, String> {
    match arg(args, index) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(format!("argument {} must be a string, got {other}", index + 1)),
    }
}

/// JSON number for `n`: integral values become integers, non-finite values
/// become `null` the way `JSON.stringify` renders them.
pub(crate) fn number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Value::from(n as i64);
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

pub(crate) fn ok(value: impl Into<Value>) -> ExtResult {
    Ok(ExtValue::Json(value.into()))
}

/// Drop `null` and empty-string entries.
pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

pub(crate) type ObjectMap = Map<String, Value>;
