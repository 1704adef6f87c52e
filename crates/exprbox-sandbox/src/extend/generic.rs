//! Functions defined for every value.

use serde_json::Value;

use super::{ok, ExtResult, ExtValue};

type GenericFn = fn(&ExtValue, &[Value]) -> ExtResult;

pub(super) const FUNCTIONS: &[(&str, GenericFn)] =
    &[("isEmpty", is_empty), ("isNotEmpty", is_not_empty)];

fn empty(value: &ExtValue) -> bool {
    match value {
        ExtValue::Undefined | ExtValue::Json(Value::Null) => true,
        ExtValue::Json(Value::String(s)) => s.is_empty(),
        ExtValue::Json(Value::Array(items)) => items.is_empty(),
        ExtValue::Json(Value::Object(map)) => map.is_empty(),
        ExtValue::Json(Value::Bool(_) | Value::Number(_)) | ExtValue::Date(_) => false,
    }
}

fn is_empty(value: &ExtValue, _args: &[Value]) -> ExtResult {
    ok(empty(value))
}

fn is_not_empty(value: &ExtValue, _args: &[Value]) -> ExtResult {
    ok(!empty(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nullish_values_are_empty() {
        assert!(empty(&ExtValue::Undefined));
        assert!(empty(&ExtValue::Json(Value::Null)));
        assert!(!empty(&ExtValue::Json(json!(0))));
        assert!(!empty(&ExtValue::Json(json!(false))));
        assert_eq!(
            is_not_empty(&ExtValue::Json(json!([1])), &[]).unwrap(),
            ExtValue::Json(json!(true))
        );
    }
}
