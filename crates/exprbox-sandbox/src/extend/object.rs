//! Object extension functions.

use serde_json::Value;

use super::{arg_str, is_blank, ok, ExtResult, ObjectMap};

type ObjectFn = fn(&ObjectMap, &[Value]) -> ExtResult;

pub(super) const FUNCTIONS: &[(&str, ObjectFn)] = &[
    ("keys", keys),
    ("values", values),
    ("hasField", has_field),
    ("removeField", remove_field),
    ("compact", compact),
    ("isEmpty", is_empty),
    ("isNotEmpty", is_not_empty),
];

fn field_name<'a>(args: &'a [Value]) -> Result<&'a str, String> {
    arg_str(args, 0)?.ok_or_else(|| "a field name is required".to_string())
}

fn keys(map: &ObjectMap, _args: &[Value]) -> ExtResult {
    ok(map.keys().cloned().collect::<Vec<_>>())
}

fn values(map: &ObjectMap, _args: &[Value]) -> ExtResult {
    ok(map.values().cloned().collect::<Vec<_>>())
}

fn has_field(map: &ObjectMap, args: &[Value]) -> ExtResult {
    ok(map.contains_key(field_name(args)?))
}

fn remove_field(map: &ObjectMap, args: &[Value]) -> ExtResult {
    let field = field_name(args)?;
    let rest: ObjectMap = map
        .iter()
        .filter(|(k, _)| k.as_str() != field)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    ok(rest)
}

fn compact(map: &ObjectMap, _args: &[Value]) -> ExtResult {
    let kept: ObjectMap = map
        .iter()
        .filter(|(_, v)| !is_blank(v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    ok(kept)
}

fn is_empty(map: &ObjectMap, _args: &[Value]) -> ExtResult {
    ok(map.is_empty())
}

fn is_not_empty(map: &ObjectMap, _args: &[Value]) -> ExtResult {
    ok(!map.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extend::ExtValue;
    use serde_json::json;

    fn json(result: ExtResult) -> Value {
        match result.unwrap() {
            ExtValue::Json(v) => v,
            other => panic!("expected JSON, got {other:?}"),
        }
    }

    fn obj(v: Value) -> ObjectMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn keys_and_values_keep_order() {
        let m = obj(json!({ "z": 1, "a": 2 }));
        assert_eq!(json(keys(&m, &[])), json!(["z", "a"]));
        assert_eq!(json(values(&m, &[])), json!([1, 2]));
    }

    #[test]
    fn fields() {
        let m = obj(json!({ "a": 1, "b": null, "c": "" }));
        assert_eq!(json(has_field(&m, &[json!("b")])), json!(true));
        assert_eq!(json(has_field(&m, &[json!("x")])), json!(false));
        assert_eq!(json(remove_field(&m, &[json!("a")])), json!({ "b": null, "c": "" }));
        assert_eq!(json(compact(&m, &[])), json!({ "a": 1 }));
        assert!(has_field(&m, &[]).is_err());
    }

    #[test]
    fn emptiness() {
        assert_eq!(json(is_empty(&ObjectMap::new(), &[])), json!(true));
        assert_eq!(json(is_not_empty(&obj(json!({ "a": 1 })), &[])), json!(true));
    }
}
