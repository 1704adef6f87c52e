//! Boolean extension functions.

use serde_json::Value;

use super::{ok, ExtResult};

type BooleanFn = fn(bool, &[Value]) -> ExtResult;

pub(super) const FUNCTIONS: &[(&str, BooleanFn)] = &[("toNumber", to_number)];

fn to_number(b: bool, _args: &[Value]) -> ExtResult {
    ok(u8::from(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extend::ExtValue;
    use serde_json::json;

    #[test]
    fn to_number_is_zero_or_one() {
        assert_eq!(to_number(true, &[]).unwrap(), ExtValue::Json(json!(1)));
        assert_eq!(to_number(false, &[]).unwrap(), ExtValue::Json(json!(0)));
    }
}
