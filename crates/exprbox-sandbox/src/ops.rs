//! deno_core op definitions for the expression sandbox.
//!
//! The `#[op2]` macro generates additional public items (v8 function pointers,
//! metadata structs) that cannot carry doc comments. We suppress `missing_docs`
//! at the module level; all actual functions and types are documented below.
#![allow(missing_docs)]

use deno_core::op2;
use deno_core::OpState;
use serde::Serialize;
use serde_json::Value;

use crate::extend::{self, ExtValue, ExtensionKind, Subject};
use crate::proxy::{self, ActiveData, PathKey, ProxyError, ProxyRead};

/// Result of a fallible op, as the guest runtime sees it.
///
/// Ops never throw across the boundary; the runtime bundle turns the error
/// arm into a coded `ExpressionError` on the guest side.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CallOutcome<T> {
    Ok {
        value: T,
    },
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
}

impl<T> From<ProxyError> for CallOutcome<T> {
    fn from(e: ProxyError) -> Self {
        Self::Error {
            code: e.code.to_string(),
            message: e.message,
            details: None,
        }
    }
}

impl<T> From<exprbox_error::ExpressionError> for CallOutcome<T> {
    fn from(e: exprbox_error::ExpressionError) -> Self {
        Self::Error {
            code: e.code().to_string(),
            message: e.message().to_string(),
            details: e.details().cloned(),
        }
    }
}

/// Run `f` against the call's data if `generation` is still current.
fn with_active<T>(
    active: Option<&mut ActiveData>,
    generation: u32,
    f: impl FnOnce(&mut ActiveData) -> Result<T, ProxyError>,
) -> Result<T, ProxyError> {
    match active {
        Some(active) if active.generation == generation => f(active),
        _ => Err(ProxyError::stale()),
    }
}

/// Describe the value at `path`.
#[op2]
#[serde]
pub fn op_expr_value_at_path(
    state: &mut OpState,
    #[smi] generation: u32,
    #[serde] path: Vec<PathKey>,
) -> ProxyRead {
    with_active(state.try_borrow_mut::<ActiveData>(), generation, |active| {
        active.stats.value_reads += 1;
        proxy::value_at_path(&active.data, &path)
    })
    .unwrap_or_else(ProxyRead::from)
}

/// Describe one element of the array at `path`.
#[op2]
#[serde]
pub fn op_expr_array_element_at_path(
    state: &mut OpState,
    #[smi] generation: u32,
    #[serde] path: Vec<PathKey>,
    #[smi] index: u32,
) -> ProxyRead {
    with_active(state.try_borrow_mut::<ActiveData>(), generation, |active| {
        active.stats.element_reads += 1;
        proxy::array_element_at_path(&active.data, &path, index as usize)
    })
    .unwrap_or_else(ProxyRead::from)
}

/// Call the host function at `path`.
#[op2]
#[serde]
pub fn op_expr_call_function_at_path(
    state: &mut OpState,
    #[smi] generation: u32,
    #[serde] path: Vec<PathKey>,
    #[serde] args: Vec<Value>,
) -> CallOutcome<Value> {
    let outcome = with_active(state.try_borrow_mut::<ActiveData>(), generation, |active| {
        active.stats.function_calls += 1;
        proxy::call_function_at_path(&active.data, &path, &args)
    });
    match outcome {
        Ok(value) => CallOutcome::Ok { value },
        Err(e) => {
            tracing::debug!(code = e.code, "host function call failed");
            e.into()
        }
    }
}

/// Pick the extension table for `name` on a value of shape `subject`.
#[op2]
#[serde]
pub fn op_expr_extension_resolve(
    #[serde] subject: Subject,
    #[string] name: String,
) -> Option<ExtensionKind> {
    extend::resolve(&subject, &name)
}

/// Run extension `name` from table `kind`.
#[op2]
#[serde]
pub fn op_expr_extension_call(
    #[serde] kind: ExtensionKind,
    #[serde] value: ExtValue,
    #[string] name: String,
    #[serde] args: Vec<Value>,
) -> CallOutcome<ExtValue> {
    match extend::invoke(kind, value, &name, &args) {
        Ok(value) => CallOutcome::Ok { value },
        Err(e) => e.into(),
    }
}

/// Log a message from guest code. Only reachable when debug logging is on.
#[op2(fast)]
pub fn op_expr_log(#[string] level: &str, #[string] msg: &str) {
    match level {
        "error" => tracing::error!(target: "exprbox::sandbox::js", "{}", msg),
        "warn" => tracing::warn!(target: "exprbox::sandbox::js", "{}", msg),
        "debug" => tracing::debug!(target: "exprbox::sandbox::js", "{}", msg),
        _ => tracing::info!(target: "exprbox::sandbox::js", "{}", msg),
    }
}

deno_core::extension!(
    expr_ext,
    ops = [
        op_expr_value_at_path,
        op_expr_array_element_at_path,
        op_expr_call_function_at_path,
        op_expr_extension_resolve,
        op_expr_extension_call,
        op_expr_log
    ],
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::WorkflowData;
    use serde_json::json;

    fn active(generation: u32) -> ActiveData {
        let data = WorkflowData::from_json(json!({ "$json": { "a": [1, 2] } })).unwrap();
        ActiveData::new(generation, data)
    }

    #[test]
    fn current_generation_reads_and_counts() {
        let mut active = active(4);
        let read = with_active(Some(&mut active), 4, |active| {
            active.stats.value_reads += 1;
            proxy::value_at_path(&active.data, &[PathKey::from("$json"), PathKey::from("a")])
        })
        .unwrap();
        assert_eq!(read, ProxyRead::Array { length: 2 });
        assert_eq!(active.stats.value_reads, 1);
    }

    #[test]
    fn old_generation_is_stale() {
        let mut active = active(4);
        let err = with_active(Some(&mut active), 3, |_| Ok(())).unwrap_err();
        assert_eq!(err.code, exprbox_error::codes::STALE_REFERENCE);
        assert_eq!(active.stats.value_reads, 0);
    }

    #[test]
    fn missing_data_is_stale() {
        let err = with_active(None, 0, |_| Ok(())).unwrap_err();
        assert_eq!(err.code, exprbox_error::codes::STALE_REFERENCE);
    }

    #[test]
    fn outcome_wire_shape() {
        let ok: CallOutcome<Value> = CallOutcome::Ok { value: json!(1) };
        assert_eq!(serde_json::to_value(ok).unwrap(), json!({ "status": "ok", "value": 1 }));
        let err: CallOutcome<Value> = ProxyError::stale().into();
        assert_eq!(
            serde_json::to_value(err).unwrap()["code"],
            json!("STALE_REFERENCE")
        );
    }
}
