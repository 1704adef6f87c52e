#![warn(missing_docs)]

//! # exprbox-sandbox
//!
//! Sandboxed evaluation of workflow expressions.
//!
//! Runs short, untrusted JavaScript expressions in a deno_core isolate with a
//! hard heap ceiling and a per-call deadline. Host data is never copied into
//! the isolate wholesale: guest code reads it through lazy proxies that fetch
//! one property or array element at a time over three ops.
//!
//! ## Security model
//!
//! - **Guard rewriting**: expressions are parsed and rewritten before they reach
//!   V8; constructor/prototype pivots, reserved internal names and code
//!   generation are rejected up front
//! - **No ambient capabilities**: no `Deno`, no `eval`, no console, a frozen
//!   global object
//! - **Safe reflective globals**: `Object` and `Error` are wrapped so the
//!   stack-trace and prototype escape hatches are unreachable
//! - **Native function exclusion**: builtin host functions read as `undefined`
//!   and refuse to be called
//! - **Per-call data binding**: proxies from an earlier call are stale and
//!   cannot read the current call's data
//! - **Resource bounds**: watchdog termination on timeout, near-heap-limit
//!   termination on memory exhaustion
//!
//! ## Example
//!
//! ```no_run
//! use exprbox_sandbox::{EvaluateOptions, Evaluator, IsolateBridge, WorkflowData};
//! use serde_json::json;
//!
//! let mut evaluator = Evaluator::new(IsolateBridge::default());
//! let data = WorkflowData::from_json(json!({ "$json": { "email": "a@example.com" } }))?;
//! let out = evaluator.evaluate("$json.email.toUpperCase()", &data, &EvaluateOptions::default())?;
//! assert_eq!(out, json!("A@EXAMPLE.COM"));
//! # Ok::<(), exprbox_error::ExpressionError>(())
//! ```

pub mod bridge;
pub mod cache;
pub mod data;
pub mod engine;
pub mod evaluator;
pub mod extend;
pub mod guard;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod ops;
pub mod pool;
pub mod proxy;
mod watchdog;

pub use bridge::{Bridge, BridgeConfig, ExecuteOptions, ExecutionStats};
pub use data::{DataRef, DataValue, FunctionKind, HostFunction, WorkflowData};
pub use engine::IsolateBridge;
pub use evaluator::{EvaluateOptions, Evaluator};
pub use exprbox_error::{ErrorContext, ExpressionError};
pub use guard::{guard_expression, guard_expression_with_hooks, GuardHook, GuardHooks, GuardedExpression};
pub use pool::{EvaluatorPool, PoolConfig};
