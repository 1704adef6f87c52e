#![warn(missing_docs)]

//! Typed error family for sandboxed expression evaluation.
//!
//! Provides [`ExpressionError`], the single error type surfaced by bridges and
//! evaluators, plus [`RuntimeError`], the shape a guest-side failure has when it
//! crosses back out of the isolate. Translation between the two is keyed on the
//! guest `code` field (see [`codes`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error codes shared by the guest runtime and the host.
pub mod codes {
    /// The isolate exceeded its heap ceiling.
    pub const MEMORY_LIMIT: &str = "MEMORY_LIMIT";
    /// The call exceeded its effective timeout.
    pub const TIMEOUT: &str = "TIMEOUT";
    /// Guard rejection or a blocked reflective access.
    pub const SECURITY_VIOLATION: &str = "SECURITY_VIOLATION";
    /// The expression did not parse.
    pub const SYNTAX_ERROR: &str = "SYNTAX_ERROR";
    /// Fallback code for generic failures without a guest-supplied code.
    pub const EXPRESSION_ERROR: &str = "EXPRESSION_ERROR";
    /// `execute()` was called before `initialize()`.
    pub const BRIDGE_NOT_INITIALIZED: &str = "BRIDGE_NOT_INITIALIZED";
    /// The bridge was used after `dispose()`.
    pub const BRIDGE_DISPOSED: &str = "BRIDGE_DISPOSED";
    /// The runtime bundle failed to load or is missing an export.
    pub const BRIDGE_INIT_FAILED: &str = "BRIDGE_INIT_FAILED";
    /// An extension function was not found for the value it was called on.
    pub const UNKNOWN_EXTENSION: &str = "UNKNOWN_EXTENSION";
    /// Two guard rewrites touched the same source range.
    pub const GUARD_CONFLICT: &str = "GUARD_CONFLICT";
    /// A data proxy from an earlier call was used.
    pub const STALE_REFERENCE: &str = "STALE_REFERENCE";
    /// A data path did not resolve against the current call's data.
    pub const UNRESOLVED_PATH: &str = "UNRESOLVED_PATH";
    /// A call targeted a value that is not a function.
    pub const NOT_A_FUNCTION: &str = "NOT_A_FUNCTION";
    /// A host function returned an error.
    pub const HOST_FUNCTION_ERROR: &str = "HOST_FUNCTION_ERROR";
    /// The result could not be copied out of the isolate.
    pub const CIRCULAR_RESULT: &str = "CIRCULAR_RESULT";
}

/// Caller-supplied context attached to an error after the fact.
///
/// The bridge never fills this in; evaluators do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    /// The raw expression text that failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Identifier of the workflow the expression belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Identifier of the node the expression belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Run index of the node execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_index: Option<usize>,
    /// Index of the input item being evaluated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_index: Option<usize>,
}

impl ErrorContext {
    /// Returns true when no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Payload shared by every [`ExpressionError`] variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    /// Human-readable message, preserved from the guest when translated.
    pub message: String,
    /// Machine-readable code.
    pub code: String,
    /// Optional structured details.
    pub details: Option<Value>,
    /// Caller-attached context.
    pub context: ErrorContext,
}

impl ErrorReport {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            details: None,
            context: ErrorContext::default(),
        }
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// A structured error raised inside the isolate, as described by the runtime
/// bundle's `describeError` helper.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RuntimeError {
    /// Guest error constructor name (`TypeError`, `ExpressionError`, ...).
    #[serde(default)]
    pub name: Option<String>,
    /// Guest error message.
    #[serde(default)]
    pub message: String,
    /// Guest `code` tag, if the error carried one.
    #[serde(default)]
    pub code: Option<String>,
    /// Guest `details`, already copied out of the isolate.
    #[serde(default)]
    pub details: Option<Value>,
}

/// Errors from expression guarding, execution and bridge lifecycle.
///
/// Every variant carries an [`ErrorReport`]; use [`ExpressionError::code`] for
/// programmatic matching.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ExpressionError {
    /// The isolate exceeded its configured memory ceiling.
    #[error("{0}")]
    MemoryLimit(ErrorReport),

    /// The call exceeded its effective timeout.
    #[error("{0}")]
    Timeout(ErrorReport),

    /// Guard rejection or blocked reflective access. Never retried.
    #[error("{0}")]
    SecurityViolation(ErrorReport),

    /// The expression did not parse.
    #[error("{0}")]
    Syntax(ErrorReport),

    /// Anything else.
    #[error("{0}")]
    Expression(ErrorReport),
}

impl ExpressionError {
    /// Memory-limit failure.
    pub fn memory_limit(message: impl Into<String>) -> Self {
        Self::MemoryLimit(ErrorReport::new(codes::MEMORY_LIMIT, message))
    }

    /// Timeout failure.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(ErrorReport::new(codes::TIMEOUT, message))
    }

    /// Security violation.
    pub fn security_violation(message: impl Into<String>) -> Self {
        Self::SecurityViolation(ErrorReport::new(codes::SECURITY_VIOLATION, message))
    }

    /// Syntax error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax(ErrorReport::new(codes::SYNTAX_ERROR, message))
    }

    /// Generic error with an explicit code.
    pub fn other(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Expression(ErrorReport::new(code, message))
    }

    /// Bridge used before `initialize()` completed.
    pub fn not_initialized() -> Self {
        Self::other(
            codes::BRIDGE_NOT_INITIALIZED,
            "bridge is not initialized; call initialize() before execute()",
        )
    }

    /// Bridge used after `dispose()`.
    pub fn disposed() -> Self {
        Self::other(codes::BRIDGE_DISPOSED, "bridge has been disposed")
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.report_mut().details = Some(details);
        self
    }

    /// Attach caller context. The code and details are left untouched.
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.report_mut().context = context;
        self
    }

    /// The shared payload.
    pub fn report(&self) -> &ErrorReport {
        match self {
            Self::MemoryLimit(r)
            | Self::Timeout(r)
            | Self::SecurityViolation(r)
            | Self::Syntax(r)
            | Self::Expression(r) => r,
        }
    }

    fn report_mut(&mut self) -> &mut ErrorReport {
        match self {
            Self::MemoryLimit(r)
            | Self::Timeout(r)
            | Self::SecurityViolation(r)
            | Self::Syntax(r)
            | Self::Expression(r) => r,
        }
    }

    /// Machine-readable code.
    pub fn code(&self) -> &str {
        &self.report().code
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.report().message
    }

    /// Structured details, if any.
    pub fn details(&self) -> Option<&Value> {
        self.report().details.as_ref()
    }

    /// Caller context.
    pub fn context(&self) -> &ErrorContext {
        &self.report().context
    }

    /// Whether the caller may reasonably retry, for example with a larger
    /// budget. The bridge itself never retries.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Convert to a structured JSON error for display to expression authors.
    ///
    /// Returns a JSON object with `error`, `code`, `message`, `retryable`,
    /// and optionally `details`, `context` and `suggested_fix` (taken from
    /// `details.suggestion` when present).
    pub fn to_structured_error(&self) -> Value {
        let report = self.report();
        let mut obj = serde_json::json!({
            "error": true,
            "code": report.code,
            "message": report.message,
            "retryable": self.retryable(),
        });

        if let Some(details) = &report.details {
            if let Some(fix) = details.get("suggestion").and_then(Value::as_str) {
                obj["suggested_fix"] = Value::String(format!("Did you mean '{fix}'?"));
            }
            obj["details"] = details.clone();
        }
        if !report.context.is_empty() {
            obj["context"] = serde_json::to_value(&report.context).unwrap_or(Value::Null);
        }

        obj
    }
}

impl From<RuntimeError> for ExpressionError {
    fn from(err: RuntimeError) -> Self {
        let code = err
            .code
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| codes::EXPRESSION_ERROR.to_string());
        let report = ErrorReport {
            message: err.message,
            details: err.details.filter(|d| !d.is_null()),
            context: ErrorContext::default(),
            code,
        };
        match report.code.as_str() {
            codes::MEMORY_LIMIT => Self::MemoryLimit(report),
            codes::TIMEOUT => Self::Timeout(report),
            codes::SECURITY_VIOLATION => Self::SecurityViolation(report),
            codes::SYNTAX_ERROR => Self::Syntax(report),
            _ => Self::Expression(report),
        }
    }
}

/// Find the closest candidate within edit distance 2, for "did you mean" hints.
pub fn closest_match<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let mut best: Option<(usize, &'a str)> = None;
    for candidate in candidates {
        let dist = strsim::levenshtein(name, candidate);
        if dist <= 2 && best.is_none_or(|(d, _)| dist < d) {
            best = Some((dist, candidate));
        }
    }
    best.map(|(_, c)| c)
}

// Compile-time assertion: ExpressionError must be Send + Sync + 'static
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<ExpressionError>();
};
