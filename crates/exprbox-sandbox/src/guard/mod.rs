//! Static guard rewriting for expression text.
//!
//! Uses `oxc_parser` to parse an expression into an AST, rejects the syntactic
//! shapes that lead to sandbox escapes, and rewrites the rest into a guarded
//! body the isolate engine can run:
//!
//! - property names that pivot to constructors or prototypes are rejected in
//!   every syntactic position (bare, dotted, bracketed, object keys,
//!   destructuring keys)
//! - the two internal names ([`DATA_IDENT`], [`SANITIZE_IDENT`]) can never be
//!   bound by the expression
//! - free identifiers resolve through the per-call data container
//! - dynamic bracket keys are routed through the runtime sanitizer
//! - method calls whose name is an extension function go through extension
//!   dispatch
//! - the whole body is wrapped in a try/catch that hands failures to the
//!   runtime error dispatcher `E`
//!
//! Callers may add their own AST transforms through [`GuardHooks`].

mod edits;
mod walker;

use std::fmt;
use std::sync::Arc;

use exprbox_error::{codes, ExpressionError};
use oxc_allocator::Allocator;
use oxc_ast::ast::{Program, Statement};
use oxc_parser::{ParseOptions, Parser};
use oxc_span::{GetSpan, SourceType};
use serde_json::json;

pub use edits::Edit;
use walker::Rewriter;

/// Name of the per-call data container inside guarded code.
pub const DATA_IDENT: &str = "__data";

/// Name of the runtime key sanitizer inside guarded code.
pub const SANITIZE_IDENT: &str = "__sanitize";

/// Identifiers an expression may never declare, bind or assign.
pub const RESERVED_IDENTIFIERS: &[&str] = &[DATA_IDENT, SANITIZE_IDENT];

/// Property names that are rejected wherever they appear syntactically.
pub const FORBIDDEN_PROPERTIES: &[&str] = &[
    "constructor",
    "__proto__",
    "prototype",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

/// Maximum nesting depth before we reject the code.
/// Prevents parser stack overflow on deeply nested input.
const MAX_NESTING_DEPTH: usize = 256;

/// Why an expression was rejected by the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GuardViolation {
    /// Parser could not parse the expression.
    ParseError(String),
    /// Expression exceeds maximum nesting depth.
    NestingTooDeep {
        /// Maximum allowed nesting depth.
        max: usize,
        /// Actual detected nesting depth.
        actual: usize,
    },
    /// A forbidden property name appeared in the source.
    ForbiddenProperty {
        /// The offending name.
        name: String,
    },
    /// The expression tried to bind a reserved internal identifier.
    ReservedIdentifier {
        /// The offending name.
        name: String,
    },
    /// Another banned AST pattern was detected.
    BannedPattern {
        /// Stable rule identifier.
        rule: &'static str,
        /// Human-readable description of the violation.
        description: String,
    },
    /// Two rewrites touched overlapping source ranges.
    EditConflict {
        /// Description of the overlap.
        message: String,
    },
    /// A caller-supplied hook failed.
    Hook {
        /// Hook name.
        hook: String,
        /// Failure message.
        message: String,
    },
}

impl GuardViolation {
    /// Stable rule identifier used in error details.
    pub fn rule(&self) -> &'static str {
        match self {
            Self::ParseError(_) => "parse",
            Self::NestingTooDeep { .. } => "nesting-depth",
            Self::ForbiddenProperty { .. } => "forbidden-property",
            Self::ReservedIdentifier { .. } => "reserved-identifier",
            Self::BannedPattern { rule, .. } => rule,
            Self::EditConflict { .. } => "edit-conflict",
            Self::Hook { .. } => "hook",
        }
    }
}

impl fmt::Display for GuardViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseError(msg) => write!(f, "parse error: {msg}"),
            Self::NestingTooDeep { max, actual } => {
                write!(f, "nesting depth {actual} exceeds maximum {max}")
            }
            Self::ForbiddenProperty { name } => {
                write!(f, "Cannot access \"{name}\" due to security concerns")
            }
            Self::ReservedIdentifier { name } => {
                write!(f, "\"{name}\" is a reserved identifier and cannot be declared or assigned")
            }
            Self::BannedPattern { description, .. } => write!(f, "{description}"),
            Self::EditConflict { message } => write!(f, "conflicting guard rewrites: {message}"),
            Self::Hook { hook, message } => write!(f, "guard hook '{hook}' failed: {message}"),
        }
    }
}

impl From<GuardViolation> for ExpressionError {
    fn from(v: GuardViolation) -> Self {
        let rule = v.rule();
        let message = v.to_string();
        match v {
            GuardViolation::ParseError(_) => {
                ExpressionError::syntax(message).with_details(json!({ "rule": rule }))
            }
            GuardViolation::ForbiddenProperty { name }
            | GuardViolation::ReservedIdentifier { name } => {
                ExpressionError::security_violation(message)
                    .with_details(json!({ "rule": rule, "identifier": name }))
            }
            GuardViolation::NestingTooDeep { max, actual } => {
                ExpressionError::security_violation(message)
                    .with_details(json!({ "rule": rule, "max": max, "actual": actual }))
            }
            GuardViolation::BannedPattern { .. } => {
                ExpressionError::security_violation(message).with_details(json!({ "rule": rule }))
            }
            GuardViolation::EditConflict { .. } => {
                ExpressionError::other(codes::GUARD_CONFLICT, message)
                    .with_details(json!({ "rule": rule }))
            }
            GuardViolation::Hook { hook, .. } => ExpressionError::other("GUARD_HOOK_FAILED", message)
                .with_details(json!({ "rule": rule, "hook": hook })),
        }
    }
}

/// A caller-supplied AST transform.
///
/// Hooks see the parsed program and the original source and return text
/// edits. They never see the output of the built-in rewrites; all edits are
/// computed against the same original program and spliced together.
pub trait GuardHook: Send + Sync {
    /// Name used in error reports.
    fn name(&self) -> &str;

    /// Produce edits for `program`.
    fn transform(&self, program: &Program<'_>, source: &str) -> Result<Vec<Edit>, GuardViolation>;
}

/// Pre- and post-transform hook lists.
///
/// `before` hooks' edits are ordered ahead of the built-in rewrites, `after`
/// hooks' edits behind them. With no hooks only the built-in rewriting runs.
#[derive(Clone, Default)]
pub struct GuardHooks {
    /// Hooks whose edits precede the built-in rewrites.
    pub before: Vec<Arc<dyn GuardHook>>,
    /// Hooks whose edits follow the built-in rewrites.
    pub after: Vec<Arc<dyn GuardHook>>,
}

impl GuardHooks {
    /// Whether no hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

impl fmt::Debug for GuardHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |hooks: &[Arc<dyn GuardHook>]| {
            hooks.iter().map(|h| h.name().to_string()).collect::<Vec<_>>()
        };
        f.debug_struct("GuardHooks")
            .field("before", &names(&self.before))
            .field("after", &names(&self.after))
            .finish()
    }
}

/// Shape of the expression source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionForm {
    /// A single expression; its value is the result.
    Expression,
    /// A statement list run as a function body; `return` yields the result.
    Statements,
}

/// A guarded expression body, ready for `Bridge::execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedExpression {
    code: String,
    form: ExpressionForm,
}

impl GuardedExpression {
    /// Guarded code text.
    pub fn as_str(&self) -> &str {
        &self.code
    }

    /// Form the source was recognised as.
    pub fn form(&self) -> ExpressionForm {
        self.form
    }

    /// Consume into the guarded code text.
    pub fn into_string(self) -> String {
        self.code
    }
}

/// Check nesting depth of brackets/braces/parens BEFORE parsing.
pub fn check_nesting_depth(code: &str) -> Result<(), GuardViolation> {
    let mut depth: usize = 0;
    let mut max_depth: usize = 0;
    for ch in code.chars() {
        match ch {
            '{' | '[' | '(' => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            '}' | ']' | ')' => {
                depth = depth.saturating_sub(1);
            }
            _ => {}
        }
    }
    if max_depth > MAX_NESTING_DEPTH {
        return Err(GuardViolation::NestingTooDeep {
            max: MAX_NESTING_DEPTH,
            actual: max_depth,
        });
    }
    Ok(())
}

/// Guard `source` with no extra hooks.
pub fn guard_expression(source: &str) -> Result<GuardedExpression, GuardViolation> {
    guard_expression_with_hooks(source, &GuardHooks::default())
}

/// Parse, validate and rewrite `source` into a guarded body.
pub fn guard_expression_with_hooks(
    source: &str,
    hooks: &GuardHooks,
) -> Result<GuardedExpression, GuardViolation> {
    check_nesting_depth(source)?;

    let allocator = Allocator::default();
    let options = ParseOptions {
        allow_return_outside_function: true,
        ..ParseOptions::default()
    };
    let ret = Parser::new(&allocator, source, SourceType::mjs())
        .with_options(options)
        .parse();

    if ret.panicked {
        return Err(GuardViolation::ParseError(
            "parser panicked on malformed input".into(),
        ));
    }
    if let Some(err) = ret.errors.first() {
        return Err(GuardViolation::ParseError(err.to_string()));
    }
    let program = &ret.program;

    let mut edits = Vec::new();
    for hook in &hooks.before {
        edits.extend(run_hook(hook.as_ref(), program, source)?);
    }
    edits.extend(Rewriter::new().rewrite_program(program)?);
    for hook in &hooks.after {
        edits.extend(run_hook(hook.as_ref(), program, source)?);
    }

    let (form, start, end) = match (&program.directives[..], &program.body[..]) {
        ([], [Statement::ExpressionStatement(stmt)]) => {
            let span = stmt.expression.span();
            (ExpressionForm::Expression, span.start, span.end)
        }
        ([directive], []) => (
            ExpressionForm::Expression,
            directive.expression.span.start,
            directive.expression.span.end,
        ),
        _ => (ExpressionForm::Statements, 0, source.len() as u32),
    };
    let body = edits::apply(source, start, end, edits)?;
    Ok(GuardedExpression {
        code: wrap(&body, form),
        form,
    })
}

fn run_hook(
    hook: &dyn GuardHook,
    program: &Program<'_>,
    source: &str,
) -> Result<Vec<Edit>, GuardViolation> {
    hook.transform(program, source).map_err(|e| match e {
        GuardViolation::Hook { .. }
        | GuardViolation::BannedPattern { .. }
        | GuardViolation::ForbiddenProperty { .. }
        | GuardViolation::ReservedIdentifier { .. } => e,
        other => GuardViolation::Hook {
            hook: hook.name().to_string(),
            message: other.to_string(),
        },
    })
}

fn wrap(body: &str, form: ExpressionForm) -> String {
    let inner = match form {
        ExpressionForm::Expression => format!("return ({body});"),
        ExpressionForm::Statements => format!("return (() => {{\n{body}\n}})();"),
    };
    format!("var {DATA_IDENT} = this;\ntry {{\n{inner}\n}} catch (e) {{\nreturn E(e, {DATA_IDENT});\n}}")
}

#[cfg(test)]
mod tests;
